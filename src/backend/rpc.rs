// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Socket protocol spoken with inference servers.
//!
//! Every message is a 4-byte big-endian length followed by a MessagePack
//! body with named fields.
//! The client sends one [`Request`] and reads one [`Response`], except for
//! [`Request::DetectSequence`], which is answered by any number of
//! [`Response::SequenceFrame`] messages and a final
//! [`Response::SequenceEnd`].

use crate::config::RpcConfig;
use crate::error::{AnnotationError, Result};
use crate::models::{Bbox, Detection, Polygon};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;

/// Largest accepted message body.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// How a frame is handed to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRef {
    /// Path on a file system shared with the server.
    Path(String),
    /// Encoded image file contents.
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl FrameRef {
    pub fn for_frame(path: &Path, send_bytes: bool) -> Result<Self> {
        if send_bytes {
            Ok(FrameRef::Bytes(std::fs::read(path)?))
        } else {
            Ok(FrameRef::Path(path.to_string_lossy().into_owned()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    TrackerInit {
        frame: FrameRef,
        bbox: Bbox,
    },
    Track {
        frame: FrameRef,
    },
    Detect {
        frame: FrameRef,
        crop: Option<Bbox>,
        model: String,
    },
    DetectSequence {
        directory: String,
        frame_count: usize,
        crop: Option<Bbox>,
        model: String,
    },
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ack,
    Tracked {
        bbox: Bbox,
        polygon: Polygon,
    },
    Lost,
    Detections {
        detections: Vec<Detection>,
    },
    SequenceFrame {
        frame: usize,
        detections: Vec<Detection>,
    },
    SequenceEnd,
    Error {
        message: String,
    },
}

/// Write one length-prefixed message.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let body = rmp_serde::to_vec_named(message)
        .map_err(|e| AnnotationError::protocol(format!("unencodable message: {}", e)))?;
    if body.len() > MAX_MESSAGE_LEN {
        return Err(AnnotationError::protocol(format!(
            "outgoing message of {} bytes exceeds limit",
            body.len()
        )));
    }
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed message.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            AnnotationError::protocol("connection closed by peer")
        } else {
            e.into()
        }
    })?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(AnnotationError::protocol(format!(
            "incoming message of {} bytes exceeds limit",
            len
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    rmp_serde::from_slice(&body)
        .map_err(|e| AnnotationError::protocol(format!("undecodable message: {}", e)))
}

/// A connection to one inference server.
#[derive(Debug)]
pub struct RpcClient {
    address: String,
    stream: TcpStream,
    send_image_bytes: bool,
}

impl RpcClient {
    /// Connect with the configured timeouts.
    pub fn connect(address: &str, config: &RpcConfig) -> Result<Self> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| AnnotationError::connection(address, e))?;

        let mut last_error = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "address resolved to nothing",
        );
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(config.read_timeout())
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|e| AnnotationError::connection(address, e))?;
                    log::debug!("Connected to inference server at {}", addr);
                    return Ok(Self {
                        address: address.to_string(),
                        stream,
                        send_image_bytes: config.send_image_bytes,
                    });
                }
                Err(e) => last_error = e,
            }
        }
        Err(AnnotationError::connection(address, last_error))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Reference to `path` in the form this connection sends frames.
    pub fn frame_ref(&self, path: &Path) -> Result<FrameRef> {
        FrameRef::for_frame(path, self.send_image_bytes)
    }

    pub fn send(&mut self, request: &Request) -> Result<()> {
        write_message(&mut self.stream, request).map_err(|e| self.io_to_connection(e))
    }

    /// Read the next response. A server-side error becomes
    /// [`AnnotationError::Remote`].
    pub fn receive(&mut self) -> Result<Response> {
        match read_message(&mut self.stream).map_err(|e| self.io_to_connection(e))? {
            Response::Error { message } => Err(AnnotationError::remote(message)),
            response => Ok(response),
        }
    }

    pub fn call(&mut self, request: &Request) -> Result<Response> {
        self.send(request)?;
        self.receive()
    }

    /// Ask the server to release its model and close the socket. Errors
    /// are logged only.
    pub fn shutdown(&mut self) {
        if let Err(e) = write_message(&mut self.stream, &Request::Terminate) {
            log::debug!("Terminate to {} not delivered: {}", self.address, e);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn io_to_connection(&self, error: AnnotationError) -> AnnotationError {
        match error {
            AnnotationError::Io(source) => AnnotationError::connection(self.address.clone(), source),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_length_prefix() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, &Request::Terminate).unwrap();
        let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        assert_eq!(len, buffer.len() - 4);

        let back: Request = read_message(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(back, Request::Terminate);
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut buffer = Vec::new();
        let first = Response::SequenceFrame {
            frame: 0,
            detections: vec![Detection::from_bbox(1, 2, Bbox::new(0.0, 0.0, 5.0, 5.0))],
        };
        write_message(&mut buffer, &first).unwrap();
        write_message(&mut buffer, &Response::SequenceEnd).unwrap();

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_message::<_, Response>(&mut cursor).unwrap(), first);
        assert_eq!(
            read_message::<_, Response>(&mut cursor).unwrap(),
            Response::SequenceEnd
        );
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut buffer = ((MAX_MESSAGE_LEN + 1) as u32).to_be_bytes().to_vec();
        buffer.extend_from_slice(&[0x80]);
        let err = read_message::<_, Response>(&mut Cursor::new(buffer)).unwrap_err();
        assert!(matches!(err, AnnotationError::Protocol(_)));
    }

    #[test]
    fn test_truncated_stream_is_protocol_error() {
        let err = read_message::<_, Response>(&mut Cursor::new(vec![0u8, 0])).unwrap_err();
        assert!(matches!(err, AnnotationError::Protocol(_)));
    }

    #[test]
    fn test_garbage_body_is_protocol_error() {
        let mut buffer = 3u32.to_be_bytes().to_vec();
        buffer.extend_from_slice(b"???");
        let err = read_message::<_, Response>(&mut Cursor::new(buffer)).unwrap_err();
        assert!(matches!(err, AnnotationError::Protocol(_)));
    }

    #[test]
    fn test_wire_shape() {
        let request = Request::Detect {
            frame: FrameRef::Path("/data/clip/0001.png".to_string()),
            crop: None,
            model: "YOLO".to_string(),
        };
        let mut buffer = Vec::new();
        write_message(&mut buffer, &request).unwrap();
        let value: serde_json::Value = rmp_serde::from_slice(&buffer[4..]).unwrap();
        assert_eq!(value["op"], "detect");
        assert_eq!(value["frame"]["path"], "/data/clip/0001.png");
        assert_eq!(value["model"], "YOLO");
    }

    #[test]
    fn test_raw_frame_bytes_stay_compact() {
        let image = vec![200u8; 20 * 1024 * 1024];
        let request = Request::Track {
            frame: FrameRef::Bytes(image.clone()),
        };
        let mut buffer = Vec::new();
        write_message(&mut buffer, &request).unwrap();
        assert!(buffer.len() < image.len() + 64, "body of {} bytes", buffer.len());

        match read_message::<_, Request>(&mut Cursor::new(buffer)).unwrap() {
            Request::Track {
                frame: FrameRef::Bytes(bytes),
            } => assert_eq!(bytes, image),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = RpcClient::connect(&address, &RpcConfig::default()).unwrap_err();
        assert!(matches!(err, AnnotationError::Connection { .. }));
        assert!(err.is_backend());
    }
}
