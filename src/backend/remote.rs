// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! Trackers and detectors running in an inference server process.
//!
//! Each backend opens its connection lazily, on `init` for trackers and on
//! the first request for detectors, and closes it on `terminate`.

use super::rpc::{Request, Response, RpcClient};
use super::{Detector, SequenceIter, TrackOutcome, Tracker};
use crate::config::RpcConfig;
use crate::error::{AnnotationError, Result};
use crate::models::{Bbox, Detection};
use std::path::Path;

fn unexpected(response: &Response, expected: &str) -> AnnotationError {
    AnnotationError::protocol(format!("expected {}, got {:?}", expected, response))
}

/// Tracker served over the socket protocol.
pub struct RemoteTracker {
    name: String,
    address: String,
    rpc: RpcConfig,
    client: Option<RpcClient>,
}

impl RemoteTracker {
    pub fn new(name: impl Into<String>, address: impl Into<String>, rpc: RpcConfig) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            rpc,
            client: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Tracker for RemoteTracker {
    fn init(&mut self, frame: &Path, bbox: &Bbox) -> Result<()> {
        let mut client = RpcClient::connect(&self.address, &self.rpc)?;
        let request = Request::TrackerInit {
            frame: client.frame_ref(frame)?,
            bbox: *bbox,
        };
        let response = client.call(&request)?;
        // Keep the connection even on a bad reply so terminate still reaches
        // the server.
        self.client = Some(client);
        match response {
            Response::Ack => Ok(()),
            other => Err(unexpected(&other, "ack")),
        }
    }

    fn track(&mut self, frame: &Path) -> Result<TrackOutcome> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| AnnotationError::tracker("track called before init"))?;
        let request = Request::Track {
            frame: client.frame_ref(frame)?,
        };
        match client.call(&request)? {
            Response::Tracked { bbox, polygon } => Ok(TrackOutcome::Tracked { bbox, polygon }),
            Response::Lost => Ok(TrackOutcome::Lost),
            other => Err(unexpected(&other, "tracked or lost")),
        }
    }

    fn terminate(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.shutdown();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Detector served over the socket protocol.
pub struct RemoteDetector {
    name: String,
    address: String,
    rpc: RpcConfig,
    client: Option<RpcClient>,
}

impl RemoteDetector {
    pub fn new(name: impl Into<String>, address: impl Into<String>, rpc: RpcConfig) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            rpc,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut RpcClient> {
        if self.client.is_none() {
            self.client = Some(RpcClient::connect(&self.address, &self.rpc)?);
        }
        self.client
            .as_mut()
            .ok_or_else(|| AnnotationError::detector("no connection"))
    }
}

impl Detector for RemoteDetector {
    fn detect(&mut self, frame: &Path, crop: Option<&Bbox>, model: &str) -> Result<Vec<Detection>> {
        let client = self.client()?;
        let request = Request::Detect {
            frame: client.frame_ref(frame)?,
            crop: crop.copied(),
            model: model.to_string(),
        };
        match client.call(&request)? {
            Response::Detections { detections } => Ok(detections),
            other => Err(unexpected(&other, "detections")),
        }
    }

    fn detect_sequence<'a>(
        &'a mut self,
        directory: &Path,
        frame_count: usize,
        crop: Option<&Bbox>,
        model: &str,
    ) -> Result<SequenceIter<'a>> {
        let client = self.client()?;
        client.send(&Request::DetectSequence {
            directory: directory.to_string_lossy().into_owned(),
            frame_count,
            crop: crop.copied(),
            model: model.to_string(),
        })?;
        Ok(Box::new(SequenceStream {
            client,
            finished: false,
        }))
    }

    fn terminate(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.shutdown();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reads `SequenceFrame` messages until `SequenceEnd` or an error.
struct SequenceStream<'a> {
    client: &'a mut RpcClient,
    finished: bool,
}

impl Iterator for SequenceStream<'_> {
    type Item = Result<(usize, Vec<Detection>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = match self.client.receive() {
            Ok(Response::SequenceFrame { frame, detections }) => return Some(Ok((frame, detections))),
            Ok(Response::SequenceEnd) => None,
            Ok(other) => Some(Err(unexpected(&other, "sequence frame"))),
            Err(e) => Some(Err(e)),
        };
        self.finished = true;
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::rpc::{read_message, write_message};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Serve one connection: answer each request with the next canned batch
    /// of responses and record what was asked.
    fn fake_server(script: Vec<Vec<Response>>) -> (String, JoinHandle<Vec<Request>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            let mut script = script.into_iter();
            while let Ok(request) = read_message::<_, Request>(&mut stream) {
                let terminate = request == Request::Terminate;
                seen.push(request);
                if terminate {
                    break;
                }
                for response in script.next().unwrap_or_default() {
                    write_message(&mut stream, &response).unwrap();
                }
            }
            seen
        });
        (address, handle)
    }

    #[test]
    fn test_remote_tracker_session() {
        let bbox = Bbox::new(1.0, 2.0, 3.0, 4.0);
        let moved = Bbox::new(2.0, 2.0, 3.0, 4.0);
        let (address, server) = fake_server(vec![
            vec![Response::Ack],
            vec![Response::Tracked {
                bbox: moved,
                polygon: crate::models::Polygon::from_bbox(&moved),
            }],
            vec![Response::Lost],
        ]);

        let mut tracker = RemoteTracker::new("siam", address, RpcConfig::default());
        tracker.init(Path::new("/frames/0.png"), &bbox).unwrap();
        match tracker.track(Path::new("/frames/1.png")).unwrap() {
            TrackOutcome::Tracked { bbox, .. } => assert_eq!(bbox, moved),
            TrackOutcome::Lost => panic!("expected a box"),
        }
        assert_eq!(
            tracker.track(Path::new("/frames/2.png")).unwrap(),
            TrackOutcome::Lost
        );
        tracker.terminate();

        let seen = server.join().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(matches!(seen[0], Request::TrackerInit { .. }));
        assert_eq!(seen[3], Request::Terminate);
    }

    #[test]
    fn test_track_before_init_fails() {
        let mut tracker = RemoteTracker::new("siam", "127.0.0.1:1", RpcConfig::default());
        let err = tracker.track(Path::new("/frames/0.png")).unwrap_err();
        assert!(matches!(err, AnnotationError::Tracker(_)));
    }

    #[test]
    fn test_server_error_surfaces_as_remote() {
        let (address, server) = fake_server(vec![vec![Response::Error {
            message: "model not loaded".to_string(),
        }]]);
        let mut detector = RemoteDetector::new("det", address, RpcConfig::default());
        let err = detector
            .detect(Path::new("/frames/0.png"), None, "YOLO")
            .unwrap_err();
        assert!(matches!(err, AnnotationError::Remote(ref m) if m == "model not loaded"));
        detector.terminate();
        server.join().unwrap();
    }

    #[test]
    fn test_detect_sequence_streams_until_end() {
        let det = Detection::from_bbox(0, 1, Bbox::new(0.0, 0.0, 2.0, 2.0));
        let (address, server) = fake_server(vec![vec![
            Response::SequenceFrame {
                frame: 0,
                detections: vec![det.clone()],
            },
            Response::SequenceFrame {
                frame: 1,
                detections: vec![],
            },
            Response::SequenceEnd,
        ]]);

        let mut detector = RemoteDetector::new("det", address, RpcConfig::default());
        let frames: Vec<_> = detector
            .detect_sequence(Path::new("/data/clip"), 2, None, "YOLO")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(frames, vec![(0, vec![det]), (1, vec![])]);
        detector.terminate();

        let seen = server.join().unwrap();
        assert!(matches!(
            seen[0],
            Request::DetectSequence { frame_count: 2, .. }
        ));
    }
}
