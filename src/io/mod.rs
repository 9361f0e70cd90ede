// Copyright (c) 2025, Jason Jenkins
// SPDX-License-Identifier: BSD-3-Clause

//! I/O operations for frame directories and annotation files.

pub mod media;
pub mod serialization;
