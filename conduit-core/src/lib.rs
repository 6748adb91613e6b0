// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Conduit Core Library
//!
//! A bounded byte stream between one producer and one consumer. The stream is
//! carried either by a ring buffer in System V shared memory, guarded by
//! process-shared pthread primitives, or by a named pipe.

pub mod config;
pub mod error;
pub mod pipe;
pub mod shm;
pub mod transport;

// Re-export commonly used types
pub use config::{ConfigLoader, Role, TransportConfig, TransportKind};
pub use error::{
    ConduitError, ConduitResult, HardValidationError, PipeError, SharedMemoryError, SyncError,
};
pub use pipe::NamedPipe;
pub use shm::{RingBuffer, SharedSegment};
pub use transport::Transport;
