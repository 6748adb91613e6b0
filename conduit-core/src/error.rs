// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for Conduit.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! Every OS failure carries the underlying error code.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Top-level error type for the Conduit transport.
#[derive(Debug, Error)]
pub enum ConduitError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    #[error("Synchronization error: {0}")]
    Sync(#[from] SyncError),

    #[error("Named pipe error: {0}")]
    Pipe(#[from] PipeError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ConduitError {
    /// True for the transient "cannot complete without waiting" class.
    pub fn is_would_block(&self) -> bool {
        match self {
            Self::SharedMemory(e) => e.is_would_block(),
            Self::Pipe(e) => e.is_would_block(),
            _ => false,
        }
    }

    /// True when a pipe read or write was cut short by a signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Pipe(e) if e.is_interrupted())
    }
}

/// Hard validation errors reject a configuration before any resource is touched.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Capacity out of bounds: {capacity} bytes (min: {min}, max: {max})")]
    CapacityOutOfBounds {
        capacity: usize,
        min: usize,
        max: usize,
    },
}

/// Mutex and condition variable failures.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{operation} failed: {errno}")]
    Os {
        operation: &'static str,
        errno: Errno,
    },

    /// A peer died while holding the ring mutex. The protected state may be
    /// half-written, so the mutex is left unrecoverable.
    #[error("Lock owner died while holding the ring buffer mutex")]
    OwnerDied,

    #[error("Ring buffer mutex is not recoverable (a previous owner died)")]
    NotRecoverable,
}

impl SyncError {
    /// Map a pthread return code to an error.
    pub(crate) fn from_code(operation: &'static str, code: i32) -> Self {
        match code {
            libc::EOWNERDEAD => Self::OwnerDied,
            libc::ENOTRECOVERABLE => Self::NotRecoverable,
            _ => Self::Os {
                operation,
                errno: Errno::from_raw(code),
            },
        }
    }
}

/// Shared memory and ring buffer errors.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to derive key from {path}: {errno}")]
    KeyDerivation { path: PathBuf, errno: Errno },

    #[error("Shared memory region already exists for {path}")]
    AlreadyExists { path: PathBuf },

    #[error("No shared memory region exists for {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to create shared memory region for {path}: {errno}")]
    CreateFailed { path: PathBuf, errno: Errno },

    #[error("Failed to attach shared memory region for {path}: {errno}")]
    AttachFailed { path: PathBuf, errno: Errno },

    #[error("Failed to stat shared memory region for {path}: {errno}")]
    StatFailed { path: PathBuf, errno: Errno },

    #[error("Failed to remove shared memory region for {path}: {errno}")]
    RemoveFailed { path: PathBuf, errno: Errno },

    #[error("Shared memory region for {path} is not initialized yet")]
    NotInitialized { path: PathBuf },

    #[error("Shared memory layout mismatch for {path}: {reason}")]
    LayoutMismatch { path: PathBuf, reason: String },

    #[error("Invalid ring buffer capacity {capacity}: {reason}")]
    InvalidCapacity { capacity: usize, reason: String },

    #[error("Ring buffer full - cannot write {size} bytes ({available} available)")]
    RingBufferFull { size: usize, available: usize },

    #[error("Ring buffer holds {available} bytes - cannot read {size}")]
    InsufficientData { size: usize, available: usize },

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl SharedMemoryError {
    /// True when a non-waiting produce or consume could not complete.
    pub fn is_would_block(&self) -> bool {
        matches!(
            self,
            Self::RingBufferFull { .. } | Self::InsufficientData { .. }
        )
    }
}

/// Named pipe errors.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("Failed to create FIFO {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path exists and is not a FIFO: {path}")]
    NotAFifo { path: PathBuf },

    #[error("Failed to open FIFO {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set descriptor flags on {path}: {source}")]
    Flags {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Read from FIFO failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("Write to FIFO failed: {0}")]
    Write(#[source] std::io::Error),
}

impl PipeError {
    /// True when a non-blocking descriptor reported `EAGAIN`.
    pub fn is_would_block(&self) -> bool {
        match self {
            Self::Read(e) | Self::Write(e) => e.kind() == std::io::ErrorKind::WouldBlock,
            _ => false,
        }
    }

    /// True when `read(2)` or `write(2)` failed with `EINTR`.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Read(e) | Self::Write(e) => e.kind() == std::io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

/// Result type alias using ConduitError.
pub type ConduitResult<T> = Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "capacity",
            context: "shared_memory transport".to_string(),
        };
        assert!(err.to_string().contains("capacity"));
        assert!(err.to_string().contains("shared_memory"));
    }

    #[test]
    fn test_error_chain() {
        let shm_err = SharedMemoryError::RingBufferFull {
            size: 16,
            available: 4,
        };
        let err: ConduitError = shm_err.into();
        assert!(matches!(err, ConduitError::SharedMemory(_)));
        assert!(err.is_would_block());
    }

    #[test]
    fn test_sync_error_from_code() {
        assert!(matches!(
            SyncError::from_code("pthread_mutex_lock", libc::EOWNERDEAD),
            SyncError::OwnerDied
        ));
        assert!(matches!(
            SyncError::from_code("pthread_mutex_lock", libc::ENOTRECOVERABLE),
            SyncError::NotRecoverable
        ));
        match SyncError::from_code("pthread_cond_wait", libc::EINVAL) {
            SyncError::Os { operation, errno } => {
                assert_eq!(operation, "pthread_cond_wait");
                assert_eq!(errno, Errno::EINVAL);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pipe_would_block() {
        let err = PipeError::Read(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(err.is_would_block());

        let err = PipeError::NotAFifo {
            path: PathBuf::from("/tmp/x"),
        };
        assert!(!err.is_would_block());
    }

    #[test]
    fn test_pipe_interrupted() {
        let err: ConduitError =
            PipeError::Write(std::io::Error::from_raw_os_error(libc::EINTR)).into();
        assert!(err.is_interrupted());
        assert!(!err.is_would_block());
    }
}
