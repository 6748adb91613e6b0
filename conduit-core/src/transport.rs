// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Transport - one produce/consume contract over either backend.
//!
//! Producer and consumer open a [`Transport`] from identical configuration.
//! The producer creates the FIFO or segment; the consumer attaches to it.

use std::os::unix::io::RawFd;

use crate::config::{ConfigLoader, Role, TransportConfig, TransportKind};
use crate::error::ConduitResult;
use crate::pipe::NamedPipe;
use crate::shm::SharedSegment;

enum Backend {
    NamedPipe(NamedPipe),
    SharedMemory(SharedSegment),
}

/// An open endpoint of a byte stream.
pub struct Transport {
    config: TransportConfig,
    role: Role,
    backend: Backend,
}

impl Transport {
    /// Validate `config` and open the backend it names.
    ///
    /// # Errors
    /// Validation errors, then whatever the backend reports: a consumer that
    /// attaches to shared memory before the producer created it gets
    /// [`SharedMemoryError::NotFound`](crate::error::SharedMemoryError::NotFound).
    pub fn open(config: &TransportConfig, role: Role) -> ConduitResult<Self> {
        ConfigLoader::check_for(config, role)?;

        let backend = match (config.kind, role) {
            (TransportKind::SharedMemory, Role::Producer) => Backend::SharedMemory(
                SharedSegment::create(&config.path, config.capacity, config.mode)?,
            ),
            (TransportKind::SharedMemory, Role::Consumer) => {
                Backend::SharedMemory(SharedSegment::attach(&config.path)?)
            }
            (TransportKind::NamedPipe, role) => Backend::NamedPipe(NamedPipe::new(
                &config.path,
                role,
                config.mode,
                config.flags,
            )?),
        };

        tracing::info!(
            kind = %config.kind,
            role = %role,
            path = %config.path.display(),
            "Transport opened"
        );

        Ok(Self {
            config: config.clone(),
            role,
            backend,
        })
    }

    /// Send `data`.
    ///
    /// Shared memory writes all of `data` once space is free, which requires
    /// `data.len() <= capacity`. A named pipe performs one `write(2)` and may
    /// return a short count.
    pub fn produce(&self, data: &[u8]) -> ConduitResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        match &self.backend {
            Backend::SharedMemory(segment) => Ok(segment.ring().produce(data, true)?),
            Backend::NamedPipe(pipe) => Ok(pipe.produce(data)?),
        }
    }

    /// Receive into `buf`.
    ///
    /// Shared memory fills all of `buf` once enough data is held, which
    /// requires `buf.len() <= capacity`. A named pipe performs one `read(2)`;
    /// `Ok(0)` means the writer closed its end.
    pub fn consume(&self, buf: &mut [u8]) -> ConduitResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        match &self.backend {
            Backend::SharedMemory(segment) => Ok(segment.ring().consume(buf, true)?),
            Backend::NamedPipe(pipe) => Ok(pipe.consume(buf)?),
        }
    }

    /// Pipe descriptor once opened. Shared memory has none.
    pub fn descriptor(&self) -> Option<RawFd> {
        match &self.backend {
            Backend::NamedPipe(pipe) => pipe.descriptor(),
            Backend::SharedMemory(_) => None,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.config.kind
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Ring capacity in bytes; `None` for a named pipe.
    pub fn capacity(&self) -> Option<usize> {
        match &self.backend {
            Backend::SharedMemory(segment) => Some(segment.capacity()),
            Backend::NamedPipe(_) => None,
        }
    }

    /// Handles attached to the segment in any process, this one included;
    /// `None` for a named pipe. The CLI uses it to tell when its peer left.
    pub fn references(&self) -> Option<i32> {
        match &self.backend {
            Backend::SharedMemory(segment) => Some(segment.references()),
            Backend::NamedPipe(_) => None,
        }
    }

    /// Bytes currently held in the ring; `None` for a named pipe.
    pub fn pending(&self) -> ConduitResult<Option<usize>> {
        match &self.backend {
            Backend::SharedMemory(segment) => Ok(Some(segment.ring().size()?)),
            Backend::NamedPipe(_) => Ok(None),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.config.kind)
            .field("role", &self.role)
            .field("path", &self.config.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConduitError, HardValidationError, SharedMemoryError};
    use std::sync::Arc;

    #[test]
    fn test_shared_memory_round_trip_between_threads() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let config = TransportConfig::shared_memory(key.path(), 16);

        let producer = Transport::open(&config, Role::Producer).unwrap();
        let consumer = Arc::new(Transport::open(&config, Role::Consumer).unwrap());
        assert_eq!(producer.capacity(), Some(16));
        assert_eq!(producer.descriptor(), None);
        assert_eq!(consumer.kind(), TransportKind::SharedMemory);
        assert_eq!(consumer.role(), Role::Consumer);

        let reader = {
            let consumer = Arc::clone(&consumer);
            std::thread::spawn(move || {
                let mut received = Vec::new();
                let mut buf = [0u8; 5];
                while received.len() < 100 {
                    consumer.consume(&mut buf).unwrap();
                    received.extend_from_slice(&buf);
                }
                received
            })
        };

        let payload: Vec<u8> = (0..100u8).collect();
        for chunk in payload.chunks(10) {
            assert_eq!(producer.produce(chunk).unwrap(), 10);
        }

        assert_eq!(reader.join().unwrap(), payload);
        assert_eq!(producer.pending().unwrap(), Some(0));
        assert_eq!(producer.references(), Some(2));
    }

    #[test]
    fn test_zero_length_calls_are_noops() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let config = TransportConfig::shared_memory(key.path(), 8);
        let transport = Transport::open(&config, Role::Producer).unwrap();

        assert_eq!(transport.produce(&[]).unwrap(), 0);
        assert_eq!(transport.consume(&mut []).unwrap(), 0);
        assert_eq!(transport.pending().unwrap(), Some(0));
    }

    #[test]
    fn test_consumer_before_producer() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let config = TransportConfig::shared_memory(key.path(), 8);

        assert!(matches!(
            Transport::open(&config, Role::Consumer),
            Err(ConduitError::SharedMemory(SharedMemoryError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_consumer_attaches_without_capacity() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let producer =
            Transport::open(&TransportConfig::shared_memory(key.path(), 24), Role::Producer)
                .unwrap();

        // The consumer learns the capacity from the segment.
        let consumer =
            Transport::open(&TransportConfig::shared_memory(key.path(), 0), Role::Consumer)
                .unwrap();
        assert_eq!(consumer.capacity(), Some(24));

        producer.produce(b"sized by the creator").unwrap();
        let mut buf = [0u8; 20];
        consumer.consume(&mut buf).unwrap();
        assert_eq!(&buf, b"sized by the creator");
    }

    #[test]
    fn test_open_validates_config() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let config = TransportConfig::shared_memory(key.path(), 0);

        assert!(matches!(
            Transport::open(&config, Role::Producer),
            Err(ConduitError::HardValidation(
                HardValidationError::CapacityOutOfBounds { .. }
            ))
        ));
    }

    #[test]
    fn test_named_pipe_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = TransportConfig::named_pipe(dir.path().join("fifo"));

        let producer = Transport::open(&config, Role::Producer).unwrap();
        assert_eq!(producer.capacity(), None);
        assert_eq!(producer.pending().unwrap(), None);
        assert_eq!(producer.references(), None);
        assert_eq!(producer.descriptor(), None);

        let writer = std::thread::spawn(move || {
            for word in [&b"alpha "[..], b"beta ", b"gamma"] {
                assert_eq!(producer.produce(word).unwrap(), word.len());
            }
            assert!(producer.descriptor().is_some());
        });

        let consumer = Transport::open(&config, Role::Consumer).unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            match consumer.consume(&mut buf).unwrap() {
                0 => break,
                n => received.extend_from_slice(&buf[..n]),
            }
        }

        writer.join().unwrap();
        assert_eq!(received, b"alpha beta gamma");
    }
}
