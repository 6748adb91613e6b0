// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Conduit Benchmark Fixtures
//!
//! Transport pairs and payloads shared by the criterion benches.
//!
//! # Benchmark Categories
//!
//! - **Ring Buffer**: produce/consume cost on the heap and in shared memory
//! - **IPC Throughput**: one-way streaming over shared memory, a named pipe
//!   and a Unix socket baseline

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use conduit_core::{ConduitResult, Role, Transport, TransportConfig};
use tempfile::{NamedTempFile, TempDir};

/// Payload sizes to benchmark (in bytes).
pub const PAYLOAD_SIZES: &[usize] = &[64, 256, 1024, 4096, 16384];

/// Ring capacity used by the shared memory fixtures.
pub const RING_CAPACITY: usize = 1024 * 1024;

pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Where a transport's path lives. Removed on drop.
enum Scratch {
    Key(NamedTempFile),
    Dir(TempDir),
}

/// A connected producer and consumer in this process.
pub struct TransportPair {
    pub producer: Transport,
    pub consumer: Arc<Transport>,
    _scratch: Scratch,
}

impl TransportPair {
    /// Shared memory ring of `capacity` bytes.
    pub fn shared_memory(capacity: usize) -> ConduitResult<Self> {
        let key = NamedTempFile::new().map_err(|e| conduit_core::ConduitError::Io {
            context: "creating key file",
            source: e,
        })?;
        let config = TransportConfig::shared_memory(key.path(), capacity);

        let producer = Transport::open(&config, Role::Producer)?;
        let consumer = Transport::open(&config, Role::Consumer)?;
        Ok(Self {
            producer,
            consumer: Arc::new(consumer),
            _scratch: Scratch::Key(key),
        })
    }

    /// Named pipe. Neither end is opened until the first transfer.
    pub fn named_pipe() -> ConduitResult<Self> {
        let dir = TempDir::new().map_err(|e| conduit_core::ConduitError::Io {
            context: "creating FIFO directory",
            source: e,
        })?;
        let config = TransportConfig::named_pipe(dir.path().join("bench.fifo"));

        let producer = Transport::open(&config, Role::Producer)?;
        let consumer = Transport::open(&config, Role::Consumer)?;
        Ok(Self {
            producer,
            consumer: Arc::new(consumer),
            _scratch: Scratch::Dir(dir),
        })
    }

    /// Stream `iters` copies of `payload` to a consumer thread and time it.
    ///
    /// A shared memory consumer reads one payload per call; a pipe consumer
    /// reads whatever is available.
    pub fn stream(&self, payload: &[u8], iters: u64) -> ConduitResult<Duration> {
        let total = payload.len() as u64 * iters;
        let reader = self.spawn_reader(payload.len(), total);

        let start = Instant::now();
        for _ in 0..iters {
            let mut rest = payload;
            while !rest.is_empty() {
                let n = self.producer.produce(rest)?;
                rest = &rest[n..];
            }
        }
        match reader.join() {
            Ok(result) => result?,
            Err(panic) => std::panic::resume_unwind(panic),
        }
        Ok(start.elapsed())
    }

    fn spawn_reader(&self, chunk: usize, total: u64) -> JoinHandle<ConduitResult<()>> {
        let consumer = Arc::clone(&self.consumer);
        std::thread::spawn(move || {
            let mut buf = vec![0u8; chunk];
            let mut received = 0u64;
            while received < total {
                let want = (total - received).min(chunk as u64) as usize;
                received += consumer.consume(&mut buf[..want])? as u64;
            }
            Ok(())
        })
    }
}
