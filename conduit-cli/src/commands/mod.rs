// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod consume;
pub mod produce;
pub mod remove;
pub mod validate;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use conduit_core::config::parse_mode;
use conduit_core::{ConduitError, ConfigLoader, Role, TransportConfig, TransportKind};
use thiserror::Error;

/// Default bytes per produce or consume call.
pub const DEFAULT_CHUNK: usize = 64 * 1024;

/// Sleep between polls of a non-blocking descriptor or a draining ring.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Errors raised by the CLI itself, before or around the transport.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Missing {what}: pass it on the command line or in the config file")]
    MissingArgument { what: &'static str },

    #[error("--chunk must be at least 1 byte")]
    InvalidChunk,

    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Conduit(#[from] ConduitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// System V shared memory ring buffer
    Shm,
    /// Named pipe (FIFO)
    Pipe,
}

impl From<KindArg> for TransportKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Shm => TransportKind::SharedMemory,
            KindArg::Pipe => TransportKind::NamedPipe,
        }
    }
}

/// Transport selection shared by `produce` and `consume`. Overrides the
/// config file field by field.
#[derive(Args, Debug, Default)]
pub struct TransportArgs {
    /// Transport backend
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    /// FIFO path, or key file for shared memory
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Ring capacity in bytes (shared memory)
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Octal permission bits for created objects
    #[arg(long, value_parser = parse_mode_arg)]
    pub mode: Option<u32>,

    /// Open the FIFO descriptor with O_NONBLOCK
    #[arg(long)]
    pub nonblock: bool,
}

fn parse_mode_arg(value: &str) -> Result<u32, String> {
    parse_mode(value).map_err(|e| e.to_string())
}

impl TransportArgs {
    /// Merge the arguments over the optional config file and validate it for
    /// `role`. Only the producer needs a ring capacity.
    pub fn resolve(
        &self,
        config_file: Option<&str>,
        role: Role,
    ) -> Result<TransportConfig, CliError> {
        let base = match config_file {
            Some(file) => Some(ConfigLoader::load_file(file)?),
            None => None,
        };

        let kind = match (self.kind, &base) {
            (Some(kind), _) => kind.into(),
            (None, Some(base)) => base.kind,
            (None, None) => return Err(CliError::MissingArgument { what: "--kind" }),
        };

        // File values for another backend do not carry over.
        let mut config = match base {
            Some(base) if base.kind == kind => base,
            base => {
                let path = base.map(|b| b.path).unwrap_or_default();
                match kind {
                    TransportKind::SharedMemory => TransportConfig::shared_memory(path, 0),
                    TransportKind::NamedPipe => TransportConfig::named_pipe(path),
                }
            }
        };

        if let Some(path) = &self.path {
            config.path = path.clone();
        }
        if config.path.as_os_str().is_empty() {
            return Err(CliError::MissingArgument { what: "--path" });
        }

        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if kind == TransportKind::SharedMemory
            && role.is_producer()
            && config.capacity == 0
            && self.capacity.is_none()
        {
            return Err(CliError::MissingArgument { what: "--capacity" });
        }

        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.nonblock {
            config.flags |= libc::O_NONBLOCK;
        }

        ConfigLoader::check_for(&config, role).map_err(ConduitError::from)?;
        Ok(config)
    }
}

/// Running byte count and CRC32 of a transferred stream.
pub(crate) struct TransferSummary {
    bytes: u64,
    hasher: crc32fast::Hasher,
}

impl TransferSummary {
    pub(crate) fn new() -> Self {
        Self {
            bytes: 0,
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        self.bytes += data.len() as u64;
        self.hasher.update(data);
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consume the summary, returning `(bytes, crc32)`.
    pub(crate) fn finish(self) -> (u64, u32) {
        (self.bytes, self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn shm_args(path: &str, capacity: usize) -> TransportArgs {
        TransportArgs {
            kind: Some(KindArg::Shm),
            path: Some(PathBuf::from(path)),
            capacity: Some(capacity),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_from_arguments() {
        let config = shm_args("/tmp/conduit.key", 4096)
            .resolve(None, Role::Producer)
            .unwrap();
        assert_eq!(config.kind, TransportKind::SharedMemory);
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.mode, conduit_core::config::DEFAULT_MODE);
    }

    #[test]
    fn test_resolve_requires_kind_and_path() {
        let args = TransportArgs::default();
        assert!(matches!(
            args.resolve(None, Role::Producer),
            Err(CliError::MissingArgument { what: "--kind" })
        ));

        let args = TransportArgs {
            kind: Some(KindArg::Pipe),
            ..Default::default()
        };
        assert!(matches!(
            args.resolve(None, Role::Producer),
            Err(CliError::MissingArgument { what: "--path" })
        ));

        let args = TransportArgs {
            kind: Some(KindArg::Shm),
            path: Some(PathBuf::from("/tmp/conduit.key")),
            ..Default::default()
        };
        assert!(matches!(
            args.resolve(None, Role::Producer),
            Err(CliError::MissingArgument { what: "--capacity" })
        ));
    }

    #[test]
    fn test_consumer_needs_no_capacity() {
        let args = TransportArgs {
            kind: Some(KindArg::Shm),
            path: Some(PathBuf::from("/tmp/conduit.key")),
            ..Default::default()
        };
        let config = args.resolve(None, Role::Consumer).unwrap();
        assert_eq!(config.kind, TransportKind::SharedMemory);
        assert_eq!(config.capacity, 0);
    }

    #[test]
    fn test_arguments_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "transport:\n  kind: shared_memory\n  path: /tmp/from-file.key\n  capacity: 1024\n"
        )
        .unwrap();
        let file_path = file.path().to_str().unwrap().to_string();

        let args = TransportArgs {
            capacity: Some(2048),
            ..Default::default()
        };
        let config = args.resolve(Some(&file_path), Role::Producer).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/from-file.key"));
        assert_eq!(config.capacity, 2048);

        // Switching backend keeps the path but drops the ring capacity.
        let args = TransportArgs {
            kind: Some(KindArg::Pipe),
            nonblock: true,
            ..Default::default()
        };
        let config = args.resolve(Some(&file_path), Role::Producer).unwrap();
        assert_eq!(config.kind, TransportKind::NamedPipe);
        assert_eq!(config.capacity, 0);
        assert_eq!(config.flags, libc::O_NONBLOCK);
    }

    #[test]
    fn test_nonblock_rejected_for_shared_memory() {
        let mut args = shm_args("/tmp/conduit.key", 4096);
        args.nonblock = true;
        assert!(matches!(
            args.resolve(None, Role::Producer),
            Err(CliError::Conduit(_))
        ));
    }

    #[test]
    fn test_transfer_summary() {
        let mut summary = TransferSummary::new();
        summary.update(b"1234");
        summary.update(b"56789");
        assert_eq!(summary.bytes(), 9);
        // CRC-32/ISO-HDLC check value.
        assert_eq!(summary.finish(), (9, 0xCBF4_3926));
    }
}
