// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Transport configuration and its YAML loader.
//!
//! Producer and consumer build a [`TransportConfig`] from the same values.
//! Files are parsed into raw structs first, then validated; any invalid field
//! is a [`HardValidationError`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConduitError, ConduitResult, HardValidationError};
use crate::shm::SharedSegment;

/// Default permission bits for created FIFOs and segments.
pub const DEFAULT_MODE: u32 = 0o600;

/// Which backend carries the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    NamedPipe,
    SharedMemory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamedPipe => write!(f, "named_pipe"),
            Self::SharedMemory => write!(f, "shared_memory"),
        }
    }
}

/// Endpoint role. The producer creates the FIFO or segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn is_producer(self) -> bool {
        self == Self::Producer
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer => write!(f, "producer"),
            Self::Consumer => write!(f, "consumer"),
        }
    }
}

/// Immutable transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// FIFO path, or key source for the shared memory segment.
    pub path: PathBuf,
    /// Permission bits for objects the producer creates.
    pub mode: u32,
    /// Ring capacity in bytes (shared memory only).
    pub capacity: usize,
    /// Extra descriptor status flags such as `O_NONBLOCK` (named pipe only).
    pub flags: i32,
}

impl TransportConfig {
    pub fn named_pipe(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: TransportKind::NamedPipe,
            path: path.into(),
            mode: DEFAULT_MODE,
            capacity: 0,
            flags: 0,
        }
    }

    pub fn shared_memory(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            kind: TransportKind::SharedMemory,
            path: path.into(),
            mode: DEFAULT_MODE,
            capacity,
            flags: 0,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }
}

/// Parse octal permission bits, with or without a `0o` prefix.
pub fn parse_mode(value: &str) -> Result<u32, HardValidationError> {
    let digits = value.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);

    let mode = u32::from_str_radix(digits, 8).map_err(|e| HardValidationError::InvalidFieldValue {
        field: "mode",
        value: value.to_string(),
        reason: format!("not an octal number: {}", e),
    })?;

    if mode > 0o777 {
        return Err(HardValidationError::InvalidFieldValue {
            field: "mode",
            value: value.to_string(),
            reason: "only permission bits (0o777) are allowed".to_string(),
        });
    }
    Ok(mode)
}

/// Map a descriptor flag name to its `O_*` value.
pub fn parse_flag(name: &str) -> Result<i32, HardValidationError> {
    match name {
        "nonblock" => Ok(libc::O_NONBLOCK),
        "append" => Ok(libc::O_APPEND),
        "sync" => Ok(libc::O_SYNC),
        "dsync" => Ok(libc::O_DSYNC),
        "async" => Ok(libc::O_ASYNC),
        other => Err(HardValidationError::InvalidFieldValue {
            field: "flags",
            value: other.to_string(),
            reason: "expected one of: nonblock, append, sync, dsync, async".to_string(),
        }),
    }
}

/// Raw transport section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTransportConfig {
    kind: TransportKind,
    path: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    capacity: Option<usize>,
    #[serde(default)]
    flags: Vec<String>,
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    transport: RawTransportConfig,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Smallest accepted ring capacity.
    pub const MIN_CAPACITY: usize = 1;

    /// Largest accepted ring capacity.
    pub const MAX_CAPACITY: usize = SharedSegment::MAX_CAPACITY;

    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> ConduitResult<TransportConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConduitError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConduitError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> ConduitResult<TransportConfig> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConduitError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Ok(Self::validate(raw.transport)?)
    }

    /// Validate a fully assembled configuration, e.g. one built from CLI flags.
    ///
    /// A shared memory capacity is required. See [`ConfigLoader::check_for`]
    /// for a consumer, which takes the capacity from the segment.
    pub fn check(config: &TransportConfig) -> Result<(), HardValidationError> {
        Self::check_for(config, Role::Producer)
    }

    /// Validate `config` for the endpoint `role` opens.
    ///
    /// A shared memory consumer may leave the capacity at 0; attaching reads
    /// it from the segment header. Any capacity it does carry is still
    /// bounds-checked.
    pub fn check_for(config: &TransportConfig, role: Role) -> Result<(), HardValidationError> {
        if config.path.as_os_str().is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "path",
                context: format!("{} transport", config.kind),
            });
        }

        if config.mode > 0o777 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "mode",
                value: format!("{:o}", config.mode),
                reason: "only permission bits (0o777) are allowed".to_string(),
            });
        }

        match config.kind {
            TransportKind::SharedMemory => {
                let attaching = !role.is_producer() && config.capacity == 0;
                if !attaching
                    && !(Self::MIN_CAPACITY..=Self::MAX_CAPACITY).contains(&config.capacity)
                {
                    return Err(HardValidationError::CapacityOutOfBounds {
                        capacity: config.capacity,
                        min: Self::MIN_CAPACITY,
                        max: Self::MAX_CAPACITY,
                    });
                }
                if config.flags != 0 {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "flags",
                        value: config.flags.to_string(),
                        reason: "descriptor flags only apply to named_pipe".to_string(),
                    });
                }
            }
            TransportKind::NamedPipe => {
                if config.capacity != 0 {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "capacity",
                        value: config.capacity.to_string(),
                        reason: "capacity only applies to shared_memory".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate(raw: RawTransportConfig) -> Result<TransportConfig, HardValidationError> {
        let mode = match raw.mode.as_deref() {
            Some(mode) => parse_mode(mode)?,
            None => DEFAULT_MODE,
        };

        let mut flags = 0;
        for name in &raw.flags {
            flags |= parse_flag(name)?;
        }

        let capacity = match (raw.kind, raw.capacity) {
            (TransportKind::SharedMemory, None) => {
                return Err(HardValidationError::MissingRequiredField {
                    field: "capacity",
                    context: "shared_memory transport".to_string(),
                })
            }
            (_, capacity) => capacity.unwrap_or(0),
        };

        let config = TransportConfig {
            kind: raw.kind,
            path: PathBuf::from(raw.path),
            mode,
            capacity,
            flags,
        };
        Self::check(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_SHM_CONFIG: &str = r#"
transport:
  kind: shared_memory
  path: /tmp/conduit.key
  mode: "0640"
  capacity: 1048576
"#;

    #[test]
    fn test_valid_shared_memory_config() {
        let config = ConfigLoader::load_string(VALID_SHM_CONFIG).unwrap();
        assert_eq!(config.kind, TransportKind::SharedMemory);
        assert_eq!(config.path, PathBuf::from("/tmp/conduit.key"));
        assert_eq!(config.mode, 0o640);
        assert_eq!(config.capacity, 1_048_576);
        assert_eq!(config.flags, 0);
    }

    #[test]
    fn test_valid_named_pipe_config() {
        let yaml = r#"
transport:
  kind: named_pipe
  path: /tmp/conduit.fifo
  flags: [nonblock]
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert_eq!(config.kind, TransportKind::NamedPipe);
        assert_eq!(config.mode, DEFAULT_MODE);
        assert_eq!(config.flags, libc::O_NONBLOCK);
    }

    #[test]
    fn test_missing_capacity() {
        let yaml = r#"
transport:
  kind: shared_memory
  path: /tmp/conduit.key
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConduitError::HardValidation(HardValidationError::MissingRequiredField {
                field: "capacity",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_capacity() {
        let yaml = r#"
transport:
  kind: shared_memory
  path: /tmp/conduit.key
  capacity: 0
"#;
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(ConduitError::HardValidation(
                HardValidationError::CapacityOutOfBounds { capacity: 0, .. }
            ))
        ));
    }

    #[test]
    fn test_unknown_kind() {
        let yaml = r#"
transport:
  kind: tcp
  path: /tmp/conduit.key
"#;
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(ConduitError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_capacity_on_named_pipe() {
        let yaml = r#"
transport:
  kind: named_pipe
  path: /tmp/conduit.fifo
  capacity: 4096
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_flags_on_shared_memory() {
        let yaml = r#"
transport:
  kind: shared_memory
  path: /tmp/conduit.key
  capacity: 4096
  flags: [nonblock]
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_empty_path() {
        let yaml = r#"
transport:
  kind: named_pipe
  path: ""
"#;
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(ConduitError::HardValidation(
                HardValidationError::MissingRequiredField { field: "path", .. }
            ))
        ));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("600").unwrap(), 0o600);
        assert_eq!(parse_mode("0o644").unwrap(), 0o644);
        assert_eq!(parse_mode("0755").unwrap(), 0o755);
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("4755").is_err());
    }

    #[test]
    fn test_unknown_flag() {
        assert!(parse_flag("nonblock").is_ok());
        assert!(parse_flag("excl").is_err());
    }

    #[test]
    fn test_unknown_top_level_key() {
        let yaml = format!("{}orchestrator:\n  warm_pool_size: 4\n", VALID_SHM_CONFIG);
        assert!(matches!(
            ConfigLoader::load_string(&yaml),
            Err(ConduitError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_consumer_capacity_is_optional() {
        let config = TransportConfig::shared_memory("/tmp/conduit.key", 0);
        assert!(ConfigLoader::check_for(&config, Role::Consumer).is_ok());
        assert!(matches!(
            ConfigLoader::check_for(&config, Role::Producer),
            Err(HardValidationError::CapacityOutOfBounds { capacity: 0, .. })
        ));

        // A capacity that is given must still be in range.
        let config = TransportConfig::shared_memory("/tmp/conduit.key", usize::MAX);
        assert!(ConfigLoader::check_for(&config, Role::Consumer).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ConfigLoader::load_file("/nonexistent/conduit.yaml"),
            Err(ConduitError::ConfigNotFound { .. })
        ));
    }
}
