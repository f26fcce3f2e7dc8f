use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TernError, TernResult};
use crate::types::GroupId;

/// How multi-shard commands open connections within one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiShardModifyMode {
    /// One connection per shard placement, all outstanding at once.
    #[default]
    Parallel,
    /// One connection per node, tasks executed in task-id order.
    Sequential,
}

impl fmt::Display for MultiShardModifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiShardModifyMode::Parallel => write!(f, "parallel"),
            MultiShardModifyMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// Commit protocol used for worker connections of a coordinated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommitProtocol {
    /// BEGIN ... COMMIT on every connection.
    #[default]
    #[serde(rename = "1pc")]
    OnePhase,
    /// PREPARE TRANSACTION on every connection, then COMMIT PREPARED.
    #[serde(rename = "2pc")]
    TwoPhase,
    /// No transaction block; each command commits on its own.
    #[serde(rename = "bare")]
    Bare,
}

impl fmt::Display for CommitProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitProtocol::OnePhase => write!(f, "1pc"),
            CommitProtocol::TwoPhase => write!(f, "2pc"),
            CommitProtocol::Bare => write!(f, "bare"),
        }
    }
}

/// DDL propagation settings (`tern.toml`, `[ddl]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DdlConfig {
    /// Propagate DDL on distributed tables to their shards (default: true).
    pub enable_ddl_propagation: bool,
    /// Initial execution mode of every transaction (default: parallel).
    pub multi_shard_modify_mode: MultiShardModifyMode,
    /// Initial commit protocol of every transaction (default: 1pc).
    pub multi_shard_commit_protocol: CommitProtocol,
    /// Metadata group of this node. 0 = coordinator.
    pub local_group_id: u32,
}

impl Default for DdlConfig {
    fn default() -> Self {
        Self {
            enable_ddl_propagation: true,
            multi_shard_modify_mode: MultiShardModifyMode::Parallel,
            multi_shard_commit_protocol: CommitProtocol::OnePhase,
            local_group_id: 0,
        }
    }
}

impl DdlConfig {
    pub fn local_group(&self) -> GroupId {
        GroupId(self.local_group_id)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TernConfig {
    #[serde(default)]
    pub ddl: DdlConfig,
}

impl TernConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> TernResult<Self> {
        toml::from_str(content).map_err(|e| TernError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    TernConfig::default()
                }
            },
            Err(_) => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                TernConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = DdlConfig::default();
        assert!(cfg.enable_ddl_propagation);
        assert_eq!(cfg.multi_shard_modify_mode, MultiShardModifyMode::Parallel);
        assert_eq!(cfg.multi_shard_commit_protocol, CommitProtocol::OnePhase);
        assert!(cfg.local_group().is_coordinator());
    }

    #[test]
    fn test_parse_partial_section() {
        let cfg = TernConfig::from_toml_str(
            r#"
            [ddl]
            multi_shard_modify_mode = "sequential"
            multi_shard_commit_protocol = "2pc"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ddl.multi_shard_modify_mode, MultiShardModifyMode::Sequential);
        assert_eq!(cfg.ddl.multi_shard_commit_protocol, CommitProtocol::TwoPhase);
        assert!(cfg.ddl.enable_ddl_propagation);
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let err = TernConfig::from_toml_str("[ddl]\nmulti_shard_commit_protocol = \"3pc\"").unwrap_err();
        assert!(matches!(err, TernError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ddl]\nenable_ddl_propagation = false\nlocal_group_id = 3").unwrap();
        let cfg = TernConfig::load_or_default(file.path());
        assert!(!cfg.ddl.enable_ddl_propagation);
        assert_eq!(cfg.ddl.local_group_id, 3);
    }

    #[test]
    fn test_missing_or_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_eq!(TernConfig::load_or_default(&missing), TernConfig::default());

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "ddl = [[[").unwrap();
        assert_eq!(TernConfig::load_or_default(&bad), TernConfig::default());
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(CommitProtocol::Bare.to_string(), "bare");
        assert_eq!(CommitProtocol::TwoPhase.to_string(), "2pc");
        assert_eq!(MultiShardModifyMode::Sequential.to_string(), "sequential");
    }
}
