use thiserror::Error;

use crate::types::{GroupId, ShardId};

/// Convenience alias for `Result<T, TernError>`.
pub type TernResult<T> = Result<T, TernError>;

/// Error classification for retry/escalation decisions.
///
/// - `UserError`  : unsupported or invalid command; never retried
/// - `Retryable`  : the whole statement may be re-issued as-is
/// - `Transient`  : worker unreachable or failed mid-flight; retry after back-off
/// - `InternalBug`: should never happen; triggers alert + diagnostic dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UserError => "user_error",
            ErrorKind::Retryable => "retryable",
            ErrorKind::Transient => "transient",
            ErrorKind::InternalBug => "internal_bug",
        }
    }
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum TernError {
    #[error("{0}")]
    Ddl(#[from] DdlError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Internal bug; should never occur in production.
    /// Always carries a unique `error_code` and `debug_context` for post-mortem.
    #[error("InternalBug [{error_code}]: {message} | context: {debug_context}")]
    InternalBug {
        error_code: &'static str,
        message: String,
        debug_context: String,
    },
}

/// Errors raised while planning or executing a propagated DDL command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DdlError {
    /// The command's shape cannot be replicated consistently across shards.
    #[error("{message}")]
    UnsupportedCommand {
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },

    /// Sequential and parallel shard access to one relation were mixed in a
    /// transaction. `after_parallel` is set when the sequential request came
    /// second.
    #[error("{}", conflicting_mode_message(.relation, .after_parallel))]
    ConflictingExecutionMode {
        relation: String,
        after_parallel: bool,
    },

    /// A concurrent index build failed after the local index was committed.
    /// The index is left durably invalid.
    #[error("CONCURRENTLY-enabled index command failed")]
    PartialIndexFailure { index: String, cause: String },

    #[error("operation is not allowed on this node")]
    NotCoordinator { group: GroupId },

    #[error("modifications on partitions when replication factor is greater than 1 is not supported")]
    ReplicatedPartition { parent: String },
}

/// Errors resolving objects in the local or distribution catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("relation \"{0}\" does not exist")]
    RelationNotFound(String),

    #[error("relation \"{0}\" already exists")]
    RelationExists(String),

    #[error("index \"{0}\" does not exist")]
    IndexNotFound(String),

    #[error("could not find any finalized placement for shard {0}")]
    NoFinalizedPlacement(ShardId),

    #[error("relation \"{0}\" is not distributed")]
    NotDistributed(String),
}

/// Errors talking to worker nodes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("could not connect to {node}: {message}")]
    ConnectionFailed { node: String, message: String },

    #[error("command failed on {node}: {message} (command: {command})")]
    RemoteCommandFailed {
        node: String,
        command: String,
        message: String,
    },

    #[error("failed to prepare transaction {gid} on {node}: {message}")]
    PrepareFailed {
        node: String,
        gid: String,
        message: String,
    },
}

const CONFLICTING_MODE_DETAIL: &str = "When there is a foreign key to a reference table, \
     the cluster needs to perform all operations over a single connection per node to ensure consistency.";
const CONFLICTING_MODE_HINT: &str =
    "Try re-running the transaction with \"SET LOCAL tern.multi_shard_modify_mode TO 'sequential';\"";
const PARTIAL_INDEX_DETAIL: &str = "CONCURRENTLY-enabled index commands can fail partially, \
     leaving behind an INVALID index.";
const PARTIAL_INDEX_HINT: &str = "Use DROP INDEX CONCURRENTLY IF EXISTS to remove the invalid index, \
     then retry the original command.";

fn conflicting_mode_message(relation: &str, after_parallel: &bool) -> String {
    if *after_parallel {
        format!(
            "cannot modify table \"{}\" because there was a parallel operation on a distributed table in the transaction",
            relation
        )
    } else {
        format!(
            "cannot execute parallel operation on table \"{}\" after it was accessed over a single connection per node in the transaction",
            relation
        )
    }
}

impl DdlError {
    /// Unsupported command with only a primary message.
    pub fn unsupported(message: impl Into<String>) -> Self {
        DdlError::UnsupportedCommand {
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// Attach a detail line. No-op for variants with a fixed detail.
    pub fn with_detail(self, text: impl Into<String>) -> Self {
        match self {
            DdlError::UnsupportedCommand { message, hint, .. } => DdlError::UnsupportedCommand {
                message,
                detail: Some(text.into()),
                hint,
            },
            other => other,
        }
    }

    /// Attach a hint line. No-op for variants with a fixed hint.
    pub fn with_hint(self, text: impl Into<String>) -> Self {
        match self {
            DdlError::UnsupportedCommand {
                message, detail, ..
            } => DdlError::UnsupportedCommand {
                message,
                detail,
                hint: Some(text.into()),
            },
            other => other,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            DdlError::UnsupportedCommand { detail, .. } => detail.clone(),
            DdlError::ConflictingExecutionMode { .. } => Some(CONFLICTING_MODE_DETAIL.to_string()),
            DdlError::PartialIndexFailure { index, cause } => Some(format!(
                "{} Index \"{}\": {}",
                PARTIAL_INDEX_DETAIL, index, cause
            )),
            DdlError::NotCoordinator { group } => {
                Some(format!("This node belongs to {}.", group))
            }
            DdlError::ReplicatedPartition { .. } => None,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            DdlError::UnsupportedCommand { hint, .. } => hint.clone(),
            DdlError::ConflictingExecutionMode { .. } => Some(CONFLICTING_MODE_HINT.to_string()),
            DdlError::PartialIndexFailure { .. } => Some(PARTIAL_INDEX_HINT.to_string()),
            DdlError::NotCoordinator { .. } => {
                Some("Connect to the coordinator and run it again.".to_string())
            }
            DdlError::ReplicatedPartition { parent } => {
                Some(format!("Run the query on the parent table \"{}\" instead.", parent))
            }
        }
    }
}

impl TernError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TernError::Ddl(_) => ErrorKind::UserError,
            TernError::Catalog(CatalogError::NoFinalizedPlacement(_)) => ErrorKind::Transient,
            TernError::Catalog(_) => ErrorKind::UserError,
            TernError::Config(_) => ErrorKind::UserError,
            TernError::Cluster(ClusterError::PrepareFailed { .. }) => ErrorKind::Retryable,
            TernError::Cluster(_) => ErrorKind::Transient,
            TernError::Internal(_) | TernError::InternalBug { .. } => ErrorKind::InternalBug,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    pub fn is_internal_bug(&self) -> bool {
        matches!(self.kind(), ErrorKind::InternalBug)
    }

    /// Map to a PostgreSQL SQLSTATE code.
    pub fn pg_sqlstate(&self) -> &'static str {
        match self {
            TernError::Ddl(DdlError::UnsupportedCommand { .. }) => "0A000", // feature_not_supported
            TernError::Ddl(DdlError::ConflictingExecutionMode { .. }) => "25001", // active_sql_transaction
            TernError::Ddl(DdlError::PartialIndexFailure { .. }) => "55000", // object_not_in_prerequisite_state
            TernError::Ddl(DdlError::NotCoordinator { .. }) => "0A000",
            TernError::Ddl(DdlError::ReplicatedPartition { .. }) => "0A000",
            TernError::Catalog(CatalogError::RelationNotFound(_)) => "42P01", // undefined_table
            TernError::Catalog(CatalogError::NotDistributed(_)) => "42P01",
            TernError::Catalog(CatalogError::RelationExists(_)) => "42P07", // duplicate_table
            TernError::Catalog(CatalogError::IndexNotFound(_)) => "42704", // undefined_object
            TernError::Catalog(CatalogError::NoFinalizedPlacement(_)) => "58000", // system_error
            TernError::Cluster(ClusterError::ConnectionFailed { .. }) => "08006", // connection_failure
            TernError::Cluster(ClusterError::RemoteCommandFailed { .. }) => "58000",
            TernError::Cluster(ClusterError::PrepareFailed { .. }) => "40000", // transaction_rollback
            TernError::Config(_) => "F0000", // config_file_error
            TernError::Internal(_) | TernError::InternalBug { .. } => "XX000", // internal_error
        }
    }

    /// Optional DETAIL line for the client error report.
    pub fn detail(&self) -> Option<String> {
        match self {
            TernError::Ddl(e) => e.detail(),
            _ => None,
        }
    }

    /// Optional HINT line for the client error report.
    pub fn hint(&self) -> Option<String> {
        match self {
            TernError::Ddl(e) => e.hint(),
            _ => None,
        }
    }

    /// Shorthand for `TernError::Ddl(DdlError::unsupported(..))`.
    pub fn unsupported(message: impl Into<String>) -> Self {
        TernError::Ddl(DdlError::unsupported(message))
    }

    /// Construct an internal bug error with error code and context.
    pub fn internal_bug(
        error_code: &'static str,
        message: impl Into<String>,
        debug_context: impl Into<String>,
    ) -> Self {
        TernError::InternalBug {
            error_code,
            message: message.into(),
            debug_context: debug_context.into(),
        }
    }

    /// Add context string to an error, preserving error classification
    /// for structured variants.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            TernError::Internal(msg) => TernError::Internal(format!("{ctx}: {msg}")),
            TernError::InternalBug {
                error_code,
                message,
                debug_context,
            } => TernError::InternalBug {
                error_code,
                message: format!("{ctx}: {message}"),
                debug_context,
            },
            TernError::Cluster(ClusterError::RemoteCommandFailed {
                node,
                command,
                message,
            }) => TernError::Cluster(ClusterError::RemoteCommandFailed {
                node,
                command,
                message: format!("{ctx}: {message}"),
            }),
            other => other,
        }
    }
}
