//! Per-command execution context.
//!
//! One `CommandContext` is created for every top-level statement and threaded
//! through classification, validation, task building and execution. Nothing
//! in it outlives the statement.

use std::fmt;

use tern_common::config::DdlConfig;
use tern_common::types::GroupId;

/// Severity of a non-fatal message relayed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Notice,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Notice => write!(f, "NOTICE"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Notice,
            ..Self::warning(message)
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Debug,
            ..Self::warning(message)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Session values the coordinator reads but does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Explicit search path. Empty means the default path.
    pub search_path: Vec<String>,
    pub current_user: String,
    pub session_user: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            current_user: "postgres".to_string(),
            session_user: "postgres".to_string(),
        }
    }
}

/// Tracks whether the foreign-key graph must be rebuilt once the local
/// command has been applied.
#[derive(Debug, Default)]
pub struct ForeignKeyInvalidation {
    dirty: bool,
}

impl ForeignKeyInvalidation {
    pub fn mark_dirty(&mut self) {
        if !self.dirty {
            tracing::debug!("foreign key graph marked for invalidation");
        }
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Consume the flag. Returns whether it was set.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

/// State threaded through one top-level command.
#[derive(Debug)]
pub struct CommandContext {
    pub propagation_enabled: bool,
    pub local_group: GroupId,
    pub session: SessionState,
    /// The statement runs inside an explicit BEGIN ... COMMIT block.
    pub in_transaction_block: bool,
    pub fk_invalidation: ForeignKeyInvalidation,
    notices: Vec<Notice>,
}

impl CommandContext {
    pub fn new(config: &DdlConfig, session: SessionState, in_transaction_block: bool) -> Self {
        Self {
            propagation_enabled: config.enable_ddl_propagation,
            local_group: config.local_group(),
            session,
            in_transaction_block,
            fk_invalidation: ForeignKeyInvalidation::default(),
            notices: Vec::new(),
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.local_group.is_coordinator()
    }

    pub fn mark_fk_graph_dirty(&mut self) {
        self.fk_invalidation.mark_dirty();
    }

    /// Record a message for the client and log it.
    pub fn report(&mut self, notice: Notice) {
        match notice.severity {
            Severity::Warning => tracing::warn!(
                detail = notice.detail.as_deref().unwrap_or(""),
                hint = notice.hint.as_deref().unwrap_or(""),
                "{}",
                notice.message
            ),
            Severity::Notice => tracing::info!("{}", notice.message),
            Severity::Debug => tracing::debug!(
                detail = notice.detail.as_deref().unwrap_or(""),
                "{}",
                notice.message
            ),
        }
        self.notices.push(notice);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter().filter(|n| n.severity == Severity::Warning)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}
