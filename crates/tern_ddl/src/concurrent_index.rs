//! CREATE INDEX CONCURRENTLY on a distributed table.
//!
//! The local index is built first and committed. It is then marked invalid
//! in place, so the mark survives whatever happens next, and a new local
//! transaction flips it back to valid before the shard indexes are built.
//! If any shard fails, the session aborts that transaction and the index is
//! left invalid on the coordinator; nothing on the workers is rolled back.

use std::fmt;

use tern_common::error::DdlError;
use tern_common::types::RelationId;
use tern_common::{TernError, TernResult};

use crate::catalog::LocalEngine;
use crate::context::CommandContext;
use crate::executor::DdlExecutor;
use crate::task::DdlJob;
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBuildState {
    /// Local index built, not yet committed.
    Building,
    /// Committed and durably marked invalid.
    Invalid,
    Valid,
    /// A shard failed; the index stays invalid until dropped.
    FailedInvalid,
}

impl IndexBuildState {
    fn can_transition_to(self, next: IndexBuildState) -> bool {
        matches!(
            (self, next),
            (IndexBuildState::Building, IndexBuildState::Invalid)
                | (IndexBuildState::Building, IndexBuildState::FailedInvalid)
                | (IndexBuildState::Invalid, IndexBuildState::Valid)
                | (IndexBuildState::Invalid, IndexBuildState::FailedInvalid)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IndexBuildState::Valid | IndexBuildState::FailedInvalid)
    }
}

impl fmt::Display for IndexBuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexBuildState::Building => "building",
            IndexBuildState::Invalid => "invalid",
            IndexBuildState::Valid => "valid",
            IndexBuildState::FailedInvalid => "failed_invalid",
        };
        f.write_str(s)
    }
}

/// One concurrent index build, driven to a terminal state by `run`.
pub struct ConcurrentIndexBuild {
    index: RelationId,
    index_name: String,
    state: IndexBuildState,
}

impl ConcurrentIndexBuild {
    pub fn new(index: RelationId, index_name: impl Into<String>) -> Self {
        Self {
            index,
            index_name: index_name.into(),
            state: IndexBuildState::Building,
        }
    }

    pub fn state(&self) -> IndexBuildState {
        self.state
    }

    fn transition(&mut self, next: IndexBuildState) -> TernResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(TernError::internal_bug(
                "E-IDX-001",
                "invalid concurrent index state transition",
                format!("{} {} -> {}", self.index_name, self.state, next),
            ));
        }
        tracing::debug!(index = %self.index_name, from = %self.state, to = %next, "concurrent index state");
        self.state = next;
        Ok(())
    }

    /// Commit the local build, mark it invalid, then propagate `job`.
    /// Leaves the engine inside a transaction that marks the index valid;
    /// the caller commits it on success and aborts it on error.
    pub fn run(
        &mut self,
        engine: &dyn LocalEngine,
        executor: &DdlExecutor<'_>,
        ctx: &CommandContext,
        txn: &mut Transaction,
        job: &DdlJob,
    ) -> TernResult<()> {
        let marked = engine.commit_transaction().and_then(|_| {
            engine.start_transaction();
            engine.set_index_valid_in_place(self.index, false)?;
            engine.commit_transaction()
        });
        if let Err(e) = marked {
            self.transition(IndexBuildState::FailedInvalid)?;
            tern_observability::record_concurrent_index("failed_invalid");
            return Err(e);
        }
        self.transition(IndexBuildState::Invalid)?;

        engine.start_transaction();
        let result = engine
            .set_index_valid(self.index, true)
            .and_then(|_| executor.execute_job(ctx, txn, job));

        match result {
            Ok(()) => {
                self.transition(IndexBuildState::Valid)?;
                tern_observability::record_concurrent_index("valid");
                Ok(())
            }
            Err(e) => {
                self.transition(IndexBuildState::FailedInvalid)?;
                tern_observability::record_concurrent_index("failed_invalid");
                Err(match e {
                    TernError::Ddl(DdlError::PartialIndexFailure { .. }) => e,
                    other => DdlError::PartialIndexFailure {
                        index: self.index_name.clone(),
                        cause: other.to_string(),
                    }
                    .into(),
                })
            }
        }
    }
}
