//! Units of propagated work: one `DdlJob` per command and relation, one
//! `Task` per shard (or shard pair).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tern_common::metadata::ShardPlacement;
use tern_common::types::{JobId, RelationId, ShardId, TaskId};

use crate::statement::UtilityStmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Ddl,
    InterShardDdl,
    VacuumAnalyze,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Ddl => "ddl",
            TaskKind::InterShardDdl => "inter_shard_ddl",
            TaskKind::VacuumAnalyze => "vacuum_analyze",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (relation, shard) reference carried by inter-shard tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationShard {
    pub relation_id: RelationId,
    pub shard_id: ShardId,
}

/// One shard-scoped unit of execution. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub kind: TaskKind,
    /// Command sent to every placement.
    pub command: String,
    /// The statement each placement ends up applying, with shard names.
    /// Never sent: the worker derives it from `command`. Kept for failure
    /// logs and for asserting what a shard will run.
    pub shard_command: String,
    pub anchor_shard: ShardId,
    pub placements: Vec<ShardPlacement>,
    /// `[left, right]` for inter-shard tasks, empty otherwise.
    pub relation_shards: Vec<RelationShard>,
}

impl Task {
    /// Right-hand shard of an inter-shard task.
    pub fn right_shard(&self) -> Option<ShardId> {
        self.relation_shards.get(1).map(|rs| rs.shard_id)
    }
}

/// The command a job propagates, as text and as the parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DdlCommand {
    pub text: String,
    pub stmt: UtilityStmt,
}

impl DdlCommand {
    pub fn new(text: impl Into<String>, stmt: UtilityStmt) -> Self {
        Self {
            text: text.into(),
            stmt,
        }
    }
}

/// Propagation work for one command against one relation, or one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DdlJob {
    pub job_id: JobId,
    pub target_relation: RelationId,
    /// Referenced or attached relation of a two-relation command.
    pub right_relation: Option<RelationId>,
    /// Exact text broadcast to metadata workers.
    pub command: String,
    pub concurrent_index: bool,
    /// Index a concurrent job builds or drops, for error reporting.
    pub index_name: Option<String>,
    pub execute_sequentially: bool,
    pub tasks: Vec<Task>,
}

impl DdlJob {
    pub fn new(job_id: JobId, target_relation: RelationId, command: impl Into<String>) -> Self {
        Self {
            job_id,
            target_relation,
            right_relation: None,
            command: command.into(),
            concurrent_index: false,
            index_name: None,
            execute_sequentially: false,
            tasks: Vec::new(),
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Relations whose shards the job touches.
    pub fn relations(&self) -> Vec<RelationId> {
        let mut relations = vec![self.target_relation];
        if let Some(right) = self.right_relation {
            if right != self.target_relation {
                relations.push(right);
            }
        }
        relations
    }
}

/// Hands out job ids, starting at 1.
#[derive(Debug, Default)]
pub struct JobIdAllocator {
    last: AtomicU64,
}

impl JobIdAllocator {
    pub fn next(&self) -> JobId {
        JobId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
