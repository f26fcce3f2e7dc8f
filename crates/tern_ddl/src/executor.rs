//! Run DDL jobs and task lists against worker connections.
//!
//! Parallel execution opens one connection per (node, anchor shard),
//! dispatches every task before waiting on any, then drains all of them even
//! after a failure. Sequential execution reuses one connection per node and
//! stops at the first failure.

use tern_common::config::CommitProtocol;
use tern_common::error::{CatalogError, DdlError};
use tern_common::metadata::DistributedRelation;
use tern_common::{TernError, TernResult};

use crate::catalog::MetadataCatalog;
use crate::context::CommandContext;
use crate::render::{set_search_path_command, DISABLE_DDL_PROPAGATION};
use crate::task::{DdlJob, Task};
use crate::transaction::{ConnectionKey, Transaction};

/// How a task list was run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        }
    }
}

pub struct DdlExecutor<'a> {
    catalog: &'a dyn MetadataCatalog,
}

impl<'a> DdlExecutor<'a> {
    pub fn new(catalog: &'a dyn MetadataCatalog) -> Self {
        Self { catalog }
    }

    fn relation(&self, job: &DdlJob) -> TernResult<DistributedRelation> {
        self.catalog
            .distributed_relation(job.target_relation)
            .ok_or_else(|| CatalogError::NotDistributed(job.target_relation.to_string()).into())
    }

    /// Relations a job touches that are distributed.
    fn job_relations(&self, job: &DdlJob) -> Vec<DistributedRelation> {
        job.relations()
            .into_iter()
            .filter_map(|id| self.catalog.distributed_relation(id))
            .collect()
    }

    fn ensure_coordinator(ctx: &CommandContext) -> TernResult<()> {
        if !ctx.is_coordinator() {
            return Err(DdlError::NotCoordinator {
                group: ctx.local_group,
            }
            .into());
        }
        Ok(())
    }

    /// Commands on a partition must go through its parent when shards are
    /// replicated.
    pub fn ensure_partition_not_replicated(&self, relation: &DistributedRelation) -> TernResult<()> {
        let Some(parent) = relation.partition_parent else {
            return Ok(());
        };
        let replicated = self
            .catalog
            .shard_intervals(relation.id)
            .iter()
            .any(|shard| self.catalog.shard_placements(shard.shard_id).len() > 1);
        if replicated {
            let parent_name = self
                .catalog
                .relation_name(parent)
                .map(|n| n.name)
                .unwrap_or_else(|| parent.to_string());
            return Err(DdlError::ReplicatedPartition {
                parent: parent_name,
            }
            .into());
        }
        Ok(())
    }

    /// Commands that precede a job's text on metadata workers.
    fn metadata_preamble(ctx: &CommandContext) -> Vec<String> {
        let mut commands = vec![DISABLE_DDL_PROPAGATION.to_string()];
        if let Some(search_path) = set_search_path_command(&ctx.session.search_path) {
            commands.push(search_path);
        }
        commands
    }

    /// Send `commands` to every metadata worker inside the transaction.
    pub fn send_to_metadata_workers(
        &self,
        txn: &mut Transaction,
        commands: &[String],
    ) -> TernResult<usize> {
        let workers = self.catalog.metadata_workers();
        for worker in &workers {
            for command in commands {
                txn.execute_on_node(&worker.key(), command)?;
            }
        }
        tern_observability::record_metadata_broadcast(workers.len());
        Ok(workers.len())
    }

    /// Propagate one job: mirror the command to metadata workers when the
    /// relation's metadata is synced, then run its tasks.
    pub fn execute_job(
        &self,
        ctx: &CommandContext,
        txn: &mut Transaction,
        job: &DdlJob,
    ) -> TernResult<()> {
        Self::ensure_coordinator(ctx)?;
        let relation = self.relation(job)?;
        self.ensure_partition_not_replicated(&relation)?;

        tracing::debug!(
            job = %job.job_id,
            relation = %relation.name,
            tasks = job.tasks.len(),
            concurrent = job.concurrent_index,
            "executing distributed DDL job"
        );

        if job.concurrent_index {
            return self.execute_concurrent_job(ctx, txn, job, &relation);
        }

        if relation.should_sync_metadata() {
            let mut commands = Self::metadata_preamble(ctx);
            commands.push(job.command.clone());
            self.send_to_metadata_workers(txn, &commands)?;
        }

        let sequential = txn.mode().is_sequential() || job.execute_sequentially;
        let relations = self.job_relations(job);
        let mode = self.execute_tasks(txn, &job.tasks, &relations, sequential)?;
        tern_observability::record_ddl_job(mode.as_str(), job.tasks.len());
        Ok(())
    }

    /// Index commands with CONCURRENTLY cannot run inside a transaction block
    /// on the workers, so every connection is bare and a failure cannot be
    /// rolled back remotely.
    fn execute_concurrent_job(
        &self,
        ctx: &CommandContext,
        txn: &mut Transaction,
        job: &DdlJob,
        relation: &DistributedRelation,
    ) -> TernResult<()> {
        txn.mode_mut().switch_commit_protocol(CommitProtocol::Bare);

        let relations = self.job_relations(job);
        let result = self
            .execute_tasks(txn, &job.tasks, &relations, true)
            .and_then(|_| {
                if !relation.should_sync_metadata() {
                    return Ok(());
                }
                let mut commands = Self::metadata_preamble(ctx);
                commands.push(job.command.clone());
                let transport = txn.transport();
                let workers = self.catalog.metadata_workers();
                for worker in &workers {
                    transport.execute_bare(&worker.key(), &commands)?;
                }
                tern_observability::record_metadata_broadcast(workers.len());
                Ok(())
            });

        match result {
            Ok(()) => {
                tern_observability::record_ddl_job(ExecutionMode::Sequential.as_str(), job.tasks.len());
                Ok(())
            }
            Err(e) => {
                let index = job
                    .index_name
                    .clone()
                    .unwrap_or_else(|| relation.name.to_string());
                tracing::warn!(index = %index, error = %e, "concurrent index command failed on workers");
                Err(DdlError::PartialIndexFailure {
                    index,
                    cause: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Run a task list in the requested mode, enforcing the transaction's
    /// sequential/parallel bookkeeping for `relations`.
    pub fn execute_tasks(
        &self,
        txn: &mut Transaction,
        tasks: &[Task],
        relations: &[DistributedRelation],
        sequential: bool,
    ) -> TernResult<ExecutionMode> {
        if tasks.is_empty() {
            return Ok(if sequential {
                ExecutionMode::Sequential
            } else {
                ExecutionMode::Parallel
            });
        }

        if sequential {
            txn.mode_mut().require_sequential(relations)?;
            Self::execute_sequential(txn, tasks)?;
            return Ok(ExecutionMode::Sequential);
        }

        txn.mode().check_parallel_allowed(relations)?;
        Self::execute_parallel(txn, tasks)?;
        txn.mode_mut()
            .record_parallel_access(relations.iter().map(|r| r.id));
        Ok(ExecutionMode::Parallel)
    }

    fn execute_sequential(txn: &mut Transaction, tasks: &[Task]) -> TernResult<()> {
        let bare = txn.uses_bare_connections();
        for task in tasks {
            for placement in &task.placements {
                let key = ConnectionKey::per_node(placement.node_key(), bare);
                txn.coordinated().execute(&key, &task.command).map_err(|e| {
                    tracing::warn!(task = %task.task_id, shard = %task.anchor_shard, statement = %task.shard_command, "task failed: {}", e);
                    e.with_context(task.anchor_shard.to_string())
                })?;
            }
        }
        Ok(())
    }

    fn execute_parallel(txn: &mut Transaction, tasks: &[Task]) -> TernResult<()> {
        let bare = txn.uses_bare_connections();
        let mut dispatched: Vec<(ConnectionKey, &Task)> = Vec::new();
        let mut first_error: Option<TernError> = None;

        'dispatch: for task in tasks {
            for placement in &task.placements {
                let key = ConnectionKey::per_shard(placement.node_key(), task.anchor_shard, bare);
                match txn.coordinated().send(&key, &task.command) {
                    Ok(()) => dispatched.push((key, task)),
                    Err(e) => {
                        first_error = Some(e.with_context(task.anchor_shard.to_string()));
                        break 'dispatch;
                    }
                }
            }
        }

        for (key, task) in &dispatched {
            if let Err(e) = txn.coordinated().wait(key) {
                tracing::warn!(
                    task = %task.task_id,
                    shard = %task.anchor_shard,
                    node = %key.node,
                    statement = %task.shard_command,
                    "task failed: {}",
                    e
                );
                first_error.get_or_insert(e.with_context(task.anchor_shard.to_string()));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
