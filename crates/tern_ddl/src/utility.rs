//! Entry point for utility statements.
//!
//! `UtilityProcessor` holds the process-wide collaborators and the cached
//! foreign-key graph. Each client gets a `Session`, which owns its explicit
//! transaction (if any) and runs every statement through the same phases:
//!
//! 1. classify and plan against the catalog as it was before the command,
//! 2. apply the command locally,
//! 3. distribute new partitions, flush the foreign-key graph and re-check
//!    constraints the local command created,
//! 4. run the planned jobs, then VACUUM / ANALYZE,
//! 5. commit (implicit transactions only).
//!
//! Any error aborts the coordinated transaction and the local one.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tern_common::config::{CommitProtocol, DdlConfig, MultiShardModifyMode};
use tern_common::error::{CatalogError, DdlError};
use tern_common::types::{RangeVar, RelationId};
use tern_common::{TernError, TernResult};

use crate::catalog::{LocalEngine, MetadataCatalog};
use crate::classifier::{Classification, CommandClassifier, LocalOnlyReason};
use crate::concurrent_index::ConcurrentIndexBuild;
use crate::context::{CommandContext, Notice, SessionState};
use crate::executor::DdlExecutor;
use crate::fk_graph::ForeignKeyGraph;
use crate::fk_validator::{DefaultForeignKeyValidator, ForeignKeyValidator};
use crate::grant::plan_grant;
use crate::planner::DdlPlanner;
use crate::statement::*;
use crate::task::{DdlJob, JobIdAllocator};
use crate::transaction::{Transaction, TransactionExecutionMode};
use crate::transport::WorkerTransport;
use crate::truncate::process_truncate;
use crate::vacuum::{execute_vacuum, vacuum_targets, VacuumTarget};
use crate::validator::validate_constraints;

/// Result of one successfully processed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub tag: String,
    /// Jobs propagated to workers.
    pub jobs: usize,
    pub notices: Vec<Notice>,
}

/// Process-wide coordinator state shared by every session.
pub struct UtilityProcessor {
    config: DdlConfig,
    catalog: Arc<dyn MetadataCatalog>,
    engine: Arc<dyn LocalEngine>,
    transport: Arc<dyn WorkerTransport>,
    fk_graph: ForeignKeyGraph,
    fk_validator: Arc<dyn ForeignKeyValidator>,
    jobs: JobIdAllocator,
    next_session_id: AtomicU32,
    next_txn_id: AtomicU64,
}

impl UtilityProcessor {
    pub fn new(
        config: DdlConfig,
        catalog: Arc<dyn MetadataCatalog>,
        engine: Arc<dyn LocalEngine>,
        transport: Arc<dyn WorkerTransport>,
    ) -> Self {
        Self {
            config,
            catalog,
            engine,
            transport,
            fk_graph: ForeignKeyGraph::new(),
            fk_validator: Arc::new(DefaultForeignKeyValidator),
            jobs: JobIdAllocator::default(),
            next_session_id: AtomicU32::new(1),
            next_txn_id: AtomicU64::new(1),
        }
    }

    pub fn with_fk_validator(mut self, fk_validator: Arc<dyn ForeignKeyValidator>) -> Self {
        self.fk_validator = fk_validator;
        self
    }

    pub fn config(&self) -> &DdlConfig {
        &self.config
    }

    pub fn fk_graph(&self) -> &ForeignKeyGraph {
        &self.fk_graph
    }

    pub fn session(&self, state: SessionState) -> Session<'_> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = id, "session opened");
        Session {
            processor: self,
            id,
            config: self.config.clone(),
            state,
            txn: None,
        }
    }

    fn new_transaction(&self, session_id: u32, config: &DdlConfig, explicit: bool) -> Transaction {
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        Transaction::new(
            id,
            session_id,
            config.local_group(),
            explicit,
            TransactionExecutionMode::from_config(config),
            Arc::clone(&self.transport),
        )
    }
}

/// One client session. Statements run one at a time.
pub struct Session<'a> {
    processor: &'a UtilityProcessor,
    id: u32,
    /// Session-level overrides of the process configuration.
    config: DdlConfig,
    state: SessionState,
    txn: Option<Transaction>,
}

impl<'a> Session<'a> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn set_search_path(&mut self, search_path: Vec<String>) {
        self.state.search_path = search_path;
    }

    pub fn set_enable_ddl_propagation(&mut self, enabled: bool) {
        self.config.enable_ddl_propagation = enabled;
    }

    /// Applies to the open transaction, or to transactions started later.
    pub fn set_multi_shard_modify_mode(&mut self, mode: MultiShardModifyMode) {
        match self.txn.as_mut() {
            Some(txn) => txn.mode_mut().set_mode(mode),
            None => self.config.multi_shard_modify_mode = mode,
        }
    }

    pub fn set_commit_protocol(&mut self, protocol: CommitProtocol) {
        self.config.multi_shard_commit_protocol = protocol;
    }

    pub fn in_transaction_block(&self) -> bool {
        self.txn.is_some()
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.txn.as_ref()
    }

    pub fn begin(&mut self) -> TernResult<()> {
        if self.txn.is_some() {
            return Err(TernError::Internal(
                "there is already a transaction in progress".to_string(),
            ));
        }
        self.processor.engine.start_transaction();
        self.txn = Some(self.processor.new_transaction(self.id, &self.config, true));
        Ok(())
    }

    pub fn commit(&mut self) -> TernResult<()> {
        let Some(mut txn) = self.txn.take() else {
            tracing::warn!(session = self.id, "there is no transaction in progress");
            return Ok(());
        };
        self.commit_transaction(&mut txn)
    }

    pub fn rollback(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            txn.abort();
            self.processor.engine.abort_transaction();
        }
    }

    fn commit_transaction(&self, txn: &mut Transaction) -> TernResult<()> {
        let engine = &self.processor.engine;
        if let Err(e) = txn.prepare_commit() {
            engine.abort_transaction();
            tern_observability::record_ddl_failure(e.kind().as_str());
            return Err(e);
        }
        if let Err(e) = engine.commit_transaction() {
            txn.abort();
            tern_observability::record_ddl_failure(e.kind().as_str());
            return Err(e);
        }
        txn.finish_commit();
        Ok(())
    }

    /// Process one utility statement. `query` is its original text.
    pub fn execute(&mut self, stmt: UtilityStmt, query: &str) -> TernResult<CommandOutcome> {
        let explicit = self.txn.is_some();
        let mut txn = match self.txn.take() {
            Some(txn) => txn,
            None => {
                self.processor.engine.start_transaction();
                self.processor.new_transaction(self.id, &self.config, false)
            }
        };
        let mut ctx = CommandContext::new(&self.config, self.state.clone(), explicit);
        let tag = stmt.tag().to_string();

        let result = self.run(&mut ctx, &mut txn, stmt, query);
        let result = match result {
            Ok(jobs) if !explicit => self.commit_transaction(&mut txn).map(|_| jobs),
            Ok(jobs) => {
                self.txn = Some(txn);
                Ok(jobs)
            }
            Err(e) => {
                tracing::warn!(session = self.id, command = %tag, error = %e, "utility command failed");
                txn.abort();
                self.processor.engine.abort_transaction();
                tern_observability::record_ddl_failure(e.kind().as_str());
                Err(e)
            }
        };

        result.map(|jobs| CommandOutcome {
            tag,
            jobs,
            notices: ctx.take_notices(),
        })
    }

    fn run(
        &self,
        ctx: &mut CommandContext,
        txn: &mut Transaction,
        mut stmt: UtilityStmt,
        query: &str,
    ) -> TernResult<usize> {
        let processor = self.processor;
        let catalog = processor.catalog.as_ref();
        let planner = DdlPlanner::new(catalog, &processor.fk_graph, &processor.jobs)
            .with_fk_validator(processor.fk_validator.as_ref());
        let classification = CommandClassifier::new(catalog).classify(ctx, &stmt);

        // ── Before the local command ─────────────────────────────────
        let mut post = PostLocal::default();
        let jobs = self.plan(ctx, txn, &planner, &classification, &mut stmt, query, &mut post)?;

        // ── Local command ────────────────────────────────────────────
        processor.engine.apply(&stmt, query)?;

        // ── After the local command ──────────────────────────────────
        if let Some((partition, parent)) = post.distribute_partition {
            self.distribute_partition(ctx, partition, parent)?;
        }
        if let Some((partition, parent)) = post.pending_partition {
            let id = catalog
                .resolve_relation(&partition, &ctx.session.search_path)
                .ok_or_else(|| CatalogError::RelationNotFound(partition.to_string()))?;
            self.distribute_partition(ctx, id, parent)?;
        }
        if processor.fk_graph.flush_if_dirty(&mut ctx.fk_invalidation, catalog) {
            tracing::debug!("foreign key graph invalidated");
        }
        if let Some(relation) = post.validate_constraints {
            let fresh = catalog.distributed_relation(relation).ok_or_else(|| {
                TernError::internal_bug(
                    "E-UTIL-001",
                    "distributed relation vanished during ALTER TABLE",
                    relation.to_string(),
                )
            })?;
            validate_constraints(ctx, catalog, planner.fk_validator(), &fresh)?;
        }

        let executor = DdlExecutor::new(catalog);
        for job in &jobs {
            self.execute_job(ctx, txn, &executor, job)?;
        }

        if let UtilityStmt::Vacuum(vacuum) = &stmt {
            if !post.vacuum.is_empty() {
                execute_vacuum(catalog, &executor, &processor.jobs, txn, vacuum, &post.vacuum)?;
            }
        }

        if let UtilityStmt::Cluster(cluster) = &stmt {
            let distributed = cluster.relation.is_none()
                || classification.target().is_some();
            if distributed {
                ctx.report(Notice::warning("not propagating CLUSTER command to worker nodes"));
            }
        }

        Ok(jobs.len())
    }

    #[allow(clippy::too_many_arguments)]
    fn plan(
        &self,
        ctx: &mut CommandContext,
        txn: &mut Transaction,
        planner: &DdlPlanner<'_>,
        classification: &Classification,
        stmt: &mut UtilityStmt,
        query: &str,
        post: &mut PostLocal,
    ) -> TernResult<Vec<DdlJob>> {
        let catalog = self.processor.catalog.as_ref();

        if let Classification::LocalOnly {
            target,
            reason: LocalOnlyReason::PropagationDisabled,
        } = classification
        {
            if let UtilityStmt::AlterTable(alter) = &mut *stmt {
                planner.check_local_alter_table(target, alter)?;
            }
            report_not_propagating(ctx, stmt.tag());
            return Ok(Vec::new());
        }

        match stmt {
            UtilityStmt::AlterTable(alter) => match classification {
                Classification::Propagate(target) => {
                    let adds_constraint = alter.cmds.iter().any(|c| match c {
                        AlterTableCmd::AddConstraint(_) => true,
                        AlterTableCmd::AddColumn(def) => !def.constraints.is_empty(),
                        _ => false,
                    });
                    if adds_constraint {
                        post.validate_constraints = Some(target.left.id);
                    }
                    planner.plan_alter_table(ctx, txn, target, alter, query)
                }
                Classification::LocalOnly { target, .. } => {
                    if let Some(partition) = target.right {
                        post.distribute_partition = Some((partition, target.left.id));
                    }
                    Ok(Vec::new())
                }
                Classification::NotDistributed => {
                    self.check_attach_to_local_parent(ctx, alter)?;
                    Ok(Vec::new())
                }
            },
            UtilityStmt::Rename(rename) => match classification {
                Classification::Propagate(target) => planner.plan_rename(target, rename, query),
                _ => Ok(Vec::new()),
            },
            UtilityStmt::CreateIndex(index) => {
                if index.concurrent && ctx.in_transaction_block {
                    return Err(DdlError::unsupported(
                        "CREATE INDEX CONCURRENTLY cannot run inside a transaction block",
                    )
                    .into());
                }
                match classification {
                    Classification::Propagate(target) => planner.plan_index(ctx, target, index, query),
                    _ => Ok(Vec::new()),
                }
            }
            UtilityStmt::CreatePartitionOf(create) => {
                if let Classification::Propagate(target) = classification {
                    post.pending_partition = Some((create.relation.clone(), target.left.id));
                }
                Ok(Vec::new())
            }
            UtilityStmt::Drop(drop) => {
                if !ctx.propagation_enabled {
                    return Ok(Vec::new());
                }
                match drop.kind {
                    DropKind::Index => planner.plan_drop_index(ctx, drop, query),
                    DropKind::Table => {
                        planner.plan_drop_table(ctx, txn, drop)?;
                        Ok(Vec::new())
                    }
                    DropKind::Schema => {
                        planner.plan_drop_schema(ctx, drop);
                        Ok(Vec::new())
                    }
                }
            }
            UtilityStmt::Grant(grant) => {
                if !ctx.propagation_enabled {
                    return Ok(Vec::new());
                }
                plan_grant(ctx, catalog, &self.processor.jobs, grant)
            }
            UtilityStmt::Truncate(truncate) => {
                if ctx.propagation_enabled {
                    process_truncate(ctx, catalog, &self.processor.fk_graph, txn, truncate)?;
                }
                Ok(Vec::new())
            }
            UtilityStmt::Vacuum(vacuum) => {
                post.vacuum = vacuum_targets(ctx, catalog, vacuum);
                Ok(Vec::new())
            }
            UtilityStmt::AlterObjectSchema(_) => {
                if classification.target().is_some() {
                    ctx.report(
                        Notice::warning("not propagating ALTER ... SET SCHEMA commands to worker nodes")
                            .with_hint("Connect to worker nodes directly to manually change schemas of affected objects."),
                    );
                }
                Ok(Vec::new())
            }
            UtilityStmt::AlterTableMoveAll(_) => {
                ctx.report(
                    Notice::warning("not propagating ALTER TABLE ALL IN TABLESPACE commands to worker nodes")
                        .with_hint("Connect to worker nodes directly to manually move all tables."),
                );
                Ok(Vec::new())
            }
            UtilityStmt::CreateDatabase { .. } => {
                ctx.report(
                    Notice::notice("not propagating CREATE DATABASE command to worker nodes")
                        .with_hint("You can manually create a database and its extensions on workers."),
                );
                Ok(Vec::new())
            }
            UtilityStmt::CreateRole { .. } => {
                ctx.report(
                    Notice::notice("not propagating CREATE ROLE/USER commands to worker nodes")
                        .with_hint("Connect to worker nodes directly to manually create all necessary users and roles."),
                );
                Ok(Vec::new())
            }
            UtilityStmt::Cluster(_) | UtilityStmt::Other { .. } => Ok(Vec::new()),
        }
    }

    /// ATTACH PARTITION of a distributed table to a local parent.
    fn check_attach_to_local_parent(&self, ctx: &CommandContext, alter: &AlterTableStmt) -> TernResult<()> {
        let catalog = self.processor.catalog.as_ref();
        for cmd in &alter.cmds {
            let AlterTableCmd::AttachPartition { partition, .. } = cmd else {
                continue;
            };
            let parent = catalog.resolve_relation(&alter.relation, &ctx.session.search_path);
            let attached = catalog.resolve_relation(partition, &ctx.session.search_path);
            if let (Some(parent), Some(attached)) = (parent, attached) {
                if !catalog.is_distributed(parent) && catalog.is_distributed(attached) {
                    let name = catalog
                        .relation_name(parent)
                        .map(|n| n.name)
                        .unwrap_or_else(|| alter.relation.name.clone());
                    return Err(DdlError::unsupported(
                        "non-distributed tables cannot have distributed partitions",
                    )
                    .with_hint(format!("Distribute the partitioned table \"{}\" instead", name))
                    .into());
                }
            }
        }
        Ok(())
    }

    fn distribute_partition(
        &self,
        ctx: &CommandContext,
        partition: RelationId,
        parent: RelationId,
    ) -> TernResult<()> {
        let catalog = self.processor.catalog.as_ref();
        if catalog.is_distributed(partition) {
            return Ok(());
        }
        tracing::debug!(%partition, %parent, local_group = %ctx.local_group, "distributing partition like its parent");
        self.processor.engine.distribute_partition(partition, parent)
    }

    fn execute_job(
        &self,
        ctx: &CommandContext,
        txn: &mut Transaction,
        executor: &DdlExecutor<'_>,
        job: &DdlJob,
    ) -> TernResult<()> {
        if !job.concurrent_index {
            return executor.execute_job(ctx, txn, job);
        }
        let catalog = self.processor.catalog.as_ref();
        let created = job.index_name.as_ref().and_then(|name| {
            let schema = catalog.relation_name(job.target_relation).map(|n| n.schema);
            let rv = RangeVar {
                schema,
                name: name.clone(),
            };
            catalog.index_by_name(&rv, &ctx.session.search_path)
        });
        match created {
            // CREATE INDEX CONCURRENTLY: the local index exists now.
            Some(index) => ConcurrentIndexBuild::new(index.id, index.name).run(
                self.processor.engine.as_ref(),
                executor,
                ctx,
                txn,
                job,
            ),
            // DROP INDEX CONCURRENTLY: nothing left locally to mark.
            None => executor.execute_job(ctx, txn, job),
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.txn.is_some() {
            tracing::debug!(session = self.id, "session closed with an open transaction");
            self.rollback();
        }
    }
}

/// Work deferred until the local command has been applied.
#[derive(Default)]
struct PostLocal {
    /// (partition, parent) of an ATTACH PARTITION of a local table.
    distribute_partition: Option<(RelationId, RelationId)>,
    /// CREATE TABLE ... PARTITION OF a distributed parent.
    pending_partition: Option<(RangeVar, RelationId)>,
    /// Relation whose constraints the command changed.
    validate_constraints: Option<RelationId>,
    vacuum: Vec<VacuumTarget>,
}

fn report_not_propagating(ctx: &mut CommandContext, tag: &str) {
    ctx.report(
        Notice::warning(format!("not propagating {} command to worker nodes", tag)).with_hint(format!(
            "Set tern.enable_ddl_propagation to true in order to send targeted {} commands to worker nodes.",
            tag
        )),
    );
}
