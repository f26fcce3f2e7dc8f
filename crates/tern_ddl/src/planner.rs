//! Turn a classified command into DDL jobs.
//!
//! Planning runs before the local command is applied, so every check here
//! sees the catalog as it was before the command.

use tern_common::error::{CatalogError, DdlError};
use tern_common::metadata::DistributedRelation;
use tern_common::types::{RangeVar, RelationId};
use tern_common::TernResult;

use crate::catalog::MetadataCatalog;
use crate::classifier::Target;
use crate::context::CommandContext;
use crate::fk_graph::ForeignKeyGraph;
use crate::fk_validator::{DefaultForeignKeyValidator, ForeignKeyValidator};
use crate::lock::LockMode;
use crate::render::{detach_partition_command, DISABLE_DDL_PROPAGATION};
use crate::statement::*;
use crate::task::{DdlCommand, DdlJob, JobIdAllocator};
use crate::task_list::{ddl_task_list, inter_shard_ddl_task_list};
use crate::transaction::Transaction;
use crate::validator::{validate_alter_index, validate_alter_table, validate_index, validate_rename};

pub struct DdlPlanner<'a> {
    catalog: &'a dyn MetadataCatalog,
    fk_graph: &'a ForeignKeyGraph,
    fk_validator: &'a dyn ForeignKeyValidator,
    jobs: &'a JobIdAllocator,
}

impl<'a> DdlPlanner<'a> {
    pub fn new(
        catalog: &'a dyn MetadataCatalog,
        fk_graph: &'a ForeignKeyGraph,
        jobs: &'a JobIdAllocator,
    ) -> Self {
        Self {
            catalog,
            fk_graph,
            fk_validator: &DefaultForeignKeyValidator,
            jobs,
        }
    }

    pub fn with_fk_validator(mut self, fk_validator: &'a dyn ForeignKeyValidator) -> Self {
        self.fk_validator = fk_validator;
        self
    }

    pub fn fk_validator(&self) -> &dyn ForeignKeyValidator {
        self.fk_validator
    }

    fn job_for(
        &self,
        relation: &DistributedRelation,
        stmt: UtilityStmt,
        query: &str,
    ) -> TernResult<DdlJob> {
        let job_id = self.jobs.next();
        let command = DdlCommand::new(query, stmt);
        let tasks = ddl_task_list(self.catalog, job_id, relation, &command)?;
        Ok(DdlJob::new(job_id, relation.id, query).with_tasks(tasks))
    }

    // ── ALTER TABLE / ALTER INDEX ────────────────────────────────────

    /// Plan an ALTER TABLE or ALTER INDEX against a distributed table.
    /// Foreign keys in `stmt` are marked skip-validation in place, before the
    /// local engine applies it.
    pub fn plan_alter_table(
        &self,
        ctx: &mut CommandContext,
        txn: &mut Transaction,
        target: &Target,
        stmt: &mut AlterTableStmt,
        query: &str,
    ) -> TernResult<Vec<DdlJob>> {
        let left = &target.left;
        match stmt.object {
            AlterObjectKind::Index => validate_alter_index(stmt)?,
            AlterObjectKind::Table => validate_alter_table(ctx, self.catalog, left, stmt)?,
        }
        mark_foreign_keys_skip_validation(stmt);

        let execute_sequentially = self.setup_execution_mode(ctx, txn, left, stmt)?;

        let job_id = self.jobs.next();
        let command = DdlCommand::new(query, UtilityStmt::AlterTable(stmt.clone()));
        let mut job = DdlJob::new(job_id, left.id, query);
        job.execute_sequentially = execute_sequentially;

        job.tasks = match target.right {
            Some(right_id) => {
                job.right_relation = Some(right_id);
                match self.catalog.distributed_relation(right_id) {
                    Some(right) => {
                        inter_shard_ddl_task_list(self.catalog, job_id, left, &right, &command)?
                    }
                    None => Vec::new(),
                }
            }
            None => ddl_task_list(self.catalog, job_id, left, &command)?,
        };

        tracing::debug!(
            job = %job.job_id,
            relation = %left.name,
            tasks = job.tasks.len(),
            sequential = execute_sequentially,
            "planned ALTER TABLE"
        );
        Ok(vec![job])
    }

    /// ALTER TABLE on a distributed table while propagation is off: applied
    /// locally only, but it still may not drop the distribution column.
    pub fn check_local_alter_table(
        &self,
        target: &Target,
        stmt: &mut AlterTableStmt,
    ) -> TernResult<()> {
        for cmd in &stmt.cmds {
            if let AlterTableCmd::DropColumn { name, .. } = cmd {
                if target.left.is_distribution_column(name) {
                    return Err(DdlError::unsupported(
                        "cannot execute ALTER TABLE command dropping partition column",
                    )
                    .into());
                }
            }
        }
        mark_foreign_keys_skip_validation(stmt);
        Ok(())
    }

    /// Decide whether the job must run over one connection per node. Shard
    /// commands that touch a foreign key to a reference table must, because
    /// the reference shard on each worker is then reached by every shard.
    /// A reference table on the left never conflicts with earlier parallel
    /// access, but still runs sequentially.
    fn setup_execution_mode(
        &self,
        ctx: &CommandContext,
        txn: &mut Transaction,
        relation: &DistributedRelation,
        stmt: &AlterTableStmt,
    ) -> TernResult<bool> {
        let mut sequential = false;
        let mut alters_type = false;
        for cmd in &stmt.cmds {
            let needs = match cmd {
                AlterTableCmd::DropConstraint { name, .. } => {
                    self.constraint_is_fk_to_reference(relation.id, name)
                }
                AlterTableCmd::AddColumn(def) => def
                    .constraints
                    .iter()
                    .any(|c| self.constraint_references_reference_table(ctx, c)),
                AlterTableCmd::AddConstraint(constraint) => {
                    self.constraint_references_reference_table(ctx, constraint)
                }
                AlterTableCmd::DropColumn { name, .. } => {
                    self.column_in_fk_to_reference(relation.id, name)
                }
                AlterTableCmd::AlterType { column, .. } => {
                    let needs = self.column_in_fk_to_reference(relation.id, column);
                    alters_type |= needs;
                    needs
                }
                _ => false,
            };
            sequential |= needs;
        }

        if !sequential {
            return Ok(false);
        }
        let affected = [relation.clone()];
        if alters_type && ctx.in_transaction_block {
            txn.mode_mut().set_sequential(&affected)?;
        } else {
            txn.mode_mut().require_sequential(&affected)?;
        }
        Ok(true)
    }

    fn constraint_references_reference_table(&self, ctx: &CommandContext, c: &Constraint) -> bool {
        let ConstraintKind::ForeignKey(spec) = &c.kind else {
            return false;
        };
        self.catalog
            .resolve_relation(&spec.referenced, &ctx.session.search_path)
            .and_then(|id| self.catalog.distributed_relation(id))
            .is_some_and(|r| r.is_reference())
    }

    fn is_reference(&self, relation: RelationId) -> bool {
        self.catalog
            .distributed_relation(relation)
            .is_some_and(|r| r.is_reference())
    }

    fn constraint_is_fk_to_reference(&self, relation: RelationId, name: &str) -> bool {
        self.catalog
            .foreign_keys_of(relation)
            .iter()
            .any(|fk| fk.name == name && self.is_reference(fk.referenced))
    }

    /// The column appears on either side of a foreign key between `relation`
    /// and a reference table.
    fn column_in_fk_to_reference(&self, relation: RelationId, column: &str) -> bool {
        self.catalog.foreign_keys().iter().any(|fk| {
            if !self.is_reference(fk.referenced) {
                return false;
            }
            (fk.referencing == relation && fk.referencing_columns.iter().any(|c| c == column))
                || (fk.referenced == relation && fk.referenced_columns.iter().any(|c| c == column))
        })
    }

    // ── RENAME ───────────────────────────────────────────────────────

    pub fn plan_rename(&self, target: &Target, stmt: &RenameStmt, query: &str) -> TernResult<Vec<DdlJob>> {
        validate_rename(stmt)?;
        match stmt.object {
            RenameObject::Table
            | RenameObject::Column
            | RenameObject::TableConstraint
            | RenameObject::Index => {}
            RenameObject::Schema | RenameObject::Other => return Ok(Vec::new()),
        }
        let job = self.job_for(&target.left, UtilityStmt::Rename(stmt.clone()), query)?;
        Ok(vec![job])
    }

    // ── CREATE INDEX / DROP INDEX ────────────────────────────────────

    pub fn plan_index(
        &self,
        ctx: &CommandContext,
        target: &Target,
        stmt: &IndexStmt,
        query: &str,
    ) -> TernResult<Vec<DdlJob>> {
        let relation = &target.left;
        validate_index(relation, stmt)?;

        if stmt.if_not_exists {
            if let Some(name) = &stmt.name {
                let rv = RangeVar {
                    schema: stmt.relation.schema.clone(),
                    name: name.clone(),
                };
                if self.catalog.index_by_name(&rv, &ctx.session.search_path).is_some() {
                    tracing::debug!(index = %name, "index exists, skipping propagation");
                    return Ok(Vec::new());
                }
            }
        }

        let mode = if stmt.concurrent {
            LockMode::ShareUpdateExclusive
        } else {
            LockMode::Share
        };
        self.catalog.lock_relation(relation.id, mode);

        let mut job = self.job_for(relation, UtilityStmt::CreateIndex(stmt.clone()), query)?;
        job.concurrent_index = stmt.concurrent;
        job.index_name = stmt.name.clone();
        Ok(vec![job])
    }

    pub fn plan_drop_index(
        &self,
        ctx: &CommandContext,
        stmt: &DropStmt,
        query: &str,
    ) -> TernResult<Vec<DdlJob>> {
        let mut distributed: Option<(DistributedRelation, String)> = None;
        for object in &stmt.objects {
            let Some(index) = self.catalog.index_by_name(object, &ctx.session.search_path) else {
                if stmt.missing_ok {
                    continue;
                }
                return Err(CatalogError::IndexNotFound(object.to_string()).into());
            };
            if let Some(owner) = self.catalog.distributed_relation(index.relation_id) {
                distributed = Some((owner, index.name));
                break;
            }
        }

        let Some((relation, index_name)) = distributed else {
            return Ok(Vec::new());
        };
        if stmt.objects.len() > 1 {
            return Err(DdlError::unsupported(
                "cannot drop multiple distributed objects in a single command",
            )
            .with_hint("Try dropping each object in a separate DROP command.")
            .into());
        }

        let mode = if stmt.concurrent {
            LockMode::ShareUpdateExclusive
        } else {
            LockMode::AccessExclusive
        };
        self.catalog.lock_relation(relation.id, mode);

        let mut job = self.job_for(&relation, UtilityStmt::Drop(stmt.clone()), query)?;
        job.concurrent_index = stmt.concurrent;
        job.index_name = Some(index_name);
        Ok(vec![job])
    }

    // ── DROP TABLE / DROP SCHEMA ─────────────────────────────────────

    /// DROP TABLE is applied on shards by the engine's drop trigger, not by a
    /// job. Metadata workers must first detach partitions of synced
    /// partitioned tables, or their own drop cascades into the partitions.
    pub fn plan_drop_table(
        &self,
        ctx: &mut CommandContext,
        txn: &mut Transaction,
        stmt: &DropStmt,
    ) -> TernResult<()> {
        for object in &stmt.objects {
            let Some(id) = self.catalog.resolve_relation(object, &ctx.session.search_path) else {
                continue;
            };
            let Some(relation) = self.catalog.distributed_relation(id) else {
                continue;
            };

            if self.fk_graph.participates(self.catalog, id) {
                ctx.mark_fk_graph_dirty();
            }

            if !relation.is_partitioned || !relation.should_sync_metadata() {
                continue;
            }
            let partitions = self.catalog.partitions(id);
            let workers = self.catalog.metadata_workers();
            if partitions.is_empty() || workers.is_empty() {
                continue;
            }

            let mut commands = vec![DISABLE_DDL_PROPAGATION.to_string()];
            for partition in partitions {
                if let Some(name) = self.catalog.relation_name(partition) {
                    commands.push(detach_partition_command(&relation.name, &name));
                }
            }
            for worker in &workers {
                for command in &commands {
                    txn.execute_on_node(&worker.key(), command)?;
                }
            }
            tracing::debug!(
                relation = %relation.name,
                partitions = commands.len() - 1,
                workers = workers.len(),
                "detached partitions on metadata workers before drop"
            );
        }
        Ok(())
    }

    pub fn plan_drop_schema(&self, ctx: &mut CommandContext, stmt: &DropStmt) {
        if !stmt.cascade {
            return;
        }
        for schema in &stmt.objects {
            let participates = self
                .catalog
                .relations_in_schema(&schema.name)
                .into_iter()
                .filter(|&id| self.catalog.is_distributed(id))
                .any(|id| self.fk_graph.participates(self.catalog, id));
            if participates {
                ctx.mark_fk_graph_dirty();
                return;
            }
        }
    }
}

/// The coordinator's shell tables hold no rows, so validating a new foreign
/// key locally is wasted work; every shard validates its own.
fn mark_foreign_keys_skip_validation(stmt: &mut AlterTableStmt) {
    for cmd in &mut stmt.cmds {
        match cmd {
            AlterTableCmd::AddConstraint(constraint) if constraint.is_foreign_key() => {
                constraint.skip_validation = true;
            }
            AlterTableCmd::AddColumn(def) => {
                for constraint in &mut def.constraints {
                    if constraint.is_foreign_key() {
                        constraint.skip_validation = true;
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::classifier::{Classification, CommandClassifier};
    use crate::context::SessionState;
    use crate::in_memory::{ClusterBuilder, InMemoryCatalog, RecordingTransport};
    use crate::transaction::TransactionExecutionMode;
    use crate::transport::WorkerTransport;
    use tern_common::config::{CommitProtocol, DdlConfig, MultiShardModifyMode};
    use tern_common::metadata::{FkAction, ForeignKeyMeta};
    use tern_common::types::GroupId;
    use tern_common::TernError;

    fn ctx() -> CommandContext {
        CommandContext::new(&DdlConfig::default(), SessionState::default(), false)
    }

    fn txn() -> Transaction {
        let transport: Arc<dyn WorkerTransport> = Arc::new(RecordingTransport::new());
        Transaction::new(
            1,
            1,
            GroupId::COORDINATOR,
            false,
            TransactionExecutionMode::new(MultiShardModifyMode::Parallel, CommitProtocol::OnePhase),
            transport,
        )
    }

    fn target(catalog: &InMemoryCatalog, stmt: &UtilityStmt) -> Target {
        match CommandClassifier::new(catalog).classify(&ctx(), stmt) {
            Classification::Propagate(target) => target,
            other => panic!("expected propagation, got {:?}", other),
        }
    }

    fn plan(catalog: &InMemoryCatalog, mut alter: AlterTableStmt, query: &str) -> TernResult<(DdlJob, AlterTableStmt)> {
        let graph = ForeignKeyGraph::new();
        let jobs = JobIdAllocator::default();
        let t = target(catalog, &UtilityStmt::AlterTable(alter.clone()));
        let planner = DdlPlanner::new(catalog, &graph, &jobs);
        let mut jobs = planner.plan_alter_table(&mut ctx(), &mut txn(), &t, &mut alter, query)?;
        Ok((jobs.remove(0), alter))
    }

    fn orders_and_warehouses() -> (InMemoryCatalog, RelationId, RelationId) {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let warehouses = b.reference_table("public", "warehouses");
        (b.build(), orders, warehouses)
    }

    #[test]
    fn test_primary_key_job() {
        let (catalog, orders, _) = orders_and_warehouses();
        let alter = AlterTableStmt::table(
            RangeVar::new("orders"),
            vec![AlterTableCmd::AddConstraint(Constraint::new(
                Some("orders_pkey"),
                ConstraintKind::PrimaryKey {
                    columns: vec!["customer_id".into(), "id".into()],
                },
            ))],
        );
        let (job, _) = plan(
            &catalog,
            alter,
            "ALTER TABLE orders ADD CONSTRAINT orders_pkey PRIMARY KEY (customer_id, id)",
        )
        .unwrap();
        assert_eq!(job.target_relation, orders);
        assert_eq!(job.tasks.len(), 4);
        assert!(!job.execute_sequentially);
        for task in &job.tasks {
            assert!(task
                .shard_command
                .contains(&format!("orders_{}", task.anchor_shard.0)));
        }
    }

    #[test]
    fn test_foreign_key_to_reference_is_sequential() {
        let (catalog, _, warehouses) = orders_and_warehouses();
        let alter = AlterTableStmt::table(
            RangeVar::new("orders"),
            vec![AlterTableCmd::AddConstraint(Constraint::new(
                Some("fk1"),
                ConstraintKind::ForeignKey(ForeignKeySpec::new(
                    RangeVar::new("warehouses"),
                    &["warehouse_id"],
                    &["id"],
                )),
            ))],
        );
        let (job, planned) = plan(
            &catalog,
            alter,
            "ALTER TABLE orders ADD CONSTRAINT fk1 FOREIGN KEY (warehouse_id) REFERENCES warehouses (id)",
        )
        .unwrap();
        assert!(job.execute_sequentially);
        assert_eq!(job.right_relation, Some(warehouses));
        assert_eq!(job.tasks.len(), 4);
        let reference_shard = catalog.shard_intervals(warehouses)[0].shard_id;
        assert!(job.tasks.iter().all(|t| t.right_shard() == Some(reference_shard)));

        let AlterTableCmd::AddConstraint(c) = &planned.cmds[0] else {
            unreachable!()
        };
        assert!(c.skip_validation);
    }

    #[test]
    fn test_foreign_key_to_local_table_has_no_tasks() {
        let mut b = ClusterBuilder::new().workers(2);
        b.hash_table("public", "orders", "customer_id", 4);
        b.local_table("public", "audit");
        let catalog = b.build();
        let alter = AlterTableStmt::table(
            RangeVar::new("orders"),
            vec![AlterTableCmd::AddConstraint(Constraint::new(
                Some("fk_audit"),
                ConstraintKind::ForeignKey(ForeignKeySpec::new(RangeVar::new("audit"), &["a"], &["a"])),
            ))],
        );
        let (job, _) = plan(&catalog, alter, "ALTER TABLE orders ADD CONSTRAINT fk_audit ...").unwrap();
        assert!(job.tasks.is_empty());
    }

    #[test]
    fn test_drop_fk_column_after_parallel_access_conflicts() {
        let (catalog, orders, warehouses) = orders_and_warehouses();
        catalog.add_foreign_key(ForeignKeyMeta {
            name: "orders_wh_fk".into(),
            referencing: orders,
            referenced: warehouses,
            referencing_columns: vec!["warehouse_id".into()],
            referenced_columns: vec!["id".into()],
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        });
        let mut alter = AlterTableStmt::table(
            RangeVar::new("orders"),
            vec![AlterTableCmd::DropColumn {
                name: "warehouse_id".into(),
                missing_ok: false,
                cascade: false,
            }],
        );
        let graph = ForeignKeyGraph::new();
        let jobs = JobIdAllocator::default();
        let t = target(&catalog, &UtilityStmt::AlterTable(alter.clone()));
        let mut txn = txn();
        txn.mode_mut().record_parallel_access([orders]);
        let err = DdlPlanner::new(&catalog, &graph, &jobs)
            .plan_alter_table(&mut ctx(), &mut txn, &t, &mut alter, "ALTER TABLE orders DROP COLUMN warehouse_id")
            .unwrap_err();
        assert!(matches!(
            err,
            TernError::Ddl(DdlError::ConflictingExecutionMode { after_parallel: true, .. })
        ));
    }

    #[test]
    fn test_reference_to_reference_foreign_key_is_sequential() {
        let mut b = ClusterBuilder::new().workers(2);
        let warehouses = b.reference_table("public", "warehouses");
        let regions = b.reference_table("public", "regions");
        let catalog = b.build();
        let mut alter = AlterTableStmt::table(
            RangeVar::new("warehouses"),
            vec![AlterTableCmd::AddConstraint(Constraint::new(
                Some("warehouses_region_fk"),
                ConstraintKind::ForeignKey(ForeignKeySpec::new(RangeVar::new("regions"), &["region_id"], &["id"])),
            ))],
        );
        let graph = ForeignKeyGraph::new();
        let jobs = JobIdAllocator::default();
        let t = target(&catalog, &UtilityStmt::AlterTable(alter.clone()));
        let mut txn = txn();
        // Earlier parallel access to a reference table is not a conflict.
        txn.mode_mut().record_parallel_access([warehouses]);
        let mut planned = DdlPlanner::new(&catalog, &graph, &jobs)
            .plan_alter_table(
                &mut ctx(),
                &mut txn,
                &t,
                &mut alter,
                "ALTER TABLE warehouses ADD CONSTRAINT warehouses_region_fk FOREIGN KEY (region_id) REFERENCES regions (id)",
            )
            .unwrap();
        let job = planned.remove(0);
        assert!(job.execute_sequentially);
        assert_eq!(job.right_relation, Some(regions));
        assert_eq!(job.tasks.len(), 1);
    }

    #[test]
    fn test_local_alter_cannot_drop_distribution_column() {
        let (catalog, _, _) = orders_and_warehouses();
        let graph = ForeignKeyGraph::new();
        let jobs = JobIdAllocator::default();
        let mut alter = AlterTableStmt::table(
            RangeVar::new("orders"),
            vec![AlterTableCmd::DropColumn {
                name: "customer_id".into(),
                missing_ok: false,
                cascade: false,
            }],
        );
        let t = target(&catalog, &UtilityStmt::AlterTable(alter.clone()));
        let err = DdlPlanner::new(&catalog, &graph, &jobs)
            .check_local_alter_table(&t, &mut alter)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot execute ALTER TABLE command dropping partition column");
    }

    #[test]
    fn test_drop_two_distributed_indexes_rejected() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        b.index(orders, "orders_a_idx", &["a"], false);
        b.index(orders, "orders_b_idx", &["b"], false);
        let catalog = b.build();
        let graph = ForeignKeyGraph::new();
        let jobs = JobIdAllocator::default();
        let stmt = DropStmt {
            kind: DropKind::Index,
            objects: vec![RangeVar::new("orders_a_idx"), RangeVar::new("orders_b_idx")],
            missing_ok: false,
            cascade: false,
            concurrent: false,
        };
        let err = DdlPlanner::new(&catalog, &graph, &jobs)
            .plan_drop_index(&ctx(), &stmt, "DROP INDEX orders_a_idx, orders_b_idx")
            .unwrap_err();
        assert!(err.to_string().contains("multiple distributed objects"));
    }

    #[test]
    fn test_drop_concurrent_index_job() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        b.index(orders, "orders_a_idx", &["a"], false);
        let catalog = b.build();
        let graph = ForeignKeyGraph::new();
        let jobs = JobIdAllocator::default();
        let stmt = DropStmt {
            kind: DropKind::Index,
            objects: vec![RangeVar::new("orders_a_idx")],
            missing_ok: true,
            cascade: false,
            concurrent: true,
        };
        let jobs = DdlPlanner::new(&catalog, &graph, &jobs)
            .plan_drop_index(&ctx(), &stmt, "DROP INDEX CONCURRENTLY IF EXISTS orders_a_idx")
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].concurrent_index);
        assert_eq!(jobs[0].index_name.as_deref(), Some("orders_a_idx"));
        assert_eq!(jobs[0].tasks.len(), 4);
    }

    #[test]
    fn test_drop_schema_cascade_marks_dirty() {
        let (catalog, orders, warehouses) = orders_and_warehouses();
        catalog.add_foreign_key(ForeignKeyMeta {
            name: "orders_wh_fk".into(),
            referencing: orders,
            referenced: warehouses,
            referencing_columns: vec!["warehouse_id".into()],
            referenced_columns: vec!["id".into()],
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        });
        let graph = ForeignKeyGraph::new();
        let jobs = JobIdAllocator::default();
        let planner = DdlPlanner::new(&catalog, &graph, &jobs);
        let mut stmt = DropStmt {
            kind: DropKind::Schema,
            objects: vec![RangeVar::new("public")],
            missing_ok: false,
            cascade: false,
            concurrent: false,
        };
        let mut c = ctx();
        planner.plan_drop_schema(&mut c, &stmt);
        assert!(!c.fk_invalidation.is_dirty());

        stmt.cascade = true;
        planner.plan_drop_schema(&mut c, &stmt);
        assert!(c.fk_invalidation.is_dirty());
    }
}
