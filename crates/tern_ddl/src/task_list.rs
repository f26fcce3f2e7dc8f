//! Expand a validated command into per-shard tasks.

use tern_common::error::CatalogError;
use tern_common::metadata::{DistributedRelation, ShardInterval, ShardPlacement};
use tern_common::types::{JobId, ShardId, TaskId};
use tern_common::{TernError, TernResult};

use crate::catalog::MetadataCatalog;
use crate::deparse::deparse;
use crate::lock::LockMode;
use crate::relay::{extend_inter_shard_names, extend_names, ShardTarget};
use crate::render::{inter_shard_ddl_command, shard_ddl_command};
use crate::task::{DdlCommand, RelationShard, Task, TaskKind};

/// Shards of `relation` in shard-id order, with every shard's metadata
/// locked in share mode before the caller looks up placements.
pub(crate) fn locked_shards(
    catalog: &dyn MetadataCatalog,
    relation: &DistributedRelation,
) -> Vec<ShardInterval> {
    let mut shards = catalog.shard_intervals(relation.id);
    shards.sort_by_key(|s| s.shard_id);
    for shard in &shards {
        catalog.lock_shard_metadata(shard.shard_id, LockMode::Share);
    }
    shards
}

/// Finalized placements of a shard; a shard without one cannot be targeted.
pub(crate) fn task_placements(
    catalog: &dyn MetadataCatalog,
    shard_id: ShardId,
) -> TernResult<Vec<ShardPlacement>> {
    let placements = catalog.finalized_placements(shard_id);
    if placements.is_empty() {
        return Err(CatalogError::NoFinalizedPlacement(shard_id).into());
    }
    Ok(placements)
}

/// One task per shard of `relation`.
pub fn ddl_task_list(
    catalog: &dyn MetadataCatalog,
    job_id: JobId,
    relation: &DistributedRelation,
    command: &DdlCommand,
) -> TernResult<Vec<Task>> {
    let schema = relation.name.schema.as_str();
    let shards = locked_shards(catalog, relation);

    let mut tasks = Vec::with_capacity(shards.len());
    for (i, shard) in shards.iter().enumerate() {
        let target = ShardTarget {
            shard_id: shard.shard_id,
            schema,
        };
        tasks.push(Task {
            job_id,
            task_id: TaskId(i as u32 + 1),
            kind: TaskKind::Ddl,
            command: shard_ddl_command(shard.shard_id, schema, &command.text),
            shard_command: deparse(&extend_names(&command.stmt, target)),
            anchor_shard: shard.shard_id,
            placements: task_placements(catalog, shard.shard_id)?,
            relation_shards: Vec::new(),
        });
    }
    tern_observability::record_ddl_tasks(TaskKind::Ddl.as_str(), tasks.len());
    Ok(tasks)
}

/// One task per shard of `left`, each paired with the matching shard of
/// `right`. A reference table on the right has one shard, which is paired
/// with every left shard.
pub fn inter_shard_ddl_task_list(
    catalog: &dyn MetadataCatalog,
    job_id: JobId,
    left: &DistributedRelation,
    right: &DistributedRelation,
    command: &DdlCommand,
) -> TernResult<Vec<Task>> {
    let left_schema = left.name.schema.as_str();
    let right_schema = right.name.schema.as_str();
    let left_shards = locked_shards(catalog, left);

    let mut right_shards = catalog.shard_intervals(right.id);
    right_shards.sort_by_key(|s| s.shard_id);
    let right_ids: Vec<ShardId> = if right.is_reference() {
        let reference = right_shards.first().ok_or_else(|| {
            TernError::internal_bug(
                "E-TASK-001",
                "reference table without a shard",
                right.name.to_string(),
            )
        })?;
        vec![reference.shard_id; left_shards.len()]
    } else {
        right_shards.iter().map(|s| s.shard_id).collect()
    };
    if right_ids.len() != left_shards.len() {
        return Err(TernError::internal_bug(
            "E-TASK-002",
            "shard counts of paired relations differ",
            format!(
                "{}={} {}={}",
                left.name,
                left_shards.len(),
                right.name,
                right_ids.len()
            ),
        ));
    }

    let mut tasks = Vec::with_capacity(left_shards.len());
    for (i, (shard, &right_shard)) in left_shards.iter().zip(right_ids.iter()).enumerate() {
        let left_target = ShardTarget {
            shard_id: shard.shard_id,
            schema: left_schema,
        };
        let right_target = ShardTarget {
            shard_id: right_shard,
            schema: right_schema,
        };
        tasks.push(Task {
            job_id,
            task_id: TaskId(i as u32 + 1),
            kind: TaskKind::InterShardDdl,
            command: inter_shard_ddl_command(
                shard.shard_id,
                left_schema,
                right_shard,
                right_schema,
                &command.text,
            ),
            shard_command: deparse(&extend_inter_shard_names(
                &command.stmt,
                left_target,
                right_target,
            )),
            anchor_shard: shard.shard_id,
            placements: task_placements(catalog, shard.shard_id)?,
            relation_shards: vec![
                RelationShard {
                    relation_id: left.id,
                    shard_id: shard.shard_id,
                },
                RelationShard {
                    relation_id: right.id,
                    shard_id: right_shard,
                },
            ],
        });
    }
    tern_observability::record_ddl_tasks(TaskKind::InterShardDdl.as_str(), tasks.len());
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::{ClusterBuilder, LockEvent};
    use crate::statement::*;
    use tern_common::metadata::PlacementState;
    use tern_common::types::RangeVar;

    fn add_column_command() -> DdlCommand {
        let stmt = UtilityStmt::AlterTable(AlterTableStmt::table(
            RangeVar::new("orders"),
            vec![AlterTableCmd::AddColumn(ColumnDef::new("note", "text"))],
        ));
        DdlCommand::new("ALTER TABLE orders ADD COLUMN note text", stmt)
    }

    #[test]
    fn test_one_task_per_shard() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let catalog = b.build();
        let rel = catalog.distributed_relation(orders).unwrap();

        let tasks = ddl_task_list(&catalog, JobId(1), &rel, &add_column_command()).unwrap();
        assert_eq!(tasks.len(), 4);
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.task_id, TaskId(i as u32 + 1));
            assert!(!task.placements.is_empty());
            assert_eq!(task.kind, TaskKind::Ddl);
        }
        assert_eq!(
            tasks[0].command,
            "SELECT worker_apply_shard_ddl_command (102008, 'public', 'ALTER TABLE orders ADD COLUMN note text')"
        );
        assert_eq!(
            tasks[0].shard_command,
            "ALTER TABLE public.orders_102008 ADD COLUMN note text"
        );
    }

    #[test]
    fn test_shard_metadata_locked_in_order_before_lookup() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 3);
        let catalog = b.build();
        let rel = catalog.distributed_relation(orders).unwrap();
        ddl_task_list(&catalog, JobId(1), &rel, &add_column_command()).unwrap();

        let locks: Vec<ShardId> = catalog
            .lock_log()
            .into_iter()
            .filter_map(|e| match e {
                LockEvent::ShardMetadata(shard, LockMode::Share) => Some(shard),
                _ => None,
            })
            .collect();
        assert_eq!(locks, vec![ShardId(102008), ShardId(102009), ShardId(102010)]);
    }

    #[test]
    fn test_shard_without_finalized_placement() {
        let mut b = ClusterBuilder::new().workers(1);
        let orders = b.hash_table("public", "orders", "customer_id", 2);
        let catalog = b.build();
        catalog.set_placement_state(ShardId(102009), PlacementState::Inactive);
        let rel = catalog.distributed_relation(orders).unwrap();

        let err = ddl_task_list(&catalog, JobId(1), &rel, &add_column_command()).unwrap_err();
        assert!(matches!(
            err,
            TernError::Catalog(CatalogError::NoFinalizedPlacement(ShardId(102009)))
        ));
    }

    #[test]
    fn test_reference_table_is_broadcast() {
        let mut b = ClusterBuilder::new().workers(2);
        let warehouses = b.reference_table("public", "warehouses");
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let catalog = b.build();
        let left = catalog.distributed_relation(orders).unwrap();
        let right = catalog.distributed_relation(warehouses).unwrap();
        let reference_shard = catalog.shard_intervals(warehouses)[0].shard_id;

        let stmt = UtilityStmt::AlterTable(AlterTableStmt::table(
            RangeVar::new("orders"),
            vec![AlterTableCmd::AddConstraint(Constraint::new(
                Some("fk1"),
                ConstraintKind::ForeignKey(ForeignKeySpec::new(
                    RangeVar::new("warehouses"),
                    &["warehouse_id"],
                    &["id"],
                )),
            ))],
        ));
        let command = DdlCommand::new(
            "ALTER TABLE orders ADD CONSTRAINT fk1 FOREIGN KEY (warehouse_id) REFERENCES warehouses (id)",
            stmt,
        );
        let tasks = inter_shard_ddl_task_list(&catalog, JobId(2), &left, &right, &command).unwrap();
        assert_eq!(tasks.len(), 4);
        for task in &tasks {
            assert_eq!(task.right_shard(), Some(reference_shard));
            assert_eq!(task.relation_shards[0].relation_id, orders);
            assert_eq!(task.relation_shards[0].shard_id, task.anchor_shard);
        }
        assert!(tasks[1].command.starts_with(&format!(
            "SELECT worker_apply_inter_shard_ddl_command ({}, 'public', {}, 'public', ",
            tasks[1].anchor_shard.0, reference_shard.0
        )));
    }
}
