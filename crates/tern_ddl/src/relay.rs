//! Shard-name extension: rewrite the relation, index and constraint names of
//! a statement into the names used by one shard placement.
//!
//! The worker applies the same rewrite to the command it receives inside the
//! `worker_apply_*` wrapper; the coordinator uses it to report the exact
//! command each shard runs.

use tern_common::types::{RangeVar, ShardId};

use crate::render::extend_shard_name;
use crate::statement::*;

/// Which shard (and schema) the rewritten names refer to.
#[derive(Debug, Clone, Copy)]
pub struct ShardTarget<'a> {
    pub shard_id: ShardId,
    pub schema: &'a str,
}

fn extend_relation(rv: &mut RangeVar, target: ShardTarget<'_>) {
    rv.schema = Some(target.schema.to_string());
    rv.name = extend_shard_name(&rv.name, target.shard_id);
}

fn extend_name(name: &mut String, shard_id: ShardId) {
    *name = extend_shard_name(name, shard_id);
}

fn extend_constraint(constraint: &mut Constraint, left: ShardTarget<'_>, right: Option<ShardTarget<'_>>) {
    if let Some(name) = constraint.name.as_mut() {
        extend_name(name, left.shard_id);
    }
    if let ConstraintKind::ForeignKey(spec) = &mut constraint.kind {
        if let Some(right) = right {
            extend_relation(&mut spec.referenced, right);
        }
    }
}

/// Rewrite names for a single-shard command.
pub fn extend_names(stmt: &UtilityStmt, target: ShardTarget<'_>) -> UtilityStmt {
    extend(stmt, target, None)
}

/// Rewrite names for a command spanning two shards. The referenced relation
/// of a foreign key and the partition of ATTACH/DETACH take the right shard.
pub fn extend_inter_shard_names(
    stmt: &UtilityStmt,
    left: ShardTarget<'_>,
    right: ShardTarget<'_>,
) -> UtilityStmt {
    extend(stmt, left, Some(right))
}

fn extend(stmt: &UtilityStmt, left: ShardTarget<'_>, right: Option<ShardTarget<'_>>) -> UtilityStmt {
    let mut stmt = stmt.clone();
    match &mut stmt {
        UtilityStmt::AlterTable(alter) => {
            extend_relation(&mut alter.relation, left);
            for cmd in &mut alter.cmds {
                extend_alter_cmd(cmd, left, right);
            }
        }
        UtilityStmt::Rename(rename) => {
            extend_relation(&mut rename.relation, left);
            match rename.object {
                RenameObject::Table | RenameObject::Index => {
                    extend_name(&mut rename.new_name, left.shard_id);
                }
                RenameObject::TableConstraint => {
                    if let Some(old) = rename.subname.as_mut() {
                        extend_name(old, left.shard_id);
                    }
                    extend_name(&mut rename.new_name, left.shard_id);
                }
                RenameObject::Column | RenameObject::Schema | RenameObject::Other => {}
            }
        }
        UtilityStmt::Grant(grant) => {
            if let GrantTarget::Objects(objects) = &mut grant.target {
                for object in objects {
                    extend_relation(object, left);
                }
            }
        }
        UtilityStmt::Truncate(truncate) => {
            for relation in &mut truncate.relations {
                extend_relation(relation, left);
            }
        }
        UtilityStmt::Vacuum(vacuum) => {
            for relation in &mut vacuum.relations {
                extend_relation(&mut relation.relation, left);
            }
        }
        UtilityStmt::Drop(drop) => {
            if drop.kind != DropKind::Schema {
                for object in &mut drop.objects {
                    extend_relation(object, left);
                }
            }
        }
        UtilityStmt::CreateIndex(index) => {
            extend_relation(&mut index.relation, left);
            if let Some(name) = index.name.as_mut() {
                extend_name(name, left.shard_id);
            }
        }
        UtilityStmt::CreatePartitionOf(create) => {
            extend_relation(&mut create.relation, left);
            if let Some(right) = right {
                extend_relation(&mut create.parent, right);
            }
        }
        UtilityStmt::AlterObjectSchema(_)
        | UtilityStmt::AlterTableMoveAll(_)
        | UtilityStmt::Cluster(_)
        | UtilityStmt::CreateDatabase { .. }
        | UtilityStmt::CreateRole { .. }
        | UtilityStmt::Other { .. } => {}
    }
    stmt
}

fn extend_alter_cmd(cmd: &mut AlterTableCmd, left: ShardTarget<'_>, right: Option<ShardTarget<'_>>) {
    match cmd {
        AlterTableCmd::AddColumn(def) => {
            for constraint in &mut def.constraints {
                extend_constraint(constraint, left, right);
            }
        }
        AlterTableCmd::AddConstraint(constraint) => extend_constraint(constraint, left, right),
        AlterTableCmd::DropConstraint { name, .. } => extend_name(name, left.shard_id),
        AlterTableCmd::AttachPartition { partition, .. }
        | AlterTableCmd::DetachPartition { partition } => {
            if let Some(right) = right {
                extend_relation(partition, right);
            }
        }
        AlterTableCmd::ReplicaIdentity(ReplicaIdentity::UsingIndex(index))
        | AlterTableCmd::ClusterOn(index) => extend_name(index, left.shard_id),
        AlterTableCmd::DropColumn { .. }
        | AlterTableCmd::SetDefault { .. }
        | AlterTableCmd::DropDefault { .. }
        | AlterTableCmd::AlterType { .. }
        | AlterTableCmd::SetNotNull { .. }
        | AlterTableCmd::DropNotNull { .. }
        | AlterTableCmd::SetStatistics { .. }
        | AlterTableCmd::EnableTriggerAll
        | AlterTableCmd::DisableTriggerAll
        | AlterTableCmd::ReplicaIdentity(_)
        | AlterTableCmd::SetOptions(_)
        | AlterTableCmd::ResetOptions(_)
        | AlterTableCmd::ReplaceOptions(_)
        | AlterTableCmd::SetTablespace(_)
        | AlterTableCmd::OwnerTo(_)
        | AlterTableCmd::EnableRowSecurity
        | AlterTableCmd::DisableRowSecurity => {}
    }
}
