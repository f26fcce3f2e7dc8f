//! Decide whether a command touches a distributed relation and must be
//! propagated.
//!
//! Resolution failures classify as `NotDistributed` so the local engine
//! reports the error with its own wording.

use tern_common::metadata::DistributedRelation;
use tern_common::types::{RangeVar, RelationId};

use crate::catalog::{MetadataCatalog, RelationKind};
use crate::context::CommandContext;
use crate::statement::*;

/// Why a command on a distributed relation is only applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOnlyReason {
    PropagationDisabled,
    /// ATTACH PARTITION of a local table; the engine distributes it afterwards.
    UndistributedPartition,
}

/// Relations a single-target command resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub left: DistributedRelation,
    /// Referenced table of a foreign key, or partition of ATTACH/DETACH.
    pub right: Option<RelationId>,
    /// The statement named an index, resolved to its table.
    pub via_index: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    NotDistributed,
    LocalOnly {
        target: Target,
        reason: LocalOnlyReason,
    },
    Propagate(Target),
}

impl Classification {
    pub fn target(&self) -> Option<&Target> {
        match self {
            Classification::NotDistributed => None,
            Classification::LocalOnly { target, .. } | Classification::Propagate(target) => {
                Some(target)
            }
        }
    }

    pub fn is_propagated(&self) -> bool {
        matches!(self, Classification::Propagate(_))
    }
}

pub struct CommandClassifier<'a> {
    catalog: &'a dyn MetadataCatalog,
}

impl<'a> CommandClassifier<'a> {
    pub fn new(catalog: &'a dyn MetadataCatalog) -> Self {
        Self { catalog }
    }

    fn resolve(&self, ctx: &CommandContext, rv: &RangeVar) -> Option<RelationId> {
        self.catalog.resolve_relation(rv, &ctx.session.search_path)
    }

    /// Resolve a name to a table, following an index to the table it belongs to.
    fn resolve_table(&self, ctx: &CommandContext, rv: &RangeVar) -> Option<(RelationId, bool)> {
        let id = self.resolve(ctx, rv)?;
        match self.catalog.relation_kind(id)? {
            RelationKind::Index => self.catalog.index_owner(id).map(|owner| (owner, true)),
            _ => Some((id, false)),
        }
    }

    /// Left relation and, for two-relation commands, the right one. `None`
    /// when a required name does not resolve.
    fn resolve_targets(
        &self,
        ctx: &CommandContext,
        stmt: &UtilityStmt,
    ) -> Option<(RelationId, Option<RelationId>, bool)> {
        match stmt {
            UtilityStmt::AlterTable(alter) => {
                let (left, via_index) = self.resolve_table(ctx, &alter.relation)?;
                let mut right = None;
                for cmd in &alter.cmds {
                    let other = match cmd {
                        AlterTableCmd::AddConstraint(c) => foreign_key_target(c),
                        AlterTableCmd::AddColumn(def) => {
                            def.constraints.iter().find_map(foreign_key_target)
                        }
                        AlterTableCmd::AttachPartition { partition, .. }
                        | AlterTableCmd::DetachPartition { partition } => Some(partition),
                        _ => None,
                    };
                    if let Some(rv) = other {
                        right = Some(self.resolve(ctx, rv)?);
                    }
                }
                Some((left, right, via_index))
            }
            UtilityStmt::Rename(rename) => match rename.object {
                RenameObject::Table
                | RenameObject::Column
                | RenameObject::TableConstraint
                | RenameObject::Index => {
                    let (left, via_index) = self.resolve_table(ctx, &rename.relation)?;
                    Some((left, None, via_index))
                }
                RenameObject::Schema | RenameObject::Other => None,
            },
            UtilityStmt::CreateIndex(index) => {
                let (left, _) = self.resolve_table(ctx, &index.relation)?;
                Some((left, None, false))
            }
            UtilityStmt::CreatePartitionOf(create) => {
                let parent = self.resolve(ctx, &create.parent)?;
                Some((parent, None, false))
            }
            UtilityStmt::AlterObjectSchema(alter) => match alter.object {
                RenameObject::Table | RenameObject::Index => {
                    let (left, via_index) = self.resolve_table(ctx, &alter.relation)?;
                    Some((left, None, via_index))
                }
                _ => None,
            },
            UtilityStmt::Cluster(cluster) => {
                let (left, _) = self.resolve_table(ctx, cluster.relation.as_ref()?)?;
                Some((left, None, false))
            }
            // Multi-relation commands are resolved by their own planners.
            UtilityStmt::Grant(_)
            | UtilityStmt::Truncate(_)
            | UtilityStmt::Vacuum(_)
            | UtilityStmt::Drop(_)
            | UtilityStmt::AlterTableMoveAll(_)
            | UtilityStmt::CreateDatabase { .. }
            | UtilityStmt::CreateRole { .. }
            | UtilityStmt::Other { .. } => None,
        }
    }

    pub fn classify(&self, ctx: &CommandContext, stmt: &UtilityStmt) -> Classification {
        let Some((left_id, right, via_index)) = self.resolve_targets(ctx, stmt) else {
            return Classification::NotDistributed;
        };
        let Some(left) = self.catalog.distributed_relation(left_id) else {
            return Classification::NotDistributed;
        };
        let target = Target {
            left,
            right,
            via_index,
        };

        if !ctx.propagation_enabled {
            return Classification::LocalOnly {
                target,
                reason: LocalOnlyReason::PropagationDisabled,
            };
        }
        if let UtilityStmt::AlterTable(alter) = stmt {
            let attaches = alter
                .cmds
                .iter()
                .any(|c| matches!(c, AlterTableCmd::AttachPartition { .. }));
            let partition_distributed = right.is_some_and(|r| self.catalog.is_distributed(r));
            if attaches && !partition_distributed {
                return Classification::LocalOnly {
                    target,
                    reason: LocalOnlyReason::UndistributedPartition,
                };
            }
        }
        Classification::Propagate(target)
    }
}

fn foreign_key_target(constraint: &Constraint) -> Option<&RangeVar> {
    match &constraint.kind {
        ConstraintKind::ForeignKey(spec) => Some(&spec.referenced),
        _ => None,
    }
}
