//! TRUNCATE of distributed tables.
//!
//! Shards are truncated by the engine's truncate path once the local command
//! runs. Before that, the relations and every relation referencing them are
//! locked on all workers in the global order, so two sessions truncating
//! related tables cannot deadlock across nodes.

use tern_common::error::DdlError;
use tern_common::metadata::DistributedRelation;
use tern_common::TernResult;

use crate::catalog::MetadataCatalog;
use crate::context::CommandContext;
use crate::executor::DdlExecutor;
use crate::fk_graph::ForeignKeyGraph;
use crate::lock::{DistributedLockOrderer, LockMode};
use crate::statement::TruncateStmt;
use crate::transaction::Transaction;

fn truncated_relations(
    ctx: &CommandContext,
    catalog: &dyn MetadataCatalog,
    stmt: &TruncateStmt,
) -> Vec<DistributedRelation> {
    stmt.relations
        .iter()
        .filter_map(|rv| catalog.resolve_relation(rv, &ctx.session.search_path))
        .filter_map(|id| catalog.distributed_relation(id))
        .collect()
}

/// Checks, execution-mode switch and cluster locks for a TRUNCATE. Returns
/// the number of remote lock requests sent.
pub fn process_truncate(
    ctx: &CommandContext,
    catalog: &dyn MetadataCatalog,
    fk_graph: &ForeignKeyGraph,
    txn: &mut Transaction,
    stmt: &TruncateStmt,
) -> TernResult<usize> {
    let relations = truncated_relations(ctx, catalog, stmt);
    if relations.is_empty() {
        return Ok(0);
    }

    if !ctx.is_coordinator() {
        return Err(DdlError::NotCoordinator {
            group: ctx.local_group,
        }
        .into());
    }

    for relation in &relations {
        if relation.is_foreign {
            return Err(DdlError::unsupported(
                "truncating distributed foreign tables is currently unsupported",
            )
            .with_hint("Use master_drop_all_shards to remove foreign table's shards.")
            .into());
        }
    }

    let executor = DdlExecutor::new(catalog);
    for relation in &relations {
        executor.ensure_partition_not_replicated(relation)?;
    }

    // A referenced reference table cascades into every referencing shard on
    // each worker; those must all be reached over the same connection.
    if let Some(relation) = relations
        .iter()
        .find(|r| r.is_reference() && fk_graph.is_referenced(catalog, r.id))
    {
        tracing::debug!(relation = %relation.name, "truncate of referenced reference table runs sequentially");
        txn.mode_mut().set_sequential(std::slice::from_ref(relation))?;
    }

    let ids: Vec<_> = relations.iter().map(|r| r.id).collect();
    DistributedLockOrderer::new(catalog, fk_graph).lock_on_workers(
        ctx,
        txn,
        &ids,
        LockMode::AccessExclusive,
    )
}
