//! Cluster-wide relation locks taken in a fixed global order.
//!
//! Relations are locked in ascending id order and, for each relation, on
//! workers in `WorkerNode` order. Every coordinator uses the same order, so two
//! concurrent TRUNCATEs cannot wait on each other in a cycle. There is no
//! timeout or back-off.

use std::fmt;

use tern_common::types::RelationId;
use tern_common::{TernError, TernResult};

use crate::catalog::MetadataCatalog;
use crate::context::CommandContext;
use crate::fk_graph::ForeignKeyGraph;
use crate::render::{lock_relation_command, qualified_relation_name};
use crate::transaction::Transaction;

/// Table-level lock modes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

impl LockMode {
    /// Name understood by `lock_relation_if_exists`.
    pub fn as_text(self) -> &'static str {
        match self {
            LockMode::AccessShare => "ACCESS SHARE",
            LockMode::RowShare => "ROW SHARE",
            LockMode::RowExclusive => "ROW EXCLUSIVE",
            LockMode::ShareUpdateExclusive => "SHARE UPDATE EXCLUSIVE",
            LockMode::Share => "SHARE",
            LockMode::ShareRowExclusive => "SHARE ROW EXCLUSIVE",
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::AccessExclusive => "ACCESS EXCLUSIVE",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

/// Acquires locks on every worker for relations that need cluster-wide
/// serialization.
pub struct DistributedLockOrderer<'a> {
    catalog: &'a dyn MetadataCatalog,
    fk_graph: &'a ForeignKeyGraph,
}

impl<'a> DistributedLockOrderer<'a> {
    pub fn new(catalog: &'a dyn MetadataCatalog, fk_graph: &'a ForeignKeyGraph) -> Self {
        Self { catalog, fk_graph }
    }

    /// Whether any node besides the coordinator holds metadata.
    pub fn cluster_has_metadata_workers(&self, ctx: &CommandContext) -> bool {
        !ctx.is_coordinator() || self.catalog.worker_nodes().iter().any(|n| n.has_metadata)
    }

    /// The targets plus every relation referencing them through a foreign
    /// key, deduplicated and sorted.
    pub fn lock_set(&self, targets: &[RelationId]) -> Vec<RelationId> {
        let mut set: Vec<RelationId> = Vec::new();
        for &relation in targets {
            if !self.catalog.is_distributed(relation) || set.contains(&relation) {
                continue;
            }
            set.push(relation);
            for referencing in self.fk_graph.referencing_relations(self.catalog, relation) {
                if !set.contains(&referencing) {
                    set.push(referencing);
                }
            }
        }
        set.sort();
        set
    }

    /// Lock `targets` (and their referencing relations) on every worker.
    /// Returns the number of remote lock requests sent.
    pub fn lock_on_workers(
        &self,
        ctx: &CommandContext,
        txn: &mut Transaction,
        targets: &[RelationId],
        mode: LockMode,
    ) -> TernResult<usize> {
        if !self.cluster_has_metadata_workers(ctx) {
            return Ok(0);
        }
        let relations = self.lock_set(targets);
        if relations.is_empty() {
            return Ok(0);
        }

        let mut workers = self.catalog.worker_nodes();
        workers.sort();

        let mut remote = 0usize;
        for relation in relations {
            let Some(dist) = self.catalog.distributed_relation(relation) else {
                continue;
            };
            if !dist.should_sync_metadata() {
                continue;
            }
            let name = self.catalog.relation_name(relation).ok_or_else(|| {
                TernError::internal_bug(
                    "E-LOCK-001",
                    "distributed relation without a name",
                    relation.to_string(),
                )
            })?;
            let command = lock_relation_command(&qualified_relation_name(&name), mode.as_text());

            for worker in &workers {
                if worker.group_id == ctx.local_group {
                    self.catalog.lock_relation(relation, mode);
                    continue;
                }
                txn.execute_on_node(&worker.key(), &command)?;
                remote += 1;
            }
        }

        tracing::debug!(remote, mode = %mode, "acquired distributed relation locks");
        tern_observability::record_remote_locks(remote);
        Ok(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::context::SessionState;
    use crate::in_memory::{ClusterBuilder, InMemoryCatalog, LockEvent, RecordingTransport};
    use crate::transaction::TransactionExecutionMode;
    use crate::transport::WorkerTransport;
    use tern_common::config::{CommitProtocol, DdlConfig, MultiShardModifyMode};
    use tern_common::metadata::{FkAction, ForeignKeyMeta, NodeKey};
    use tern_common::types::GroupId;

    fn ctx() -> CommandContext {
        CommandContext::new(&DdlConfig::default(), SessionState::default(), false)
    }

    fn txn(transport: &Arc<RecordingTransport>) -> Transaction {
        let transport: Arc<dyn WorkerTransport> = transport.clone();
        Transaction::new(
            1,
            1,
            GroupId::COORDINATOR,
            true,
            TransactionExecutionMode::new(MultiShardModifyMode::Parallel, CommitProtocol::OnePhase),
            transport,
        )
    }

    fn references(catalog: &InMemoryCatalog, name: &str, referencing: RelationId, referenced: RelationId) {
        catalog.add_foreign_key(ForeignKeyMeta {
            name: name.into(),
            referencing,
            referenced,
            referencing_columns: vec!["ref_id".into()],
            referenced_columns: vec!["id".into()],
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        });
    }

    fn worker(i: u32) -> NodeKey {
        NodeKey {
            host: format!("worker-{}", i),
            port: 5432,
        }
    }

    /// warehouses <- orders <- items, all on metadata workers.
    fn chain() -> (InMemoryCatalog, RelationId, RelationId, RelationId) {
        let mut b = ClusterBuilder::new().workers(2).metadata_workers();
        let warehouses = b.reference_table("public", "warehouses");
        let orders = b.hash_table("public", "orders", "customer_id", 2);
        let items = b.hash_table("public", "items", "customer_id", 2);
        let catalog = b.build();
        references(&catalog, "orders_wh_fk", orders, warehouses);
        references(&catalog, "items_order_fk", items, orders);
        (catalog, warehouses, orders, items)
    }

    #[test]
    fn test_lock_set_is_sorted_and_deduplicated() {
        let (catalog, warehouses, orders, items) = chain();
        let graph = ForeignKeyGraph::new();
        let orderer = DistributedLockOrderer::new(&catalog, &graph);

        let set = orderer.lock_set(&[items, orders, items, orders]);
        assert_eq!(set, vec![orders, items]);
        assert!(set.windows(2).all(|w| w[0] < w[1]));
        assert!(!set.contains(&warehouses));
    }

    #[test]
    fn test_lock_set_pulls_in_transitive_referencing_relations() {
        let (catalog, warehouses, orders, items) = chain();
        let graph = ForeignKeyGraph::new();
        let orderer = DistributedLockOrderer::new(&catalog, &graph);

        let mut expected = vec![warehouses, orders, items];
        expected.sort();
        assert_eq!(orderer.lock_set(&[warehouses]), expected);
        assert_eq!(orderer.lock_set(&[items]), vec![items]);
    }

    #[test]
    fn test_lock_set_skips_local_tables() {
        let mut b = ClusterBuilder::new().workers(2);
        let audit = b.local_table("public", "audit");
        let orders = b.hash_table("public", "orders", "customer_id", 2);
        let catalog = b.build();
        let graph = ForeignKeyGraph::new();
        let orderer = DistributedLockOrderer::new(&catalog, &graph);
        assert_eq!(orderer.lock_set(&[audit, orders]), vec![orders]);
    }

    #[test]
    fn test_no_metadata_workers_sends_nothing() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 2);
        let catalog = b.build();
        let graph = ForeignKeyGraph::new();
        let orderer = DistributedLockOrderer::new(&catalog, &graph);
        let transport = Arc::new(RecordingTransport::new());

        let ctx = ctx();
        assert!(!orderer.cluster_has_metadata_workers(&ctx));
        let sent = orderer
            .lock_on_workers(&ctx, &mut txn(&transport), &[orders], LockMode::AccessExclusive)
            .unwrap();
        assert_eq!(sent, 0);
        assert!(transport.all_commands().is_empty());
        assert!(catalog.lock_log().is_empty());
    }

    #[test]
    fn test_unsynced_relations_are_not_locked_remotely() {
        let mut b = ClusterBuilder::new().workers(2).metadata_workers();
        let events = b.append_table("public", "events", "ts", 2);
        let catalog = b.build();
        let graph = ForeignKeyGraph::new();
        let orderer = DistributedLockOrderer::new(&catalog, &graph);
        let transport = Arc::new(RecordingTransport::new());

        assert_eq!(orderer.lock_set(&[events]), vec![events]);
        let sent = orderer
            .lock_on_workers(&ctx(), &mut txn(&transport), &[events], LockMode::AccessExclusive)
            .unwrap();
        assert_eq!(sent, 0);
        assert!(transport.all_commands().is_empty());
    }

    #[test]
    fn test_local_group_locks_through_catalog() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 2);
        let catalog = b.build();
        let graph = ForeignKeyGraph::new();
        let orderer = DistributedLockOrderer::new(&catalog, &graph);
        let transport = Arc::new(RecordingTransport::new());

        // Running on worker-1: metadata is present even without flagged workers.
        let mut ctx = ctx();
        ctx.local_group = GroupId(1);
        assert!(orderer.cluster_has_metadata_workers(&ctx));

        let sent = orderer
            .lock_on_workers(&ctx, &mut txn(&transport), &[orders], LockMode::AccessExclusive)
            .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(
            catalog.lock_log(),
            vec![LockEvent::Relation(orders, LockMode::AccessExclusive)]
        );
        assert!(transport.commands_for(&worker(1)).is_empty());
        assert!(transport
            .commands_for(&worker(2))
            .contains(&"SELECT lock_relation_if_exists('public.orders', 'ACCESS EXCLUSIVE');".to_string()));
    }

    #[test]
    fn test_lock_mode_text() {
        assert_eq!(LockMode::AccessExclusive.as_text(), "ACCESS EXCLUSIVE");
        assert_eq!(LockMode::Share.to_string(), "SHARE");
        assert!(LockMode::AccessExclusive > LockMode::RowExclusive);
    }
}
