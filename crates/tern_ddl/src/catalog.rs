//! Boundaries to the local storage engine.
//!
//! `MetadataCatalog` answers lookups about relations, shards, placements and
//! foreign keys. `LocalEngine` applies a command on this node and owns the
//! local transaction. Neither is implemented by the coordinator itself.

use tern_common::metadata::{
    DistributedRelation, ForeignKeyMeta, IndexMeta, ShardInterval, ShardPlacement, WorkerNode,
};
use tern_common::types::{QualifiedName, RangeVar, RelationId, ShardId};
use tern_common::TernResult;

use crate::lock::LockMode;
use crate::statement::UtilityStmt;

/// Local relation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Table,
    PartitionedTable,
    ForeignTable,
    Index,
    View,
    Sequence,
}

/// Read access to the local and distribution catalogs.
pub trait MetadataCatalog: Send + Sync {
    /// Resolve a possibly unqualified name. Unqualified names are looked up
    /// in `search_path`, or in `public` when the path is empty.
    fn resolve_relation(&self, name: &RangeVar, search_path: &[String]) -> Option<RelationId>;

    fn relation_kind(&self, relation: RelationId) -> Option<RelationKind>;

    fn relation_name(&self, relation: RelationId) -> Option<QualifiedName>;

    /// Distribution metadata; `None` for local (non-distributed) relations.
    fn distributed_relation(&self, relation: RelationId) -> Option<DistributedRelation>;

    /// Shards of a relation, ordered by shard id.
    fn shard_intervals(&self, relation: RelationId) -> Vec<ShardInterval>;

    fn shard_placements(&self, shard: ShardId) -> Vec<ShardPlacement>;

    /// Take the shard-metadata advisory lock for the rest of the transaction.
    fn lock_shard_metadata(&self, shard: ShardId, mode: LockMode);

    /// Take a relation lock on this node.
    fn lock_relation(&self, relation: RelationId, mode: LockMode);

    /// Every foreign key in the database.
    fn foreign_keys(&self) -> Vec<ForeignKeyMeta>;

    fn indexes(&self, relation: RelationId) -> Vec<IndexMeta>;

    fn index_by_name(&self, name: &RangeVar, search_path: &[String]) -> Option<IndexMeta>;

    /// Table that owns an index.
    fn index_owner(&self, index: RelationId) -> Option<RelationId>;

    /// Partitions of a partitioned table.
    fn partitions(&self, relation: RelationId) -> Vec<RelationId>;

    fn relations_in_schema(&self, schema: &str) -> Vec<RelationId>;

    /// Active primary worker nodes.
    fn worker_nodes(&self) -> Vec<WorkerNode>;

    fn is_distributed(&self, relation: RelationId) -> bool {
        self.distributed_relation(relation).is_some()
    }

    /// Foreign keys declared on `relation`.
    fn foreign_keys_of(&self, relation: RelationId) -> Vec<ForeignKeyMeta> {
        self.foreign_keys()
            .into_iter()
            .filter(|fk| fk.referencing == relation)
            .collect()
    }

    /// Placements that may receive tasks.
    fn finalized_placements(&self, shard: ShardId) -> Vec<ShardPlacement> {
        self.shard_placements(shard)
            .into_iter()
            .filter(ShardPlacement::is_finalized)
            .collect()
    }

    /// Workers that hold a synchronized copy of the metadata.
    fn metadata_workers(&self) -> Vec<WorkerNode> {
        let mut nodes: Vec<WorkerNode> = self
            .worker_nodes()
            .into_iter()
            .filter(|n| n.has_metadata && n.is_active)
            .collect();
        nodes.sort();
        nodes
    }
}

/// The single-node engine that applies commands locally.
pub trait LocalEngine: Send + Sync {
    /// Apply the command on this node, inside the current local transaction.
    fn apply(&self, stmt: &UtilityStmt, query: &str) -> TernResult<()>;

    fn commit_transaction(&self) -> TernResult<()>;

    fn start_transaction(&self);

    fn abort_transaction(&self);

    /// Flip index validity in place. Survives an abort of the current transaction.
    fn set_index_valid_in_place(&self, index: RelationId, valid: bool) -> TernResult<()>;

    /// Flip index validity inside the current transaction.
    fn set_index_valid(&self, index: RelationId, valid: bool) -> TernResult<()>;

    /// Distribute a local partition the same way as its distributed parent.
    fn distribute_partition(&self, partition: RelationId, parent: RelationId) -> TernResult<()>;
}
