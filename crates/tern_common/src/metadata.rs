//! Cluster metadata: distributed relations, shards, placements and worker nodes.
//!
//! These types mirror the rows of the distribution catalog. They are read
//! through `MetadataCatalog` and never persisted by the DDL layer itself.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{GroupId, PlacementId, QualifiedName, RelationId, ShardId};

/// How rows of a distributed relation are split into shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionMethod {
    Hash,
    Range,
    Append,
    /// Reference table: one shard replicated to every worker.
    None,
}

impl DistributionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionMethod::Hash => "hash",
            DistributionMethod::Range => "range",
            DistributionMethod::Append => "append",
            DistributionMethod::None => "none",
        }
    }
}

impl fmt::Display for DistributionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How writes to shard placements are replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationModel {
    /// The coordinator writes every placement itself.
    Coordinator,
    /// Placements are replicated by streaming; metadata is mirrored to MX workers.
    Streaming,
}

/// A logical table horizontally partitioned into shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedRelation {
    pub id: RelationId,
    pub name: QualifiedName,
    pub method: DistributionMethod,
    /// Absent for reference tables created without one.
    pub distribution_column: Option<String>,
    pub colocation_id: u32,
    pub replication_model: ReplicationModel,
    /// Backed by a foreign table on each worker.
    pub is_foreign: bool,
    pub is_partitioned: bool,
    /// Parent relation when this relation is itself a partition.
    pub partition_parent: Option<RelationId>,
}

impl DistributedRelation {
    pub fn is_reference(&self) -> bool {
        self.method == DistributionMethod::None
    }

    /// Whether the relation's metadata is mirrored to workers that hold metadata.
    pub fn should_sync_metadata(&self) -> bool {
        match self.method {
            DistributionMethod::None => true,
            DistributionMethod::Hash => self.replication_model == ReplicationModel::Streaming,
            DistributionMethod::Range | DistributionMethod::Append => false,
        }
    }

    pub fn is_distribution_column(&self, column: &str) -> bool {
        self.distribution_column.as_deref() == Some(column)
    }

    pub fn is_partition_related(&self) -> bool {
        self.is_partitioned || self.partition_parent.is_some()
    }
}

/// One horizontal partition of a distributed relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInterval {
    pub shard_id: ShardId,
    pub relation_id: RelationId,
    /// Inclusive lower bound of the partition-key range, method dependent.
    pub min_value: Option<String>,
    /// Inclusive upper bound of the partition-key range, method dependent.
    pub max_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlacementState {
    Finalized,
    Inactive,
    ToDelete,
}

/// A physical replica of a shard on one worker node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPlacement {
    pub placement_id: PlacementId,
    pub shard_id: ShardId,
    pub group_id: GroupId,
    pub host: String,
    pub port: u16,
    pub state: PlacementState,
}

impl ShardPlacement {
    pub fn is_finalized(&self) -> bool {
        self.state == PlacementState::Finalized
    }

    pub fn node_key(&self) -> NodeKey {
        NodeKey {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Network address of a worker, used to key connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A worker node as registered in the cluster.
///
/// Ordering is by group id, then host, then port. The lock orderer relies on
/// it being total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerNode {
    pub group_id: GroupId,
    pub host: String,
    pub port: u16,
    /// Holds a synchronized copy of the distribution catalog (MX node).
    pub has_metadata: bool,
    pub is_active: bool,
}

impl WorkerNode {
    pub fn new(group_id: u32, host: impl Into<String>, port: u16) -> Self {
        Self {
            group_id: GroupId(group_id),
            host: host.into(),
            port,
            has_metadata: false,
            is_active: true,
        }
    }

    pub fn with_metadata(mut self) -> Self {
        self.has_metadata = true;
        self
    }

    pub fn key(&self) -> NodeKey {
        NodeKey {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

impl Ord for WorkerNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.group_id
            .cmp(&other.group_id)
            .then_with(|| self.host.cmp(&other.host))
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for WorkerNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for WorkerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.group_id)
    }
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FkAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            FkAction::NoAction => "NO ACTION",
            FkAction::Restrict => "RESTRICT",
            FkAction::Cascade => "CASCADE",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign-key constraint as recorded in the local catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyMeta {
    pub name: String,
    pub referencing: RelationId,
    pub referenced: RelationId,
    pub referencing_columns: Vec<String>,
    pub referenced_columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

/// Index metadata used by the uniqueness checks and the concurrent index path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub id: RelationId,
    pub name: String,
    pub relation_id: RelationId,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
    /// Per-column "operator is equality" flags for exclusion constraints.
    pub exclusion_equality: Option<Vec<bool>>,
    pub valid: bool,
}

impl IndexMeta {
    pub fn is_exclusion(&self) -> bool {
        self.exclusion_equality.is_some()
    }
}
