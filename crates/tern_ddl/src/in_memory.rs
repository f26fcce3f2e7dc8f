//! In-process cluster: a catalog, a local engine and a worker transport
//! that keep everything in memory.
//!
//! The engine applies utility statements to the catalog the way a real
//! node would (indexes, foreign keys, partitions, renames, drops) and
//! snapshots the catalog at transaction start so an abort rolls it back.
//! The transport records every command per node and can inject failures.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use tern_common::error::{CatalogError, ClusterError};
use tern_common::metadata::{
    DistributedRelation, DistributionMethod, ForeignKeyMeta, IndexMeta, NodeKey, PlacementState,
    ReplicationModel, ShardInterval, ShardPlacement, WorkerNode,
};
use tern_common::types::{PlacementId, QualifiedName, RangeVar, RelationId, ShardId};
use tern_common::{TernError, TernResult};

use crate::catalog::{LocalEngine, MetadataCatalog, RelationKind};
use crate::lock::LockMode;
use crate::statement::*;
use crate::transport::{WorkerConnection, WorkerTransport};

const FIRST_RELATION_ID: u32 = 16384;
const FIRST_SHARD_ID: u64 = 102008;
const WORKER_PORT: u16 = 5432;

/// A lock taken through the catalog, in acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    ShardMetadata(ShardId, LockMode),
    Relation(RelationId, LockMode),
}

// ── Catalog state ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RelationEntry {
    name: QualifiedName,
    kind: RelationKind,
    /// Partition parent, for partitions and local tables alike.
    parent: Option<RelationId>,
    distribution: Option<DistributedRelation>,
}

#[derive(Debug, Clone)]
struct CatalogState {
    relations: BTreeMap<RelationId, RelationEntry>,
    shards: BTreeMap<RelationId, Vec<ShardInterval>>,
    placements: BTreeMap<ShardId, Vec<ShardPlacement>>,
    foreign_keys: Vec<ForeignKeyMeta>,
    /// Keyed by the index's own relation id.
    indexes: BTreeMap<RelationId, IndexMeta>,
    workers: Vec<WorkerNode>,
    replication_factor: usize,
    next_relation: u32,
    next_shard: u64,
    next_placement: u64,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self {
            relations: BTreeMap::new(),
            shards: BTreeMap::new(),
            placements: BTreeMap::new(),
            foreign_keys: Vec::new(),
            indexes: BTreeMap::new(),
            workers: Vec::new(),
            replication_factor: 1,
            next_relation: FIRST_RELATION_ID,
            next_shard: FIRST_SHARD_ID,
            next_placement: 1,
        }
    }
}

impl CatalogState {
    fn find(&self, schema: &str, name: &str) -> Option<RelationId> {
        self.relations
            .iter()
            .find(|(_, e)| e.name.schema == schema && e.name.name == name)
            .map(|(id, _)| *id)
    }

    fn resolve(&self, rv: &RangeVar, search_path: &[String]) -> Option<RelationId> {
        if let Some(schema) = &rv.schema {
            return self.find(schema, &rv.name);
        }
        if search_path.is_empty() {
            return self.find("public", &rv.name);
        }
        search_path.iter().find_map(|schema| self.find(schema, &rv.name))
    }

    fn entry(&self, id: RelationId) -> TernResult<&RelationEntry> {
        self.relations
            .get(&id)
            .ok_or_else(|| CatalogError::RelationNotFound(id.to_string()).into())
    }

    fn add_relation(&mut self, schema: &str, name: &str, kind: RelationKind) -> TernResult<RelationId> {
        if self.find(schema, name).is_some() {
            return Err(CatalogError::RelationExists(name.to_string()).into());
        }
        let id = RelationId(self.next_relation);
        self.next_relation += 1;
        self.relations.insert(
            id,
            RelationEntry {
                name: QualifiedName::new(schema, name),
                kind,
                parent: None,
                distribution: None,
            },
        );
        Ok(id)
    }

    fn placement(&mut self, shard: ShardId, worker: &WorkerNode) -> ShardPlacement {
        let placement_id = PlacementId(self.next_placement);
        self.next_placement += 1;
        ShardPlacement {
            placement_id,
            shard_id: shard,
            group_id: worker.group_id,
            host: worker.host.clone(),
            port: worker.port,
            state: PlacementState::Finalized,
        }
    }

    /// Create shards for `relation`. With `colocate_with`, shard `i` is
    /// placed where shard `i` of that relation lives.
    fn create_shards(
        &mut self,
        relation: RelationId,
        method: DistributionMethod,
        shard_count: usize,
        colocate_with: Option<RelationId>,
    ) {
        let workers = self.workers.clone();
        let colocated: Vec<Vec<ShardPlacement>> = colocate_with
            .map(|other| {
                self.shards
                    .get(&other)
                    .map(|shards| {
                        shards
                            .iter()
                            .map(|s| self.placements.get(&s.shard_id).cloned().unwrap_or_default())
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default();

        let mut intervals = Vec::with_capacity(shard_count);
        for i in 0..shard_count {
            let shard_id = ShardId(self.next_shard);
            self.next_shard += 1;
            let (min_value, max_value) = match method {
                DistributionMethod::Hash => {
                    let (min, max) = hash_range(i, shard_count);
                    (Some(min.to_string()), Some(max.to_string()))
                }
                _ => (None, None),
            };
            intervals.push(ShardInterval {
                shard_id,
                relation_id: relation,
                min_value,
                max_value,
            });

            let targets: Vec<WorkerNode> = match colocated.get(i) {
                Some(existing) => existing
                    .iter()
                    .filter_map(|p| workers.iter().find(|w| w.group_id == p.group_id).cloned())
                    .collect(),
                None if method == DistributionMethod::None => workers.clone(),
                None if workers.is_empty() => Vec::new(),
                None => (0..self.replication_factor.min(workers.len()))
                    .map(|r| workers[(i + r) % workers.len()].clone())
                    .collect(),
            };
            let placements = targets.iter().map(|w| self.placement(shard_id, w)).collect();
            self.placements.insert(shard_id, placements);
        }
        self.shards.insert(relation, intervals);
    }

    fn distribute(
        &mut self,
        relation: RelationId,
        method: DistributionMethod,
        column: Option<&str>,
        shard_count: usize,
    ) -> TernResult<()> {
        let replication_model = match method {
            DistributionMethod::Hash if self.replication_factor == 1 => ReplicationModel::Streaming,
            _ => ReplicationModel::Coordinator,
        };
        let entry = self.entry(relation)?;
        let distribution = DistributedRelation {
            id: relation,
            name: entry.name.clone(),
            method,
            distribution_column: column.map(str::to_string),
            colocation_id: match method {
                DistributionMethod::Hash => shard_count as u32,
                _ => 0,
            },
            replication_model,
            is_foreign: entry.kind == RelationKind::ForeignTable,
            is_partitioned: entry.kind == RelationKind::PartitionedTable,
            partition_parent: None,
        };
        self.create_shards(relation, method, shard_count, None);
        if let Some(entry) = self.relations.get_mut(&relation) {
            entry.distribution = Some(distribution);
        }
        Ok(())
    }

    /// Distribute `partition` colocated with its distributed `parent`.
    fn distribute_partition(&mut self, partition: RelationId, parent: RelationId) -> TernResult<()> {
        let parent_dist = self
            .entry(parent)?
            .distribution
            .clone()
            .ok_or_else(|| CatalogError::NotDistributed(parent.to_string()))?;
        let shard_count = self.shards.get(&parent).map_or(0, Vec::len);
        let entry = self.entry(partition)?;
        let distribution = DistributedRelation {
            id: partition,
            name: entry.name.clone(),
            is_foreign: false,
            is_partitioned: entry.kind == RelationKind::PartitionedTable,
            partition_parent: Some(parent),
            ..parent_dist.clone()
        };
        self.create_shards(partition, parent_dist.method, shard_count, Some(parent));
        if let Some(entry) = self.relations.get_mut(&partition) {
            entry.parent = Some(parent);
            entry.distribution = Some(distribution);
        }
        Ok(())
    }

    fn add_index(&mut self, meta: IndexMeta, schema: &str) -> TernResult<RelationId> {
        let id = self.add_relation(schema, &meta.name, RelationKind::Index)?;
        self.indexes.insert(id, IndexMeta { id, ..meta });
        Ok(id)
    }

    fn drop_relation(&mut self, relation: RelationId) {
        let partitions: Vec<RelationId> = self
            .relations
            .iter()
            .filter(|(_, e)| e.parent == Some(relation))
            .map(|(id, _)| *id)
            .collect();
        for partition in partitions {
            self.drop_relation(partition);
        }
        let owned: Vec<RelationId> = self
            .indexes
            .values()
            .filter(|i| i.relation_id == relation)
            .map(|i| i.id)
            .collect();
        for index in owned {
            self.indexes.remove(&index);
            self.relations.remove(&index);
        }
        self.foreign_keys
            .retain(|fk| fk.referencing != relation && fk.referenced != relation);
        if let Some(shards) = self.shards.remove(&relation) {
            for shard in shards {
                self.placements.remove(&shard.shard_id);
            }
        }
        self.indexes.remove(&relation);
        self.relations.remove(&relation);
    }

    fn rename(&mut self, relation: RelationId, new_name: &str) {
        if let Some(entry) = self.relations.get_mut(&relation) {
            entry.name.name = new_name.to_string();
            if let Some(dist) = entry.distribution.as_mut() {
                dist.name.name = new_name.to_string();
            }
        }
        if let Some(index) = self.indexes.get_mut(&relation) {
            index.name = new_name.to_string();
        }
    }

    fn set_schema(&mut self, relation: RelationId, schema: &str) {
        if let Some(entry) = self.relations.get_mut(&relation) {
            entry.name.schema = schema.to_string();
            if let Some(dist) = entry.distribution.as_mut() {
                dist.name.schema = schema.to_string();
            }
        }
    }
}

/// Inclusive hash-token range of shard `index` out of `count`.
fn hash_range(index: usize, count: usize) -> (i64, i64) {
    let span = (1i64 << 32) / count as i64;
    let min = i32::MIN as i64 + span * index as i64;
    let max = if index + 1 == count {
        i32::MAX as i64
    } else {
        min + span - 1
    };
    (min, max)
}

// ── Catalog ──────────────────────────────────────────────────────────

/// Saved catalog contents, restored on abort.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot(CatalogState);

pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
    locks: Mutex<Vec<LockEvent>>,
}

impl InMemoryCatalog {
    pub fn relation_id(&self, schema: &str, name: &str) -> Option<RelationId> {
        self.state.read().find(schema, name)
    }

    pub fn add_foreign_key(&self, fk: ForeignKeyMeta) {
        self.state.write().foreign_keys.push(fk);
    }

    /// Add an index on `relation`, as if created by CREATE INDEX.
    pub fn add_index(&self, relation: RelationId, name: &str, columns: &[&str], unique: bool) -> TernResult<RelationId> {
        let mut state = self.state.write();
        let schema = state.entry(relation)?.name.schema.clone();
        state.add_index(
            IndexMeta {
                id: relation,
                name: name.to_string(),
                relation_id: relation,
                columns: columns.iter().map(|c| c.to_string()).collect(),
                unique,
                primary: false,
                exclusion_equality: None,
                valid: true,
            },
            &schema,
        )
    }

    /// Add an exclusion constraint index. Each element is a column and
    /// whether its operator is equality.
    pub fn add_exclusion_index(&self, relation: RelationId, name: &str, elements: &[(&str, bool)]) -> RelationId {
        let mut state = self.state.write();
        let schema = state
            .relations
            .get(&relation)
            .map(|e| e.name.schema.clone())
            .unwrap_or_else(|| "public".to_string());
        let meta = IndexMeta {
            id: relation,
            name: name.to_string(),
            relation_id: relation,
            columns: elements.iter().map(|(c, _)| c.to_string()).collect(),
            unique: false,
            primary: false,
            exclusion_equality: Some(elements.iter().map(|(_, eq)| *eq).collect()),
            valid: true,
        };
        match state.add_index(meta, &schema) {
            Ok(id) => id,
            Err(_) => relation,
        }
    }

    pub fn set_placement_state(&self, shard: ShardId, placement_state: PlacementState) {
        if let Some(placements) = self.state.write().placements.get_mut(&shard) {
            for p in placements {
                p.state = placement_state;
            }
        }
    }

    pub fn set_foreign(&self, relation: RelationId) {
        let mut state = self.state.write();
        if let Some(entry) = state.relations.get_mut(&relation) {
            entry.kind = RelationKind::ForeignTable;
            if let Some(dist) = entry.distribution.as_mut() {
                dist.is_foreign = true;
            }
        }
    }

    pub fn set_colocation(&self, relation: RelationId, colocation_id: u32) {
        let mut state = self.state.write();
        if let Some(dist) = state
            .relations
            .get_mut(&relation)
            .and_then(|e| e.distribution.as_mut())
        {
            dist.colocation_id = colocation_id;
        }
    }

    pub fn index_valid(&self, index: RelationId) -> Option<bool> {
        self.state.read().indexes.get(&index).map(|i| i.valid)
    }

    pub fn lock_log(&self) -> Vec<LockEvent> {
        self.locks.lock().clone()
    }

    pub fn clear_lock_log(&self) {
        self.locks.lock().clear();
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot(self.state.read().clone())
    }

    pub fn restore(&self, snapshot: CatalogSnapshot) {
        *self.state.write() = snapshot.0;
    }
}

impl MetadataCatalog for InMemoryCatalog {
    fn resolve_relation(&self, name: &RangeVar, search_path: &[String]) -> Option<RelationId> {
        self.state.read().resolve(name, search_path)
    }

    fn relation_kind(&self, relation: RelationId) -> Option<RelationKind> {
        self.state.read().relations.get(&relation).map(|e| e.kind)
    }

    fn relation_name(&self, relation: RelationId) -> Option<QualifiedName> {
        self.state.read().relations.get(&relation).map(|e| e.name.clone())
    }

    fn distributed_relation(&self, relation: RelationId) -> Option<DistributedRelation> {
        self.state
            .read()
            .relations
            .get(&relation)
            .and_then(|e| e.distribution.clone())
    }

    fn shard_intervals(&self, relation: RelationId) -> Vec<ShardInterval> {
        let mut shards = self.state.read().shards.get(&relation).cloned().unwrap_or_default();
        shards.sort_by_key(|s| s.shard_id);
        shards
    }

    fn shard_placements(&self, shard: ShardId) -> Vec<ShardPlacement> {
        self.state.read().placements.get(&shard).cloned().unwrap_or_default()
    }

    fn lock_shard_metadata(&self, shard: ShardId, mode: LockMode) {
        self.locks.lock().push(LockEvent::ShardMetadata(shard, mode));
    }

    fn lock_relation(&self, relation: RelationId, mode: LockMode) {
        self.locks.lock().push(LockEvent::Relation(relation, mode));
    }

    fn foreign_keys(&self) -> Vec<ForeignKeyMeta> {
        self.state.read().foreign_keys.clone()
    }

    fn indexes(&self, relation: RelationId) -> Vec<IndexMeta> {
        self.state
            .read()
            .indexes
            .values()
            .filter(|i| i.relation_id == relation)
            .cloned()
            .collect()
    }

    fn index_by_name(&self, name: &RangeVar, search_path: &[String]) -> Option<IndexMeta> {
        let state = self.state.read();
        let id = state.resolve(name, search_path)?;
        state.indexes.get(&id).cloned()
    }

    fn index_owner(&self, index: RelationId) -> Option<RelationId> {
        self.state.read().indexes.get(&index).map(|i| i.relation_id)
    }

    fn partitions(&self, relation: RelationId) -> Vec<RelationId> {
        self.state
            .read()
            .relations
            .iter()
            .filter(|(_, e)| e.parent == Some(relation))
            .map(|(id, _)| *id)
            .collect()
    }

    fn relations_in_schema(&self, schema: &str) -> Vec<RelationId> {
        self.state
            .read()
            .relations
            .iter()
            .filter(|(_, e)| {
                e.name.schema == schema
                    && matches!(
                        e.kind,
                        RelationKind::Table | RelationKind::PartitionedTable | RelationKind::ForeignTable
                    )
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn worker_nodes(&self) -> Vec<WorkerNode> {
        self.state.read().workers.clone()
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Builds an `InMemoryCatalog`. Workers are groups `1..=n` named
/// `worker-{n}`; shard ids start at 102008. Set workers and replication
/// before adding tables.
pub struct ClusterBuilder {
    state: CatalogState,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self {
            state: CatalogState::default(),
        }
    }

    pub fn workers(mut self, count: u32) -> Self {
        self.state.workers = (1..=count)
            .map(|i| WorkerNode::new(i, format!("worker-{}", i), WORKER_PORT))
            .collect();
        self
    }

    /// Every worker holds a synchronized copy of the metadata.
    pub fn metadata_workers(mut self) -> Self {
        self.state.workers = self
            .state
            .workers
            .into_iter()
            .map(WorkerNode::with_metadata)
            .collect();
        self
    }

    pub fn replication_factor(mut self, factor: usize) -> Self {
        self.state.replication_factor = factor.max(1);
        self
    }

    fn table(&mut self, schema: &str, name: &str, kind: RelationKind) -> RelationId {
        match self.state.add_relation(schema, name, kind) {
            Ok(id) => id,
            Err(e) => panic!("cluster builder: {}", e),
        }
    }

    fn distributed(
        &mut self,
        schema: &str,
        name: &str,
        kind: RelationKind,
        method: DistributionMethod,
        column: Option<&str>,
        shards: usize,
    ) -> RelationId {
        let id = self.table(schema, name, kind);
        if let Err(e) = self.state.distribute(id, method, column, shards) {
            panic!("cluster builder: {}", e);
        }
        id
    }

    pub fn hash_table(&mut self, schema: &str, name: &str, column: &str, shards: usize) -> RelationId {
        self.distributed(schema, name, RelationKind::Table, DistributionMethod::Hash, Some(column), shards)
    }

    pub fn reference_table(&mut self, schema: &str, name: &str) -> RelationId {
        self.distributed(schema, name, RelationKind::Table, DistributionMethod::None, None, 1)
    }

    pub fn append_table(&mut self, schema: &str, name: &str, column: &str, shards: usize) -> RelationId {
        self.distributed(schema, name, RelationKind::Table, DistributionMethod::Append, Some(column), shards)
    }

    pub fn partitioned_hash_table(&mut self, schema: &str, name: &str, column: &str, shards: usize) -> RelationId {
        self.distributed(
            schema,
            name,
            RelationKind::PartitionedTable,
            DistributionMethod::Hash,
            Some(column),
            shards,
        )
    }

    /// A distributed partition of `parent`, colocated with it.
    pub fn hash_partition(&mut self, parent: RelationId, schema: &str, name: &str) -> RelationId {
        let id = self.table(schema, name, RelationKind::Table);
        if let Err(e) = self.state.distribute_partition(id, parent) {
            panic!("cluster builder: {}", e);
        }
        id
    }

    pub fn local_table(&mut self, schema: &str, name: &str) -> RelationId {
        self.table(schema, name, RelationKind::Table)
    }

    pub fn index(&mut self, relation: RelationId, name: &str, columns: &[&str], unique: bool) -> RelationId {
        let schema = match self.state.entry(relation) {
            Ok(entry) => entry.name.schema.clone(),
            Err(e) => panic!("cluster builder: {}", e),
        };
        let meta = IndexMeta {
            id: relation,
            name: name.to_string(),
            relation_id: relation,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
            primary: false,
            exclusion_equality: None,
            valid: true,
        };
        match self.state.add_index(meta, &schema) {
            Ok(id) => id,
            Err(e) => panic!("cluster builder: {}", e),
        }
    }

    pub fn build(self) -> InMemoryCatalog {
        InMemoryCatalog {
            state: RwLock::new(self.state),
            locks: Mutex::new(Vec::new()),
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// Applies utility statements to an `InMemoryCatalog`.
pub struct InMemoryEngine {
    catalog: Arc<InMemoryCatalog>,
    snapshot: Mutex<Option<CatalogState>>,
    applied: Mutex<Vec<String>>,
    fail_tag: Mutex<Option<String>>,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
    aborts: AtomicUsize,
}

impl InMemoryEngine {
    pub fn new(catalog: Arc<InMemoryCatalog>) -> Self {
        Self {
            catalog,
            snapshot: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            fail_tag: Mutex::new(None),
            fail_next_commit: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        }
    }

    /// Make every statement with this command tag fail locally.
    pub fn fail_on_tag(&self, tag: &str) {
        *self.fail_tag.lock() = Some(tag.to_string());
    }

    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        *self.fail_tag.lock() = None;
        self.fail_next_commit.store(false, Ordering::SeqCst);
    }

    /// Query text of every statement applied, including rolled-back ones.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.lock().is_some()
    }

    fn apply_alter_table(state: &mut CatalogState, stmt: &AlterTableStmt) -> TernResult<()> {
        let Some(id) = state.resolve(&stmt.relation, &[]) else {
            if stmt.missing_ok {
                return Ok(());
            }
            return Err(CatalogError::RelationNotFound(stmt.relation.to_string()).into());
        };
        if stmt.object == AlterObjectKind::Index {
            return Ok(());
        }
        for cmd in &stmt.cmds {
            match cmd {
                AlterTableCmd::AddColumn(def) => {
                    for constraint in &def.constraints {
                        add_constraint(state, id, constraint, Some(&def.name))?;
                    }
                }
                AlterTableCmd::AddConstraint(constraint) => add_constraint(state, id, constraint, None)?,
                AlterTableCmd::DropConstraint { name, .. } => {
                    state.foreign_keys.retain(|fk| !(fk.referencing == id && &fk.name == name));
                    let index = state
                        .indexes
                        .values()
                        .find(|i| i.relation_id == id && &i.name == name)
                        .map(|i| i.id);
                    if let Some(index) = index {
                        state.indexes.remove(&index);
                        state.relations.remove(&index);
                    }
                }
                AlterTableCmd::DropColumn { name, .. } => {
                    state.foreign_keys.retain(|fk| {
                        !(fk.referencing == id && fk.referencing_columns.contains(name))
                            && !(fk.referenced == id && fk.referenced_columns.contains(name))
                    });
                    let dropped: Vec<RelationId> = state
                        .indexes
                        .values()
                        .filter(|i| i.relation_id == id && i.columns.contains(name))
                        .map(|i| i.id)
                        .collect();
                    for index in dropped {
                        state.indexes.remove(&index);
                        state.relations.remove(&index);
                    }
                }
                AlterTableCmd::AttachPartition { partition, .. } => {
                    let partition_id = state
                        .resolve(partition, &[])
                        .ok_or_else(|| CatalogError::RelationNotFound(partition.to_string()))?;
                    if let Some(entry) = state.relations.get_mut(&partition_id) {
                        entry.parent = Some(id);
                        if let Some(dist) = entry.distribution.as_mut() {
                            dist.partition_parent = Some(id);
                        }
                    }
                }
                AlterTableCmd::DetachPartition { partition } => {
                    if let Some(partition_id) = state.resolve(partition, &[]) {
                        if let Some(entry) = state.relations.get_mut(&partition_id) {
                            entry.parent = None;
                            if let Some(dist) = entry.distribution.as_mut() {
                                dist.partition_parent = None;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_rename(state: &mut CatalogState, stmt: &RenameStmt) -> TernResult<()> {
        if stmt.object == RenameObject::Schema {
            let ids: Vec<RelationId> = state
                .relations
                .iter()
                .filter(|(_, e)| e.name.schema == stmt.relation.name)
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                state.set_schema(id, &stmt.new_name);
            }
            return Ok(());
        }
        let Some(id) = state.resolve(&stmt.relation, &[]) else {
            if stmt.missing_ok {
                return Ok(());
            }
            return Err(CatalogError::RelationNotFound(stmt.relation.to_string()).into());
        };
        match stmt.object {
            RenameObject::Table | RenameObject::Index => state.rename(id, &stmt.new_name),
            RenameObject::Column => {
                let Some(old) = stmt.subname.as_deref() else {
                    return Ok(());
                };
                let new = stmt.new_name.as_str();
                let rename_in = |cols: &mut Vec<String>| {
                    for c in cols.iter_mut().filter(|c| c.as_str() == old) {
                        *c = new.to_string();
                    }
                };
                for index in state.indexes.values_mut().filter(|i| i.relation_id == id) {
                    rename_in(&mut index.columns);
                }
                for fk in state.foreign_keys.iter_mut() {
                    if fk.referencing == id {
                        rename_in(&mut fk.referencing_columns);
                    }
                    if fk.referenced == id {
                        rename_in(&mut fk.referenced_columns);
                    }
                }
                if let Some(dist) = state.relations.get_mut(&id).and_then(|e| e.distribution.as_mut()) {
                    if dist.distribution_column.as_deref() == Some(old) {
                        dist.distribution_column = Some(new.to_string());
                    }
                }
            }
            RenameObject::TableConstraint => {
                let Some(old) = stmt.subname.as_deref() else {
                    return Ok(());
                };
                for fk in state.foreign_keys.iter_mut().filter(|fk| fk.referencing == id) {
                    if fk.name == old {
                        fk.name = stmt.new_name.clone();
                    }
                }
                let index = state
                    .indexes
                    .values()
                    .find(|i| i.relation_id == id && i.name == old)
                    .map(|i| i.id);
                if let Some(index) = index {
                    state.rename(index, &stmt.new_name);
                }
            }
            RenameObject::Schema | RenameObject::Other => {}
        }
        Ok(())
    }

    fn apply_drop(state: &mut CatalogState, stmt: &DropStmt) -> TernResult<()> {
        for object in &stmt.objects {
            match stmt.kind {
                DropKind::Table => match state.resolve(object, &[]) {
                    Some(id) => state.drop_relation(id),
                    None if stmt.missing_ok => {}
                    None => return Err(CatalogError::RelationNotFound(object.to_string()).into()),
                },
                DropKind::Index => {
                    let id = state.resolve(object, &[]).filter(|id| state.indexes.contains_key(id));
                    match id {
                        Some(id) => state.drop_relation(id),
                        None if stmt.missing_ok => {}
                        None => return Err(CatalogError::IndexNotFound(object.to_string()).into()),
                    }
                }
                DropKind::Schema => {
                    let ids: Vec<RelationId> = state
                        .relations
                        .iter()
                        .filter(|(_, e)| e.name.schema == object.name && e.kind != RelationKind::Index)
                        .map(|(id, _)| *id)
                        .collect();
                    for id in ids {
                        state.drop_relation(id);
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_create_index(state: &mut CatalogState, stmt: &IndexStmt) -> TernResult<()> {
        let table = state
            .resolve(&stmt.relation, &[])
            .ok_or_else(|| CatalogError::RelationNotFound(stmt.relation.to_string()))?;
        let entry = state.entry(table)?;
        let schema = entry.name.schema.clone();
        let name = match &stmt.name {
            Some(name) => name.clone(),
            None => format!("{}_{}_idx", entry.name.name, stmt.params.join("_")),
        };
        if state.find(&schema, &name).is_some() {
            if stmt.if_not_exists {
                return Ok(());
            }
            return Err(CatalogError::RelationExists(name).into());
        }
        state.add_index(
            IndexMeta {
                id: table,
                name,
                relation_id: table,
                columns: stmt.params.clone(),
                unique: stmt.unique,
                primary: false,
                exclusion_equality: None,
                valid: true,
            },
            &schema,
        )?;
        Ok(())
    }

    fn apply_create_partition(state: &mut CatalogState, stmt: &CreatePartitionOfStmt) -> TernResult<()> {
        let parent = state
            .resolve(&stmt.parent, &[])
            .ok_or_else(|| CatalogError::RelationNotFound(stmt.parent.to_string()))?;
        let schema = stmt.relation.schema.as_deref().unwrap_or("public");
        let id = state.add_relation(schema, &stmt.relation.name, RelationKind::Table)?;
        if let Some(entry) = state.relations.get_mut(&id) {
            entry.parent = Some(parent);
        }
        Ok(())
    }
}

/// Record the index or foreign key a constraint creates. `column` is the
/// column a column constraint is attached to.
fn add_constraint(
    state: &mut CatalogState,
    table: RelationId,
    constraint: &Constraint,
    column: Option<&str>,
) -> TernResult<()> {
    let entry = state.entry(table)?;
    let table_name = entry.name.name.clone();
    let schema = entry.name.schema.clone();
    let columns_or_self = |columns: &[String]| -> Vec<String> {
        if columns.is_empty() {
            column.map(|c| vec![c.to_string()]).unwrap_or_default()
        } else {
            columns.to_vec()
        }
    };

    let index = match &constraint.kind {
        ConstraintKind::PrimaryKey { columns } => Some(IndexMeta {
            id: table,
            name: constraint
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_pkey", table_name)),
            relation_id: table,
            columns: columns_or_self(columns),
            unique: true,
            primary: true,
            exclusion_equality: None,
            valid: true,
        }),
        ConstraintKind::Unique { columns } => {
            let columns = columns_or_self(columns);
            Some(IndexMeta {
                id: table,
                name: constraint
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}_key", table_name, columns.join("_"))),
                relation_id: table,
                columns,
                unique: true,
                primary: false,
                exclusion_equality: None,
                valid: true,
            })
        }
        ConstraintKind::Exclusion { elements, .. } => Some(IndexMeta {
            id: table,
            name: constraint
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_excl", table_name)),
            relation_id: table,
            columns: elements.iter().map(|e| e.column.clone()).collect(),
            unique: false,
            primary: false,
            exclusion_equality: Some(elements.iter().map(ExclusionElement::is_equality).collect()),
            valid: true,
        }),
        ConstraintKind::ForeignKey(spec) => {
            let referenced = state
                .resolve(&spec.referenced, &[])
                .ok_or_else(|| CatalogError::RelationNotFound(spec.referenced.to_string()))?;
            let referencing_columns = columns_or_self(&spec.columns);
            state.foreign_keys.push(ForeignKeyMeta {
                name: constraint
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}_fkey", table_name, referencing_columns.join("_"))),
                referencing: table,
                referenced,
                referencing_columns,
                referenced_columns: spec.referenced_columns.clone(),
                on_delete: spec.on_delete,
                on_update: spec.on_update,
            });
            None
        }
        _ => None,
    };
    if let Some(index) = index {
        state.add_index(index, &schema)?;
    }
    Ok(())
}

impl LocalEngine for InMemoryEngine {
    fn apply(&self, stmt: &UtilityStmt, query: &str) -> TernResult<()> {
        if self.fail_tag.lock().as_deref() == Some(stmt.tag()) {
            return Err(TernError::Internal(format!("injected failure: {}", query)));
        }
        self.applied.lock().push(query.to_string());

        let mut state = self.catalog.state.write();
        match stmt {
            UtilityStmt::AlterTable(alter) => Self::apply_alter_table(&mut state, alter),
            UtilityStmt::Rename(rename) => Self::apply_rename(&mut state, rename),
            UtilityStmt::Drop(drop) => Self::apply_drop(&mut state, drop),
            UtilityStmt::CreateIndex(index) => Self::apply_create_index(&mut state, index),
            UtilityStmt::CreatePartitionOf(create) => Self::apply_create_partition(&mut state, create),
            UtilityStmt::AlterObjectSchema(alter) => {
                if let Some(id) = state.resolve(&alter.relation, &[]) {
                    state.set_schema(id, &alter.new_schema);
                }
                Ok(())
            }
            UtilityStmt::Grant(_)
            | UtilityStmt::Truncate(_)
            | UtilityStmt::Vacuum(_)
            | UtilityStmt::AlterTableMoveAll(_)
            | UtilityStmt::Cluster(_)
            | UtilityStmt::CreateDatabase { .. }
            | UtilityStmt::CreateRole { .. }
            | UtilityStmt::Other { .. } => Ok(()),
        }
    }

    fn commit_transaction(&self) -> TernResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(TernError::Internal("injected commit failure".into()));
        }
        *self.snapshot.lock() = None;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_transaction(&self) {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_none() {
            *snapshot = Some(self.catalog.state.read().clone());
        }
    }

    fn abort_transaction(&self) {
        if let Some(saved) = self.snapshot.lock().take() {
            *self.catalog.state.write() = saved;
        }
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn set_index_valid_in_place(&self, index: RelationId, valid: bool) -> TernResult<()> {
        self.set_index_valid(index, valid)?;
        if let Some(saved) = self.snapshot.lock().as_mut() {
            if let Some(meta) = saved.indexes.get_mut(&index) {
                meta.valid = valid;
            }
        }
        Ok(())
    }

    fn set_index_valid(&self, index: RelationId, valid: bool) -> TernResult<()> {
        let mut state = self.catalog.state.write();
        let meta = state
            .indexes
            .get_mut(&index)
            .ok_or_else(|| CatalogError::IndexNotFound(index.to_string()))?;
        meta.valid = valid;
        Ok(())
    }

    fn distribute_partition(&self, partition: RelationId, parent: RelationId) -> TernResult<()> {
        self.catalog.state.write().distribute_partition(partition, parent)
    }
}

// ── Transport ────────────────────────────────────────────────────────

#[derive(Default)]
struct TransportState {
    calls: Vec<(NodeKey, String)>,
    /// (node filter, substring): commands matching fail on completion.
    failures: Vec<(Option<NodeKey>, String)>,
    refused: HashSet<NodeKey>,
    pending: usize,
    connections: usize,
}

/// Records every command sent to every node.
#[derive(Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<TransportState>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` fail on any node.
    pub fn fail_on(&self, pattern: &str) {
        self.state.lock().failures.push((None, pattern.to_string()));
    }

    pub fn fail_on_node(&self, node: &NodeKey, pattern: &str) {
        self.state
            .lock()
            .failures
            .push((Some(node.clone()), pattern.to_string()));
    }

    /// Connections to `node` fail.
    pub fn refuse_node(&self, node: &NodeKey) {
        self.state.lock().refused.insert(node.clone());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        state.refused.clear();
    }

    pub fn calls(&self) -> Vec<(NodeKey, String)> {
        self.state.lock().calls.clone()
    }

    pub fn all_commands(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn commands_for(&self, node: &NodeKey) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(n, _)| n == node)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Commands sent but never awaited.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections
    }
}

impl WorkerTransport for RecordingTransport {
    fn connect(&self, node: &NodeKey) -> TernResult<Box<dyn WorkerConnection>> {
        let mut state = self.state.lock();
        if state.refused.contains(node) {
            return Err(ClusterError::ConnectionFailed {
                node: node.to_string(),
                message: "connection refused".into(),
            }
            .into());
        }
        state.connections += 1;
        Ok(Box::new(RecordingConnection {
            node: node.clone(),
            state: Arc::clone(&self.state),
            in_flight: None,
        }))
    }
}

struct RecordingConnection {
    node: NodeKey,
    state: Arc<Mutex<TransportState>>,
    in_flight: Option<String>,
}

impl WorkerConnection for RecordingConnection {
    fn node(&self) -> &NodeKey {
        &self.node
    }

    fn send_command(&mut self, command: &str) -> TernResult<()> {
        if self.in_flight.is_some() {
            return Err(TernError::internal_bug(
                "E-MEM-001",
                "command sent while another is in flight",
                self.node.to_string(),
            ));
        }
        let mut state = self.state.lock();
        state.calls.push((self.node.clone(), command.to_string()));
        state.pending += 1;
        self.in_flight = Some(command.to_string());
        Ok(())
    }

    fn await_completion(&mut self) -> TernResult<()> {
        let Some(command) = self.in_flight.take() else {
            return Err(TernError::internal_bug(
                "E-MEM-002",
                "await without a command in flight",
                self.node.to_string(),
            ));
        };
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        let fails = state.failures.iter().any(|(node, pattern)| {
            node.as_ref().map_or(true, |n| n == &self.node) && command.contains(pattern.as_str())
        });
        if fails {
            return Err(ClusterError::RemoteCommandFailed {
                node: self.node.to_string(),
                command,
                message: "injected failure".into(),
            }
            .into());
        }
        Ok(())
    }
}
