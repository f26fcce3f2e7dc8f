//! Cached foreign-key dependency graph between relations.
//!
//! The graph is process-wide and rebuilt lazily from the catalog. Commands
//! that add or drop foreign keys (or drop relations that take part in one)
//! mark their `ForeignKeyInvalidation` dirty while planning; the utility
//! processor calls `flush_if_dirty` once the local command has been applied.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use tern_common::types::RelationId;

use crate::catalog::MetadataCatalog;
use crate::context::ForeignKeyInvalidation;

#[derive(Default)]
struct GraphState {
    built: bool,
    /// referenced → relations whose foreign keys point at it.
    referencing: HashMap<RelationId, HashSet<RelationId>>,
    /// referencing → relations it points at.
    referenced: HashMap<RelationId, HashSet<RelationId>>,
    rebuilds: u64,
}

pub struct ForeignKeyGraph {
    state: RwLock<GraphState>,
}

impl Default for ForeignKeyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ForeignKeyGraph {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
        }
    }

    /// Drop the cached edges; the next lookup rebuilds them.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.built = false;
        state.referencing.clear();
        state.referenced.clear();
    }

    /// Rebuild the graph if the command marked it dirty. Returns whether a
    /// rebuild happened.
    pub fn flush_if_dirty(
        &self,
        invalidation: &mut ForeignKeyInvalidation,
        catalog: &dyn MetadataCatalog,
    ) -> bool {
        if !invalidation.take() {
            return false;
        }
        self.invalidate();
        self.ensure_built(catalog);
        true
    }

    /// Number of rebuilds so far.
    pub fn rebuild_count(&self) -> u64 {
        self.state.read().rebuilds
    }

    fn ensure_built(&self, catalog: &dyn MetadataCatalog) {
        if self.state.read().built {
            return;
        }
        let mut state = self.state.write();
        if state.built {
            return;
        }
        state.referencing.clear();
        state.referenced.clear();
        let foreign_keys = catalog.foreign_keys();
        for fk in &foreign_keys {
            state
                .referencing
                .entry(fk.referenced)
                .or_default()
                .insert(fk.referencing);
            state
                .referenced
                .entry(fk.referencing)
                .or_default()
                .insert(fk.referenced);
        }
        state.built = true;
        state.rebuilds += 1;
        tracing::debug!(
            edges = foreign_keys.len(),
            rebuilds = state.rebuilds,
            "foreign key graph rebuilt"
        );
    }

    fn closure(
        edges: &HashMap<RelationId, HashSet<RelationId>>,
        start: RelationId,
    ) -> BTreeSet<RelationId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if let Some(next) = edges.get(&node) {
                for &n in next {
                    if n != start && seen.insert(n) {
                        stack.push(n);
                    }
                }
            }
        }
        seen
    }

    /// Every relation that references `relation`, directly or transitively,
    /// in ascending id order.
    pub fn referencing_relations(
        &self,
        catalog: &dyn MetadataCatalog,
        relation: RelationId,
    ) -> Vec<RelationId> {
        self.ensure_built(catalog);
        let state = self.state.read();
        Self::closure(&state.referencing, relation).into_iter().collect()
    }

    /// Every relation `relation` references, directly or transitively.
    pub fn referenced_relations(
        &self,
        catalog: &dyn MetadataCatalog,
        relation: RelationId,
    ) -> Vec<RelationId> {
        self.ensure_built(catalog);
        let state = self.state.read();
        Self::closure(&state.referenced, relation).into_iter().collect()
    }

    pub fn is_referenced(&self, catalog: &dyn MetadataCatalog, relation: RelationId) -> bool {
        self.ensure_built(catalog);
        let state = self.state.read();
        state
            .referencing
            .get(&relation)
            .is_some_and(|s| s.iter().any(|&r| r != relation))
    }

    pub fn is_referencing(&self, catalog: &dyn MetadataCatalog, relation: RelationId) -> bool {
        self.ensure_built(catalog);
        let state = self.state.read();
        state
            .referenced
            .get(&relation)
            .is_some_and(|s| s.iter().any(|&r| r != relation))
    }

    /// Whether `relation` takes part in any foreign key.
    pub fn participates(&self, catalog: &dyn MetadataCatalog, relation: RelationId) -> bool {
        self.is_referenced(catalog, relation) || self.is_referencing(catalog, relation)
    }
}
