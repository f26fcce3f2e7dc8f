#![allow(dead_code, unused_imports)]

pub use std::sync::Arc;

pub use tern_common::config::{CommitProtocol, DdlConfig, MultiShardModifyMode};
pub use tern_common::error::{CatalogError, ClusterError, DdlError};
pub use tern_common::metadata::NodeKey;
pub use tern_common::types::{RangeVar, RelationId, ShardId};
pub use tern_common::{TernError, TernResult};
pub use tern_ddl::catalog::MetadataCatalog;
pub use tern_ddl::context::{Notice, SessionState, Severity};
pub use tern_ddl::in_memory::{ClusterBuilder, InMemoryCatalog, InMemoryEngine, RecordingTransport};
pub use tern_ddl::statement::*;
pub use tern_ddl::utility::{CommandOutcome, Session, UtilityProcessor};

pub struct Cluster {
    pub catalog: Arc<InMemoryCatalog>,
    pub engine: Arc<InMemoryEngine>,
    pub transport: Arc<RecordingTransport>,
    pub processor: UtilityProcessor,
}

impl Cluster {
    pub fn new(builder: ClusterBuilder) -> Self {
        Self::with_config(builder, DdlConfig::default())
    }

    pub fn with_config(builder: ClusterBuilder, config: DdlConfig) -> Self {
        let _ = tern_observability::try_init_tracing();
        let catalog = Arc::new(builder.build());
        let engine = Arc::new(InMemoryEngine::new(Arc::clone(&catalog)));
        let transport = Arc::new(RecordingTransport::new());
        let processor = UtilityProcessor::new(
            config,
            catalog.clone(),
            engine.clone(),
            transport.clone(),
        );
        Self {
            catalog,
            engine,
            transport,
            processor,
        }
    }

    pub fn session(&self) -> Session<'_> {
        self.processor.session(SessionState::default())
    }

    pub fn rel(&self, name: &str) -> RelationId {
        self.catalog.relation_id("public", name).unwrap()
    }

    /// Shard-level DDL commands sent to any worker.
    pub fn shard_commands(&self) -> Vec<String> {
        self.transport
            .all_commands()
            .into_iter()
            .filter(|c| c.contains("worker_apply_"))
            .collect()
    }
}

/// Two workers, `orders` hash-distributed on `customer_id` with 4 shards and
/// a `warehouses` reference table.
pub fn orders_cluster() -> ClusterBuilder {
    let mut b = ClusterBuilder::new().workers(2);
    b.hash_table("public", "orders", "customer_id", 4);
    b.reference_table("public", "warehouses");
    b
}

pub fn worker(i: u32) -> NodeKey {
    NodeKey {
        host: format!("worker-{}", i),
        port: 5432,
    }
}

pub fn alter_table(table: &str, cmds: Vec<AlterTableCmd>) -> UtilityStmt {
    UtilityStmt::AlterTable(AlterTableStmt::table(RangeVar::new(table), cmds))
}

pub fn add_column(table: &str, column: &str, type_name: &str) -> UtilityStmt {
    alter_table(table, vec![AlterTableCmd::AddColumn(ColumnDef::new(column, type_name))])
}

pub fn add_primary_key(table: &str, name: &str, columns: &[&str]) -> UtilityStmt {
    alter_table(
        table,
        vec![AlterTableCmd::AddConstraint(Constraint::new(
            Some(name),
            ConstraintKind::PrimaryKey {
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        ))],
    )
}

pub fn add_foreign_key(table: &str, name: &str, column: &str, referenced: &str, referenced_column: &str) -> UtilityStmt {
    alter_table(
        table,
        vec![AlterTableCmd::AddConstraint(Constraint::new(
            Some(name),
            ConstraintKind::ForeignKey(ForeignKeySpec::new(
                RangeVar::new(referenced),
                &[column],
                &[referenced_column],
            )),
        ))],
    )
}

pub fn create_index(name: &str, table: &str, columns: &[&str], concurrent: bool) -> UtilityStmt {
    let mut stmt = IndexStmt::new(name, RangeVar::new(table), columns);
    stmt.concurrent = concurrent;
    UtilityStmt::CreateIndex(stmt)
}

pub fn drop_index(name: &str, if_exists: bool, concurrent: bool) -> UtilityStmt {
    UtilityStmt::Drop(DropStmt {
        kind: DropKind::Index,
        objects: vec![RangeVar::new(name)],
        missing_ok: if_exists,
        cascade: false,
        concurrent,
    })
}

pub fn drop_table(name: &str) -> UtilityStmt {
    UtilityStmt::Drop(DropStmt {
        kind: DropKind::Table,
        objects: vec![RangeVar::new(name)],
        missing_ok: false,
        cascade: false,
        concurrent: false,
    })
}

pub fn warnings(outcome: &CommandOutcome) -> Vec<&Notice> {
    outcome
        .notices
        .iter()
        .filter(|n| n.severity == Severity::Warning)
        .collect()
}
