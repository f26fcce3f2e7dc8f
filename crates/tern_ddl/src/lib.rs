//! Distributed DDL coordination for sharded tables.
//!
//! A utility statement issued on the coordinator is classified, validated,
//! planned into per-shard tasks, applied locally and then executed on the
//! workers inside the session's coordinated transaction.

pub mod catalog;
pub mod classifier;
pub mod concurrent_index;
pub mod context;
pub mod deparse;
pub mod executor;
pub mod fk_graph;
pub mod fk_validator;
pub mod grant;
pub mod in_memory;
pub mod lock;
pub mod planner;
pub mod relay;
pub mod render;
pub mod statement;
pub mod task;
pub mod task_list;
pub mod transaction;
pub mod transport;
pub mod truncate;
pub mod utility;
pub mod vacuum;
pub mod validator;

pub use catalog::{LocalEngine, MetadataCatalog, RelationKind};
pub use classifier::{Classification, CommandClassifier};
pub use context::{CommandContext, Notice, SessionState, Severity};
pub use executor::DdlExecutor;
pub use fk_graph::ForeignKeyGraph;
pub use fk_validator::{DefaultForeignKeyValidator, ForeignKeyValidator};
pub use lock::LockMode;
pub use statement::UtilityStmt;
pub use task::{DdlJob, Task, TaskKind};
pub use transaction::{Transaction, TransactionExecutionMode};
pub use transport::{WorkerConnection, WorkerTransport};
pub use utility::{CommandOutcome, Session, UtilityProcessor};
