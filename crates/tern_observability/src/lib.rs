//! Observability setup: structured logging and DDL metrics.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tern=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Like `init_tracing`, but does not panic when a subscriber is already set.
/// Intended for tests that may share a process.
pub fn try_init_tracing() -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,tern=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}

/// Record one executed DDL job and how it ran.
pub fn record_ddl_job(mode: &str, task_count: usize) {
    metrics::counter!("tern_ddl_jobs_total", "mode" => mode.to_string()).increment(1);
    metrics::histogram!("tern_ddl_job_tasks", "mode" => mode.to_string()).record(task_count as f64);
}

/// Record tasks dispatched to workers, by task kind.
pub fn record_ddl_tasks(kind: &str, count: usize) {
    metrics::counter!("tern_ddl_tasks_total", "kind" => kind.to_string()).increment(count as u64);
}

/// Record a failed statement, keyed by error class.
pub fn record_ddl_failure(kind: &str) {
    metrics::counter!("tern_ddl_failures_total", "kind" => kind.to_string()).increment(1);
}

/// Record the outcome of a concurrent index build (`valid` / `failed_invalid`).
pub fn record_concurrent_index(outcome: &str) {
    metrics::counter!("tern_concurrent_index_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// Record remote cluster-lock requests issued by the lock orderer.
pub fn record_remote_locks(count: usize) {
    metrics::counter!("tern_remote_locks_total").increment(count as u64);
}

/// Record the number of commands broadcast to metadata-holding workers.
pub fn record_metadata_broadcast(node_count: usize) {
    metrics::gauge!("tern_last_metadata_broadcast_nodes").set(node_count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter_are_noops() {
        record_ddl_job("parallel", 4);
        record_ddl_tasks("ddl", 4);
        record_ddl_failure("user_error");
        record_concurrent_index("valid");
        record_remote_locks(6);
        record_metadata_broadcast(2);
    }

    #[test]
    fn test_try_init_twice() {
        let first = try_init_tracing();
        let second = try_init_tracing();
        assert!(!(first && second));
    }
}
