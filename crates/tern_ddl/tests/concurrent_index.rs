//! CREATE INDEX CONCURRENTLY: partial failure leaves an invalid index that
//! can be dropped and rebuilt.

mod common;

use common::*;

#[test]
fn test_concurrent_index_success() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();

    let outcome = session
        .execute(
            create_index("orders_created_idx", "orders", &["created_at"], true),
            "CREATE INDEX CONCURRENTLY orders_created_idx ON orders (created_at)",
        )
        .unwrap();
    assert_eq!(outcome.jobs, 1);

    let idx = cluster.rel("orders_created_idx");
    assert_eq!(cluster.catalog.index_valid(idx), Some(true));

    // Bare connections: no transaction block on any worker.
    let commands = cluster.transport.all_commands();
    assert!(!commands.iter().any(|c| c == "BEGIN" || c == "COMMIT"));
    assert_eq!(cluster.shard_commands().len(), 4);
    // Build commit, invalid mark, and the final valid flip.
    assert_eq!(cluster.engine.commit_count(), 3);
}

#[test]
fn test_partial_failure_leaves_invalid_index() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();
    cluster.transport.fail_on("worker_apply_shard_ddl_command (102009");

    let err = session
        .execute(
            create_index("orders_created_idx", "orders", &["created_at"], true),
            "CREATE INDEX CONCURRENTLY orders_created_idx ON orders (created_at)",
        )
        .unwrap_err();
    assert!(matches!(err, TernError::Ddl(DdlError::PartialIndexFailure { .. })));
    assert_eq!(err.to_string(), "CONCURRENTLY-enabled index command failed");
    assert!(err.hint().unwrap().starts_with("Use DROP INDEX CONCURRENTLY IF EXISTS"));
    assert!(err.detail().unwrap().contains("orders_created_idx"));

    // The local index survives the abort, marked invalid.
    let idx = cluster.rel("orders_created_idx");
    assert_eq!(cluster.catalog.index_valid(idx), Some(false));
    // Nothing is rolled back remotely.
    assert!(!cluster.transport.all_commands().iter().any(|c| c.starts_with("ROLLBACK")));

    // Recover: drop the invalid index and build it again.
    cluster.transport.clear_failures();
    session
        .execute(
            drop_index("orders_created_idx", true, true),
            "DROP INDEX CONCURRENTLY IF EXISTS orders_created_idx",
        )
        .unwrap();
    assert!(cluster.catalog.relation_id("public", "orders_created_idx").is_none());
    assert!(cluster
        .shard_commands()
        .iter()
        .any(|c| c.contains("DROP INDEX CONCURRENTLY IF EXISTS")));

    session
        .execute(
            create_index("orders_created_idx", "orders", &["created_at"], true),
            "CREATE INDEX CONCURRENTLY orders_created_idx ON orders (created_at)",
        )
        .unwrap();
    let idx = cluster.rel("orders_created_idx");
    assert_eq!(cluster.catalog.index_valid(idx), Some(true));
}

#[test]
fn test_concurrent_index_rejected_in_transaction_block() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();

    session.begin().unwrap();
    let err = session
        .execute(
            create_index("orders_created_idx", "orders", &["created_at"], true),
            "CREATE INDEX CONCURRENTLY orders_created_idx ON orders (created_at)",
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "CREATE INDEX CONCURRENTLY cannot run inside a transaction block");
    assert!(!session.in_transaction_block());
    assert!(cluster.catalog.relation_id("public", "orders_created_idx").is_none());
    assert!(cluster.transport.all_commands().is_empty());
}

#[test]
fn test_concurrent_index_on_metadata_cluster_reaches_workers_bare() {
    let mut b = ClusterBuilder::new().workers(2).metadata_workers();
    b.hash_table("public", "orders", "customer_id", 2);
    let cluster = Cluster::new(b);
    let mut session = cluster.session();

    session
        .execute(
            create_index("orders_created_idx", "orders", &["created_at"], true),
            "CREATE INDEX CONCURRENTLY orders_created_idx ON orders (created_at)",
        )
        .unwrap();
    for i in 1..=2 {
        let commands = cluster.transport.commands_for(&worker(i));
        assert!(commands.contains(&"SET citus.enable_ddl_propagation TO 'off'".to_string()));
        assert!(commands
            .iter()
            .any(|c| c == "CREATE INDEX CONCURRENTLY orders_created_idx ON orders (created_at)"));
        assert!(!commands.iter().any(|c| c == "BEGIN"));
    }
}
