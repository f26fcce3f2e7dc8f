//! VACUUM / ANALYZE, GRANT, TRUNCATE and DROP TABLE.

mod common;

use common::*;

fn vacuum(options: VacuumOptions, tables: &[&str]) -> UtilityStmt {
    UtilityStmt::Vacuum(VacuumStmt {
        options,
        relations: tables
            .iter()
            .map(|t| VacuumRelation {
                relation: RangeVar::new(*t),
                columns: Vec::new(),
            })
            .collect(),
    })
}

#[test]
fn test_vacuum_without_table_is_not_propagated() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();

    let outcome = session.execute(vacuum(VacuumOptions::vacuum(), &[]), "VACUUM").unwrap();
    assert_eq!(outcome.jobs, 0);
    let warnings = warnings(&outcome);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, "not propagating VACUUM command to worker nodes");
    assert!(cluster.transport.all_commands().is_empty());
}

#[test]
fn test_vacuum_runs_outside_transaction_blocks() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();

    session
        .execute(vacuum(VacuumOptions::vacuum(), &["orders"]), "VACUUM orders")
        .unwrap();
    let mut commands = cluster.transport.all_commands();
    commands.sort();
    assert_eq!(
        commands,
        vec![
            "VACUUM public.orders_102008".to_string(),
            "VACUUM public.orders_102009".to_string(),
            "VACUUM public.orders_102010".to_string(),
            "VACUUM public.orders_102011".to_string(),
        ]
    );
}

#[test]
fn test_analyze_runs_inside_transaction_blocks() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();

    session
        .execute(vacuum(VacuumOptions::analyze(), &["orders"]), "ANALYZE orders")
        .unwrap();
    let commands = cluster.transport.all_commands();
    assert_eq!(commands.iter().filter(|c| *c == "BEGIN").count(), 4);
    assert_eq!(commands.iter().filter(|c| *c == "COMMIT").count(), 4);
    assert!(commands.contains(&"ANALYZE public.orders_102008".to_string()));
}

#[test]
fn test_vacuum_options_and_columns() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();

    let options = VacuumOptions {
        vacuum: true,
        analyze: true,
        full: true,
        ..VacuumOptions::default()
    };
    let stmt = UtilityStmt::Vacuum(VacuumStmt {
        options,
        relations: vec![VacuumRelation {
            relation: RangeVar::new("warehouses"),
            columns: vec!["id".into()],
        }],
    });
    session.execute(stmt, "VACUUM (FULL, ANALYZE) warehouses (id)").unwrap();

    let shard = cluster.catalog.shard_intervals(cluster.rel("warehouses"))[0].shard_id;
    let expected = format!("VACUUM (ANALYZE,FULL) public.warehouses_{} (id)", shard.0);
    for i in 1..=2 {
        assert_eq!(cluster.transport.commands_for(&worker(i)), vec![expected.clone()]);
    }
}

#[test]
fn test_grant_all_tables_in_schema() {
    let mut b = ClusterBuilder::new().workers(2);
    b.hash_table("public", "orders", "customer_id", 4);
    b.hash_table("public", "items", "customer_id", 4);
    b.local_table("public", "audit");
    let cluster = Cluster::new(b);
    let mut session = cluster.session();

    let stmt = UtilityStmt::Grant(GrantStmt {
        is_grant: true,
        object_type: GrantObjectType::Table,
        target: GrantTarget::AllInSchema(vec!["public".into()]),
        privileges: vec![Privilege::new("SELECT")],
        grantees: vec![RoleSpec::Name("analyst".into())],
        grant_option: false,
    });
    let outcome = session
        .execute(stmt, "GRANT SELECT ON ALL TABLES IN SCHEMA public TO analyst")
        .unwrap();
    assert_eq!(outcome.tag, "GRANT");
    assert_eq!(outcome.jobs, 2);

    let shard_commands = cluster.shard_commands();
    assert_eq!(shard_commands.len(), 8);
    assert!(shard_commands.iter().all(|c| c.contains("GRANT SELECT ON")));
    assert!(shard_commands.iter().any(|c| c.contains("public.orders")));
    assert!(!shard_commands.iter().any(|c| c.contains("audit")));
}

#[test]
fn test_grant_on_column_list_rejected() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();

    let stmt = UtilityStmt::Grant(GrantStmt {
        is_grant: true,
        object_type: GrantObjectType::Table,
        target: GrantTarget::Objects(vec![RangeVar::new("orders")]),
        privileges: vec![Privilege {
            name: "SELECT".into(),
            columns: vec!["id".into()],
        }],
        grantees: vec![RoleSpec::Public],
        grant_option: false,
    });
    let err = session.execute(stmt, "GRANT SELECT (id) ON orders TO PUBLIC").unwrap_err();
    assert_eq!(err.to_string(), "grant/revoke on column list is currently unsupported");
}

#[test]
fn test_truncate_locks_on_metadata_workers() {
    let mut b = ClusterBuilder::new().workers(2).metadata_workers();
    b.hash_table("public", "orders", "customer_id", 2);
    let cluster = Cluster::new(b);
    let mut session = cluster.session();

    let stmt = UtilityStmt::Truncate(TruncateStmt {
        relations: vec![RangeVar::new("orders")],
        restart_identity: false,
        cascade: false,
    });
    let outcome = session.execute(stmt, "TRUNCATE orders").unwrap();
    assert_eq!(outcome.tag, "TRUNCATE TABLE");

    let lock = "SELECT lock_relation_if_exists('public.orders', 'ACCESS EXCLUSIVE');".to_string();
    for i in 1..=2 {
        let commands = cluster.transport.commands_for(&worker(i));
        assert_eq!(commands, vec!["BEGIN".to_string(), lock.clone(), "COMMIT".to_string()]);
    }
}

#[test]
fn test_truncate_without_metadata_workers_sends_nothing() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();

    let stmt = UtilityStmt::Truncate(TruncateStmt {
        relations: vec![RangeVar::new("orders")],
        restart_identity: false,
        cascade: false,
    });
    session.execute(stmt, "TRUNCATE orders").unwrap();
    assert!(cluster.transport.all_commands().is_empty());
}

#[test]
fn test_drop_partitioned_table_detaches_on_metadata_workers() {
    let mut b = ClusterBuilder::new().workers(2).metadata_workers();
    let events = b.partitioned_hash_table("public", "events", "tenant_id", 2);
    b.hash_partition(events, "public", "events_2025");
    b.hash_partition(events, "public", "events_2026");
    let cluster = Cluster::new(b);
    let mut session = cluster.session();

    let outcome = session.execute(drop_table("events"), "DROP TABLE events").unwrap();
    assert_eq!(outcome.jobs, 0);

    for i in 1..=2 {
        let commands = cluster.transport.commands_for(&worker(i));
        assert_eq!(
            commands,
            vec![
                "BEGIN".to_string(),
                "SET citus.enable_ddl_propagation TO 'off'".to_string(),
                "ALTER TABLE IF EXISTS public.events DETACH PARTITION public.events_2025;".to_string(),
                "ALTER TABLE IF EXISTS public.events DETACH PARTITION public.events_2026;".to_string(),
                "COMMIT".to_string(),
            ]
        );
    }
    assert!(cluster.catalog.relation_id("public", "events").is_none());
    assert!(cluster.catalog.relation_id("public", "events_2025").is_none());
}

#[test]
fn test_drop_referenced_table_refreshes_fk_graph() {
    let cluster = Cluster::new(orders_cluster());
    let mut session = cluster.session();
    session
        .execute(
            add_foreign_key("orders", "fk1", "warehouse_id", "warehouses", "id"),
            "ALTER TABLE orders ADD CONSTRAINT fk1 FOREIGN KEY (warehouse_id) REFERENCES warehouses (id)",
        )
        .unwrap();
    let warehouses = cluster.rel("warehouses");
    let graph = cluster.processor.fk_graph();
    assert!(graph.is_referenced(cluster.catalog.as_ref(), warehouses));

    session.execute(drop_table("orders"), "DROP TABLE orders").unwrap();
    assert!(!graph.is_referenced(cluster.catalog.as_ref(), warehouses));
}
