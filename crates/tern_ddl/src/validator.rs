//! Reject command shapes that cannot be applied consistently to every shard.
//!
//! All checks here run before any worker is contacted. The constraint checks
//! in `validate_constraints` run after the local command, against the
//! indexes it created; a failure there aborts the local transaction.

use tern_common::error::DdlError;
use tern_common::metadata::{DistributedRelation, DistributionMethod, FkAction};
use tern_common::TernResult;

use crate::catalog::MetadataCatalog;
use crate::context::{CommandContext, Notice};
use crate::fk_validator::ForeignKeyValidator;
use crate::statement::*;

const SERIAL_TYPES: &[&str] = &[
    "smallserial",
    "serial2",
    "serial",
    "serial4",
    "bigserial",
    "serial8",
];

const ALTER_TABLE_SUPPORTED: &str = "Only ADD|DROP COLUMN, SET|DROP NOT NULL, SET|DROP DEFAULT, \
     ADD|DROP CONSTRAINT, SET (), RESET (), ATTACH|DETACH PARTITION and TYPE subcommands are supported.";

fn only_subcommand(cmds: &[AlterTableCmd], what: &str, hint: &str) -> TernResult<()> {
    if cmds.len() > 1 {
        return Err(DdlError::unsupported(format!(
            "cannot execute {} command with other subcommands",
            what
        ))
        .with_hint(hint)
        .into());
    }
    Ok(())
}

/// ALTER INDEX on an index of a distributed table.
pub fn validate_alter_index(stmt: &AlterTableStmt) -> TernResult<()> {
    for cmd in &stmt.cmds {
        match cmd {
            AlterTableCmd::SetOptions(_)
            | AlterTableCmd::ResetOptions(_)
            | AlterTableCmd::ReplaceOptions(_) => {}
            _ => {
                return Err(
                    DdlError::unsupported("alter index ... set tablespace ... is currently unsupported")
                        .with_detail("Only RENAME TO, SET (), and RESET () are supported.")
                        .into(),
                )
            }
        }
    }
    Ok(())
}

/// Sub-command allow-list and shape checks for ALTER TABLE on a
/// distributed table.
pub fn validate_alter_table(
    ctx: &mut CommandContext,
    catalog: &dyn MetadataCatalog,
    relation: &DistributedRelation,
    stmt: &AlterTableStmt,
) -> TernResult<()> {
    for cmd in &stmt.cmds {
        match cmd {
            AlterTableCmd::AddColumn(def) => {
                let type_name = def.type_name.to_ascii_lowercase();
                if SERIAL_TYPES.contains(&type_name.as_str()) {
                    return Err(DdlError::unsupported(
                        "cannot execute ADD COLUMN commands involving serial pseudotypes",
                    )
                    .into());
                }
                for constraint in &def.constraints {
                    check_inline_constraint_named(ctx, catalog, relation, def, constraint)?;
                    if constraint.is_foreign_key() {
                        ctx.mark_fk_graph_dirty();
                    }
                }
            }
            AlterTableCmd::DropColumn { .. }
            | AlterTableCmd::SetDefault { .. }
            | AlterTableCmd::DropDefault { .. }
            | AlterTableCmd::AlterType { .. }
            | AlterTableCmd::DropNotNull { .. } => {
                if cmd
                    .target_column()
                    .is_some_and(|c| relation.is_distribution_column(c))
                {
                    return Err(DdlError::unsupported(
                        "cannot execute ALTER TABLE command involving partition column",
                    )
                    .into());
                }
            }
            AlterTableCmd::AddConstraint(constraint) => {
                only_subcommand(&stmt.cmds, "ADD CONSTRAINT", "You can issue each subcommand separately")?;
                if constraint.name.is_none() {
                    return Err(DdlError::unsupported(
                        "cannot create constraint without a name on a distributed table",
                    )
                    .into());
                }
                if constraint.is_foreign_key() {
                    ctx.mark_fk_graph_dirty();
                }
            }
            AlterTableCmd::AttachPartition { partition, .. } => {
                only_subcommand(&stmt.cmds, "ATTACH PARTITION", "You can issue each subcommand separately.")?;
                let attached = catalog
                    .resolve_relation(partition, &ctx.session.search_path)
                    .and_then(|id| catalog.distributed_relation(id));
                if let Some(attached) = attached {
                    if attached.colocation_id != relation.colocation_id {
                        return Err(DdlError::unsupported(
                            "distributed tables cannot have non-colocated distributed tables as a partition ",
                        )
                        .into());
                    }
                }
            }
            AlterTableCmd::DetachPartition { .. } => {
                only_subcommand(&stmt.cmds, "DETACH PARTITION", "You can issue each subcommand separately.")?;
            }
            AlterTableCmd::DropConstraint { name, .. } => {
                if catalog
                    .foreign_keys_of(relation.id)
                    .iter()
                    .any(|fk| &fk.name == name)
                {
                    ctx.mark_fk_graph_dirty();
                }
            }
            AlterTableCmd::SetNotNull { .. }
            | AlterTableCmd::EnableTriggerAll
            | AlterTableCmd::DisableTriggerAll
            | AlterTableCmd::ReplicaIdentity(_)
            | AlterTableCmd::SetOptions(_)
            | AlterTableCmd::ResetOptions(_)
            | AlterTableCmd::ReplaceOptions(_) => {}
            AlterTableCmd::SetStatistics { .. }
            | AlterTableCmd::SetTablespace(_)
            | AlterTableCmd::OwnerTo(_)
            | AlterTableCmd::ClusterOn(_)
            | AlterTableCmd::EnableRowSecurity
            | AlterTableCmd::DisableRowSecurity => {
                return Err(DdlError::unsupported("alter table command is currently unsupported")
                    .with_detail(ALTER_TABLE_SUPPORTED)
                    .into());
            }
        }
    }
    Ok(())
}

/// ADD COLUMN may not carry an unnamed constraint that needs a name on
/// every shard.
fn check_inline_constraint_named(
    ctx: &CommandContext,
    catalog: &dyn MetadataCatalog,
    relation: &DistributedRelation,
    def: &ColumnDef,
    constraint: &Constraint,
) -> TernResult<()> {
    if constraint.name.is_some() {
        return Ok(());
    }
    let table = &relation.name.name;
    let column = &def.name;
    let mut hint = format!(
        "You can issue each command separately such as ALTER TABLE {} ADD COLUMN {} data_type; \
         ALTER TABLE {} ADD CONSTRAINT constraint_name ",
        table, column, table
    );
    match &constraint.kind {
        ConstraintKind::Unique { .. } => hint.push_str(&format!("UNIQUE ({})", column)),
        ConstraintKind::PrimaryKey { .. } => hint.push_str(&format!("PRIMARY KEY ({})", column)),
        ConstraintKind::Check { .. } => hint.push_str("CHECK (check_expression)"),
        ConstraintKind::ForeignKey(spec) => {
            let referenced_column = spec.referenced_columns.first().cloned().unwrap_or_default();
            let referenced = catalog
                .resolve_relation(&spec.referenced, &ctx.session.search_path)
                .and_then(|id| catalog.relation_name(id))
                .map(|n| n.name)
                .unwrap_or_else(|| spec.referenced.name.clone());
            hint.push_str(&format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                column, referenced, referenced_column
            ));
            for (action, clause) in [(spec.on_delete, "ON DELETE"), (spec.on_update, "ON UPDATE")] {
                if action != FkAction::NoAction {
                    hint.push_str(&format!(" {} {}", clause, action.as_sql()));
                }
            }
        }
        ConstraintKind::NotNull | ConstraintKind::Null | ConstraintKind::Default(_) => {
            return Ok(());
        }
        ConstraintKind::Exclusion { .. } => return Ok(()),
    }
    hint.push(';');
    Err(DdlError::unsupported(
        "cannot execute ADD COLUMN command with PRIMARY KEY, UNIQUE, FOREIGN and CHECK constraints",
    )
    .with_detail(
        "Adding a column with a constraint in one command is not supported because \
         all constraints on distributed tables must have explicit names",
    )
    .with_hint(hint)
    .into())
}

/// Checks run against the relation's indexes and foreign keys once the
/// local command has created them.
pub fn validate_constraints(
    ctx: &mut CommandContext,
    catalog: &dyn MetadataCatalog,
    fk_validator: &dyn ForeignKeyValidator,
    relation: &DistributedRelation,
) -> TernResult<()> {
    fk_validator.validate(catalog, relation)?;

    // Single shard: the engine enforces uniqueness itself.
    if relation.is_reference() {
        return Ok(());
    }

    let table = &relation.name.name;
    for index in catalog.indexes(relation.id) {
        if !index.unique && !index.is_exclusion() {
            continue;
        }
        if relation.method == DistributionMethod::Append {
            ctx.report(
                Notice::warning(format!("table \"{}\" has a UNIQUE or EXCLUDE constraint", table))
                    .with_detail(
                        "UNIQUE constraints, EXCLUDE constraints, and PRIMARY KEYs on \
                         append-partitioned tables cannot be enforced.",
                    )
                    .with_hint("Consider using hash partitioning."),
            );
        }

        let has_distribution_column = index.columns.iter().enumerate().any(|(i, column)| {
            if !relation.is_distribution_column(column) {
                return false;
            }
            let exclusion_equality = index
                .exclusion_equality
                .as_ref()
                .and_then(|flags| flags.get(i).copied())
                .unwrap_or(false);
            index.unique || exclusion_equality
        });
        if !has_distribution_column {
            return Err(DdlError::unsupported(format!("cannot create constraint on \"{}\"", table))
                .with_detail(
                    "Distributed relations cannot have UNIQUE, EXCLUDE, or PRIMARY KEY constraints \
                     that do not include the partition column (with an equality operator if EXCLUDE).",
                )
                .into());
        }
    }
    Ok(())
}

pub fn validate_rename(stmt: &RenameStmt) -> TernResult<()> {
    if stmt.object == RenameObject::TableConstraint {
        return Err(DdlError::unsupported(
            "renaming constraints belonging to distributed tables is currently unsupported",
        )
        .into());
    }
    Ok(())
}

/// CREATE INDEX on a distributed table.
pub fn validate_index(relation: &DistributedRelation, stmt: &IndexStmt) -> TernResult<()> {
    if stmt.name.is_none() {
        return Err(DdlError::unsupported(
            "creating index without a name on a distributed table is currently unsupported",
        )
        .into());
    }
    if stmt.tablespace.is_some() {
        return Err(DdlError::unsupported(
            "specifying tablespaces with CREATE INDEX statements is currently unsupported",
        )
        .into());
    }
    if stmt.unique {
        if relation.method == DistributionMethod::Append {
            return Err(DdlError::unsupported(
                "creating unique indexes on append-partitioned tables is currently unsupported",
            )
            .into());
        }
        let covers = stmt.params.iter().any(|p| relation.is_distribution_column(p));
        if !relation.is_reference() && !covers {
            return Err(DdlError::unsupported(
                "creating unique indexes on non-partition columns is currently unsupported",
            )
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionState;
    use crate::fk_validator::DefaultForeignKeyValidator;
    use crate::in_memory::ClusterBuilder;
    use tern_common::config::DdlConfig;
    use tern_common::types::RangeVar;
    use tern_common::TernError;

    fn ctx() -> CommandContext {
        CommandContext::new(&DdlConfig::default(), SessionState::default(), false)
    }

    fn orders() -> (crate::in_memory::InMemoryCatalog, DistributedRelation) {
        let mut b = ClusterBuilder::new().workers(2);
        let id = b.hash_table("public", "orders", "customer_id", 4);
        let catalog = b.build();
        let rel = catalog.distributed_relation(id).unwrap();
        (catalog, rel)
    }

    fn alter(cmds: Vec<AlterTableCmd>) -> AlterTableStmt {
        AlterTableStmt::table(RangeVar::new("orders"), cmds)
    }

    fn pkey(name: Option<&str>, columns: &[&str]) -> AlterTableCmd {
        AlterTableCmd::AddConstraint(Constraint::new(
            name,
            ConstraintKind::PrimaryKey {
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        ))
    }

    fn message(err: TernError) -> String {
        err.to_string()
    }

    #[test]
    fn test_add_constraint_with_other_subcommands() {
        let (catalog, rel) = orders();
        let stmt = alter(vec![
            pkey(Some("orders_pkey"), &["customer_id", "id"]),
            AlterTableCmd::SetNotNull { column: "id".into() },
        ]);
        let err = validate_alter_table(&mut ctx(), &catalog, &rel, &stmt).unwrap_err();
        assert_eq!(message(err), "cannot execute ADD CONSTRAINT command with other subcommands");
    }

    #[test]
    fn test_add_constraint_alone_accepted() {
        let (catalog, rel) = orders();
        let stmt = alter(vec![pkey(Some("orders_pkey"), &["customer_id", "id"])]);
        validate_alter_table(&mut ctx(), &catalog, &rel, &stmt).unwrap();
    }

    #[test]
    fn test_unnamed_constraint_rejected() {
        let (catalog, rel) = orders();
        let stmt = alter(vec![pkey(None, &["customer_id"])]);
        let err = validate_alter_table(&mut ctx(), &catalog, &rel, &stmt).unwrap_err();
        assert!(message(err).contains("without a name"));
    }

    #[test]
    fn test_distribution_column_changes_rejected() {
        let (catalog, rel) = orders();
        let cmds = vec![
            AlterTableCmd::DropColumn {
                name: "customer_id".into(),
                missing_ok: false,
                cascade: false,
            },
            AlterTableCmd::AlterType {
                column: "customer_id".into(),
                type_name: "bigint".into(),
                using: None,
            },
            AlterTableCmd::SetDefault {
                column: "customer_id".into(),
                expr: "0".into(),
            },
            AlterTableCmd::DropNotNull {
                column: "customer_id".into(),
            },
        ];
        for cmd in cmds {
            let err = validate_alter_table(&mut ctx(), &catalog, &rel, &alter(vec![cmd])).unwrap_err();
            assert!(message(err).contains("involving partition column"));
        }
    }

    #[test]
    fn test_reference_without_distribution_column_exempt() {
        let mut b = ClusterBuilder::new().workers(2);
        let id = b.reference_table("public", "countries");
        let catalog = b.build();
        let rel = catalog.distributed_relation(id).unwrap();
        let stmt = alter(vec![AlterTableCmd::DropColumn {
            name: "customer_id".into(),
            missing_ok: false,
            cascade: false,
        }]);
        validate_alter_table(&mut ctx(), &catalog, &rel, &stmt).unwrap();
    }

    #[test]
    fn test_serial_column_rejected() {
        let (catalog, rel) = orders();
        let stmt = alter(vec![AlterTableCmd::AddColumn(ColumnDef::new("seq", "bigserial"))]);
        let err = validate_alter_table(&mut ctx(), &catalog, &rel, &stmt).unwrap_err();
        assert!(message(err).contains("serial pseudotypes"));
    }

    #[test]
    fn test_add_column_unnamed_unique_hint() {
        let (catalog, rel) = orders();
        let def = ColumnDef::new("code", "text").with_constraint(Constraint::new(
            None,
            ConstraintKind::Unique { columns: vec![] },
        ));
        let stmt = alter(vec![AlterTableCmd::AddColumn(def)]);
        let err = validate_alter_table(&mut ctx(), &catalog, &rel, &stmt).unwrap_err();
        assert_eq!(
            err.hint().unwrap(),
            "You can issue each command separately such as ALTER TABLE orders ADD COLUMN code data_type; \
             ALTER TABLE orders ADD CONSTRAINT constraint_name UNIQUE (code);"
        );
    }

    #[test]
    fn test_unsupported_subcommand() {
        let (catalog, rel) = orders();
        let stmt = alter(vec![AlterTableCmd::OwnerTo("alice".into())]);
        let err = validate_alter_table(&mut ctx(), &catalog, &rel, &stmt).unwrap_err();
        assert_eq!(message(err), "alter table command is currently unsupported");
    }

    #[test]
    fn test_drop_foreign_key_marks_graph_dirty() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let warehouses = b.reference_table("public", "warehouses");
        let catalog = b.build();
        catalog.add_foreign_key(tern_common::metadata::ForeignKeyMeta {
            name: "orders_wh_fk".into(),
            referencing: orders,
            referenced: warehouses,
            referencing_columns: vec!["warehouse_id".into()],
            referenced_columns: vec!["id".into()],
            on_delete: Default::default(),
            on_update: Default::default(),
        });
        let rel = catalog.distributed_relation(orders).unwrap();
        let mut ctx = ctx();
        let stmt = alter(vec![AlterTableCmd::DropConstraint {
            name: "orders_wh_fk".into(),
            missing_ok: false,
            cascade: false,
        }]);
        validate_alter_table(&mut ctx, &catalog, &rel, &stmt).unwrap();
        assert!(ctx.fk_invalidation.is_dirty());
    }

    #[test]
    fn test_add_column_references_marks_graph_dirty() {
        let (catalog, rel) = orders();
        let fk = Constraint::new(
            Some("orders_wh_fk"),
            ConstraintKind::ForeignKey(ForeignKeySpec::new(RangeVar::new("warehouses"), &[], &["id"])),
        );
        let stmt = alter(vec![AlterTableCmd::AddColumn(
            ColumnDef::new("warehouse_id", "int").with_constraint(fk),
        )]);
        let mut with_fk = ctx();
        validate_alter_table(&mut with_fk, &catalog, &rel, &stmt).unwrap();
        assert!(with_fk.fk_invalidation.is_dirty());

        let mut without_fk = ctx();
        let plain = alter(vec![AlterTableCmd::AddColumn(ColumnDef::new("note", "text"))]);
        validate_alter_table(&mut without_fk, &catalog, &rel, &plain).unwrap();
        assert!(!without_fk.fk_invalidation.is_dirty());
    }

    #[test]
    fn test_unique_index_must_include_distribution_column() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        b.index(orders, "orders_id_key", &["id"], true);
        let catalog = b.build();
        let rel = catalog.distributed_relation(orders).unwrap();
        let err = validate_constraints(&mut ctx(), &catalog, &DefaultForeignKeyValidator, &rel).unwrap_err();
        assert_eq!(err.to_string(), "cannot create constraint on \"orders\"");
    }

    #[test]
    fn test_exclusion_needs_equality_on_distribution_column() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let catalog = b.build();
        let rel = catalog.distributed_relation(orders).unwrap();

        catalog.add_exclusion_index(orders, "orders_excl", &[("customer_id", true), ("during", false)]);
        validate_constraints(&mut ctx(), &catalog, &DefaultForeignKeyValidator, &rel).unwrap();

        catalog.add_exclusion_index(orders, "orders_excl2", &[("customer_id", false)]);
        assert!(validate_constraints(&mut ctx(), &catalog, &DefaultForeignKeyValidator, &rel).is_err());
    }

    #[test]
    fn test_append_unique_is_warning() {
        let mut b = ClusterBuilder::new().workers(2);
        let events = b.append_table("public", "events", "ts", 2);
        b.index(events, "events_ts_key", &["ts"], true);
        let catalog = b.build();
        let rel = catalog.distributed_relation(events).unwrap();
        let mut ctx = ctx();
        validate_constraints(&mut ctx, &catalog, &DefaultForeignKeyValidator, &rel).unwrap();
        assert_eq!(ctx.warnings().count(), 1);
    }

    #[test]
    fn test_index_checks() {
        let (_, rel) = orders();
        let mut stmt = IndexStmt::new("orders_id_idx", RangeVar::new("orders"), &["id"]);
        validate_index(&rel, &stmt).unwrap();
        stmt.unique = true;
        assert!(validate_index(&rel, &stmt).is_err());
        stmt.params.push("customer_id".into());
        validate_index(&rel, &stmt).unwrap();
        stmt.name = None;
        assert!(validate_index(&rel, &stmt).is_err());
    }

    #[test]
    fn test_rename_constraint_rejected() {
        let stmt = RenameStmt {
            object: RenameObject::TableConstraint,
            relation: RangeVar::new("orders"),
            subname: Some("orders_pkey".into()),
            new_name: "orders_pk".into(),
            missing_ok: false,
        };
        assert!(validate_rename(&stmt).is_err());
    }
}
