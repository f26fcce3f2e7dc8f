//! Render structured statements back to SQL text.

use tern_common::metadata::FkAction;
use tern_common::types::RangeVar;

use crate::render::quote_identifier;
use crate::statement::*;

pub fn range_var_sql(rv: &RangeVar) -> String {
    match &rv.schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&rv.name)),
        None => quote_identifier(&rv.name),
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a whole statement. Statements the coordinator never inspects
/// render as their command tag.
pub fn deparse(stmt: &UtilityStmt) -> String {
    match stmt {
        UtilityStmt::AlterTable(s) => deparse_alter_table(s),
        UtilityStmt::Rename(s) => deparse_rename(s),
        UtilityStmt::Grant(s) => deparse_grant(s),
        UtilityStmt::Truncate(s) => {
            let rels: Vec<String> = s.relations.iter().map(range_var_sql).collect();
            let mut sql = format!("TRUNCATE TABLE {}", rels.join(", "));
            if s.restart_identity {
                sql.push_str(" RESTART IDENTITY");
            }
            if s.cascade {
                sql.push_str(" CASCADE");
            }
            sql
        }
        UtilityStmt::Vacuum(s) => deparse_vacuum(s),
        UtilityStmt::Drop(s) => deparse_drop(s),
        UtilityStmt::CreateIndex(s) => deparse_index(s),
        UtilityStmt::CreatePartitionOf(s) => format!(
            "CREATE TABLE {} PARTITION OF {} {}",
            range_var_sql(&s.relation),
            range_var_sql(&s.parent),
            s.bound
        ),
        UtilityStmt::AlterObjectSchema(s) => {
            let keyword = match s.object {
                RenameObject::Index => "INDEX",
                _ => "TABLE",
            };
            format!(
                "ALTER {} {} SET SCHEMA {}",
                keyword,
                range_var_sql(&s.relation),
                quote_identifier(&s.new_schema)
            )
        }
        UtilityStmt::AlterTableMoveAll(s) => {
            let keyword = match s.object {
                AlterObjectKind::Table => "TABLE",
                AlterObjectKind::Index => "INDEX",
            };
            format!(
                "ALTER {} ALL IN TABLESPACE {} SET TABLESPACE {}",
                keyword,
                quote_identifier(&s.orig_tablespace),
                quote_identifier(&s.new_tablespace)
            )
        }
        UtilityStmt::Cluster(s) => {
            let mut sql = "CLUSTER".to_string();
            if let Some(rel) = &s.relation {
                sql.push(' ');
                sql.push_str(&range_var_sql(rel));
            }
            if let Some(index) = &s.index {
                sql.push_str(" USING ");
                sql.push_str(&quote_identifier(index));
            }
            sql
        }
        UtilityStmt::CreateDatabase { name } => format!("CREATE DATABASE {}", quote_identifier(name)),
        UtilityStmt::CreateRole { name } => format!("CREATE ROLE {}", quote_identifier(name)),
        UtilityStmt::Other { tag } => tag.clone(),
    }
}

// ── ALTER TABLE ──────────────────────────────────────────────────────

fn deparse_alter_table(s: &AlterTableStmt) -> String {
    let keyword = match s.object {
        AlterObjectKind::Table => "TABLE",
        AlterObjectKind::Index => "INDEX",
    };
    let if_exists = if s.missing_ok { "IF EXISTS " } else { "" };
    let cmds: Vec<String> = s.cmds.iter().map(deparse_alter_cmd).collect();
    format!(
        "ALTER {} {}{} {}",
        keyword,
        if_exists,
        range_var_sql(&s.relation),
        cmds.join(", ")
    )
}

pub fn deparse_alter_cmd(cmd: &AlterTableCmd) -> String {
    match cmd {
        AlterTableCmd::AddColumn(def) => format!("ADD COLUMN {}", deparse_column_def(def)),
        AlterTableCmd::DropColumn {
            name,
            missing_ok,
            cascade,
        } => format!(
            "DROP COLUMN {}{}{}",
            if *missing_ok { "IF EXISTS " } else { "" },
            quote_identifier(name),
            if *cascade { " CASCADE" } else { "" }
        ),
        AlterTableCmd::SetDefault { column, expr } => {
            format!("ALTER COLUMN {} SET DEFAULT {}", quote_identifier(column), expr)
        }
        AlterTableCmd::DropDefault { column } => {
            format!("ALTER COLUMN {} DROP DEFAULT", quote_identifier(column))
        }
        AlterTableCmd::AlterType {
            column,
            type_name,
            using,
        } => {
            let mut sql = format!("ALTER COLUMN {} TYPE {}", quote_identifier(column), type_name);
            if let Some(using) = using {
                sql.push_str(" USING ");
                sql.push_str(using);
            }
            sql
        }
        AlterTableCmd::SetNotNull { column } => {
            format!("ALTER COLUMN {} SET NOT NULL", quote_identifier(column))
        }
        AlterTableCmd::DropNotNull { column } => {
            format!("ALTER COLUMN {} DROP NOT NULL", quote_identifier(column))
        }
        AlterTableCmd::SetStatistics { column, target } => {
            format!("ALTER COLUMN {} SET STATISTICS {}", quote_identifier(column), target)
        }
        AlterTableCmd::AddConstraint(constraint) => {
            format!("ADD {}", deparse_table_constraint(constraint))
        }
        AlterTableCmd::DropConstraint {
            name,
            missing_ok,
            cascade,
        } => format!(
            "DROP CONSTRAINT {}{}{}",
            if *missing_ok { "IF EXISTS " } else { "" },
            quote_identifier(name),
            if *cascade { " CASCADE" } else { "" }
        ),
        AlterTableCmd::AttachPartition { partition, bound } => {
            format!("ATTACH PARTITION {} {}", range_var_sql(partition), bound)
        }
        AlterTableCmd::DetachPartition { partition } => {
            format!("DETACH PARTITION {}", range_var_sql(partition))
        }
        AlterTableCmd::EnableTriggerAll => "ENABLE TRIGGER ALL".to_string(),
        AlterTableCmd::DisableTriggerAll => "DISABLE TRIGGER ALL".to_string(),
        AlterTableCmd::ReplicaIdentity(identity) => match identity {
            ReplicaIdentity::Default => "REPLICA IDENTITY DEFAULT".to_string(),
            ReplicaIdentity::Full => "REPLICA IDENTITY FULL".to_string(),
            ReplicaIdentity::Nothing => "REPLICA IDENTITY NOTHING".to_string(),
            ReplicaIdentity::UsingIndex(index) => {
                format!("REPLICA IDENTITY USING INDEX {}", quote_identifier(index))
            }
        },
        AlterTableCmd::SetOptions(options) | AlterTableCmd::ReplaceOptions(options) => {
            let rendered: Vec<String> = options
                .iter()
                .map(|o| match &o.value {
                    Some(v) => format!("{} = {}", o.name, v),
                    None => o.name.clone(),
                })
                .collect();
            format!("SET ({})", rendered.join(", "))
        }
        AlterTableCmd::ResetOptions(names) => format!("RESET ({})", names.join(", ")),
        AlterTableCmd::SetTablespace(ts) => format!("SET TABLESPACE {}", quote_identifier(ts)),
        AlterTableCmd::OwnerTo(role) => format!("OWNER TO {}", quote_identifier(role)),
        AlterTableCmd::ClusterOn(index) => format!("CLUSTER ON {}", quote_identifier(index)),
        AlterTableCmd::EnableRowSecurity => "ENABLE ROW LEVEL SECURITY".to_string(),
        AlterTableCmd::DisableRowSecurity => "DISABLE ROW LEVEL SECURITY".to_string(),
    }
}

pub fn deparse_column_def(def: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote_identifier(&def.name), def.type_name);
    for constraint in &def.constraints {
        sql.push(' ');
        sql.push_str(&deparse_column_constraint(constraint));
    }
    sql
}

fn constraint_name_prefix(constraint: &Constraint) -> String {
    match &constraint.name {
        Some(name) => format!("CONSTRAINT {} ", quote_identifier(name)),
        None => String::new(),
    }
}

fn fk_actions(spec: &ForeignKeySpec) -> String {
    let mut sql = String::new();
    if spec.on_delete != FkAction::NoAction {
        sql.push_str(" ON DELETE ");
        sql.push_str(spec.on_delete.as_sql());
    }
    if spec.on_update != FkAction::NoAction {
        sql.push_str(" ON UPDATE ");
        sql.push_str(spec.on_update.as_sql());
    }
    sql
}

fn references_clause(spec: &ForeignKeySpec) -> String {
    let mut sql = format!("REFERENCES {}", range_var_sql(&spec.referenced));
    if !spec.referenced_columns.is_empty() {
        sql.push_str(&format!(" ({})", column_list(&spec.referenced_columns)));
    }
    sql.push_str(&fk_actions(spec));
    sql
}

fn deparse_column_constraint(constraint: &Constraint) -> String {
    let body = match &constraint.kind {
        ConstraintKind::NotNull => "NOT NULL".to_string(),
        ConstraintKind::Null => "NULL".to_string(),
        ConstraintKind::Default(expr) => format!("DEFAULT {}", expr),
        ConstraintKind::PrimaryKey { .. } => "PRIMARY KEY".to_string(),
        ConstraintKind::Unique { .. } => "UNIQUE".to_string(),
        ConstraintKind::Check { expr } => format!("CHECK ({})", expr),
        ConstraintKind::Exclusion { .. } => deparse_table_constraint_body(constraint),
        ConstraintKind::ForeignKey(spec) => references_clause(spec),
    };
    format!("{}{}", constraint_name_prefix(constraint), body)
}

fn deparse_table_constraint_body(constraint: &Constraint) -> String {
    match &constraint.kind {
        ConstraintKind::NotNull => "NOT NULL".to_string(),
        ConstraintKind::Null => "NULL".to_string(),
        ConstraintKind::Default(expr) => format!("DEFAULT {}", expr),
        ConstraintKind::PrimaryKey { columns } => format!("PRIMARY KEY ({})", column_list(columns)),
        ConstraintKind::Unique { columns } => format!("UNIQUE ({})", column_list(columns)),
        ConstraintKind::Check { expr } => format!("CHECK ({})", expr),
        ConstraintKind::Exclusion {
            access_method,
            elements,
        } => {
            let elems: Vec<String> = elements
                .iter()
                .map(|e| format!("{} WITH {}", quote_identifier(&e.column), e.operator))
                .collect();
            format!("EXCLUDE USING {} ({})", access_method, elems.join(", "))
        }
        ConstraintKind::ForeignKey(spec) => format!(
            "FOREIGN KEY ({}) {}",
            column_list(&spec.columns),
            references_clause(spec)
        ),
    }
}

pub fn deparse_table_constraint(constraint: &Constraint) -> String {
    let mut sql = format!(
        "{}{}",
        constraint_name_prefix(constraint),
        deparse_table_constraint_body(constraint)
    );
    if constraint.not_valid {
        sql.push_str(" NOT VALID");
    }
    sql
}

// ── RENAME ───────────────────────────────────────────────────────────

fn deparse_rename(s: &RenameStmt) -> String {
    let if_exists = if s.missing_ok { "IF EXISTS " } else { "" };
    let subname = s.subname.as_deref().map(quote_identifier).unwrap_or_default();
    let target = range_var_sql(&s.relation);
    let new_name = quote_identifier(&s.new_name);
    match s.object {
        RenameObject::Table => format!("ALTER TABLE {}{} RENAME TO {}", if_exists, target, new_name),
        RenameObject::Column => format!(
            "ALTER TABLE {}{} RENAME COLUMN {} TO {}",
            if_exists, target, subname, new_name
        ),
        RenameObject::TableConstraint => format!(
            "ALTER TABLE {}{} RENAME CONSTRAINT {} TO {}",
            if_exists, target, subname, new_name
        ),
        RenameObject::Index => format!("ALTER INDEX {}{} RENAME TO {}", if_exists, target, new_name),
        RenameObject::Schema => format!(
            "ALTER SCHEMA {} RENAME TO {}",
            quote_identifier(&s.relation.name),
            new_name
        ),
        RenameObject::Other => format!("ALTER {} RENAME TO {}", target, new_name),
    }
}

// ── GRANT / REVOKE ───────────────────────────────────────────────────

/// Comma-separated privilege list, `ALL` when empty.
pub fn privileges_sql(privileges: &[Privilege]) -> String {
    if privileges.is_empty() {
        return "ALL".to_string();
    }
    privileges
        .iter()
        .map(|p| p.name.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One GRANT or REVOKE against a single, already rendered target.
pub fn grant_sql(
    is_grant: bool,
    privileges: &str,
    target: &str,
    grantees: &str,
    grant_option: bool,
) -> String {
    if is_grant {
        format!(
            "GRANT {} ON {} TO {}{}",
            privileges,
            target,
            grantees,
            if grant_option { " WITH GRANT OPTION" } else { "" }
        )
    } else {
        format!(
            "REVOKE {}{} ON {} FROM {}",
            if grant_option { "GRANT OPTION FOR " } else { "" },
            privileges,
            target,
            grantees
        )
    }
}

pub fn role_spec_sql(role: &RoleSpec) -> String {
    match role {
        RoleSpec::Name(name) => quote_identifier(name),
        RoleSpec::CurrentUser => "CURRENT_USER".to_string(),
        RoleSpec::SessionUser => "SESSION_USER".to_string(),
        RoleSpec::Public => "PUBLIC".to_string(),
    }
}

fn deparse_grant(s: &GrantStmt) -> String {
    let keyword = match s.object_type {
        GrantObjectType::Table => "TABLE",
        GrantObjectType::Sequence => "SEQUENCE",
        GrantObjectType::Function => "FUNCTION",
        GrantObjectType::Schema => "SCHEMA",
        GrantObjectType::Database => "DATABASE",
    };
    let target = match &s.target {
        GrantTarget::Objects(objects) => {
            let names: Vec<String> = objects.iter().map(range_var_sql).collect();
            format!("{} {}", keyword, names.join(", "))
        }
        GrantTarget::AllInSchema(schemas) => {
            let names: Vec<String> = schemas.iter().map(|s| quote_identifier(s)).collect();
            format!("ALL {}S IN SCHEMA {}", keyword, names.join(", "))
        }
    };
    let grantees: Vec<String> = s.grantees.iter().map(role_spec_sql).collect();
    grant_sql(
        s.is_grant,
        &privileges_sql(&s.privileges),
        &target,
        &grantees.join(", "),
        s.grant_option,
    )
}

// ── VACUUM / DROP / CREATE INDEX ─────────────────────────────────────

fn deparse_vacuum(s: &VacuumStmt) -> String {
    let o = &s.options;
    let mut opts = Vec::new();
    if o.vacuum && o.analyze {
        opts.push("ANALYZE");
    }
    if o.disable_page_skipping {
        opts.push("DISABLE_PAGE_SKIPPING");
    }
    if o.freeze {
        opts.push("FREEZE");
    }
    if o.full {
        opts.push("FULL");
    }
    if o.verbose {
        opts.push("VERBOSE");
    }
    let mut sql = o.command_name().to_string();
    if !opts.is_empty() {
        sql.push_str(&format!(" ({})", opts.join(", ")));
    }
    let rels: Vec<String> = s
        .relations
        .iter()
        .map(|r| {
            if r.columns.is_empty() {
                range_var_sql(&r.relation)
            } else {
                format!("{} ({})", range_var_sql(&r.relation), column_list(&r.columns))
            }
        })
        .collect();
    if !rels.is_empty() {
        sql.push(' ');
        sql.push_str(&rels.join(", "));
    }
    sql
}

fn deparse_drop(s: &DropStmt) -> String {
    let keyword = match s.kind {
        DropKind::Table => "TABLE",
        DropKind::Index => "INDEX",
        DropKind::Schema => "SCHEMA",
    };
    let names: Vec<String> = s
        .objects
        .iter()
        .map(|o| match s.kind {
            DropKind::Schema => quote_identifier(&o.name),
            _ => range_var_sql(o),
        })
        .collect();
    format!(
        "DROP {} {}{}{}{}",
        keyword,
        if s.concurrent { "CONCURRENTLY " } else { "" },
        if s.missing_ok { "IF EXISTS " } else { "" },
        names.join(", "),
        if s.cascade { " CASCADE" } else { "" }
    )
}

fn deparse_index(s: &IndexStmt) -> String {
    let mut sql = format!(
        "CREATE {}INDEX {}{}",
        if s.unique { "UNIQUE " } else { "" },
        if s.concurrent { "CONCURRENTLY " } else { "" },
        if s.if_not_exists { "IF NOT EXISTS " } else { "" }
    );
    if let Some(name) = &s.name {
        sql.push_str(&quote_identifier(name));
        sql.push(' ');
    }
    sql.push_str("ON ");
    sql.push_str(&range_var_sql(&s.relation));
    if let Some(am) = &s.access_method {
        sql.push_str(" USING ");
        sql.push_str(am);
    }
    sql.push_str(&format!(" ({})", s.params.join(", ")));
    if !s.include.is_empty() {
        sql.push_str(&format!(" INCLUDE ({})", column_list(&s.include)));
    }
    if let Some(ts) = &s.tablespace {
        sql.push_str(" TABLESPACE ");
        sql.push_str(&quote_identifier(ts));
    }
    if let Some(predicate) = &s.where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }
    sql
}
