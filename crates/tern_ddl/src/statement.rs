//! Structured utility statements handled by the DDL coordinator.
//!
//! Statements arrive already parsed. Each variant carries only the fields
//! relevant to its command kind, and every planner dispatches on
//! `UtilityStmt` with an exhaustive `match`.

use tern_common::metadata::FkAction;
use tern_common::types::RangeVar;

/// A parsed utility (DDL-class) statement.
#[derive(Debug, Clone, PartialEq)]
pub enum UtilityStmt {
    AlterTable(AlterTableStmt),
    Rename(RenameStmt),
    Grant(GrantStmt),
    Truncate(TruncateStmt),
    Vacuum(VacuumStmt),
    Drop(DropStmt),
    CreateIndex(IndexStmt),
    CreatePartitionOf(CreatePartitionOfStmt),
    AlterObjectSchema(AlterObjectSchemaStmt),
    AlterTableMoveAll(AlterTableMoveAllStmt),
    Cluster(ClusterStmt),
    CreateDatabase { name: String },
    CreateRole { name: String },
    /// Any statement the coordinator never propagates.
    Other { tag: String },
}

impl UtilityStmt {
    /// Command tag as reported to clients.
    pub fn tag(&self) -> &str {
        match self {
            UtilityStmt::AlterTable(s) => match s.object {
                AlterObjectKind::Table => "ALTER TABLE",
                AlterObjectKind::Index => "ALTER INDEX",
            },
            UtilityStmt::Rename(s) => match s.object {
                RenameObject::Index => "ALTER INDEX",
                RenameObject::Schema => "ALTER SCHEMA",
                _ => "ALTER TABLE",
            },
            UtilityStmt::Grant(s) => {
                if s.is_grant {
                    "GRANT"
                } else {
                    "REVOKE"
                }
            }
            UtilityStmt::Truncate(_) => "TRUNCATE TABLE",
            UtilityStmt::Vacuum(s) => {
                if s.options.vacuum {
                    "VACUUM"
                } else {
                    "ANALYZE"
                }
            }
            UtilityStmt::Drop(s) => match s.kind {
                DropKind::Table => "DROP TABLE",
                DropKind::Index => "DROP INDEX",
                DropKind::Schema => "DROP SCHEMA",
            },
            UtilityStmt::CreateIndex(_) => "CREATE INDEX",
            UtilityStmt::CreatePartitionOf(_) => "CREATE TABLE",
            UtilityStmt::AlterObjectSchema(_) => "ALTER TABLE",
            UtilityStmt::AlterTableMoveAll(_) => "ALTER TABLE",
            UtilityStmt::Cluster(_) => "CLUSTER",
            UtilityStmt::CreateDatabase { .. } => "CREATE DATABASE",
            UtilityStmt::CreateRole { .. } => "CREATE ROLE",
            UtilityStmt::Other { tag } => tag,
        }
    }
}

// ── ALTER TABLE / ALTER INDEX ────────────────────────────────────────

/// Which relation kind an ALTER statement was written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterObjectKind {
    Table,
    Index,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTableStmt {
    pub relation: RangeVar,
    pub object: AlterObjectKind,
    pub missing_ok: bool,
    pub cmds: Vec<AlterTableCmd>,
}

impl AlterTableStmt {
    pub fn table(relation: RangeVar, cmds: Vec<AlterTableCmd>) -> Self {
        Self {
            relation,
            object: AlterObjectKind::Table,
            missing_ok: false,
            cmds,
        }
    }

    pub fn index(relation: RangeVar, cmds: Vec<AlterTableCmd>) -> Self {
        Self {
            relation,
            object: AlterObjectKind::Index,
            missing_ok: false,
            cmds,
        }
    }
}

/// One sub-command of an ALTER TABLE.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableCmd {
    AddColumn(ColumnDef),
    DropColumn {
        name: String,
        missing_ok: bool,
        cascade: bool,
    },
    SetDefault {
        column: String,
        expr: String,
    },
    DropDefault {
        column: String,
    },
    AlterType {
        column: String,
        type_name: String,
        using: Option<String>,
    },
    SetNotNull {
        column: String,
    },
    DropNotNull {
        column: String,
    },
    SetStatistics {
        column: String,
        target: i32,
    },
    AddConstraint(Constraint),
    DropConstraint {
        name: String,
        missing_ok: bool,
        cascade: bool,
    },
    AttachPartition {
        partition: RangeVar,
        bound: String,
    },
    DetachPartition {
        partition: RangeVar,
    },
    EnableTriggerAll,
    DisableTriggerAll,
    ReplicaIdentity(ReplicaIdentity),
    SetOptions(Vec<RelOption>),
    ResetOptions(Vec<String>),
    ReplaceOptions(Vec<RelOption>),
    SetTablespace(String),
    OwnerTo(String),
    ClusterOn(String),
    EnableRowSecurity,
    DisableRowSecurity,
}

impl AlterTableCmd {
    /// Name of the column this sub-command changes, if any.
    pub fn target_column(&self) -> Option<&str> {
        match self {
            AlterTableCmd::DropColumn { name, .. } => Some(name),
            AlterTableCmd::SetDefault { column, .. }
            | AlterTableCmd::DropDefault { column }
            | AlterTableCmd::AlterType { column, .. }
            | AlterTableCmd::SetNotNull { column }
            | AlterTableCmd::DropNotNull { column }
            | AlterTableCmd::SetStatistics { column, .. } => Some(column),
            AlterTableCmd::AddColumn(def) => Some(&def.name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub type_name: String,
    pub constraints: Vec<Constraint>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// A table or column constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: Option<String>,
    pub kind: ConstraintKind,
    /// Written as NOT VALID by the user.
    pub not_valid: bool,
    /// Skip the initial validation scan when applying locally. Set by the
    /// coordinator for foreign keys; never rendered.
    pub skip_validation: bool,
}

impl Constraint {
    pub fn new(name: Option<&str>, kind: ConstraintKind) -> Self {
        Self {
            name: name.map(str::to_string),
            kind,
            not_valid: false,
            skip_validation: false,
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::ForeignKey(_))
    }

    /// Whether this constraint is backed by a unique or exclusion index.
    pub fn is_index_backed(&self) -> bool {
        matches!(
            self.kind,
            ConstraintKind::PrimaryKey { .. }
                | ConstraintKind::Unique { .. }
                | ConstraintKind::Exclusion { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    NotNull,
    Null,
    Default(String),
    /// Empty `columns` on a column constraint means "this column".
    PrimaryKey { columns: Vec<String> },
    Unique { columns: Vec<String> },
    Check { expr: String },
    Exclusion {
        access_method: String,
        elements: Vec<ExclusionElement>,
    },
    ForeignKey(ForeignKeySpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionElement {
    pub column: String,
    pub operator: String,
}

impl ExclusionElement {
    pub fn new(column: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
        }
    }

    pub fn is_equality(&self) -> bool {
        self.operator == "="
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeySpec {
    pub referenced: RangeVar,
    /// Empty on a column constraint.
    pub columns: Vec<String>,
    pub referenced_columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

impl ForeignKeySpec {
    pub fn new(referenced: RangeVar, columns: &[&str], referenced_columns: &[&str]) -> Self {
        Self {
            referenced,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaIdentity {
    Default,
    Full,
    Nothing,
    UsingIndex(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelOption {
    pub name: String,
    pub value: Option<String>,
}

impl RelOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

// ── RENAME ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameObject {
    Table,
    Column,
    TableConstraint,
    Index,
    Schema,
    /// Views, sequences, functions and other objects the coordinator ignores.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenameStmt {
    pub object: RenameObject,
    /// The table, index or (for schemas) the schema name in `name`.
    pub relation: RangeVar,
    /// Old column or constraint name.
    pub subname: Option<String>,
    pub new_name: String,
    pub missing_ok: bool,
}

// ── GRANT / REVOKE ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantObjectType {
    Table,
    Sequence,
    Function,
    Schema,
    Database,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GrantTarget {
    Objects(Vec<RangeVar>),
    AllInSchema(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privilege {
    pub name: String,
    pub columns: Vec<String>,
}

impl Privilege {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSpec {
    Name(String),
    CurrentUser,
    SessionUser,
    Public,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrantStmt {
    pub is_grant: bool,
    pub object_type: GrantObjectType,
    pub target: GrantTarget,
    /// Empty means ALL PRIVILEGES.
    pub privileges: Vec<Privilege>,
    pub grantees: Vec<RoleSpec>,
    pub grant_option: bool,
}

// ── TRUNCATE / VACUUM ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TruncateStmt {
    pub relations: Vec<RangeVar>,
    pub restart_identity: bool,
    pub cascade: bool,
}

/// Options of a VACUUM or ANALYZE statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumOptions {
    pub vacuum: bool,
    pub analyze: bool,
    pub verbose: bool,
    pub freeze: bool,
    pub full: bool,
    pub disable_page_skipping: bool,
}

impl VacuumOptions {
    pub fn vacuum() -> Self {
        Self {
            vacuum: true,
            ..Self::default()
        }
    }

    pub fn analyze() -> Self {
        Self {
            analyze: true,
            ..Self::default()
        }
    }

    pub fn command_name(&self) -> &'static str {
        if self.vacuum {
            "VACUUM"
        } else {
            "ANALYZE"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VacuumRelation {
    pub relation: RangeVar,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VacuumStmt {
    pub options: VacuumOptions,
    pub relations: Vec<VacuumRelation>,
}

// ── DROP / CREATE INDEX / partitions ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    Table,
    Index,
    Schema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropStmt {
    pub kind: DropKind,
    /// For schemas only `name` is used.
    pub objects: Vec<RangeVar>,
    pub missing_ok: bool,
    pub cascade: bool,
    pub concurrent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStmt {
    pub name: Option<String>,
    pub relation: RangeVar,
    pub access_method: Option<String>,
    /// Index key columns or parenthesized expressions, as written.
    pub params: Vec<String>,
    pub include: Vec<String>,
    pub unique: bool,
    pub concurrent: bool,
    pub if_not_exists: bool,
    pub tablespace: Option<String>,
    pub where_clause: Option<String>,
}

impl IndexStmt {
    pub fn new(name: &str, relation: RangeVar, params: &[&str]) -> Self {
        Self {
            name: Some(name.to_string()),
            relation,
            access_method: None,
            params: params.iter().map(|p| p.to_string()).collect(),
            include: Vec::new(),
            unique: false,
            concurrent: false,
            if_not_exists: false,
            tablespace: None,
            where_clause: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePartitionOfStmt {
    pub relation: RangeVar,
    pub parent: RangeVar,
    pub bound: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterObjectSchemaStmt {
    pub object: RenameObject,
    pub relation: RangeVar,
    pub new_schema: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTableMoveAllStmt {
    pub object: AlterObjectKind,
    pub orig_tablespace: String,
    pub new_tablespace: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStmt {
    pub relation: Option<RangeVar>,
    pub index: Option<String>,
}
