//! Schema-related data models.
//!
//! Descriptor records produced by the introspector. Field declaration order
//! is the serialized order, so responses compare byte-for-byte in tests.

use serde::{Deserialize, Serialize};

/// Kind of relation listed by `get_tables`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableKind {
    BaseTable,
    View,
}

impl TableKind {
    /// Map a `pg_class.relkind` code.
    pub fn from_relkind(relkind: &str) -> Option<Self> {
        match relkind {
            "r" | "p" => Some(Self::BaseTable),
            "v" | "m" => Some(Self::View),
            _ => None,
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BaseTable => write!(f, "BASE_TABLE"),
            Self::View => write!(f, "VIEW"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
    pub column_count: u32,
    /// In key order
    pub primary_key_columns: Vec<String>,
    /// Human-readable total relation size (data, indexes and TOAST)
    pub size: String,
    pub size_bytes: u64,
}

impl TableDescriptor {
    /// Get the fully qualified table name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Full declared type (e.g., `character varying(30)`, `numeric(10,2)`)
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub ordinal_position: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
}

impl ConstraintKind {
    /// Map a `pg_constraint.contype` code. Exclusion and trigger constraints are skipped.
    pub fn from_contype(contype: &str) -> Option<Self> {
        match contype {
            "p" => Some(Self::PrimaryKey),
            "f" => Some(Self::ForeignKey),
            "u" => Some(Self::Unique),
            "c" => Some(Self::Check),
            _ => None,
        }
    }
}

/// Target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintReference {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    /// Present for foreign keys only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<ConstraintReference>,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    /// Access method: btree, hash, gin, gist, brin, ...
    pub kind: String,
    /// Key columns in index order; expressions appear as their text
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

/// Result of `get_table_schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDetail {
    pub table_name: String,
    pub schema: String,
    pub columns: Vec<ColumnDescriptor>,
    pub constraints: Vec<ConstraintDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutineKind {
    Function,
    Procedure,
    Aggregate,
    Window,
}

impl RoutineKind {
    /// Map a `pg_proc.prokind` code.
    pub fn from_prokind(prokind: &str) -> Option<Self> {
        match prokind {
            "f" => Some(Self::Function),
            "p" => Some(Self::Procedure),
            "a" => Some(Self::Aggregate),
            "w" => Some(Self::Window),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineDescriptor {
    pub schema: String,
    pub name: String,
    /// One entry per argument, e.g. `customer_id integer`
    pub arguments: Vec<String>,
    /// Absent for procedures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    pub kind: RoutineKind,
    pub language: String,
    /// immutable, stable or volatile
    pub volatility: String,
    /// `CREATE OR REPLACE` text; absent for aggregates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

/// One table inside a schema summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    #[serde(flatten)]
    pub table: TableDescriptor,
    pub columns: Vec<ColumnDescriptor>,
    pub constraints: Vec<ConstraintDescriptor>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub table_count: usize,
    pub view_count: usize,
    pub routine_count: usize,
    pub column_count: usize,
}

/// Result of `get_database_schema_summary`. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub tables: Vec<TableSummary>,
    pub routines: Vec<RoutineDescriptor>,
    pub counts: SummaryCounts,
}

impl SchemaSummary {
    /// Assemble a summary and derive its counts.
    pub fn new(tables: Vec<TableSummary>, routines: Vec<RoutineDescriptor>) -> Self {
        let view_count = tables
            .iter()
            .filter(|t| t.table.kind == TableKind::View)
            .count();
        let counts = SummaryCounts {
            table_count: tables.len() - view_count,
            view_count,
            routine_count: routines.len(),
            column_count: tables.iter().map(|t| t.columns.len()).sum(),
        };
        Self {
            tables,
            routines,
            counts,
        }
    }
}
