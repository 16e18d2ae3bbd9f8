//! Server object models.
//!
//! Immutable descriptions of the tables, views, variables and functions that
//! exist on a server, plus the canned queries the console offers for each.

use serde::{Deserialize, Serialize};

/// Type code of a table.
pub const TABLE_TYPE_CODE: i16 = 98;

/// Type code of a dictionary.
pub const DICT_TYPE_CODE: i16 = 99;

/// First type code of the function family (lambdas).
const FUNCTION_TYPE_MIN: i16 = 100;

/// Last type code of the function family (dynamic loads).
const FUNCTION_TYPE_MAX: i16 = 112;

/// Kind of server object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// In-memory or splayed table.
    Table,
    /// Table partitioned on disk.
    PartitionedTable,
    /// View (lazily recomputed expression).
    View,
    /// Lambda, primitive, projection or composition.
    Function,
    /// Any other global variable.
    Variable,
    /// Namespace root pseudo-entity.
    Dictionary,
}

impl EntityKind {
    /// Check whether this kind holds tabular data.
    pub fn is_table(self) -> bool {
        matches!(self, Self::Table | Self::PartitionedTable)
    }
}

/// Icon shown next to a canned query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IconRef {
    Count,
    Table,
    Delete,
    Info,
}

/// A described query that can be sent for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CannedQuery {
    /// Menu title.
    pub title: String,
    /// Icon, if any.
    pub icon: Option<IconRef>,
    /// Query text sent to the server.
    pub query: String,
}

impl CannedQuery {
    /// Create a canned query.
    pub fn new(title: impl Into<String>, icon: Option<IconRef>, query: impl Into<String>) -> Self {
        Self { title: title.into(), icon, query: query.into() }
    }
}

/// Raw metadata record for one object, as reported by the server tree query.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Server type code.
    pub type_code: i16,
    /// Row count, or -1 when unknown.
    pub row_count: i64,
    /// Whether the server considers the object a table.
    pub is_table: bool,
    /// Whether the table is partitioned.
    pub is_partitioned: bool,
    /// Column names (tables) or argument names (functions).
    pub names: Option<Vec<String>>,
    /// Whether the object is a view.
    pub is_view: bool,
}

/// A single object on a server whose type and size are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntity {
    /// Name of the server this entity was read from.
    source: String,
    /// Namespace, `.` for the root namespace.
    namespace: String,
    /// Unqualified name.
    name: String,
    /// Object kind.
    kind: EntityKind,
    /// Raw server type code.
    type_code: i16,
    /// Row count, -1 when unknown.
    row_count: i64,
    /// Column names for tables, argument names for functions.
    names: Option<Vec<String>>,
}

impl ServerEntity {
    /// Build an entity from a raw metadata record.
    ///
    /// Returns `None` when the type code is not one the server can produce.
    pub fn from_record(
        source: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        record: EntityRecord,
    ) -> Option<Self> {
        if !is_known_type_code(record.type_code) {
            return None;
        }

        let kind = classify(&record);
        let row_count = if kind.is_table() { record.row_count } else { -1 };

        Some(Self {
            source: source.into(),
            namespace: namespace.into(),
            name: name.into(),
            kind,
            type_code: record.type_code,
            row_count,
            names: record.names,
        })
    }

    /// The synthetic dictionary entity representing a namespace itself.
    pub fn namespace_root(source: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            namespace: namespace.into(),
            name: String::new(),
            kind: EntityKind::Dictionary,
            type_code: DICT_TYPE_CODE,
            row_count: 1,
            names: None,
        }
    }

    /// Server the entity was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Namespace containing the entity.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Unqualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object kind.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Raw server type code.
    pub fn type_code(&self) -> i16 {
        self.type_code
    }

    /// Row count if known, otherwise -1. Only meaningful for tables.
    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    /// Whether this entity holds tabular data.
    pub fn is_table(&self) -> bool {
        self.kind.is_table()
    }

    /// Column names (tables) or argument names (functions).
    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    /// Name qualified with its namespace.
    pub fn full_name(&self) -> String {
        if self.namespace == "." || self.namespace.is_empty() {
            self.name.clone()
        } else if self.name.is_empty() {
            self.namespace.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Whether `other` names the same object: same namespace, name and kind.
    pub fn same_entity(&self, other: &ServerEntity) -> bool {
        self.namespace == other.namespace && self.name == other.name && self.kind == other.kind
    }

    /// Common queries that could be sent for this entity.
    pub fn canned_queries(&self) -> Vec<CannedQuery> {
        let full = self.full_name();
        let delete = || {
            CannedQuery::new(
                "Delete",
                Some(IconRef::Delete),
                format!("delete {} from `{}", self.name, self.namespace),
            )
        };

        match self.kind {
            EntityKind::Table => vec![
                CannedQuery::new("Count", Some(IconRef::Count), format!("count {full}")),
                CannedQuery::new(
                    "Select first 10 rows",
                    Some(IconRef::Table),
                    format!("select[10] from {full}"),
                ),
                delete(),
            ],
            EntityKind::PartitionedTable => vec![
                CannedQuery::new("Count", Some(IconRef::Count), format!("count {full}")),
                CannedQuery::new(
                    "Select first 10 rows of last partition",
                    Some(IconRef::Table),
                    format!("select[10] from {full} where date=last date"),
                ),
            ],
            EntityKind::View => vec![
                CannedQuery::new("Show definition", Some(IconRef::Info), format!("view `{full}")),
                delete(),
            ],
            EntityKind::Variable => {
                vec![CannedQuery::new("Show value", Some(IconRef::Info), full.clone()), delete()]
            }
            EntityKind::Function | EntityKind::Dictionary => Vec::new(),
        }
    }
}

/// Type codes the server can report for a global.
fn is_known_type_code(code: i16) -> bool {
    (-20..=FUNCTION_TYPE_MAX).contains(&code)
}

fn classify(record: &EntityRecord) -> EntityKind {
    if (FUNCTION_TYPE_MIN..=FUNCTION_TYPE_MAX).contains(&record.type_code) {
        EntityKind::Function
    } else if record.is_partitioned {
        EntityKind::PartitionedTable
    } else if record.is_table {
        EntityKind::Table
    } else if record.is_view {
        EntityKind::View
    } else {
        EntityKind::Variable
    }
}
