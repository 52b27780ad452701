//!
//! Loading of entity graphs through a single joined SELECT.
//!
//! ```text
//!   person ─┬─ car ─── wheel
//!           │
//!           └─ house
//! ```
//!
//! A [tree::JoinTree] describes which tables to join in order to load one
//! entity graph. It is compiled once by [query::JoinTreeQueryBuilder] into a
//! [query::CompiledQuery] (SQL text, column aliases and a consumer template).
//! Every row of the result is then walked by [inflate::TreeInflater], which
//! creates or reuses entity instances and links them with relation fixers.
//!
//! Relations that would close a cycle in the entity type graph are not joined.
//! Their identifiers are collected during the first phase and resolved by
//! [cycle::CycleLoader] with follow-up queries.
//!

pub mod builder;
pub mod context;
pub mod cycle;
pub mod database;
pub mod entity;
pub mod inflate;
pub mod inflater;
pub mod mapping;
pub mod persister;
pub mod prelude;
pub mod query;
pub mod row;
pub mod schema;
pub mod tree;
pub mod value;

#[derive(thiserror::Error, Debug)]
pub enum EntwineError {
    #[error("No join node named '{0}'")]
    UnknownNode(String),

    #[error("More than one join node matches {left} = {right}")]
    AmbiguousJoin { left: String, right: String },

    #[error("Relation {source_type} -> {target} closes a cycle but has no first phase cycle load listener")]
    MissingCycleListener {
        source_type: &'static str,
        target: &'static str,
    },

    #[error("Entity type {0} is not mapped")]
    UnmappedEntity(&'static str),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Column '{column}' is not projected by node '{node}'")]
    UnknownColumn { node: String, column: String },

    #[error("Unexpected value for '{column}': expected {expected}, found {found}")]
    UnexpectedValue {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("Entity type mismatch: expected {expected}, found {found}")]
    EntityTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Row decoding error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl EntwineError {
    /// Whether this error stems from an invalid join tree or mapping,
    /// as opposed to something found while reading rows.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EntwineError::UnknownNode(_)
                | EntwineError::AmbiguousJoin { .. }
                | EntwineError::MissingCycleListener { .. }
                | EntwineError::UnmappedEntity(_)
        )
    }
}

pub type EntwineResult<T> = Result<T, EntwineError>;
