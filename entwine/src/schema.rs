//!
//! Tables and columns, as seen by the join tree.
//!

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [Table]. Two tables with the same name are still distinct
/// tables if they were built separately.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TableId(u64);

impl TableId {
    fn next() -> Self {
        Self(NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Text,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Column {
    table: TableId,
    name: &'static str,
    sql_type: SqlType,
    nullable: bool,
}

impl Column {
    pub fn table_id(&self) -> TableId {
        self.table
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

struct TableInner {
    id: TableId,
    name: &'static str,
    columns: Vec<Column>,
    primary_key: Vec<&'static str>,
}

///
/// An immutable table definition.
///
/// Cloning a `Table` is cheap and keeps its identity. Use
/// [Table::duplicate] to get a table with the same shape but a new identity,
/// which is what a self join needs.
///
#[derive(Clone)]
pub struct Table(Arc<TableInner>);

impl Table {
    pub fn builder(name: &'static str) -> TableBuilder {
        TableBuilder {
            name,
            columns: vec![],
            primary_key: vec![],
        }
    }

    pub fn id(&self) -> TableId {
        self.0.id
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.0.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.0.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_key(&self) -> Vec<&Column> {
        self.0
            .primary_key
            .iter()
            .filter_map(|name| self.column(name))
            .collect()
    }

    pub fn owns(&self, column: &Column) -> bool {
        column.table == self.0.id && self.column(column.name).is_some()
    }

    /// Same name and columns, different identity.
    pub fn duplicate(&self) -> Table {
        let id = TableId::next();
        Table(Arc::new(TableInner {
            id,
            name: self.0.name,
            columns: self
                .0
                .columns
                .iter()
                .map(|column| Column {
                    table: id,
                    ..column.clone()
                })
                .collect(),
            primary_key: self.0.primary_key.clone(),
        }))
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Table {}

impl std::hash::Hash for Table {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "Table({}#{})", self.0.name, (self.0.id).0)
    }
}

pub struct TableBuilder {
    name: &'static str,
    columns: Vec<(&'static str, SqlType, bool)>,
    primary_key: Vec<&'static str>,
}

impl TableBuilder {
    pub fn primary_key(mut self, name: &'static str, sql_type: SqlType) -> Self {
        self.columns.push((name, sql_type, false));
        self.primary_key.push(name);
        self
    }

    pub fn column(mut self, name: &'static str, sql_type: SqlType) -> Self {
        self.columns.push((name, sql_type, false));
        self
    }

    pub fn nullable(mut self, name: &'static str, sql_type: SqlType) -> Self {
        self.columns.push((name, sql_type, true));
        self
    }

    pub fn build(self) -> Table {
        let id = TableId::next();
        Table(Arc::new(TableInner {
            id,
            name: self.name,
            columns: self
                .columns
                .into_iter()
                .map(|(name, sql_type, nullable)| Column {
                    table: id,
                    name,
                    sql_type,
                    nullable,
                })
                .collect(),
            primary_key: self.primary_key,
        }))
    }
}
