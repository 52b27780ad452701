//!
//! Access to result rows.
//!
//! Rows are addressed by alias only at the database boundary. Everything
//! above reads through a [ColumnedRow], which resolves a [Column] of one join
//! node to the alias the query builder gave it.
//!

use std::collections::HashMap;

use crate::query::ColumnAliases;
use crate::schema::{Column, SqlType};
use crate::tree::NodeId;
use crate::value::{FromValue, Value};
use crate::{EntwineError, EntwineResult};

/// One row of a result set, as delivered by a database driver.
///
/// `sql_type` is the declared type of the column the alias stands for, for
/// drivers that need it to pick a decoder.
pub trait Row {
    fn value(&self, alias: &str, sql_type: SqlType) -> EntwineResult<Value>;
}

impl<R: Row + ?Sized> Row for &R {
    fn value(&self, alias: &str, sql_type: SqlType) -> EntwineResult<Value> {
        (**self).value(alias, sql_type)
    }
}

impl<R: Row + ?Sized> Row for Box<R> {
    fn value(&self, alias: &str, sql_type: SqlType) -> EntwineResult<Value> {
        (**self).value(alias, sql_type)
    }
}

/// A row held in memory, keyed by alias.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryRow {
    values: HashMap<String, Value>,
}

impl MemoryRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, alias: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(alias.into(), value.into());
        self
    }

    pub fn with(mut self, alias: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(alias, value);
        self
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for MemoryRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(alias, value)| (alias.into(), value.into()))
                .collect(),
        }
    }
}

impl Row for MemoryRow {
    fn value(&self, alias: &str, _sql_type: SqlType) -> EntwineResult<Value> {
        self.values.get(alias).cloned().ok_or_else(|| {
            EntwineError::Decode(format!("no column '{}' in row", alias).into())
        })
    }
}

///
/// The part of a row that belongs to one join node.
///
/// Handed to [crate::inflater::EntityInflater]s, which read their columns by
/// identity and never see alias strings.
///
pub struct ColumnedRow<'r> {
    row: &'r dyn Row,
    aliases: &'r ColumnAliases,
    node: NodeId,
}

impl<'r> ColumnedRow<'r> {
    pub(crate) fn new(row: &'r dyn Row, aliases: &'r ColumnAliases, node: NodeId) -> Self {
        Self { row, aliases, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn get(&self, column: &Column) -> EntwineResult<Value> {
        match self.aliases.column_alias(self.node, column) {
            Some(alias) => self.row.value(alias, column.sql_type()),
            None => Err(EntwineError::UnknownColumn {
                node: self.aliases.table_alias(self.node).unwrap_or("?").to_string(),
                column: column.name().to_string(),
            }),
        }
    }

    pub fn try_get<T: FromValue>(&self, column: &Column) -> EntwineResult<T> {
        T::from_value(column.name(), self.get(column)?)
    }

    /// Reads `columns` as one identifier. `None` when every column is null,
    /// a composite when there is more than one column.
    pub fn identifier(&self, columns: &[Column]) -> EntwineResult<Option<Value>> {
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            values.push(self.get(column)?);
        }

        if values.iter().all(Value::is_null) {
            return Ok(None);
        }

        Ok(Some(match values.len() {
            1 => values.remove(0),
            _ => Value::Composite(values),
        }))
    }
}
