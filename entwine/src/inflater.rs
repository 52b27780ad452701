//!
//! Per entity type capabilities consumed by the join tree: inflaters,
//! mergers and relation fixers.
//!

use std::sync::Arc;

use crate::entity::{AnyEntity, Entity, EntityType};
use crate::row::ColumnedRow;
use crate::schema::{Column, Table};
use crate::value::Value;
use crate::{EntwineError, EntwineResult};

///
/// Reads an identifier from a row and builds an entity from it.
///
/// An inflater is supplied by the mapping layer for every entity type that a
/// join node introduces. It only sees the columns of its own node.
///
pub trait EntityInflater: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// The table the node of this inflater joins.
    fn table(&self) -> &Table;

    /// Columns making up the identifier, in order.
    fn identifier_columns(&self) -> &[Column];

    /// Columns to put into the SELECT projection.
    fn columns_to_select(&self) -> &[Column];

    /// `None` when all identifier columns are null, i.e. an outer join matched nothing.
    fn identifier_of(&self, row: &ColumnedRow) -> EntwineResult<Option<Value>> {
        row.identifier(self.identifier_columns())
    }

    fn new_or_updated_instance(&self, row: &ColumnedRow) -> EntwineResult<AnyEntity>;
}

/// Fills extra properties of an existing entity from a merged table
/// (joined-table inheritance, secondary tables).
pub trait RowMerger: Send + Sync {
    fn table(&self) -> &Table;

    fn columns_to_select(&self) -> &[Column];

    fn merge(&self, row: &ColumnedRow, target: &AnyEntity) -> EntwineResult<()>;
}

type Factory<T> = dyn Fn(&ColumnedRow) -> EntwineResult<T> + Send + Sync;

/// [EntityInflater] building a `T` with a closure.
pub struct TypedInflater<T> {
    table: Table,
    identifier: Vec<Column>,
    columns: Vec<Column>,
    factory: Arc<Factory<T>>,
}

impl<T: Send + 'static> TypedInflater<T> {
    /// Selects every column of `table`, identified by its primary key.
    pub fn new<F>(table: &Table, factory: F) -> Self
    where
        F: Fn(&ColumnedRow) -> EntwineResult<T> + Send + Sync + 'static,
    {
        Self {
            table: table.clone(),
            identifier: table.primary_key().into_iter().cloned().collect(),
            columns: table.columns().to_vec(),
            factory: Arc::new(factory),
        }
    }

    /// Restrict the projection. The identifier columns are always kept.
    pub fn with_columns(mut self, columns: &[Column]) -> EntwineResult<Self> {
        check_owned(&self.table, columns)?;
        let mut selected: Vec<Column> = self.identifier.clone();
        for column in columns {
            if !selected.contains(column) {
                selected.push(column.clone());
            }
        }
        self.columns = selected;
        Ok(self)
    }

    pub fn with_identifier(mut self, columns: &[Column]) -> EntwineResult<Self> {
        check_owned(&self.table, columns)?;
        for column in columns {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
        self.identifier = columns.to_vec();
        Ok(self)
    }
}

impl<T: Send + 'static> EntityInflater for TypedInflater<T> {
    fn entity_type(&self) -> EntityType {
        EntityType::of::<T>()
    }

    fn table(&self) -> &Table {
        &self.table
    }

    fn identifier_columns(&self) -> &[Column] {
        &self.identifier
    }

    fn columns_to_select(&self) -> &[Column] {
        &self.columns
    }

    fn new_or_updated_instance(&self, row: &ColumnedRow) -> EntwineResult<AnyEntity> {
        Ok(AnyEntity::new((self.factory)(row)?))
    }
}

type MergeFn<T> = dyn Fn(&mut T, &ColumnedRow) -> EntwineResult<()> + Send + Sync;

/// [RowMerger] updating a `T` with a closure.
pub struct TypedMerger<T> {
    table: Table,
    columns: Vec<Column>,
    merge: Arc<MergeFn<T>>,
}

impl<T: Send + 'static> TypedMerger<T> {
    pub fn new<F>(table: &Table, merge: F) -> Self
    where
        F: Fn(&mut T, &ColumnedRow) -> EntwineResult<()> + Send + Sync + 'static,
    {
        Self {
            table: table.clone(),
            columns: table.columns().to_vec(),
            merge: Arc::new(merge),
        }
    }

    pub fn with_columns(mut self, columns: &[Column]) -> EntwineResult<Self> {
        check_owned(&self.table, columns)?;
        self.columns = columns.to_vec();
        Ok(self)
    }
}

impl<T: Send + 'static> RowMerger for TypedMerger<T> {
    fn table(&self) -> &Table {
        &self.table
    }

    fn columns_to_select(&self) -> &[Column] {
        &self.columns
    }

    fn merge(&self, row: &ColumnedRow, target: &AnyEntity) -> EntwineResult<()> {
        let target = target.downcast::<T>()?;
        let mut guard = target.lock();
        (self.merge)(&mut *guard, row)
    }
}

fn check_owned(table: &Table, columns: &[Column]) -> EntwineResult<()> {
    match columns.iter().find(|column| !table.owns(column)) {
        Some(column) => Err(EntwineError::SchemaMismatch(format!(
            "column '{}' is not a column of table {:?}",
            column.name(),
            table
        ))),
        None => Ok(()),
    }
}

type FixFn = dyn Fn(&AnyEntity, &AnyEntity) -> EntwineResult<()> + Send + Sync;

///
/// Links a child entity to its parent.
///
/// A fixer can be invoked several times with the same pair (once per row the
/// pair appears in), and must tolerate that.
///
#[derive(Clone)]
pub struct RelationFixer(Arc<FixFn>);

impl RelationFixer {
    pub fn new<P, C, F>(fix: F) -> Self
    where
        P: Send + 'static,
        C: Send + 'static,
        F: Fn(&mut P, Entity<C>) + Send + Sync + 'static,
    {
        Self(Arc::new(move |parent: &AnyEntity, child: &AnyEntity| {
            let parent = parent.downcast::<P>()?;
            let child = child.downcast::<C>()?;
            let mut guard = parent.lock();
            fix(&mut *guard, child);
            Ok(())
        }))
    }

    /// Sets an optional reference.
    pub fn assign<P, C, F>(field: F) -> Self
    where
        P: Send + 'static,
        C: Send + 'static,
        F: Fn(&mut P) -> &mut Option<Entity<C>> + Send + Sync + 'static,
    {
        Self::new(move |parent: &mut P, child: Entity<C>| {
            *field(parent) = Some(child);
        })
    }

    /// Appends to a collection, unless that very instance is already in it.
    pub fn collect<P, C, F>(field: F) -> Self
    where
        P: Send + 'static,
        C: Send + 'static,
        F: Fn(&mut P) -> &mut Vec<Entity<C>> + Send + Sync + 'static,
    {
        Self::new(move |parent: &mut P, child: Entity<C>| {
            let items = field(parent);
            if !items.iter().any(|item| Arc::ptr_eq(item, &child)) {
                items.push(child);
            }
        })
    }

    /// Fixer for relations whose linking is done elsewhere.
    pub fn none() -> Self {
        Self(Arc::new(|_: &AnyEntity, _: &AnyEntity| Ok(())))
    }

    pub fn apply(&self, parent: &AnyEntity, child: &AnyEntity) -> EntwineResult<()> {
        (self.0)(parent, child)
    }
}

impl std::fmt::Debug for RelationFixer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "RelationFixer")
    }
}
