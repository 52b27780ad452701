//!
//! Per entity type loaders, built from a mapping configuration.
//!

use std::collections::{HashMap, HashSet};

use crate::cycle::CycleLoader;
use crate::database::Connection;
use crate::entity::{AnyEntity, Entity, EntityType};
use crate::inflate::{Inflated, TreeInflater};
use crate::query::{CompiledQuery, JoinTreeQueryBuilder, Placeholder};
use crate::tree::JoinTree;
use crate::value::Value;
use crate::{EntwineError, EntwineResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoadOptions {
    /// Maximum number of identifiers in one `in (...)` restriction.
    pub in_batch_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            in_batch_size: 1000,
        }
    }
}

/// Loads one entity type with the compiled query of its join tree.
pub struct Persister {
    entity_type: EntityType,
    tree: JoinTree,
    query: CompiledQuery,
}

impl Persister {
    pub fn new(tree: JoinTree) -> EntwineResult<Self> {
        let query = JoinTreeQueryBuilder::new(&tree).compile()?;
        Ok(Self {
            entity_type: query.root_type(),
            tree,
            query,
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn join_tree(&self) -> &JoinTree {
        &self.tree
    }

    pub fn query(&self) -> &CompiledQuery {
        &self.query
    }

    /// SQL and parameters selecting every root, or the roots of `identifiers`.
    pub fn statement(
        &self,
        identifiers: Option<&[Value]>,
        placeholder: Placeholder,
    ) -> (String, Vec<Value>) {
        match identifiers {
            None => (self.query.sql().to_string(), vec![]),
            Some(identifiers) => (
                self.query.sql_with_identifiers(identifiers.len(), placeholder),
                identifiers
                    .iter()
                    .flat_map(|identifier| identifier.flatten())
                    .cloned()
                    .collect(),
            ),
        }
    }

    /// Runs the first phase query. Cyclic relations are left deferred.
    pub fn fetch<C: Connection>(
        &self,
        conn: &mut C,
        identifiers: Option<&[Value]>,
    ) -> EntwineResult<Inflated> {
        let (sql, params) = self.statement(identifiers, conn.placeholder());
        let rows = conn.query(&sql, &params)?;
        log::debug!("{} rows for {}", rows.len(), self.entity_type.name());
        TreeInflater::new(&self.query).run(rows)
    }
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "Persister({})", self.entity_type.name())
    }
}

///
/// # PersisterRegistry
///
/// The persisters of every mapped entity type. Loads run the first phase
/// query of the requested type, then follow-up queries through a
/// [CycleLoader] until the graph is complete.
///
#[derive(Debug)]
pub struct PersisterRegistry {
    persisters: HashMap<EntityType, Persister>,
    options: LoadOptions,
}

impl PersisterRegistry {
    pub(crate) fn new(persisters: HashMap<EntityType, Persister>, options: LoadOptions) -> Self {
        Self {
            persisters,
            options,
        }
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    pub fn persister(&self, entity_type: &EntityType) -> EntwineResult<&Persister> {
        self.persisters
            .get(entity_type)
            .ok_or_else(|| EntwineError::UnmappedEntity(entity_type.name()))
    }

    pub fn persister_of<T: 'static>(&self) -> EntwineResult<&Persister> {
        self.persister(&EntityType::of::<T>())
    }

    /// `identifiers` in first appearance order, split into batches of at
    /// most `in_batch_size`. Each identifier lands in exactly one batch.
    pub fn batches(&self, identifiers: &[Value]) -> Vec<Vec<Value>> {
        let mut seen = HashSet::new();
        let distinct: Vec<Value> = identifiers
            .iter()
            .filter(|identifier| seen.insert(*identifier))
            .cloned()
            .collect();

        distinct
            .chunks(self.options.in_batch_size.max(1))
            .map(<[Value]>::to_vec)
            .collect()
    }

    pub fn select_all<C: Connection>(
        &self,
        conn: &mut C,
        entity_type: &EntityType,
    ) -> EntwineResult<Vec<AnyEntity>> {
        let inflated = self.persister(entity_type)?.fetch(conn, None)?;

        let mut loader = CycleLoader::new(self);
        loader.absorb(&inflated);
        loader.run_deferred_loads(conn)?;

        Ok(inflated.into_roots())
    }

    /// Roots come back in result order. Unknown identifiers are ignored.
    pub fn select_by_ids<C: Connection>(
        &self,
        conn: &mut C,
        entity_type: &EntityType,
        identifiers: &[Value],
    ) -> EntwineResult<Vec<AnyEntity>> {
        let persister = self.persister(entity_type)?;

        let mut loader = CycleLoader::new(self);
        let mut roots = vec![];
        for batch in self.batches(identifiers) {
            let inflated = persister.fetch(conn, Some(&batch))?;
            loader.absorb(&inflated);
            roots.extend(inflated.into_roots());
        }
        loader.run_deferred_loads(conn)?;

        Ok(roots)
    }

    pub fn select_all_of<T: Send + 'static, C: Connection>(
        &self,
        conn: &mut C,
    ) -> EntwineResult<Vec<Entity<T>>> {
        self.select_all(conn, &EntityType::of::<T>())?
            .iter()
            .map(AnyEntity::downcast::<T>)
            .collect()
    }

    pub fn select_by_ids_of<T: Send + 'static, C: Connection>(
        &self,
        conn: &mut C,
        identifiers: &[Value],
    ) -> EntwineResult<Vec<Entity<T>>> {
        self.select_by_ids(conn, &EntityType::of::<T>(), identifiers)?
            .iter()
            .map(AnyEntity::downcast::<T>)
            .collect()
    }
}
