//!
//! Second phase loading of relations that close a cycle.
//!
//! A cyclic relation is never joined. The first phase query only projects
//! the identifier of the related entity, and [FirstPhaseCycleLoadListener]
//! records a [DeferredRecord] for it. [CycleLoader] then issues follow-up
//! queries, by identifier, until no unloaded identifier remains.
//!

use std::collections::{HashMap, HashSet};

use crate::database::Connection;
use crate::entity::{AnyEntity, EntityType};
use crate::inflate::Inflated;
use crate::inflater::RelationFixer;
use crate::persister::PersisterRegistry;
use crate::row::ColumnedRow;
use crate::schema::Column;
use crate::value::Value;
use crate::EntwineResult;

/// Collects identifiers of a cyclic relation while the first phase rows are read.
#[derive(Clone, Debug)]
pub struct FirstPhaseCycleLoadListener {
    target: EntityType,
    identifier: Vec<Column>,
    fixer: RelationFixer,
}

impl FirstPhaseCycleLoadListener {
    /// `identifier_columns` are read on the deferred node and must carry
    /// identifiers of `target`.
    pub fn new(target: EntityType, identifier_columns: &[Column], fixer: RelationFixer) -> Self {
        Self {
            target,
            identifier: identifier_columns.to_vec(),
            fixer,
        }
    }

    pub fn target(&self) -> EntityType {
        self.target
    }

    pub fn identifier_columns(&self) -> &[Column] {
        &self.identifier
    }

    pub fn on_first_phase_row(
        &self,
        parent: &AnyEntity,
        row: &ColumnedRow,
    ) -> EntwineResult<Option<DeferredRecord>> {
        Ok(row
            .identifier(&self.identifier)?
            .map(|identifier| DeferredRecord {
                target: self.target,
                identifier,
                parent: parent.clone(),
                fixer: self.fixer.clone(),
            }))
    }
}

/// A parent waiting for the entity of `identifier` to be linked to it.
#[derive(Clone, Debug)]
pub struct DeferredRecord {
    target: EntityType,
    identifier: Value,
    parent: AnyEntity,
    fixer: RelationFixer,
}

impl DeferredRecord {
    pub fn target(&self) -> EntityType {
        self.target
    }

    pub fn identifier(&self) -> &Value {
        &self.identifier
    }

    pub fn parent(&self) -> &AnyEntity {
        &self.parent
    }
}

/// One follow-up query to issue: load `identifiers` of `entity_type`.
#[derive(Clone, Debug, PartialEq)]
pub struct FollowUp {
    pub entity_type: EntityType,
    pub identifiers: Vec<Value>,
}

///
/// # CycleLoader
///
/// Drives the second phase of a load. Every entity materialized during the
/// load session is registered by type and identifier, so that a deferred
/// relation pointing to an already loaded entity is linked to that very
/// instance instead of triggering a query.
///
/// An identifier is requested at most once per session. Since the number of
/// distinct identifiers is finite, the loop always ends, whatever cycles the
/// data contains.
///
/// The loader is driven either with [CycleLoader::run_deferred_loads], or step
/// by step by callers owning an asynchronous connection:
///
/// ```text
/// while loader.has_pending() {
///     for follow_up in loader.pending_requests() { /* query, then */ loader.absorb(&inflated); }
///     loader.resolve()?;
/// }
/// ```
///
pub struct CycleLoader<'r> {
    registry: &'r PersisterRegistry,
    loaded: HashMap<(EntityType, Value), AnyEntity>,
    requested: HashSet<(EntityType, Value)>,
    pending: Vec<DeferredRecord>,
    awaiting: Vec<DeferredRecord>,
}

impl<'r> CycleLoader<'r> {
    pub fn new(registry: &'r PersisterRegistry) -> Self {
        Self {
            registry,
            loaded: HashMap::new(),
            requested: HashSet::new(),
            pending: vec![],
            awaiting: vec![],
        }
    }

    pub fn registry(&self) -> &'r PersisterRegistry {
        self.registry
    }

    /// Registers the entities of a query result and queues its deferred records.
    ///
    /// The first instance registered for an identifier wins.
    pub fn absorb(&mut self, inflated: &Inflated) {
        for materialized in inflated.materialized() {
            self.loaded
                .entry((materialized.entity_type, materialized.identifier.clone()))
                .or_insert_with(|| materialized.entity.clone());
        }
        self.pending.extend(inflated.deferred().iter().cloned());
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn loaded(&self, entity_type: EntityType, identifier: &Value) -> Option<&AnyEntity> {
        self.loaded.get(&(entity_type, identifier.clone()))
    }

    ///
    /// Identifiers to load before the pending records can be resolved,
    /// grouped by entity type in order of first appearance and split into
    /// chunks of at most `in_batch_size` identifiers.
    ///
    /// Pending records move to the resolution queue.
    ///
    pub fn pending_requests(&mut self) -> Vec<FollowUp> {
        let batch_size = self.registry.options().in_batch_size.max(1);
        let mut missing: Vec<(EntityType, Vec<Value>)> = vec![];

        for record in &self.pending {
            let key = (record.target, record.identifier.clone());
            if self.loaded.contains_key(&key) || !self.requested.insert(key) {
                continue;
            }
            match missing.iter_mut().find(|(ty, _)| *ty == record.target) {
                Some((_, identifiers)) => identifiers.push(record.identifier.clone()),
                None => missing.push((record.target, vec![record.identifier.clone()])),
            }
        }

        self.awaiting.append(&mut self.pending);

        missing
            .into_iter()
            .flat_map(|(entity_type, identifiers)| {
                identifiers
                    .chunks(batch_size)
                    .map(|chunk| FollowUp {
                        entity_type,
                        identifiers: chunk.to_vec(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Links every awaiting parent to its loaded entity. Identifiers that
    /// follow-up queries did not return are left unlinked.
    pub fn resolve(&mut self) -> EntwineResult<()> {
        for record in self.awaiting.drain(..) {
            match self.loaded.get(&(record.target, record.identifier.clone())) {
                Some(child) => record.fixer.apply(&record.parent, child)?,
                None => log::debug!(
                    "dangling reference to {} {}",
                    record.target.name(),
                    record.identifier
                ),
            }
        }
        Ok(())
    }

    /// Runs follow-up queries on `conn` until every deferred relation is resolved.
    pub fn run_deferred_loads<C: Connection>(&mut self, conn: &mut C) -> EntwineResult<()> {
        let registry = self.registry;
        while self.has_pending() {
            for follow_up in self.pending_requests() {
                log::debug!(
                    "loading {} deferred {}",
                    follow_up.identifiers.len(),
                    follow_up.entity_type.name()
                );
                let persister = registry.persister(&follow_up.entity_type)?;
                let inflated = persister.fetch(conn, Some(&follow_up.identifiers))?;
                self.absorb(&inflated);
            }
            self.resolve()?;
        }
        Ok(())
    }
}
