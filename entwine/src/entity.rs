//!
//! Entity instances produced by the inflater.
//!

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::{EntwineError, EntwineResult};

/// A shared, mutable entity instance.
pub type Entity<T> = Arc<Mutex<T>>;

pub fn entity<T>(value: T) -> Entity<T> {
    Arc::new(Mutex::new(value))
}

/// Tag identifying a mapped entity type.
#[derive(Clone, Copy, Debug)]
pub struct EntityType {
    type_id: TypeId,
    name: &'static str,
}

impl EntityType {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EntityType {}

impl std::hash::Hash for EntityType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

/// Reference identity of an entity instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct EntityIdentity(usize);

///
/// Type erased [Entity].
///
/// Equality is instance identity: two `AnyEntity` are equal only if they
/// point to the same instance.
///
#[derive(Clone)]
pub struct AnyEntity {
    cell: Arc<dyn Any + Send + Sync>,
    entity_type: EntityType,
}

impl AnyEntity {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self::from_entity(entity(value))
    }

    pub fn from_entity<T: Send + 'static>(entity: Entity<T>) -> Self {
        Self {
            cell: entity,
            entity_type: EntityType::of::<T>(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn identity(&self) -> EntityIdentity {
        EntityIdentity(Arc::as_ptr(&self.cell) as *const () as usize)
    }

    pub fn downcast<T: Send + 'static>(&self) -> EntwineResult<Entity<T>> {
        self.cell
            .clone()
            .downcast::<Mutex<T>>()
            .map_err(|_| EntwineError::EntityTypeMismatch {
                expected: std::any::type_name::<T>(),
                found: self.entity_type.name(),
            })
    }
}

impl PartialEq for AnyEntity {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for AnyEntity {}

impl std::fmt::Debug for AnyEntity {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "AnyEntity({}@{:x})", self.entity_type.name(), self.identity().0)
    }
}
