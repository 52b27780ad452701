//!
//! Mapping configuration: entity types, their tables, merged tables and
//! relations, turned into one [JoinTree] and [Persister] per entity type.
//!
//! Relations are joined eagerly, depth first, as long as the relation
//! target is not already on the path from the root. A relation closing a
//! cycle becomes a deferred node, loaded in a second phase by the
//! [crate::cycle::CycleLoader].
//!

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::BuilderContext;
use crate::cycle::FirstPhaseCycleLoadListener;
use crate::entity::EntityType;
use crate::inflater::{EntityInflater, RelationFixer, RowMerger};
use crate::persister::{LoadOptions, Persister, PersisterRegistry};
use crate::schema::{Column, Table};
use crate::tree::{Join, JoinKind, JoinTree};
use crate::{EntwineError, EntwineResult};

/// How the rows of a relation target are found from the owner.
#[derive(Clone, Debug)]
pub enum RelationLink {
    /// `owner.left = target.right`, the foreign key being on either side.
    ForeignKey { left: Column, right: Column },
    /// Many to many through an association table:
    /// `owner.owner_key = association.owner_column` and
    /// `association.target_column = target.target_key`.
    Association {
        table: Table,
        owner_key: Column,
        owner_column: Column,
        target_column: Column,
        target_key: Column,
    },
}

#[derive(Clone, Debug)]
pub struct RelationMapping {
    target: EntityType,
    link: RelationLink,
    kind: JoinKind,
    fixer: RelationFixer,
    cycle_loading: bool,
}

impl RelationMapping {
    /// Relation to a `T`, joined on `left = right`.
    pub fn to<T: 'static>(left: &Column, right: &Column, fixer: RelationFixer) -> Self {
        Self::new(
            EntityType::of::<T>(),
            RelationLink::ForeignKey {
                left: left.clone(),
                right: right.clone(),
            },
            fixer,
        )
    }

    /// Many to many relation to a `T` through `association`.
    pub fn through<T: 'static>(
        association: &Table,
        (owner_key, owner_column): (&Column, &Column),
        (target_column, target_key): (&Column, &Column),
        fixer: RelationFixer,
    ) -> Self {
        Self::new(
            EntityType::of::<T>(),
            RelationLink::Association {
                table: association.clone(),
                owner_key: owner_key.clone(),
                owner_column: owner_column.clone(),
                target_column: target_column.clone(),
                target_key: target_key.clone(),
            },
            fixer,
        )
    }

    pub fn new(target: EntityType, link: RelationLink, fixer: RelationFixer) -> Self {
        Self {
            target,
            link,
            kind: JoinKind::LeftOuter,
            fixer,
            cycle_loading: true,
        }
    }

    /// Join kind of the relation, left outer by default.
    pub fn join_kind(mut self, kind: JoinKind) -> Self {
        self.kind = kind;
        self
    }

    /// Turns a cycle through this relation into a configuration error
    /// instead of a second phase load.
    pub fn without_cycle_loading(mut self) -> Self {
        self.cycle_loading = false;
        self
    }

    pub fn target(&self) -> EntityType {
        self.target
    }

    pub fn link(&self) -> &RelationLink {
        &self.link
    }
}

#[derive(Clone)]
struct MergeMapping {
    merger: Arc<dyn RowMerger>,
    join: Join,
}

/// Everything known about loading one entity type.
#[derive(Clone)]
pub struct EntityMapping {
    inflater: Arc<dyn EntityInflater>,
    merges: Vec<MergeMapping>,
    relations: Vec<RelationMapping>,
}

impl EntityMapping {
    pub fn new(inflater: impl EntityInflater + 'static) -> Self {
        Self::from_arc(Arc::new(inflater))
    }

    pub fn from_arc(inflater: Arc<dyn EntityInflater>) -> Self {
        Self {
            inflater,
            merges: vec![],
            relations: vec![],
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.inflater.entity_type()
    }

    pub fn table(&self) -> &Table {
        self.inflater.table()
    }

    /// Reads more properties from another table, joined on `join`: a
    /// subclass table, or a secondary table.
    pub fn merge(mut self, merger: impl RowMerger + 'static, join: Join) -> Self {
        self.merges.push(MergeMapping {
            merger: Arc::new(merger),
            join,
        });
        self
    }

    /// Relations are joined in declaration order.
    pub fn relation(mut self, relation: RelationMapping) -> Self {
        self.relations.push(relation);
        self
    }

    /// The entity with its merged tables only.
    fn shape(&self) -> EntwineResult<JoinTree> {
        let mut tree = JoinTree::new(self.inflater.clone());
        let root = tree.root().name().to_string();
        for merge in &self.merges {
            tree.add_merge_join(&root, merge.merger.clone(), merge.join.clone())?;
        }
        Ok(tree)
    }
}

///
/// # MappingConfiguration
///
/// Collects [EntityMapping]s and builds the [PersisterRegistry] out of them.
///
#[derive(Default)]
pub struct MappingConfiguration {
    mappings: Vec<EntityMapping>,
    options: LoadOptions,
}

impl MappingConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping. A second mapping of the same type replaces the first.
    pub fn add(mut self, mapping: EntityMapping) -> Self {
        let entity_type = mapping.entity_type();
        self.mappings.retain(|known| known.entity_type() != entity_type);
        self.mappings.push(mapping);
        self
    }

    pub fn options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(&self) -> EntwineResult<PersisterRegistry> {
        let shapes = self.shapes()?;
        let mut persisters = HashMap::new();

        for mapping in &self.mappings {
            let tree = self.join_tree_of(mapping, &shapes)?;
            log::debug!(
                "join tree of {}: {} nodes",
                mapping.entity_type().name(),
                tree.len()
            );
            persisters.insert(mapping.entity_type(), Persister::new(tree)?);
        }

        Ok(PersisterRegistry::new(persisters, self.options))
    }

    /// The join tree loading `entity_type`.
    pub fn join_tree(&self, entity_type: &EntityType) -> EntwineResult<JoinTree> {
        let shapes = self.shapes()?;
        self.join_tree_of(self.mapping(entity_type)?, &shapes)
    }

    fn shapes(&self) -> EntwineResult<HashMap<EntityType, JoinTree>> {
        self.mappings
            .iter()
            .map(|mapping| Ok((mapping.entity_type(), mapping.shape()?)))
            .collect()
    }

    fn mapping(&self, entity_type: &EntityType) -> EntwineResult<&EntityMapping> {
        self.mappings
            .iter()
            .find(|mapping| mapping.entity_type() == *entity_type)
            .ok_or_else(|| EntwineError::UnmappedEntity(entity_type.name()))
    }

    fn join_tree_of(
        &self,
        mapping: &EntityMapping,
        shapes: &HashMap<EntityType, JoinTree>,
    ) -> EntwineResult<JoinTree> {
        let mut tree = JoinTree::new(mapping.inflater.clone());
        let root = tree.root().name().to_string();
        project_shape(&mut tree, shapes, &mapping.entity_type(), &root)?;

        let mut context = BuilderContext::new();
        context.push(mapping.entity_type());
        self.add_relations(&mut tree, &root, mapping, shapes, &mut context)?;
        context.pop();

        Ok(tree)
    }

    fn add_relations(
        &self,
        tree: &mut JoinTree,
        node: &str,
        mapping: &EntityMapping,
        shapes: &HashMap<EntityType, JoinTree>,
        context: &mut BuilderContext,
    ) -> EntwineResult<()> {
        for relation in &mapping.relations {
            let target = self.mapping(&relation.target)?;

            if context.closes_cycle(&relation.target) {
                if !relation.cycle_loading {
                    return Err(EntwineError::MissingCycleListener {
                        source_type: mapping.entity_type().name(),
                        target: relation.target.name(),
                    });
                }
                log::debug!(
                    "{} -> {} closes a cycle at depth {}, loaded in a second phase",
                    mapping.entity_type().name(),
                    relation.target.name(),
                    context.depth()
                );
                add_deferred(tree, node, relation, target)?;
                continue;
            }

            let child = add_inline(tree, node, relation, target)?;
            project_shape(tree, shapes, &relation.target, &child)?;

            context.push(relation.target);
            self.add_relations(tree, &child, target, shapes, context)?;
            context.pop();
        }
        Ok(())
    }
}

fn project_shape(
    tree: &mut JoinTree,
    shapes: &HashMap<EntityType, JoinTree>,
    entity_type: &EntityType,
    onto: &str,
) -> EntwineResult<()> {
    let shape = shapes
        .get(entity_type)
        .ok_or_else(|| EntwineError::UnmappedEntity(entity_type.name()))?;
    tree.project(shape, shape.root().name(), onto)?;
    Ok(())
}

fn add_inline(
    tree: &mut JoinTree,
    node: &str,
    relation: &RelationMapping,
    target: &EntityMapping,
) -> EntwineResult<String> {
    match &relation.link {
        RelationLink::ForeignKey { left, right } => tree.add_relation_join(
            node,
            target.inflater.clone(),
            Join::new(left, right, relation.kind),
            relation.fixer.clone(),
            &[],
        ),
        RelationLink::Association {
            table,
            owner_key,
            owner_column,
            target_column,
            target_key,
        } => {
            let association = tree.add_passive_join(
                node,
                table,
                Join::new(owner_key, owner_column, relation.kind),
            )?;
            tree.add_relation_join(
                &association,
                target.inflater.clone(),
                Join::new(target_column, target_key, relation.kind),
                relation.fixer.clone(),
                &[],
            )
        }
    }
}

/// Joins only what is needed to read the target identifiers.
fn add_deferred(
    tree: &mut JoinTree,
    node: &str,
    relation: &RelationMapping,
    target: &EntityMapping,
) -> EntwineResult<String> {
    match &relation.link {
        RelationLink::ForeignKey { left, right } => tree.add_deferred_join(
            node,
            target.table(),
            Join::new(left, right, relation.kind),
            FirstPhaseCycleLoadListener::new(
                relation.target,
                target.inflater.identifier_columns(),
                relation.fixer.clone(),
            ),
        ),
        RelationLink::Association {
            table,
            owner_key,
            owner_column,
            target_column,
            ..
        } => tree.add_deferred_join(
            node,
            table,
            Join::new(owner_key, owner_column, relation.kind),
            FirstPhaseCycleLoadListener::new(
                relation.target,
                std::slice::from_ref(target_column),
                relation.fixer.clone(),
            ),
        ),
    }
}
