//!
//! Row walking: turning the rows of a compiled query back into a linked
//! entity graph.
//!

use std::collections::{HashMap, HashSet, VecDeque};

use crate::cycle::DeferredRecord;
use crate::entity::{AnyEntity, EntityIdentity, EntityType};
use crate::query::{CompiledQuery, Consumer};
use crate::row::{ColumnedRow, Row};
use crate::tree::{NodeId, NodeKind};
use crate::value::Value;
use crate::EntwineResult;

///
/// Key of the per-query instance cache.
///
/// The owning root takes part in the key by identity, so that two roots never
/// share a child instance, even when the child identifiers are equal.
///
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RelationIdentifier {
    root: Option<EntityIdentity>,
    entity_type: EntityType,
    identifier: Value,
    node: NodeId,
}

impl RelationIdentifier {
    pub fn new(
        root: Option<&AnyEntity>,
        entity_type: EntityType,
        identifier: Value,
        node: NodeId,
    ) -> Self {
        Self {
            root: root.map(AnyEntity::identity),
            entity_type,
            identifier,
            node,
        }
    }
}

/// An entity created while reading rows, with its identifier.
#[derive(Clone, Debug)]
pub struct Materialized {
    pub entity_type: EntityType,
    pub identifier: Value,
    pub entity: AnyEntity,
}

/// Result of one query execution.
#[derive(Debug, Default)]
pub struct Inflated {
    roots: Vec<AnyEntity>,
    root_identifiers: Vec<Value>,
    materialized: Vec<Materialized>,
    deferred: Vec<DeferredRecord>,
}

impl Inflated {
    /// Root entities, in the order they first appeared.
    pub fn roots(&self) -> &[AnyEntity] {
        &self.roots
    }

    pub fn into_roots(self) -> Vec<AnyEntity> {
        self.roots
    }

    pub fn identified_roots(&self) -> impl Iterator<Item = (&Value, &AnyEntity)> {
        self.root_identifiers.iter().zip(self.roots.iter())
    }

    /// Every entity instance created, roots included, in creation order.
    pub fn materialized(&self) -> &[Materialized] {
        &self.materialized
    }

    /// Cyclic relations left for the second phase.
    pub fn deferred(&self) -> &[DeferredRecord] {
        &self.deferred
    }
}

#[derive(Default)]
struct InflationState {
    cache: HashMap<RelationIdentifier, AnyEntity>,
    deferred_seen: HashSet<(NodeId, EntityIdentity, Value)>,
    inflated: Inflated,
}

impl InflationState {
    fn resolve<F>(&mut self, key: RelationIdentifier, create: F) -> EntwineResult<(AnyEntity, bool)>
    where
        F: FnOnce() -> EntwineResult<AnyEntity>,
    {
        if let Some(entity) = self.cache.get(&key) {
            return Ok((entity.clone(), false));
        }

        let entity = create()?;
        self.inflated.materialized.push(Materialized {
            entity_type: key.entity_type,
            identifier: key.identifier.clone(),
            entity: entity.clone(),
        });
        self.cache.insert(key, entity.clone());
        Ok((entity, true))
    }
}

///
/// # TreeInflater
///
/// Walks the consumer tree of a [CompiledQuery] once per row, breadth first
/// and in join order, with an explicit queue.
///
/// For every relation node, a null identifier means the (outer) join matched
/// nothing: no instance is built, the fixer is not called, and the whole
/// sub-tree of that node is skipped for the row.
///
pub struct TreeInflater<'q> {
    query: &'q CompiledQuery,
}

impl<'q> TreeInflater<'q> {
    pub fn new(query: &'q CompiledQuery) -> Self {
        Self { query }
    }

    /// Consumes `rows` and returns the entities they describe. Rows of the
    /// same root identifier are folded into one root instance.
    pub fn run<I>(&self, rows: I) -> EntwineResult<Inflated>
    where
        I: IntoIterator,
        I::Item: Row,
    {
        let mut state = InflationState::default();
        for row in rows {
            self.inflate_row(&row, &mut state)?;
        }
        Ok(state.inflated)
    }

    fn inflate_row(&self, row: &dyn Row, state: &mut InflationState) -> EntwineResult<()> {
        let consumers = &self.query.consumers().consumers;
        let aliases = self.query.aliases();

        let root = &consumers[0];
        let inflater = match &root.kind {
            NodeKind::Root { inflater } => inflater,
            _ => unreachable!("first consumer is the root"),
        };

        let columned = ColumnedRow::new(row, aliases, root.node);
        let identifier = match inflater.identifier_of(&columned)? {
            Some(identifier) => identifier,
            None => {
                log::debug!("skipping row without root identifier");
                return Ok(());
            }
        };

        let key = RelationIdentifier::new(None, inflater.entity_type(), identifier.clone(), root.node);
        let (root_entity, created) =
            state.resolve(key, || inflater.new_or_updated_instance(&columned))?;
        if created {
            state.inflated.roots.push(root_entity.clone());
            state.inflated.root_identifiers.push(identifier);
        }

        let mut queue: VecDeque<(usize, AnyEntity)> = root
            .children
            .iter()
            .map(|child| (*child, root_entity.clone()))
            .collect();

        while let Some((index, parent)) = queue.pop_front() {
            let consumer = &consumers[index];
            let columned = ColumnedRow::new(row, aliases, consumer.node);

            match self.visit(consumer, &columned, &parent, &root_entity, state)? {
                Some(resolved) => queue.extend(
                    consumer
                        .children
                        .iter()
                        .map(|child| (*child, resolved.clone())),
                ),
                None => log::trace!(
                    "skipping sub-tree of {}",
                    aliases.table_alias(consumer.node).unwrap_or("?")
                ),
            }
        }

        Ok(())
    }

    /// The entity the children of `consumer` hang off, or `None` when the
    /// sub-tree is skipped for this row.
    fn visit(
        &self,
        consumer: &Consumer,
        row: &ColumnedRow,
        parent: &AnyEntity,
        root: &AnyEntity,
        state: &mut InflationState,
    ) -> EntwineResult<Option<AnyEntity>> {
        match &consumer.kind {
            NodeKind::Relation { inflater, fixer } => {
                let identifier = match inflater.identifier_of(row)? {
                    Some(identifier) => identifier,
                    None => return Ok(None),
                };
                let key = RelationIdentifier::new(
                    Some(root),
                    inflater.entity_type(),
                    identifier,
                    consumer.node,
                );
                let (child, _) = state.resolve(key, || inflater.new_or_updated_instance(row))?;
                fixer.apply(parent, &child)?;
                Ok(Some(child))
            }
            NodeKind::Merge { merger } => {
                if !matched(consumer, row)? {
                    return Ok(None);
                }
                merger.merge(row, parent)?;
                Ok(Some(parent.clone()))
            }
            NodeKind::Passive => {
                if !matched(consumer, row)? {
                    return Ok(None);
                }
                Ok(Some(parent.clone()))
            }
            NodeKind::Deferred { listener } => {
                if let Some(record) = listener.on_first_phase_row(parent, row)? {
                    let seen = (consumer.node, parent.identity(), record.identifier().clone());
                    if state.deferred_seen.insert(seen) {
                        state.inflated.deferred.push(record);
                    }
                }
                Ok(None)
            }
            NodeKind::Root { .. } => Ok(None),
        }
    }
}

fn matched(consumer: &Consumer, row: &ColumnedRow) -> EntwineResult<bool> {
    match &consumer.matched_by {
        Some(column) => Ok(!row.get(column)?.is_null()),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::inflater::{EntityInflater, RelationFixer, TypedInflater, TypedMerger};
    use crate::query::JoinTreeQueryBuilder;
    use crate::row::MemoryRow;
    use crate::schema::{Column, SqlType, Table};
    use crate::tree::{Join, JoinTree};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Country {
        id: i64,
        name: String,
        cities: Vec<Entity<City>>,
        president: Option<Entity<Person>>,
    }

    #[derive(Debug)]
    struct City {
        id: i64,
    }

    #[derive(Debug)]
    struct Person {
        id: i64,
        car: Option<Entity<Car>>,
        nickname: Option<String>,
    }

    #[derive(Debug)]
    struct Car {
        id: i64,
    }

    fn col(table: &Table, name: &str) -> Column {
        table.column(name).unwrap().clone()
    }

    struct Schema {
        country: Table,
        city: Table,
        person: Table,
        car: Table,
    }

    fn schema() -> Schema {
        Schema {
            country: Table::builder("country")
                .primary_key("id", SqlType::BigInt)
                .column("name", SqlType::Text)
                .nullable("president_id", SqlType::BigInt)
                .build(),
            city: Table::builder("city")
                .primary_key("id", SqlType::BigInt)
                .column("country_id", SqlType::BigInt)
                .build(),
            person: Table::builder("person")
                .primary_key("id", SqlType::BigInt)
                .nullable("car_id", SqlType::BigInt)
                .build(),
            car: Table::builder("car").primary_key("id", SqlType::BigInt).build(),
        }
    }

    fn country(table: &Table) -> Arc<dyn EntityInflater> {
        let id = col(table, "id");
        let name = col(table, "name");
        Arc::new(TypedInflater::new(table, move |row| {
            Ok(Country {
                id: row.try_get(&id)?,
                name: row.try_get(&name)?,
                cities: vec![],
                president: None,
            })
        }))
    }

    fn city(table: &Table) -> Arc<dyn EntityInflater> {
        let id = col(table, "id");
        Arc::new(TypedInflater::new(table, move |row| Ok(City { id: row.try_get(&id)? })))
    }

    fn person(table: &Table, built: Arc<AtomicUsize>) -> Arc<dyn EntityInflater> {
        let id = col(table, "id");
        Arc::new(TypedInflater::new(table, move |row| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Person {
                id: row.try_get(&id)?,
                car: None,
                nickname: None,
            })
        }))
    }

    fn car(table: &Table, built: Arc<AtomicUsize>) -> Arc<dyn EntityInflater> {
        let id = col(table, "id");
        Arc::new(TypedInflater::new(table, move |row| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Car { id: row.try_get(&id)? })
        }))
    }

    /// A row where every projected alias is null, then `values`.
    fn row(query: &CompiledQuery, values: &[(&str, Value)]) -> MemoryRow {
        let mut row: MemoryRow = query.aliases().iter().map(|alias| (alias, Value::Null)).collect();
        for (alias, value) in values {
            assert!(query.aliases().iter().any(|known| known == *alias), "{}", alias);
            row.set(*alias, value.clone());
        }
        row
    }

    fn countries(inflated: &Inflated) -> Vec<Entity<Country>> {
        inflated
            .roots()
            .iter()
            .map(|root| root.downcast::<Country>().unwrap())
            .collect()
    }

    #[test]
    fn one_to_many_rows_fold_into_one_root() {
        let s = schema();
        let mut tree = JoinTree::new(country(&s.country));
        tree.add_relation_join(
            "country",
            city(&s.city),
            Join::left_outer(&col(&s.country, "id"), &col(&s.city, "country_id")),
            RelationFixer::collect(|country: &mut Country| &mut country.cities),
            &[],
        )
        .unwrap();
        let query = JoinTreeQueryBuilder::new(&tree).compile().unwrap();

        let rows: Vec<_> = (1..=3)
            .map(|city| {
                row(
                    &query,
                    &[
                        ("country_id", Value::Int(1)),
                        ("country_name", "France".into()),
                        ("city_id", Value::Int(city)),
                        ("city_country_id", Value::Int(1)),
                    ],
                )
            })
            .collect();

        let inflated = TreeInflater::new(&query).run(rows).unwrap();
        let countries = countries(&inflated);

        assert_eq!(countries.len(), 1);
        let france = countries[0].lock();
        assert_eq!((france.id, france.name.as_str()), (1, "France"));
        let ids: Vec<_> = france.cities.iter().map(|city| city.lock().id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn repeated_rows_do_not_duplicate_children() {
        let s = schema();
        let mut tree = JoinTree::new(country(&s.country));
        tree.add_relation_join(
            "country",
            city(&s.city),
            Join::left_outer(&col(&s.country, "id"), &col(&s.city, "country_id")),
            RelationFixer::collect(|country: &mut Country| &mut country.cities),
            &[],
        )
        .unwrap();
        let query = JoinTreeQueryBuilder::new(&tree).compile().unwrap();

        let same = row(
            &query,
            &[
                ("country_id", Value::Int(1)),
                ("country_name", "France".into()),
                ("city_id", Value::Int(7)),
            ],
        );
        let inflated = TreeInflater::new(&query).run(vec![same.clone(), same]).unwrap();

        assert_eq!(countries(&inflated)[0].lock().cities.len(), 1);
        assert_eq!(inflated.materialized().len(), 2);
    }

    #[test]
    fn null_identifier_skips_whole_sub_tree() {
        let s = schema();
        let built = Arc::new(AtomicUsize::new(0));
        let fixed = Arc::new(AtomicUsize::new(0));

        let mut tree = JoinTree::new(country(&s.country));
        let president = tree
            .add_relation_join(
                "country",
                person(&s.person, built.clone()),
                Join::left_outer(&col(&s.country, "president_id"), &col(&s.person, "id")),
                RelationFixer::assign(|country: &mut Country| &mut country.president),
                &[],
            )
            .unwrap();
        let counter = fixed.clone();
        tree.add_relation_join(
            &president,
            car(&s.car, built.clone()),
            Join::inner(&col(&s.person, "car_id"), &col(&s.car, "id")),
            RelationFixer::new(move |person: &mut Person, car: Entity<Car>| {
                counter.fetch_add(1, Ordering::SeqCst);
                person.car = Some(car);
            }),
            &[],
        )
        .unwrap();
        let query = JoinTreeQueryBuilder::new(&tree).compile().unwrap();

        let orphan_car = row(
            &query,
            &[
                ("country_id", Value::Int(1)),
                ("country_name", "Utopia".into()),
                ("person_car_id", Value::Int(5)),
                ("person_car_id_1", Value::Int(5)),
            ],
        );
        let inflated = TreeInflater::new(&query).run(vec![orphan_car]).unwrap();

        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(fixed.load(Ordering::SeqCst), 0);
        assert!(countries(&inflated)[0].lock().president.is_none());
    }

    #[test]
    fn roots_never_share_children() {
        let s = schema();
        let built = Arc::new(AtomicUsize::new(0));
        let mut tree = JoinTree::new(country(&s.country));
        tree.add_relation_join(
            "country",
            person(&s.person, built.clone()),
            Join::left_outer(&col(&s.country, "president_id"), &col(&s.person, "id")),
            RelationFixer::assign(|country: &mut Country| &mut country.president),
            &[],
        )
        .unwrap();
        let query = JoinTreeQueryBuilder::new(&tree).compile().unwrap();

        let rows = vec![
            row(
                &query,
                &[
                    ("country_id", Value::Int(1)),
                    ("country_name", "A".into()),
                    ("person_id", Value::Int(9)),
                ],
            ),
            row(
                &query,
                &[
                    ("country_id", Value::Int(2)),
                    ("country_name", "B".into()),
                    ("person_id", Value::Int(9)),
                ],
            ),
        ];
        let inflated = TreeInflater::new(&query).run(rows).unwrap();
        let countries = countries(&inflated);

        assert_eq!(countries.len(), 2);
        assert_eq!(built.load(Ordering::SeqCst), 2);
        let first = countries[0].lock().president.clone().unwrap();
        let second = countries[1].lock().president.clone().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.lock().id, second.lock().id);
    }

    #[test]
    fn merge_and_passive_nodes_follow_their_match_column() {
        let s = schema();
        let alias = Table::builder("person_alias")
            .primary_key("person_id", SqlType::BigInt)
            .column("nickname", SqlType::Text)
            .build();

        let mut tree = JoinTree::new(person(&s.person, Arc::new(AtomicUsize::new(0))));
        let nickname = col(&alias, "nickname");
        tree.add_merge_join(
            "person",
            Arc::new(TypedMerger::new(&alias, move |person: &mut Person, row| {
                person.nickname = row.try_get(&nickname)?;
                Ok(())
            })),
            Join::left_outer(&col(&s.person, "id"), &col(&alias, "person_id")),
        )
        .unwrap();
        let query = JoinTreeQueryBuilder::new(&tree).compile().unwrap();

        let rows = vec![
            row(
                &query,
                &[
                    ("person_id", Value::Int(1)),
                    ("person_alias_person_id", Value::Int(1)),
                    ("person_alias_nickname", "Bob".into()),
                ],
            ),
            row(&query, &[("person_id", Value::Int(2))]),
        ];
        let inflated = TreeInflater::new(&query).run(rows).unwrap();
        let people: Vec<_> = inflated
            .roots()
            .iter()
            .map(|root| root.downcast::<Person>().unwrap())
            .collect();

        assert_eq!(people[0].lock().nickname.as_deref(), Some("Bob"));
        assert_eq!(people[1].lock().nickname, None);
    }

    #[test]
    fn rows_without_root_identifier_are_skipped() {
        let s = schema();
        let tree = JoinTree::new(country(&s.country));
        let query = JoinTreeQueryBuilder::new(&tree).compile().unwrap();

        let inflated = TreeInflater::new(&query)
            .run(vec![row(&query, &[])])
            .unwrap();
        assert!(inflated.roots().is_empty());
    }

    #[test]
    fn relation_identifier_equality() {
        let root = AnyEntity::new(City { id: 1 });
        let other = AnyEntity::new(City { id: 1 });
        let key = |root: &AnyEntity| {
            RelationIdentifier::new(Some(root), EntityType::of::<Car>(), Value::Int(3), NodeId(1))
        };

        assert_eq!(key(&root), key(&root));
        assert_ne!(key(&root), key(&other));
    }
}
