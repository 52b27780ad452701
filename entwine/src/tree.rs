//!
//! The join tree: which tables to join, how, and what to do with each
//! joined table's part of a row.
//!
//! Node order matters. Children are kept in insertion order, and
//! [JoinTree::iter_nodes_in_order] yields nodes breadth first. That is the
//! order of the JOIN clauses in the generated SQL, and the order in which the
//! inflater visits nodes for every row.
//!

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::cycle::FirstPhaseCycleLoadListener;
use crate::inflater::{EntityInflater, RelationFixer, RowMerger};
use crate::schema::{Column, Table};
use crate::{EntwineError, EntwineResult};

/// Synthetic node id, stable for the lifetime of a tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub(crate) usize);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    RightOuter,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "inner join",
            JoinKind::LeftOuter => "left outer join",
            JoinKind::RightOuter => "right outer join",
        }
    }
}

#[derive(Clone, Debug)]
pub enum JoinPredicate {
    /// `left = right`, optionally ANDed with a free-form clause.
    ///
    /// The clause may refer to the joined tables with `{left}` and `{right}`,
    /// which are replaced by their aliases.
    Columns {
        left: Column,
        right: Column,
        clause: Option<String>,
    },
    Cross,
}

#[derive(Clone, Debug)]
pub struct Join {
    predicate: JoinPredicate,
    kind: JoinKind,
}

impl Join {
    pub fn new(left: &Column, right: &Column, kind: JoinKind) -> Self {
        Self {
            predicate: JoinPredicate::Columns {
                left: left.clone(),
                right: right.clone(),
                clause: None,
            },
            kind,
        }
    }

    pub fn inner(left: &Column, right: &Column) -> Self {
        Self::new(left, right, JoinKind::Inner)
    }

    pub fn left_outer(left: &Column, right: &Column) -> Self {
        Self::new(left, right, JoinKind::LeftOuter)
    }

    pub fn right_outer(left: &Column, right: &Column) -> Self {
        Self::new(left, right, JoinKind::RightOuter)
    }

    pub fn cross() -> Self {
        Self {
            predicate: JoinPredicate::Cross,
            kind: JoinKind::Inner,
        }
    }

    /// Adds a free-form condition. Ignored for cross joins.
    pub fn with_clause(mut self, extra: impl Into<String>) -> Self {
        if let JoinPredicate::Columns { clause, .. } = &mut self.predicate {
            *clause = Some(extra.into());
        }
        self
    }

    pub fn predicate(&self) -> &JoinPredicate {
        &self.predicate
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    pub fn left(&self) -> Option<&Column> {
        match &self.predicate {
            JoinPredicate::Columns { left, .. } => Some(left),
            JoinPredicate::Cross => None,
        }
    }

    pub fn right(&self) -> Option<&Column> {
        match &self.predicate {
            JoinPredicate::Columns { right, .. } => Some(right),
            JoinPredicate::Cross => None,
        }
    }

    /// Re-targets the left column onto the same-named column of `table`.
    fn rebased(mut self, table: &Table) -> EntwineResult<Self> {
        if let JoinPredicate::Columns { left, .. } = &mut self.predicate {
            if left.table_id() != table.id() {
                *left = table.column(left.name()).cloned().ok_or_else(|| {
                    EntwineError::SchemaMismatch(format!(
                        "cannot graft a join on '{}' onto table {:?}",
                        left.name(),
                        table
                    ))
                })?;
            }
        }
        Ok(self)
    }
}

/// What a node does with its part of each row.
#[derive(Clone)]
pub enum NodeKind {
    Root {
        inflater: Arc<dyn EntityInflater>,
    },
    /// Introduces a related entity, linked to the parent's entity by `fixer`.
    Relation {
        inflater: Arc<dyn EntityInflater>,
        fixer: RelationFixer,
    },
    /// Merges columns into the parent's entity.
    Merge {
        merger: Arc<dyn RowMerger>,
    },
    /// Structural join; children see the parent's entity.
    Passive,
    /// Collects identifiers of a cyclic relation for a second phase load.
    Deferred {
        listener: FirstPhaseCycleLoadListener,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Root { .. } => "root",
            NodeKind::Relation { .. } => "relation",
            NodeKind::Merge { .. } => "merge",
            NodeKind::Passive => "passive",
            NodeKind::Deferred { .. } => "deferred",
        }
    }
}

#[derive(Clone)]
pub struct JoinNode {
    id: NodeId,
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    table: Table,
    join: Option<Join>,
    kind: NodeKind,
    excluded: Vec<Column>,
}

impl JoinNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Unique within the tree, and the basis of the node's SQL alias.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The table this node introduces. The left table of its join is the
    /// parent's table.
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// `None` for the root.
    pub fn join(&self) -> Option<&Join> {
        self.join.as_ref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn columns_to_select(&self) -> Vec<Column> {
        let columns: &[Column] = match &self.kind {
            NodeKind::Root { inflater } | NodeKind::Relation { inflater, .. } => {
                inflater.columns_to_select()
            }
            NodeKind::Merge { merger } => merger.columns_to_select(),
            NodeKind::Passive => &[],
            NodeKind::Deferred { listener } => listener.identifier_columns(),
        };

        columns
            .iter()
            .filter(|column| !self.excluded.contains(column))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for JoinNode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "{} {}({})",
            self.kind.label(),
            self.name,
            self.table.name()
        )
    }
}

///
/// # JoinTree
///
/// A root node (root entity and table) plus relation nodes. Owns all its
/// nodes; every non-root node has exactly one parent.
///
/// Node names are generated: the root is named after its table, a child of
/// the root after the table it joins, and deeper children are prefixed with
/// their parent's name (`<parent>_<table>`). A numeric suffix breaks ties.
///
#[derive(Clone)]
pub struct JoinTree {
    nodes: Vec<JoinNode>,
    by_name: HashMap<String, NodeId>,
}

impl JoinTree {
    pub fn new(inflater: Arc<dyn EntityInflater>) -> Self {
        let table = inflater.table().clone();
        let name = table.name().to_string();
        let root = JoinNode {
            id: NodeId(0),
            name: name.clone(),
            parent: None,
            children: vec![],
            table,
            join: None,
            kind: NodeKind::Root { inflater },
            excluded: vec![],
        };

        let mut by_name = HashMap::new();
        by_name.insert(name, NodeId(0));

        Self {
            nodes: vec![root],
            by_name,
        }
    }

    pub fn root(&self) -> &JoinNode {
        &self.nodes[0]
    }

    pub fn root_inflater(&self) -> &Arc<dyn EntityInflater> {
        match &self.nodes[0].kind {
            NodeKind::Root { inflater } => inflater,
            _ => unreachable!("node 0 is always the root"),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    ///
    /// Joins the entity of `inflater` under `parent`, as its last child.
    ///
    /// `excluded` columns are left out of the projection, for tables whose
    /// columns are already read through another join.
    ///
    pub fn add_relation_join(
        &mut self,
        parent: &str,
        inflater: Arc<dyn EntityInflater>,
        join: Join,
        fixer: RelationFixer,
        excluded: &[Column],
    ) -> EntwineResult<String> {
        let parent = self.id_of(parent)?;
        let table = inflater.table().clone();
        Ok(self.push_node(
            parent,
            table,
            Some(join),
            NodeKind::Relation { inflater, fixer },
            excluded.to_vec(),
        ))
    }

    pub fn add_merge_join(
        &mut self,
        parent: &str,
        merger: Arc<dyn RowMerger>,
        join: Join,
    ) -> EntwineResult<String> {
        let parent = self.id_of(parent)?;
        let table = merger.table().clone();
        Ok(self.push_node(parent, table, Some(join), NodeKind::Merge { merger }, vec![]))
    }

    pub fn add_passive_join(
        &mut self,
        parent: &str,
        table: &Table,
        join: Join,
    ) -> EntwineResult<String> {
        let parent = self.id_of(parent)?;
        Ok(self.push_node(parent, table.clone(), Some(join), NodeKind::Passive, vec![]))
    }

    pub fn add_deferred_join(
        &mut self,
        parent: &str,
        table: &Table,
        join: Join,
        listener: FirstPhaseCycleLoadListener,
    ) -> EntwineResult<String> {
        let parent = self.id_of(parent)?;
        Ok(self.push_node(
            parent,
            table.clone(),
            Some(join),
            NodeKind::Deferred { listener },
            vec![],
        ))
    }

    pub fn node(&self, name: &str) -> Option<&JoinNode> {
        self.by_name.get(name).map(|id| &self.nodes[id.0])
    }

    pub fn get(&self, name: &str) -> EntwineResult<&JoinNode> {
        self.node(name)
            .ok_or_else(|| EntwineError::UnknownNode(name.to_string()))
    }

    pub fn node_by_id(&self, id: NodeId) -> &JoinNode {
        &self.nodes[id.0]
    }

    /// Finds the node joined on `left = right`. Fails if several are.
    pub fn node_by_columns(&self, left: &Column, right: &Column) -> EntwineResult<Option<&JoinNode>> {
        let found: Vec<&JoinNode> = self
            .nodes
            .iter()
            .filter(|node| {
                node.join
                    .as_ref()
                    .map(|join| join.left() == Some(left) && join.right() == Some(right))
                    .unwrap_or(false)
            })
            .collect();

        match found.as_slice() {
            [] => Ok(None),
            [node] => Ok(Some(*node)),
            _ => Err(EntwineError::AmbiguousJoin {
                left: left.name().to_string(),
                right: right.name().to_string(),
            }),
        }
    }

    ///
    /// Copies the sub-tree at `source_node` of `source` under `onto` in this
    /// tree, returning the names of the copies.
    ///
    /// `source` is left untouched. When `source_node` is the source root,
    /// only its children are copied, the root itself not being a join.
    /// Left join columns are re-targeted to the same-named columns of
    /// `onto`'s table when the two tables differ.
    ///
    pub fn project(
        &mut self,
        source: &JoinTree,
        source_node: &str,
        onto: &str,
    ) -> EntwineResult<Vec<String>> {
        let onto = self.id_of(onto)?;
        let start = source.get(source_node)?;

        let mut queue: VecDeque<(NodeId, NodeId)> = if start.is_root() {
            start.children.iter().map(|child| (*child, onto)).collect()
        } else {
            VecDeque::from(vec![(start.id, onto)])
        };

        let mut added = vec![];
        while let Some((copied, parent)) = queue.pop_front() {
            let node = source.node_by_id(copied);
            let parent_table = self.nodes[parent.0].table.clone();
            let join = match node.join.clone() {
                Some(join) => Some(join.rebased(&parent_table)?),
                None => None,
            };

            let name = self.push_node(
                parent,
                node.table.clone(),
                join,
                node.kind.clone(),
                node.excluded.clone(),
            );
            let id = self.by_name[&name];
            added.push(name);

            for child in &node.children {
                queue.push_back((*child, id));
            }
        }

        Ok(added)
    }

    /// Every table of the tree, once per table identity, in node order.
    pub fn all_tables(&self) -> Vec<Table> {
        let mut seen = HashSet::new();
        self.iter_nodes_in_order()
            .filter(|node| seen.insert(node.table.id()))
            .map(|node| node.table.clone())
            .collect()
    }

    /// Breadth first, children in insertion order.
    pub fn iter_nodes_in_order(&self) -> NodesInOrder<'_> {
        NodesInOrder {
            tree: self,
            queue: VecDeque::from(vec![NodeId(0)]),
        }
    }

    fn id_of(&self, name: &str) -> EntwineResult<NodeId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EntwineError::UnknownNode(name.to_string()))
    }

    fn push_node(
        &mut self,
        parent: NodeId,
        table: Table,
        join: Option<Join>,
        kind: NodeKind,
        excluded: Vec<Column>,
    ) -> String {
        let name = self.unique_name(parent, table.name());
        let id = NodeId(self.nodes.len());

        self.nodes.push(JoinNode {
            id,
            name: name.clone(),
            parent: Some(parent),
            children: vec![],
            table,
            join,
            kind,
            excluded,
        });
        self.nodes[parent.0].children.push(id);
        self.by_name.insert(name.clone(), id);

        name
    }

    fn unique_name(&self, parent: NodeId, local: &str) -> String {
        let parent = &self.nodes[parent.0];
        let base = if parent.is_root() {
            local.to_string()
        } else {
            format!("{}_{}", parent.name, local)
        };

        if !self.by_name.contains_key(&base) {
            return base;
        }

        (1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| !self.by_name.contains_key(candidate))
            .unwrap_or(base)
    }
}

impl std::fmt::Debug for JoinTree {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_list().entries(self.iter_nodes_in_order()).finish()
    }
}

pub struct NodesInOrder<'t> {
    tree: &'t JoinTree,
    queue: VecDeque<NodeId>,
}

impl<'t> Iterator for NodesInOrder<'t> {
    type Item = &'t JoinNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.queue.pop_front()?;
        let node = self.tree.node_by_id(id);
        self.queue.extend(node.children.iter().copied());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflater::TypedInflater;
    use crate::schema::SqlType;

    struct Person;
    struct Car;

    fn person_table() -> Table {
        Table::builder("person")
            .primary_key("id", SqlType::BigInt)
            .column("name", SqlType::Text)
            .nullable("mother_id", SqlType::BigInt)
            .build()
    }

    fn car_table() -> Table {
        Table::builder("car")
            .primary_key("id", SqlType::BigInt)
            .column("owner_id", SqlType::BigInt)
            .build()
    }

    fn person(table: &Table) -> Arc<dyn EntityInflater> {
        Arc::new(TypedInflater::new(table, |_| Ok(Person)))
    }

    fn car(table: &Table) -> Arc<dyn EntityInflater> {
        Arc::new(TypedInflater::new(table, |_| Ok(Car)))
    }

    fn col(table: &Table, name: &str) -> Column {
        table.column(name).unwrap().clone()
    }

    #[test]
    fn unknown_parent_is_a_configuration_error() {
        let person = person_table();
        let car = car_table();
        let mut tree = JoinTree::new(self::person(&person));

        let err = tree
            .add_relation_join(
                "nope",
                self::car(&car),
                Join::left_outer(&col(&person, "id"), &col(&car, "owner_id")),
                RelationFixer::none(),
                &[],
            )
            .unwrap_err();

        assert!(matches!(err, EntwineError::UnknownNode(ref name) if name == "nope"));
        assert!(err.is_configuration());
    }

    #[test]
    fn names_follow_parents_and_break_ties() {
        let person = person_table();
        let mother = person.duplicate();
        let grandmother = person.duplicate();
        let car = car_table();
        let mut tree = JoinTree::new(self::person(&person));

        let mother_name = tree
            .add_relation_join(
                "person",
                self::person(&mother),
                Join::left_outer(&col(&person, "mother_id"), &col(&mother, "id")),
                RelationFixer::none(),
                &[],
            )
            .unwrap();
        let car_name = tree
            .add_relation_join(
                "person",
                self::car(&car),
                Join::left_outer(&col(&person, "id"), &col(&car, "owner_id")),
                RelationFixer::none(),
                &[],
            )
            .unwrap();
        let grandmother_name = tree
            .add_relation_join(
                &mother_name,
                self::person(&grandmother),
                Join::left_outer(&col(&mother, "mother_id"), &col(&grandmother, "id")),
                RelationFixer::none(),
                &[],
            )
            .unwrap();

        assert_eq!(mother_name, "person_1");
        assert_eq!(car_name, "car");
        assert_eq!(grandmother_name, "person_1_person");
        assert_eq!(tree.all_tables().len(), 4);
    }

    #[test]
    fn nodes_in_breadth_first_insertion_order() {
        let person = person_table();
        let car = car_table();
        let wheel = Table::builder("wheel")
            .primary_key("id", SqlType::BigInt)
            .column("car_id", SqlType::BigInt)
            .build();
        let house = Table::builder("house")
            .primary_key("id", SqlType::BigInt)
            .column("owner_id", SqlType::BigInt)
            .build();
        let mut tree = JoinTree::new(self::person(&person));

        let car_name = tree
            .add_passive_join(
                "person",
                &car,
                Join::left_outer(&col(&person, "id"), &col(&car, "owner_id")),
            )
            .unwrap();
        tree.add_passive_join(
            &car_name,
            &wheel,
            Join::left_outer(&col(&car, "id"), &col(&wheel, "car_id")),
        )
        .unwrap();
        tree.add_passive_join(
            "person",
            &house,
            Join::left_outer(&col(&person, "id"), &col(&house, "owner_id")),
        )
        .unwrap();

        let names: Vec<_> = tree.iter_nodes_in_order().map(JoinNode::name).collect();
        assert_eq!(names, vec!["person", "car", "house", "car_wheel"]);
        assert_eq!(tree.len(), 4);
        assert!(!tree.is_empty());

        let bare = JoinTree::new(self::person(&person));
        assert_eq!(bare.len(), 1);
        assert!(!bare.is_empty());
    }

    #[test]
    fn lookup_by_columns_detects_ambiguity() {
        let person = person_table();
        let car = car_table();
        let mut tree = JoinTree::new(self::person(&person));
        let join = Join::left_outer(&col(&person, "id"), &col(&car, "owner_id"));

        tree.add_passive_join("person", &car, join.clone()).unwrap();
        assert_eq!(
            tree.node_by_columns(&col(&person, "id"), &col(&car, "owner_id"))
                .unwrap()
                .map(JoinNode::name),
            Some("car")
        );
        assert!(tree
            .node_by_columns(&col(&person, "name"), &col(&car, "owner_id"))
            .unwrap()
            .is_none());

        tree.add_passive_join("person", &car, join).unwrap();
        assert!(matches!(
            tree.node_by_columns(&col(&person, "id"), &col(&car, "owner_id")),
            Err(EntwineError::AmbiguousJoin { .. })
        ));
    }

    #[test]
    fn project_copies_subtree_and_leaves_source_alone() {
        let person = person_table();
        let car = car_table();
        let wheel = Table::builder("wheel")
            .primary_key("id", SqlType::BigInt)
            .column("car_id", SqlType::BigInt)
            .build();

        let mut source = JoinTree::new(self::car(&car));
        source
            .add_passive_join(
                "car",
                &wheel,
                Join::inner(&col(&car, "id"), &col(&wheel, "car_id")),
            )
            .unwrap();

        let mut target = JoinTree::new(self::person(&person));
        let car_name = target
            .add_relation_join(
                "person",
                self::car(&car),
                Join::left_outer(&col(&person, "id"), &col(&car, "owner_id")),
                RelationFixer::none(),
                &[],
            )
            .unwrap();

        let added = target.project(&source, "car", &car_name).unwrap();

        assert_eq!(added, vec!["car_wheel".to_string()]);
        assert_eq!(source.len(), 2);
        assert_eq!(target.len(), 3);
        let grafted = target.get("car_wheel").unwrap();
        assert_eq!(grafted.parent(), Some(target.get("car").unwrap().id()));
        assert_eq!(source.get("wheel").unwrap().children().len(), 0);
    }

    #[test]
    fn project_rebases_onto_other_table_instance() {
        let car = car_table();
        let other_car = car.duplicate();
        let wheel = Table::builder("wheel")
            .primary_key("id", SqlType::BigInt)
            .column("car_id", SqlType::BigInt)
            .build();

        let mut source = JoinTree::new(self::car(&car));
        source
            .add_passive_join(
                "car",
                &wheel,
                Join::inner(&col(&car, "id"), &col(&wheel, "car_id")),
            )
            .unwrap();

        let mut target = JoinTree::new(self::car(&other_car));
        target.project(&source, "car", "car").unwrap();

        let join = target.get("wheel").unwrap().join().unwrap();
        assert_eq!(join.left(), Some(&col(&other_car, "id")));
    }
}
