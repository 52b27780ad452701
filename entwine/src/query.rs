//!
//! Compilation of a [JoinTree] into one SELECT statement.
//!

use std::collections::{HashMap, HashSet};

use crate::builder::SqlBuilder;
use crate::entity::EntityType;
use crate::schema::{Column, Table, TableId};
use crate::tree::{JoinNode, JoinPredicate, JoinTree, NodeId, NodeKind};
use crate::{EntwineError, EntwineResult};

/// Longest identifier PostgreSQL keeps intact (`NAMEDATALEN - 1` bytes).
/// Longer aliases are truncated and suffixed.
pub const MAX_ALIAS_LEN: usize = 63;

/// Parameter marker style of a database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placeholder {
    /// `?`
    Anonymous,
    /// `$1`, `$2`, ...
    Numbered,
}

impl Placeholder {
    /// `index` starts at 1.
    pub fn marker(&self, index: usize) -> String {
        match self {
            Placeholder::Anonymous => "?".to_string(),
            Placeholder::Numbered => format!("${}", index),
        }
    }
}

#[derive(Clone, Debug)]
struct TableAlias {
    alias: String,
    table: TableId,
}

///
/// Where each projected column of each node ended up in the result set.
///
/// Keyed by node id and column, never by table name, so that a table joined
/// several times has one alias per join.
///
#[derive(Clone, Debug, Default)]
pub struct ColumnAliases {
    tables: HashMap<NodeId, TableAlias>,
    columns: HashMap<(NodeId, &'static str), String>,
    projection: Vec<String>,
}

impl ColumnAliases {
    pub fn table_alias(&self, node: NodeId) -> Option<&str> {
        self.tables.get(&node).map(|table| table.alias.as_str())
    }

    pub fn column_alias(&self, node: NodeId, column: &Column) -> Option<&str> {
        let table = self.tables.get(&node)?;
        if table.table != column.table_id() {
            return None;
        }
        self.columns
            .get(&(node, column.name()))
            .map(String::as_str)
    }

    /// Column aliases in projection order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.projection.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.projection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projection.is_empty()
    }
}

/// One node of the consumer tree: what the inflater does for a join node.
#[derive(Clone)]
pub(crate) struct Consumer {
    pub node: NodeId,
    pub kind: NodeKind,
    /// Right column of the join, read to tell whether an outer join matched.
    pub matched_by: Option<Column>,
    /// Indexes into [ConsumerTree::consumers], in join tree order.
    pub children: Vec<usize>,
}

/// Mirror of a [JoinTree], walked once per row. The root is at index 0.
#[derive(Clone)]
pub struct ConsumerTree {
    pub(crate) consumers: Vec<Consumer>,
}

impl ConsumerTree {
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

///
/// Outcome of compiling a [JoinTree]: SQL text, column aliases and the
/// consumer tree template.
///
/// Immutable, and shareable between threads and executions.
///
#[derive(Clone)]
pub struct CompiledQuery {
    sql: String,
    aliases: ColumnAliases,
    consumers: ConsumerTree,
    root_alias: String,
    root_identifier: Vec<Column>,
    root_type: EntityType,
}

impl CompiledQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn aliases(&self) -> &ColumnAliases {
        &self.aliases
    }

    pub fn consumers(&self) -> &ConsumerTree {
        &self.consumers
    }

    pub fn root_type(&self) -> EntityType {
        self.root_type
    }

    /// The statement restricted to `count` root identifiers, for instance
    /// `... where person.id in (?, ?)`.
    pub fn sql_with_identifiers(&self, count: usize, placeholder: Placeholder) -> String {
        let mut builder = SqlBuilder::new();
        builder.push(&self.sql);
        builder.push_word("where");

        if count == 0 {
            builder.push_word("1 = 0");
            return builder.build();
        }

        let width = self.root_identifier.len();
        builder.push_word("");
        if width > 1 {
            builder.push("(");
        }
        builder.start_list();
        for column in &self.root_identifier {
            builder.list_item();
            builder.push_column(&self.root_alias, column.name());
        }
        if width > 1 {
            builder.push(")");
        }
        builder.push(" in (");

        let mut index = 0;
        for row in 0..count {
            if row > 0 {
                builder.push(", ");
            }
            if width > 1 {
                builder.push("(");
            }
            for part in 0..width {
                if part > 0 {
                    builder.push(", ");
                }
                index += 1;
                builder.push(&placeholder.marker(index));
            }
            if width > 1 {
                builder.push(")");
            }
        }
        builder.push(")");

        builder.build()
    }
}

///
/// # JoinTreeQueryBuilder
///
/// Walks a [JoinTree] once, gives every node's table and columns their own
/// aliases, and emits the SELECT with its JOINs in tree order.
///
pub struct JoinTreeQueryBuilder<'t> {
    tree: &'t JoinTree,
}

impl<'t> JoinTreeQueryBuilder<'t> {
    pub fn new(tree: &'t JoinTree) -> Self {
        Self { tree }
    }

    pub fn compile(&self) -> EntwineResult<CompiledQuery> {
        let nodes: Vec<&JoinNode> = self.tree.iter_nodes_in_order().collect();

        let mut aliases = ColumnAliases::default();
        let mut used_tables = HashSet::new();
        let mut used_columns = HashSet::new();
        let mut selections: Vec<(NodeId, Vec<Column>)> = vec![];

        for node in &nodes {
            self.check_join(node)?;

            let table_alias = unique_alias(&mut used_tables, node.name());
            let columns = projected_columns(node)?;
            for column in &columns {
                let alias = unique_alias(
                    &mut used_columns,
                    &format!("{}_{}", table_alias, column.name()),
                );
                aliases.columns.insert((node.id(), column.name()), alias.clone());
                aliases.projection.push(alias);
            }
            aliases.tables.insert(
                node.id(),
                TableAlias {
                    alias: table_alias,
                    table: node.table().id(),
                },
            );
            selections.push((node.id(), columns));
        }

        if aliases.projection.is_empty() {
            return Err(EntwineError::SchemaMismatch(format!(
                "join tree rooted at {:?} selects no column",
                self.tree.root().table()
            )));
        }

        let mut builder = SqlBuilder::new();
        builder.push("select");
        builder.start_list();
        for (node, columns) in &selections {
            let table_alias = aliases.tables[node].alias.clone();
            for column in columns {
                builder.list_item();
                builder.push_column(&table_alias, column.name());
                builder.push(" as ");
                builder.push(&aliases.columns[&(*node, column.name())]);
            }
        }

        let root = self.tree.root();
        builder.push_word("from");
        let root_alias = aliases.tables[&root.id()].alias.clone();
        builder.push_table(root.table().name(), &root_alias);

        for node in nodes.iter().skip(1) {
            self.push_join(&mut builder, &aliases, node);
        }

        let sql = builder.build();
        log::debug!("compiled join tree of {} nodes: {}", nodes.len(), sql);

        let root_inflater = self.tree.root_inflater();

        Ok(CompiledQuery {
            sql,
            aliases,
            consumers: self.consumer_tree(&nodes),
            root_alias,
            root_identifier: root_inflater.identifier_columns().to_vec(),
            root_type: root_inflater.entity_type(),
        })
    }

    fn check_join(&self, node: &JoinNode) -> EntwineResult<()> {
        let (parent, join) = match (node.parent(), node.join()) {
            (Some(parent), Some(join)) => (self.tree.node_by_id(parent), join),
            _ => return Ok(()),
        };

        if let JoinPredicate::Columns { left, right, .. } = join.predicate() {
            check_column(parent.table(), left, node)?;
            check_column(node.table(), right, node)?;
        }
        Ok(())
    }

    fn push_join(&self, builder: &mut SqlBuilder, aliases: &ColumnAliases, node: &JoinNode) {
        let join = match node.join() {
            Some(join) => join,
            None => return,
        };
        let parent = match node.parent() {
            Some(parent) => aliases.tables[&parent].alias.as_str(),
            None => return,
        };
        let alias = aliases.tables[&node.id()].alias.as_str();

        match join.predicate() {
            JoinPredicate::Cross => {
                builder.push_word("cross join");
                builder.push_table(node.table().name(), alias);
            }
            JoinPredicate::Columns {
                left,
                right,
                clause,
            } => {
                builder.push_word(join.kind().keyword());
                builder.push_table(node.table().name(), alias);
                builder.push_word("on ");
                builder.push_column(parent, left.name());
                builder.push(" = ");
                builder.push_column(alias, right.name());

                if let Some(clause) = clause {
                    builder.push_word("and ");
                    builder.push(
                        &clause
                            .replace("{left}", parent)
                            .replace("{right}", alias),
                    );
                }
            }
        }
    }

    fn consumer_tree(&self, nodes: &[&JoinNode]) -> ConsumerTree {
        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();

        let consumers = nodes
            .iter()
            .map(|node| Consumer {
                node: node.id(),
                kind: node.kind().clone(),
                matched_by: match_column(node),
                children: node.children().iter().map(|child| index[child]).collect(),
            })
            .collect();

        ConsumerTree { consumers }
    }
}

/// Columns a node projects: its own, plus the right join column when that
/// is what tells a matched outer join from an unmatched one.
fn projected_columns(node: &JoinNode) -> EntwineResult<Vec<Column>> {
    let mut columns = node.columns_to_select();
    if let Some(column) = match_column(node) {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    match columns.iter().find(|column| !node.table().owns(column)) {
        Some(column) => Err(EntwineError::SchemaMismatch(format!(
            "node '{}' selects column '{}' which is not on table {:?}",
            node.name(),
            column.name(),
            node.table()
        ))),
        None => Ok(columns),
    }
}

fn match_column(node: &JoinNode) -> Option<Column> {
    match node.kind() {
        NodeKind::Merge { .. } | NodeKind::Passive => node.join()?.right().cloned(),
        _ => None,
    }
}

fn check_column(table: &Table, column: &Column, node: &JoinNode) -> EntwineResult<()> {
    if table.owns(column) {
        Ok(())
    } else {
        Err(EntwineError::SchemaMismatch(format!(
            "join of node '{}' uses column '{}' which is not on table {:?}",
            node.name(),
            column.name(),
            table
        )))
    }
}

/// `base`, or when taken or too long, `base` cut down to leave room for a
/// `_n` suffix. Uniqueness is checked on the emitted form.
fn unique_alias(used: &mut HashSet<String>, base: &str) -> String {
    let alias = if base.len() <= MAX_ALIAS_LEN && !used.contains(base) {
        base.to_string()
    } else {
        (1..)
            .map(|n| {
                let suffix = format!("_{}", n);
                format!("{}{}", truncate(base, MAX_ALIAS_LEN - suffix.len()), suffix)
            })
            .find(|candidate| !used.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    };
    used.insert(alias.clone());
    alias
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
