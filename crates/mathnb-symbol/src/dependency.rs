//! Symbol dependency analysis
//!
//! Derives three relationship roles from the top-level order:
//! - `DUPLICATE-DEFINITION`: each definer of a symbol to the next definer
//! - `SYMBOL-DEPENDENCY`: nearest strictly preceding definer to each user
//! - `EQUIVALENCE`: nearest preceding node with identical evaluation text
//!
//! The owner of a SYMBOL-DEFINITION, SYMBOL-USE or EVALUATION node is its
//! parent, placed at its top-level ancestor's position. At one position a
//! use resolves before a definition, so `X = X + 1` depends on the previous
//! `X`.
//!
//! [`DependencyAnalyzer`] is incremental: it collects the [`LinkKey`]s a
//! step's events can affect and reconciles only those. [`recompute_all`]
//! derives the complete set from scratch and is the oracle the incremental
//! result must equal.

use mathnb_rules::{ChangeAnalyzer, RuleResult};
use mathnb_store::{
    ChangeRequest, InsertRelationship, Node, NodeId, Notebook, NotebookChange, Relationship,
    RelationshipRole, Role,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// What a derived relationship is about
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkKey {
    /// A symbol name
    Symbol(String),
    /// Canonical evaluation text
    Value(String),
}

impl LinkKey {
    /// Key carried by a SYMBOL-* or EVALUATION node's payload
    #[must_use]
    pub fn of_node(role: Role, data: &Value) -> Option<Self> {
        match role {
            Role::SymbolDefinition | Role::SymbolUse => {
                data.get("name").and_then(Value::as_str).map(|n| Self::Symbol(n.to_string()))
            }
            Role::Evaluation => canonical_value(data).map(Self::Value),
            _ => None,
        }
    }

    /// Key of a derived relationship, `None` for roles this analyzer does not own
    #[must_use]
    pub fn of_relationship(relationship: &Relationship) -> Option<Self> {
        let field = |name: &str| relationship.data.get(name).and_then(Value::as_str).map(str::to_string);
        match relationship.role {
            RelationshipRole::SymbolDependency | RelationshipRole::DuplicateDefinition => {
                field("name").map(Self::Symbol)
            }
            RelationshipRole::Equivalence => field("value").map(Self::Value),
            RelationshipRole::HintDependency | RelationshipRole::Derivation => None,
        }
    }

    /// Relationship payload for this key
    #[must_use]
    pub fn data(&self) -> Value {
        match self {
            Self::Symbol(name) => json!({ "name": name }),
            Self::Value(value) => json!({ "value": value }),
        }
    }
}

fn canonical_value(data: &Value) -> Option<String> {
    let text = match data {
        Value::String(text) => text.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn is_derived_role(role: RelationshipRole) -> bool {
    matches!(
        role,
        RelationshipRole::SymbolDependency
            | RelationshipRole::DuplicateDefinition
            | RelationshipRole::Equivalence
    )
}

/// A derived relationship without its id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DerivedLink {
    /// Origin node
    pub from: NodeId,
    /// Target node
    pub to: NodeId,
    /// Relationship role
    pub role: RelationshipRole,
    /// Symbol or value the link is about
    pub key: LinkKey,
}

impl DerivedLink {
    fn of_relationship(relationship: &Relationship) -> Option<Self> {
        Some(Self {
            from: relationship.from_id,
            to: relationship.to_id,
            role: relationship.role,
            key: LinkKey::of_relationship(relationship)?,
        })
    }

    fn request(&self) -> ChangeRequest {
        InsertRelationship::new(self.from, self.to, self.role, self.key.data()).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Mark {
    // declaration order is the tie-break at one position
    Use,
    Definition,
    Evaluation,
}

/// Every `(position, owner, mark)` for `key`, sorted
fn occurrences(notebook: &Notebook, key: &LinkKey) -> Vec<(usize, NodeId, Mark)> {
    let mut found = BTreeSet::new();
    for node in notebook.nodes() {
        let mark = match node.role {
            Role::SymbolUse => Mark::Use,
            Role::SymbolDefinition => Mark::Definition,
            Role::Evaluation => Mark::Evaluation,
            _ => continue,
        };
        if node.parent_id.is_root() || LinkKey::of_node(node.role, &node.data).as_ref() != Some(key) {
            continue;
        }
        if let Some(position) = notebook.order_index(node.parent_id) {
            found.insert((position, node.parent_id, mark));
        }
    }
    found.into_iter().collect()
}

/// Links that should exist for `key`
fn desired_links(notebook: &Notebook, key: &LinkKey) -> BTreeSet<DerivedLink> {
    let link = |from, to, role| DerivedLink {
        from,
        to,
        role,
        key: key.clone(),
    };
    let mut links = BTreeSet::new();
    let mut latest: Option<NodeId> = None;

    for (_, owner, mark) in occurrences(notebook, key) {
        match mark {
            Mark::Use => {
                if let Some(definer) = latest.filter(|&d| d != owner) {
                    links.insert(link(definer, owner, RelationshipRole::SymbolDependency));
                }
            }
            Mark::Definition => {
                if let Some(previous) = latest.filter(|&d| d != owner) {
                    links.insert(link(previous, owner, RelationshipRole::DuplicateDefinition));
                }
                latest = Some(owner);
            }
            Mark::Evaluation => {
                if let Some(previous) = latest.filter(|&d| d != owner) {
                    links.insert(link(previous, owner, RelationshipRole::Equivalence));
                }
                latest = Some(owner);
            }
        }
    }
    links
}

/// Every key present in the notebook's nodes
fn all_keys(notebook: &Notebook) -> BTreeSet<LinkKey> {
    notebook
        .nodes()
        .filter(|n| !n.parent_id.is_root())
        .filter_map(|n| LinkKey::of_node(n.role, &n.data))
        .collect()
}

/// Full left-to-right derivation of every dependency, duplicate and equivalence link
#[must_use]
pub fn recompute_all(notebook: &Notebook) -> BTreeSet<DerivedLink> {
    all_keys(notebook)
        .iter()
        .flat_map(|key| desired_links(notebook, key))
        .collect()
}

/// Derived links currently stored in the notebook
#[must_use]
pub fn current_links(notebook: &Notebook) -> BTreeSet<DerivedLink> {
    notebook
        .relationships()
        .filter(|r| is_derived_role(r.role))
        .filter_map(DerivedLink::of_relationship)
        .collect()
}

/// Requests turning the stored links for `keys` into the desired ones
///
/// Stored links whose payload carries no key are removed as well.
#[must_use]
pub fn reconcile(notebook: &Notebook, keys: &BTreeSet<LinkKey>) -> Vec<ChangeRequest> {
    let mut existing: BTreeMap<&LinkKey, Vec<(DerivedLink, &Relationship)>> = BTreeMap::new();
    let mut requests = Vec::new();
    for relationship in notebook.relationships().filter(|r| is_derived_role(r.role)) {
        match DerivedLink::of_relationship(relationship) {
            Some(link) => {
                if let Some(key) = keys.get(&link.key) {
                    existing.entry(key).or_default().push((link, relationship));
                }
            }
            None => requests.push(ChangeRequest::DeleteRelationship {
                relationship_id: relationship.id,
            }),
        }
    }

    for key in keys {
        let mut desired = desired_links(notebook, key);
        for (link, relationship) in existing.remove(key).unwrap_or_default() {
            // keeps the first stored copy of each desired link
            if !desired.remove(&link) {
                requests.push(ChangeRequest::DeleteRelationship {
                    relationship_id: relationship.id,
                });
            }
        }
        requests.extend(desired.iter().map(DerivedLink::request));
    }
    requests
}

/// Keys `data` could carry under any role
///
/// A changed node may also be converted or deleted in the same step, so its
/// role at change time is not known here.
fn keys_of_payload(data: &Value) -> impl Iterator<Item = LinkKey> {
    let symbol = LinkKey::of_node(Role::SymbolUse, data);
    let value = LinkKey::of_node(Role::Evaluation, data);
    symbol.into_iter().chain(value)
}

/// Keys a step's events can affect
fn affected_keys(notebook: &Notebook, events: &[NotebookChange]) -> BTreeSet<LinkKey> {
    let mut keys = BTreeSet::new();
    for event in events {
        match event {
            NotebookChange::NodeInserted { node, .. } | NotebookChange::NodeDeleted { node, .. } => {
                keys.extend(LinkKey::of_node(node.role, &node.data));
            }
            NotebookChange::NodeChanged { previous, data, .. } => {
                keys.extend(keys_of_payload(previous));
                keys.extend(keys_of_payload(data));
            }
            NotebookChange::NodeConverted {
                previous, current, ..
            } => {
                keys.extend(LinkKey::of_node(previous.role, &previous.data));
                keys.extend(LinkKey::of_node(current.role, &current.data));
            }
            NotebookChange::NodeMoved { node_id, .. } => {
                keys.extend(
                    notebook
                        .descendants(*node_id)
                        .into_iter()
                        .filter_map(|id| notebook.node(id))
                        .filter_map(|node: &Node| LinkKey::of_node(node.role, &node.data)),
                );
            }
            NotebookChange::RelationshipInserted { relationship }
            | NotebookChange::RelationshipDeleted { relationship } => {
                keys.extend(LinkKey::of_relationship(relationship));
            }
        }
    }
    keys
}

/// Incremental maintainer of dependency, duplicate and equivalence links
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyAnalyzer;

impl ChangeAnalyzer for DependencyAnalyzer {
    fn name(&self) -> &str {
        "symbol-dependencies"
    }

    fn analyze(
        &self,
        notebook: &Notebook,
        events: &[NotebookChange],
        _source: &str,
    ) -> RuleResult<Vec<ChangeRequest>> {
        let keys = affected_keys(notebook, events);
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let requests = reconcile(notebook, &keys);
        tracing::trace!(keys = keys.len(), requests = requests.len(), "reconciled derived links");
        Ok(requests)
    }
}
