//! Node store: the notebook forest, its relationships and top-level order
//!
//! [`Notebook`] holds pure data plus structural operations. It has no policy:
//! rules, undo and batching live above it. Every mutating operation validates
//! first and mutates second, so a failed call leaves the store untouched, and
//! returns the [`NotebookChange`] events describing what it did.
//!
//! Nodes live in a flat arena keyed by id. A children index and a cached
//! top-level-ancestor index are kept in step on insert and delete so position
//! lookups never walk parent chains.

use crate::change::{ChangeRequest, InsertNode, InsertRelationship, NotebookChange};
use crate::document::PageConfig;
use crate::error::{StoreError, StoreResult};
use crate::ids::{NodeId, RelationshipId};
use crate::node::{Node, NodeKind, NodeType, Relationship, Role, Subrole};
use crate::pattern::NodePattern;
use crate::position::Position;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// An in-memory notebook
#[derive(Debug, Clone)]
pub struct Notebook {
    next_id: u64,
    page_config: PageConfig,
    top_level_order: Vec<NodeId>,
    nodes: BTreeMap<NodeId, Node>,
    relationships: BTreeMap<RelationshipId, Relationship>,
    /// parent -> children, including the root
    children: HashMap<NodeId, BTreeSet<NodeId>>,
    /// node -> top-level ancestor (itself for top-level nodes)
    top_ancestor: HashMap<NodeId, NodeId>,
}

impl Default for Notebook {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Notebook {
    fn eq(&self, other: &Self) -> bool {
        self.next_id == other.next_id && self.same_content(other)
    }
}

impl Notebook {
    /// Create empty notebook with the default page configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_config(PageConfig::default())
    }

    /// Create empty notebook with `page_config`
    #[must_use]
    pub fn with_page_config(page_config: PageConfig) -> Self {
        Self {
            next_id: 1,
            page_config,
            top_level_order: Vec::new(),
            nodes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            children: HashMap::new(),
            top_ancestor: HashMap::new(),
        }
    }

    /// Assemble from parts, rebuilding the derived indexes
    ///
    /// Callers must have validated the parts (see [`crate::document`]).
    pub(crate) fn from_parts(
        next_id: u64,
        page_config: PageConfig,
        top_level_order: Vec<NodeId>,
        nodes: BTreeMap<NodeId, Node>,
        relationships: BTreeMap<RelationshipId, Relationship>,
    ) -> Self {
        let mut notebook = Self {
            next_id,
            page_config,
            top_level_order,
            nodes,
            relationships,
            children: HashMap::new(),
            top_ancestor: HashMap::new(),
        };
        notebook.rebuild_indexes();
        notebook
    }

    fn rebuild_indexes(&mut self) {
        self.children.clear();
        self.top_ancestor.clear();
        for node in self.nodes.values() {
            self.children.entry(node.parent_id).or_default().insert(node.id);
        }
        let mut stack: Vec<(NodeId, NodeId)> =
            self.top_level_order.iter().map(|&id| (id, id)).collect();
        while let Some((id, top)) = stack.pop() {
            self.top_ancestor.insert(id, top);
            if let Some(kids) = self.children.get(&id) {
                stack.extend(kids.iter().map(|&kid| (kid, top)));
            }
        }
    }

    /// Compare nodes, relationships, order and page configuration, ignoring `nextId`
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.page_config == other.page_config
            && self.top_level_order == other.top_level_order
            && self.nodes == other.nodes
            && self.relationships == other.relationships
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Next id to be assigned
    #[inline]
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Page configuration
    #[inline]
    #[must_use]
    pub fn page_config(&self) -> &PageConfig {
        &self.page_config
    }

    /// Authoritative order of top-level nodes
    #[inline]
    #[must_use]
    pub fn top_level_order(&self) -> &[NodeId] {
        &self.top_level_order
    }

    /// Node by id
    #[inline]
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Node by id, or a structural error
    ///
    /// # Errors
    /// `StoreError::UnknownNode` if the id is not live
    pub fn get_node(&self, id: NodeId) -> StoreResult<&Node> {
        self.nodes.get(&id).ok_or(StoreError::UnknownNode(id))
    }

    /// Check node existence
    #[inline]
    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Number of live nodes
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the notebook has no nodes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Relationship by id
    #[inline]
    #[must_use]
    pub fn relationship(&self, id: RelationshipId) -> Option<&Relationship> {
        self.relationships.get(&id)
    }

    /// All relationships in id order
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    /// Relationships with `node` as either endpoint
    pub fn relationships_touching(&self, node: NodeId) -> impl Iterator<Item = &Relationship> {
        self.relationships.values().filter(move |r| r.touches(node))
    }

    /// Direct children of `parent` in id order
    pub fn children_of(&self, parent: NodeId) -> impl Iterator<Item = &Node> {
        self.children
            .get(&parent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Descendants of `id` in pre-order, excluding `id`
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_pre_order(id, &mut out);
        out
    }

    fn collect_pre_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if let Some(kids) = self.children.get(&id) {
            for &kid in kids {
                out.push(kid);
                self.collect_pre_order(kid, out);
            }
        }
    }

    fn collect_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if let Some(kids) = self.children.get(&id) {
            for &kid in kids {
                self.collect_post_order(kid, out);
            }
        }
        out.push(id);
    }

    /// Top-level ancestor of `id` (itself when top-level)
    #[inline]
    #[must_use]
    pub fn top_level_ancestor(&self, id: NodeId) -> Option<NodeId> {
        self.top_ancestor.get(&id).copied()
    }

    /// Index in the top-level order of the node's top-level ancestor
    #[must_use]
    pub fn order_index(&self, id: NodeId) -> Option<usize> {
        let top = self.top_level_ancestor(id)?;
        self.top_level_order.iter().position(|&t| t == top)
    }

    /// Relative document order of two nodes
    ///
    /// Nested nodes compare at the position of their top-level ancestor, so two
    /// nodes under the same top-level node compare equal.
    ///
    /// # Errors
    /// `StoreError::UnknownNode` if either id is not live
    pub fn compare(&self, a: NodeId, b: NodeId) -> StoreResult<Ordering> {
        let ia = self.order_index(a).ok_or(StoreError::UnknownNode(a))?;
        let ib = self.order_index(b).ok_or(StoreError::UnknownNode(b))?;
        Ok(ia.cmp(&ib))
    }

    /// Nodes matching `pattern`, in document order
    ///
    /// With a `scope`, only its descendants are considered (direct children when
    /// `recursive` is false). Without one, the whole notebook is searched (only
    /// top-level nodes when `recursive` is false).
    #[must_use]
    pub fn find_nodes(
        &self,
        pattern: &NodePattern,
        scope: Option<NodeId>,
        recursive: bool,
    ) -> Vec<&Node> {
        let mut candidates = Vec::new();
        match scope {
            Some(scope) if recursive => self.collect_pre_order(scope, &mut candidates),
            Some(scope) => candidates.extend(self.children_of(scope).map(|n| n.id)),
            None => {
                for &top in &self.top_level_order {
                    candidates.push(top);
                    if recursive {
                        self.collect_pre_order(top, &mut candidates);
                    }
                }
            }
        }
        candidates
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .filter(|node| pattern.matches(node, self))
            .collect()
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Check that `request` can be applied to the current state
    ///
    /// # Errors
    /// The structural error the request would raise
    pub fn validate(&self, request: &ChangeRequest) -> StoreResult<()> {
        match request {
            ChangeRequest::InsertNode(insert) => self.validate_insert(insert).map(|_| ()),
            ChangeRequest::DeleteNode { node_id }
            | ChangeRequest::ChangeNode { node_id, .. }
            | ChangeRequest::ConvertNode { node_id, .. }
            | ChangeRequest::UseTool { node_id } => self.get_node(*node_id).map(|_| ()),
            ChangeRequest::MoveNode { node_id, position } => self.validate_move(*node_id, *position),
            ChangeRequest::InsertRelationship(insert) => self.validate_relationship(insert),
            ChangeRequest::DeleteRelationship { relationship_id } => self
                .relationships
                .get(relationship_id)
                .map(|_| ())
                .ok_or(StoreError::UnknownRelationship(*relationship_id)),
        }
    }

    /// Validate an insert and return the exclusive siblings it will replace
    fn validate_insert(&self, insert: &InsertNode) -> StoreResult<Vec<NodeId>> {
        let parent = insert.parent_id;
        if !parent.is_root() && !self.nodes.contains_key(&parent) {
            return Err(StoreError::UnknownNode(parent));
        }
        if let Some(id) = insert.node_id {
            if id.is_root() || id == parent {
                return Err(StoreError::CyclicParent(id));
            }
            if self.nodes.contains_key(&id) {
                return Err(StoreError::NodeIdInUse(id));
            }
        }

        let replaced = if insert.exclusive_child_type_and_role {
            self.exclusive_siblings(parent, insert.node_type, insert.role)
        } else {
            Vec::new()
        };

        if parent.is_root() {
            if let Some(anchor) = insert.position.anchor() {
                let node = insert.node_id.unwrap_or(NodeId(self.next_id));
                if replaced.contains(&anchor) || !self.is_top_level_node(anchor) {
                    return Err(StoreError::InvalidAnchor { node, anchor });
                }
            }
        }
        Ok(replaced)
    }

    fn validate_move(&self, node_id: NodeId, position: Position) -> StoreResult<()> {
        let node = self.get_node(node_id)?;
        if !node.is_top_level() {
            return Err(StoreError::NotTopLevel(node_id));
        }
        if let Some(anchor) = position.anchor() {
            if anchor == node_id || !self.is_top_level_node(anchor) {
                return Err(StoreError::InvalidAnchor {
                    node: node_id,
                    anchor,
                });
            }
        }
        Ok(())
    }

    fn validate_relationship(&self, insert: &InsertRelationship) -> StoreResult<()> {
        self.get_node(insert.from_id)?;
        self.get_node(insert.to_id)?;
        if let Some(id) = insert.relationship_id {
            if self.relationships.contains_key(&id) {
                return Err(StoreError::RelationshipIdInUse(id));
            }
        }
        Ok(())
    }

    fn is_top_level_node(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(Node::is_top_level)
    }

    fn exclusive_siblings(&self, parent: NodeId, node_type: NodeType, role: Role) -> Vec<NodeId> {
        self.children_of(parent)
            .filter(|n| n.node_type == node_type && n.role == role)
            .map(|n| n.id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Apply one request
    ///
    /// `UseTool` has no structural effect at this level and yields no events.
    ///
    /// # Errors
    /// Any structural error; the notebook is unchanged on error
    pub fn apply(&mut self, request: &ChangeRequest) -> StoreResult<Vec<NotebookChange>> {
        match request {
            ChangeRequest::InsertNode(insert) => self.insert(insert.clone()).map(|(_, events)| events),
            ChangeRequest::DeleteNode { node_id } => self.delete(*node_id),
            ChangeRequest::ChangeNode { node_id, data } => self.change(*node_id, data.clone()),
            ChangeRequest::MoveNode { node_id, position } => self.move_node(*node_id, *position),
            ChangeRequest::ConvertNode {
                node_id,
                role,
                subrole,
                node_type,
                data,
            } => self.convert(*node_id, *role, *subrole, *node_type, data.clone()),
            ChangeRequest::UseTool { node_id } => self.get_node(*node_id).map(|_| Vec::new()),
            ChangeRequest::InsertRelationship(insert) => self
                .insert_relationship(insert.clone())
                .map(|(_, events)| events),
            ChangeRequest::DeleteRelationship { relationship_id } => {
                self.delete_relationship(*relationship_id)
            }
        }
    }

    /// Insert a node
    ///
    /// An exclusive insert first deletes every sibling with the same
    /// `(parent, type, role)`, so exactly one survives.
    ///
    /// # Errors
    /// Unknown parent, id already in use, or invalid position anchor
    pub fn insert(&mut self, insert: InsertNode) -> StoreResult<(NodeId, Vec<NotebookChange>)> {
        let replaced = self.validate_insert(&insert)?;

        let mut events = Vec::new();
        for sibling in replaced {
            events.extend(self.delete(sibling)?);
        }

        let id = match insert.node_id {
            Some(id) => {
                self.next_id = self.next_id.max(id.get() + 1);
                id
            }
            None => self.allocate_id(),
        };

        let node = Node {
            id,
            parent_id: insert.parent_id,
            role: insert.role,
            subrole: insert.subrole,
            node_type: insert.node_type,
            source: insert.source,
            data: insert.data,
        };

        let position = if node.is_top_level() {
            let index = self.resolve_index(id, insert.position)?;
            self.top_level_order.insert(index, id);
            self.top_ancestor.insert(id, id);
            Some(self.position_at(index))
        } else {
            let top = self
                .top_level_ancestor(node.parent_id)
                .ok_or(StoreError::UnknownNode(node.parent_id))?;
            self.top_ancestor.insert(id, top);
            None
        };

        self.children.entry(node.parent_id).or_default().insert(id);
        self.nodes.insert(id, node.clone());
        events.push(NotebookChange::NodeInserted { node, position });
        Ok((id, events))
    }

    /// Delete a node, its descendants, and every relationship touching them
    ///
    /// Events list the relationships first, then the nodes children-first.
    ///
    /// # Errors
    /// `StoreError::UnknownNode` if the node is not live
    pub fn delete(&mut self, id: NodeId) -> StoreResult<Vec<NotebookChange>> {
        self.get_node(id)?;

        let mut doomed = Vec::new();
        self.collect_post_order(id, &mut doomed);
        let doomed_set: BTreeSet<NodeId> = doomed.iter().copied().collect();

        let mut events = Vec::new();
        let rel_ids: Vec<RelationshipId> = self
            .relationships
            .values()
            .filter(|r| doomed_set.contains(&r.from_id) || doomed_set.contains(&r.to_id))
            .map(|r| r.id)
            .collect();
        for rel_id in rel_ids {
            if let Some(relationship) = self.relationships.remove(&rel_id) {
                events.push(NotebookChange::RelationshipDeleted { relationship });
            }
        }

        for node_id in doomed {
            let Some(node) = self.nodes.remove(&node_id) else {
                continue;
            };
            let position = if node.is_top_level() {
                let index = self.top_level_order.iter().position(|&t| t == node_id);
                index.map(|index| {
                    let position = self.position_at(index);
                    self.top_level_order.remove(index);
                    position
                })
            } else {
                None
            };
            if let Some(siblings) = self.children.get_mut(&node.parent_id) {
                siblings.remove(&node_id);
            }
            self.children.remove(&node_id);
            self.top_ancestor.remove(&node_id);
            events.push(NotebookChange::NodeDeleted { node, position });
        }
        Ok(events)
    }

    /// Replace a node's payload; no event when the payload is unchanged
    ///
    /// # Errors
    /// `StoreError::UnknownNode` if the node is not live
    pub fn change(&mut self, id: NodeId, data: Value) -> StoreResult<Vec<NotebookChange>> {
        let node = self.nodes.get_mut(&id).ok_or(StoreError::UnknownNode(id))?;
        if node.data == data {
            return Ok(Vec::new());
        }
        let previous = std::mem::replace(&mut node.data, data.clone());
        Ok(vec![NotebookChange::NodeChanged {
            node_id: id,
            previous,
            data,
        }])
    }

    /// Reposition a top-level node; no event when the order is unchanged
    ///
    /// # Errors
    /// Unknown node, nested node, or invalid anchor
    pub fn move_node(&mut self, id: NodeId, position: Position) -> StoreResult<Vec<NotebookChange>> {
        self.validate_move(id, position)?;

        let from = self
            .top_level_order
            .iter()
            .position(|&t| t == id)
            .ok_or(StoreError::NotTopLevel(id))?;
        let previous = self.position_at(from);
        self.top_level_order.remove(from);

        let to = self.resolve_index(id, position)?;
        self.top_level_order.insert(to, id);
        let current = self.position_at(to);

        if current == previous {
            return Ok(Vec::new());
        }
        Ok(vec![NotebookChange::NodeMoved {
            node_id: id,
            previous,
            position: current,
        }])
    }

    /// Reclassify a node
    ///
    /// `node_type` and `data` keep their current values when `None`.
    ///
    /// # Errors
    /// `StoreError::UnknownNode` if the node is not live
    pub fn convert(
        &mut self,
        id: NodeId,
        role: Role,
        subrole: Option<Subrole>,
        node_type: Option<NodeType>,
        data: Option<Value>,
    ) -> StoreResult<Vec<NotebookChange>> {
        let node = self.nodes.get_mut(&id).ok_or(StoreError::UnknownNode(id))?;
        let previous = node.kind();

        node.role = role;
        node.subrole = subrole;
        if let Some(node_type) = node_type {
            node.node_type = node_type;
        }
        if let Some(data) = data {
            node.data = data;
        }

        let current: NodeKind = node.kind();
        if current == previous {
            return Ok(Vec::new());
        }
        Ok(vec![NotebookChange::NodeConverted {
            node_id: id,
            previous,
            current,
        }])
    }

    /// Insert a relationship between two live nodes
    ///
    /// # Errors
    /// Unknown endpoint or id already in use
    pub fn insert_relationship(
        &mut self,
        insert: InsertRelationship,
    ) -> StoreResult<(RelationshipId, Vec<NotebookChange>)> {
        self.validate_relationship(&insert)?;

        let id = match insert.relationship_id {
            Some(id) => {
                self.next_id = self.next_id.max(id.get() + 1);
                id
            }
            None => RelationshipId(self.allocate_id().get()),
        };
        let relationship = Relationship {
            id,
            from_id: insert.from_id,
            to_id: insert.to_id,
            role: insert.role,
            data: insert.data,
        };
        self.relationships.insert(id, relationship.clone());
        Ok((id, vec![NotebookChange::RelationshipInserted { relationship }]))
    }

    /// Delete a relationship
    ///
    /// # Errors
    /// `StoreError::UnknownRelationship` if it does not exist
    pub fn delete_relationship(&mut self, id: RelationshipId) -> StoreResult<Vec<NotebookChange>> {
        let relationship = self
            .relationships
            .remove(&id)
            .ok_or(StoreError::UnknownRelationship(id))?;
        Ok(vec![NotebookChange::RelationshipDeleted { relationship }])
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Index at which `position` places a node (the node itself not in the order)
    fn resolve_index(&self, node: NodeId, position: Position) -> StoreResult<usize> {
        match position {
            Position::Top => Ok(0),
            Position::Bottom => Ok(self.top_level_order.len()),
            Position::After(anchor) => self
                .top_level_order
                .iter()
                .position(|&t| t == anchor)
                .map(|i| i + 1)
                .ok_or(StoreError::InvalidAnchor { node, anchor }),
        }
    }

    /// Concrete placement of the node at `index`
    fn position_at(&self, index: usize) -> Position {
        match index.checked_sub(1) {
            Some(prev) => Position::After(self.top_level_order[prev]),
            None => Position::Top,
        }
    }
}
