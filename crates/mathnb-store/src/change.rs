//! Change-request protocol
//!
//! Provides:
//! - [`ChangeRequest`]: tagged requests accepted by the change processor
//! - [`NotebookChange`]: tagged events produced by applying them
//! - [`inverse_of`] / [`replay_of`]: undo and redo batches derived from events
//!
//! Every event carries the state it destroyed (deleted node, previous data,
//! previous position), so inverting a batch never needs a document snapshot.

use crate::ids::{NodeId, RelationshipId};
use crate::node::{Node, NodeKind, NodeType, Relationship, RelationshipRole, Role, Subrole, USER_SOURCE};
use crate::position::Position;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn user_source() -> String {
    USER_SOURCE.to_string()
}

/// Request to insert one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertNode {
    /// Explicit id: restores a deleted node, or claims an id reserved by a rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Parent; root for top-level nodes
    #[serde(default)]
    pub parent_id: NodeId,
    /// Semantic role
    pub role: Role,
    /// Optional finer classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subrole: Option<Subrole>,
    /// Payload format
    pub node_type: NodeType,
    /// Creator
    #[serde(default = "user_source")]
    pub source: String,
    /// Payload
    #[serde(default)]
    pub data: Value,
    /// Placement in the top-level order (top-level nodes only)
    #[serde(default)]
    pub position: Position,
    /// Replace any existing sibling with the same `(parent, type, role)`
    #[serde(default)]
    pub exclusive_child_type_and_role: bool,
}

impl InsertNode {
    /// Create a top-level user node appended at the bottom
    #[must_use]
    pub fn new(role: Role, node_type: NodeType, data: Value) -> Self {
        Self {
            node_id: None,
            parent_id: NodeId::ROOT,
            role,
            subrole: None,
            node_type,
            source: user_source(),
            data,
            position: Position::Bottom,
            exclusive_child_type_and_role: false,
        }
    }

    /// Create a top-level plain-text formula input
    #[must_use]
    pub fn formula(text: impl Into<String>) -> Self {
        Self::new(Role::Input, NodeType::Text, Value::String(text.into()))
            .with_subrole(Subrole::Formula)
    }

    /// Snapshot-based insert that recreates `node` under its original id
    #[must_use]
    pub fn restore(node: &Node, position: Option<Position>) -> Self {
        Self {
            node_id: Some(node.id),
            parent_id: node.parent_id,
            role: node.role,
            subrole: node.subrole,
            node_type: node.node_type,
            source: node.source.clone(),
            data: node.data.clone(),
            position: position.unwrap_or_default(),
            exclusive_child_type_and_role: false,
        }
    }

    /// Place under `parent`
    #[inline]
    #[must_use]
    pub fn child_of(mut self, parent: NodeId) -> Self {
        self.parent_id = parent;
        self
    }

    /// With subrole
    #[inline]
    #[must_use]
    pub fn with_subrole(mut self, subrole: Subrole) -> Self {
        self.subrole = Some(subrole);
        self
    }

    /// Attribute to `source`
    #[inline]
    #[must_use]
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Place at `position`
    #[inline]
    #[must_use]
    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Claim an explicit id
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.node_id = Some(id);
        self
    }

    /// Mark as exclusive among siblings with the same type and role
    #[inline]
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive_child_type_and_role = true;
        self
    }
}

/// Request to insert one relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRelationship {
    /// Explicit id, used when restoring a deleted relationship
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_id: Option<RelationshipId>,
    /// Origin node
    pub from_id: NodeId,
    /// Target node
    pub to_id: NodeId,
    /// Semantic role
    pub role: RelationshipRole,
    /// Role-specific payload
    #[serde(default)]
    pub data: Value,
}

impl InsertRelationship {
    /// Create relationship request with a fresh id
    #[must_use]
    pub fn new(from_id: NodeId, to_id: NodeId, role: RelationshipRole, data: Value) -> Self {
        Self {
            relationship_id: None,
            from_id,
            to_id,
            role,
            data,
        }
    }

    /// Snapshot-based insert that recreates `relationship` under its original id
    #[must_use]
    pub fn restore(relationship: &Relationship) -> Self {
        Self {
            relationship_id: Some(relationship.id),
            from_id: relationship.from_id,
            to_id: relationship.to_id,
            role: relationship.role,
            data: relationship.data.clone(),
        }
    }
}

/// A single request in a change batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeRequest {
    /// Insert a node
    InsertNode(InsertNode),

    /// Delete a node, its descendants, and every relationship touching them
    #[serde(rename_all = "camelCase")]
    DeleteNode {
        /// Node to delete
        node_id: NodeId,
    },

    /// Replace a node's payload
    #[serde(rename_all = "camelCase")]
    ChangeNode {
        /// Node to change
        node_id: NodeId,
        /// New payload
        data: Value,
    },

    /// Reposition a top-level node
    #[serde(rename_all = "camelCase")]
    MoveNode {
        /// Node to move
        node_id: NodeId,
        /// New placement
        position: Position,
    },

    /// Reclassify a node
    ///
    /// `subrole` always replaces the current one; `node_type` and `data` keep the
    /// current values when omitted.
    #[serde(rename_all = "camelCase")]
    ConvertNode {
        /// Node to reclassify
        node_id: NodeId,
        /// New role
        role: Role,
        /// New subrole
        #[serde(default)]
        subrole: Option<Subrole>,
        /// New payload format
        #[serde(default)]
        node_type: Option<NodeType>,
        /// New payload
        #[serde(default)]
        data: Option<Value>,
    },

    /// Invoke the tool node's originating observer
    #[serde(rename_all = "camelCase")]
    UseTool {
        /// Tool node
        node_id: NodeId,
    },

    /// Insert a relationship
    InsertRelationship(InsertRelationship),

    /// Delete a relationship
    #[serde(rename_all = "camelCase")]
    DeleteRelationship {
        /// Relationship to delete
        relationship_id: RelationshipId,
    },
}

impl ChangeRequest {
    /// Delete request
    #[inline]
    #[must_use]
    pub fn delete(node_id: NodeId) -> Self {
        Self::DeleteNode { node_id }
    }

    /// Change request
    #[inline]
    #[must_use]
    pub fn change(node_id: NodeId, data: Value) -> Self {
        Self::ChangeNode { node_id, data }
    }

    /// Move request
    #[inline]
    #[must_use]
    pub fn move_to(node_id: NodeId, position: Position) -> Self {
        Self::MoveNode { node_id, position }
    }

    /// Short name of the request variant, for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InsertNode(_) => "insertNode",
            Self::DeleteNode { .. } => "deleteNode",
            Self::ChangeNode { .. } => "changeNode",
            Self::MoveNode { .. } => "moveNode",
            Self::ConvertNode { .. } => "convertNode",
            Self::UseTool { .. } => "useTool",
            Self::InsertRelationship(_) => "insertRelationship",
            Self::DeleteRelationship { .. } => "deleteRelationship",
        }
    }
}

impl From<InsertNode> for ChangeRequest {
    fn from(value: InsertNode) -> Self {
        Self::InsertNode(value)
    }
}

impl From<InsertRelationship> for ChangeRequest {
    fn from(value: InsertRelationship) -> Self {
        Self::InsertRelationship(value)
    }
}

/// A structural effect of applying a request
///
/// `position` on node events is the node's concrete placement (`Top` or
/// `After(predecessor)`) for top-level nodes and `None` for nested ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NotebookChange {
    /// Node added
    #[serde(rename_all = "camelCase")]
    NodeInserted {
        /// Inserted node
        node: Node,
        /// Placement
        position: Option<Position>,
    },

    /// Node removed; carries the full node and its placement before removal
    #[serde(rename_all = "camelCase")]
    NodeDeleted {
        /// Removed node
        node: Node,
        /// Placement before removal
        position: Option<Position>,
    },

    /// Payload replaced
    #[serde(rename_all = "camelCase")]
    NodeChanged {
        /// Changed node
        node_id: NodeId,
        /// Payload before the change
        previous: Value,
        /// Payload after the change
        data: Value,
    },

    /// Top-level node repositioned
    #[serde(rename_all = "camelCase")]
    NodeMoved {
        /// Moved node
        node_id: NodeId,
        /// Placement before the move
        previous: Position,
        /// Placement after the move
        position: Position,
    },

    /// Node reclassified
    #[serde(rename_all = "camelCase")]
    NodeConverted {
        /// Converted node
        node_id: NodeId,
        /// Classification before
        previous: NodeKind,
        /// Classification after
        current: NodeKind,
    },

    /// Relationship added
    #[serde(rename_all = "camelCase")]
    RelationshipInserted {
        /// Inserted relationship
        relationship: Relationship,
    },

    /// Relationship removed
    #[serde(rename_all = "camelCase")]
    RelationshipDeleted {
        /// Removed relationship
        relationship: Relationship,
    },
}

impl NotebookChange {
    /// Node this event is about, if it is a node event
    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::NodeInserted { node, .. } | Self::NodeDeleted { node, .. } => Some(node.id),
            Self::NodeChanged { node_id, .. }
            | Self::NodeMoved { node_id, .. }
            | Self::NodeConverted { node_id, .. } => Some(*node_id),
            Self::RelationshipInserted { .. } | Self::RelationshipDeleted { .. } => None,
        }
    }

    /// Request that undoes exactly this event
    #[must_use]
    pub fn inverse(&self) -> ChangeRequest {
        match self {
            Self::NodeInserted { node, .. } => ChangeRequest::delete(node.id),
            Self::NodeDeleted { node, position } => InsertNode::restore(node, *position).into(),
            Self::NodeChanged {
                node_id, previous, ..
            } => ChangeRequest::change(*node_id, previous.clone()),
            Self::NodeMoved {
                node_id, previous, ..
            } => ChangeRequest::move_to(*node_id, *previous),
            Self::NodeConverted {
                node_id, previous, ..
            } => ChangeRequest::ConvertNode {
                node_id: *node_id,
                role: previous.role,
                subrole: previous.subrole,
                node_type: Some(previous.node_type),
                data: Some(previous.data.clone()),
            },
            Self::RelationshipInserted { relationship } => ChangeRequest::DeleteRelationship {
                relationship_id: relationship.id,
            },
            Self::RelationshipDeleted { relationship } => {
                InsertRelationship::restore(relationship).into()
            }
        }
    }

    /// Request that reproduces exactly this event, ids and placement included
    #[must_use]
    pub fn replay(&self) -> ChangeRequest {
        match self {
            Self::NodeInserted { node, position } => InsertNode::restore(node, *position).into(),
            Self::NodeDeleted { node, .. } => ChangeRequest::delete(node.id),
            Self::NodeChanged { node_id, data, .. } => ChangeRequest::change(*node_id, data.clone()),
            Self::NodeMoved {
                node_id, position, ..
            } => ChangeRequest::move_to(*node_id, *position),
            Self::NodeConverted {
                node_id, current, ..
            } => ChangeRequest::ConvertNode {
                node_id: *node_id,
                role: current.role,
                subrole: current.subrole,
                node_type: Some(current.node_type),
                data: Some(current.data.clone()),
            },
            Self::RelationshipInserted { relationship } => {
                InsertRelationship::restore(relationship).into()
            }
            Self::RelationshipDeleted { relationship } => ChangeRequest::DeleteRelationship {
                relationship_id: relationship.id,
            },
        }
    }
}

/// Batch that undoes `events` when applied
///
/// Events are inverted last-to-first, so each inverse runs against the state
/// its event produced.
#[must_use]
pub fn inverse_of(events: &[NotebookChange]) -> Vec<ChangeRequest> {
    events.iter().rev().map(NotebookChange::inverse).collect()
}

/// Batch that reproduces `events` when applied to the state they started from
#[must_use]
pub fn replay_of(events: &[NotebookChange]) -> Vec<ChangeRequest> {
    events.iter().map(NotebookChange::replay).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_node() -> Node {
        Node {
            id: NodeId(5),
            parent_id: NodeId::ROOT,
            role: Role::Input,
            subrole: Some(Subrole::Formula),
            node_type: NodeType::Text,
            source: USER_SOURCE.to_string(),
            data: json!("X = 4"),
        }
    }

    #[test]
    fn request_wire_shape() {
        let request: ChangeRequest = InsertNode::formula("X = 4").into();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], json!("insertNode"));
        assert_eq!(value["nodeType"], json!("TEXT"));
        assert_eq!(value["subrole"], json!("FORMULA"));
        assert_eq!(value["position"], json!("bottom"));

        let delete = serde_json::to_value(ChangeRequest::delete(NodeId(3))).unwrap();
        assert_eq!(delete, json!({ "type": "deleteNode", "nodeId": 3 }));
    }

    #[test]
    fn minimal_insert_uses_defaults() {
        let request: ChangeRequest = serde_json::from_value(json!({
            "type": "insertNode",
            "role": "EXPOSITION",
            "nodeType": "TEXT",
            "data": "hello"
        }))
        .unwrap();

        let ChangeRequest::InsertNode(insert) = request else {
            panic!("expected insertNode");
        };
        assert_eq!(insert.parent_id, NodeId::ROOT);
        assert_eq!(insert.source, USER_SOURCE);
        assert_eq!(insert.position, Position::Bottom);
        assert!(!insert.exclusive_child_type_and_role);
    }

    #[test]
    fn deleted_node_inverts_to_restoring_insert() {
        let node = sample_node();
        let event = NotebookChange::NodeDeleted {
            node: node.clone(),
            position: Some(Position::After(NodeId(2))),
        };

        let ChangeRequest::InsertNode(insert) = event.inverse() else {
            panic!("expected insertNode");
        };
        assert_eq!(insert.node_id, Some(node.id));
        assert_eq!(insert.position, Position::After(NodeId(2)));
        assert_eq!(insert.data, node.data);
    }

    #[test]
    fn inverse_batch_runs_last_to_first() {
        let events = vec![
            NotebookChange::NodeInserted {
                node: sample_node(),
                position: Some(Position::Top),
            },
            NotebookChange::NodeChanged {
                node_id: NodeId(5),
                previous: json!("X = 4"),
                data: json!("X = 5"),
            },
        ];

        let inverse = inverse_of(&events);
        assert_eq!(inverse[0], ChangeRequest::change(NodeId(5), json!("X = 4")));
        assert_eq!(inverse[1], ChangeRequest::delete(NodeId(5)));

        let replay = replay_of(&events);
        assert!(matches!(&replay[0], ChangeRequest::InsertNode(i) if i.node_id == Some(NodeId(5))));
        assert_eq!(replay[1], ChangeRequest::change(NodeId(5), json!("X = 5")));
    }

    #[test]
    fn converted_inverse_restores_previous_kind() {
        let node = sample_node();
        let previous = node.kind();
        let current = NodeKind {
            role: Role::Input,
            subrole: Some(Subrole::Text),
            node_type: NodeType::Text,
            data: json!("X = 4"),
        };
        let event = NotebookChange::NodeConverted {
            node_id: node.id,
            previous: previous.clone(),
            current,
        };

        assert_eq!(
            event.inverse(),
            ChangeRequest::ConvertNode {
                node_id: node.id,
                role: previous.role,
                subrole: previous.subrole,
                node_type: Some(previous.node_type),
                data: Some(previous.data),
            }
        );
    }
}
