//! Nodes, relationships and their classification tags
//!
//! A [`Node`] is a unit of notebook content: a user formula, a piece of
//! exposition, or an annotation derived from another node by an observer.
//! A [`Relationship`] is a typed directed edge between two nodes.

use crate::ids::{NodeId, RelationshipId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};

/// Source attributed to content entered by the user
pub const USER_SOURCE: &str = "USER";

/// Semantic role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Role {
    /// Content entered by the user
    Input,
    /// Alternate rendering of the parent's content
    Representation,
    /// Observer-computed attribute of the parent
    Attribute,
    /// Failure reported by an observer
    Error,
    /// Prose
    Exposition,
    /// Symbol defined by the parent formula
    SymbolDefinition,
    /// Symbol used by the parent formula
    SymbolUse,
    /// Canonical evaluation of the parent formula
    Evaluation,
    /// Hint attached to content
    Hint,
    /// Action a user can invoke on the parent
    Tool,
}

impl Role {
    /// Stable wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Input => "INPUT",
            Role::Representation => "REPRESENTATION",
            Role::Attribute => "ATTRIBUTE",
            Role::Error => "ERROR",
            Role::Exposition => "EXPOSITION",
            Role::SymbolDefinition => "SYMBOL-DEFINITION",
            Role::SymbolUse => "SYMBOL-USE",
            Role::Evaluation => "EVALUATION",
            Role::Hint => "HINT",
            Role::Tool => "TOOL",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finer classification of user input
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Subrole {
    /// Mathematical formula
    Formula,
    /// Plain prose
    Text,
    /// Drawing or image
    Figure,
}

/// Payload format of a node's `data`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum NodeType {
    /// UTF-8 text
    Text,
    /// LaTeX source
    Latex,
    /// MathML markup
    Mathml,
    /// Handwriting stroke capture
    StrokeData,
    /// Symbol name and optional value
    SymbolData,
    /// Tool descriptor
    ToolData,
    /// Raster image reference
    Image,
    /// Typeset SVG
    Svg,
}

impl NodeType {
    /// Stable wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Text => "TEXT",
            NodeType::Latex => "LATEX",
            NodeType::Mathml => "MATHML",
            NodeType::StrokeData => "STROKE-DATA",
            NodeType::SymbolData => "SYMBOL-DATA",
            NodeType::ToolData => "TOOL-DATA",
            NodeType::Image => "IMAGE",
            NodeType::Svg => "SVG",
        }
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content node in the notebook forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Notebook-unique id
    pub id: NodeId,
    /// Parent id; [`NodeId::ROOT`] for top-level nodes
    pub parent_id: NodeId,
    /// Semantic role
    pub role: Role,
    /// Optional finer classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subrole: Option<Subrole>,
    /// Payload format
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Creator: [`USER_SOURCE`] or an observer name
    pub source: String,
    /// Opaque payload, shaped by `node_type`
    pub data: Value,
}

impl Node {
    /// Check if the node sits directly under the root
    #[inline]
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_root()
    }

    /// Classification and payload of this node
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        NodeKind {
            role: self.role,
            subrole: self.subrole,
            node_type: self.node_type,
            data: self.data.clone(),
        }
    }

    /// Text payload, if the data is a JSON string
    #[inline]
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.data.as_str()
    }
}

/// The reclassifiable part of a node (target and snapshot of `convert`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeKind {
    /// Semantic role
    pub role: Role,
    /// Optional finer classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subrole: Option<Subrole>,
    /// Payload format
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Payload
    pub data: Value,
}

/// Semantic role of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum RelationshipRole {
    /// Definer of a symbol to a node using it
    SymbolDependency,
    /// Earlier definer of a symbol to the next node redefining it
    DuplicateDefinition,
    /// Node to a later node with the same canonical evaluation
    Equivalence,
    /// Hint to the content it depends on
    HintDependency,
    /// Trigger node to a peer node derived from it by a rule
    Derivation,
}

impl Display for RelationshipRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationshipRole::SymbolDependency => "SYMBOL-DEPENDENCY",
            RelationshipRole::DuplicateDefinition => "DUPLICATE-DEFINITION",
            RelationshipRole::Equivalence => "EQUIVALENCE",
            RelationshipRole::HintDependency => "HINT-DEPENDENCY",
            RelationshipRole::Derivation => "DERIVATION",
        };
        f.write_str(name)
    }
}

/// A typed directed edge between two live nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// Notebook-unique id
    pub id: RelationshipId,
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

impl Relationship {
    /// Check if `node` is either endpoint
    #[inline]
    #[must_use]
    pub fn touches(&self, node: NodeId) -> bool {
        self.from_id == node || self.to_id == node
    }
}
