//! Structural errors raised by the node store

use crate::ids::{NodeId, RelationshipId};

/// Store result alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by node-store operations and document loading
///
/// Every variant is structural: the batch that raised it is rejected as a whole.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Referenced node does not exist
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Referenced relationship does not exist
    #[error("unknown relationship: {0}")]
    UnknownRelationship(RelationshipId),

    /// Operation only valid for top-level nodes
    #[error("node {0} is not top-level")]
    NotTopLevel(NodeId),

    /// Position anchor is missing, nested, or the moved node itself
    #[error("invalid position anchor {anchor} for node {node}")]
    InvalidAnchor {
        /// Node being placed
        node: NodeId,
        /// Offending anchor
        anchor: NodeId,
    },

    /// Explicit node id already taken
    #[error("node id already in use: {0}")]
    NodeIdInUse(NodeId),

    /// Explicit relationship id already taken
    #[error("relationship id already in use: {0}")]
    RelationshipIdInUse(RelationshipId),

    /// Parent assignment would form a cycle
    #[error("cyclic parent assignment at node {0}")]
    CyclicParent(NodeId),

    /// Serialized document violates a structural invariant
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Serialized document has an unsupported format version
    #[error("unsupported document version {found} (expected {expected})")]
    VersionMismatch {
        /// Version this build reads and writes
        expected: String,
        /// Version found in the document
        found: String,
    },

    /// JSON encoding or decoding failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if the error names a missing node or relationship
    #[inline]
    #[must_use]
    pub fn is_missing_reference(&self) -> bool {
        matches!(self, Self::UnknownNode(_) | Self::UnknownRelationship(_))
    }
}
