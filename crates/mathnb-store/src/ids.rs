//! Notebook-scoped identifiers
//!
//! Node and relationship ids share one monotonically increasing counter
//! (`nextId` in the serialized form). Id `0` is reserved for the root.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Identifier of a node within one notebook
///
/// `NodeId::ROOT` (0) is the implicit parent of every top-level node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Implicit root; parent of all top-level nodes
    pub const ROOT: NodeId = NodeId(0);

    /// Check if this is the root sentinel
    #[inline]
    #[must_use]
    pub fn is_root(self) -> bool {
        self.0 == 0
    }

    /// Raw value
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

/// Identifier of a relationship within one notebook
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(pub u64);

impl RelationshipId {
    /// Raw value
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for RelationshipId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl From<u64> for RelationshipId {
    fn from(value: u64) -> Self {
        RelationshipId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_sentinel() {
        assert!(NodeId::ROOT.is_root());
        assert!(!NodeId(3).is_root());
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        assert_eq!(serde_json::to_string(&NodeId(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&RelationshipId(9)).unwrap(), "9");
        let id: NodeId = serde_json::from_str("12").unwrap();
        assert_eq!(id, NodeId(12));
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(NodeId(4).to_string(), "N4");
        assert_eq!(RelationshipId(4).to_string(), "R4");
    }
}
