//! Placement within the top-level order

use crate::ids::NodeId;
use serde::{Deserialize, Serialize};

/// Where a top-level node goes in the notebook's order
///
/// Ignored for nested nodes: children are unordered among themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Position {
    /// Before every other top-level node
    Top,
    /// After every other top-level node
    #[default]
    Bottom,
    /// Immediately after the given top-level node
    After(NodeId),
}

impl Position {
    /// Anchor node, if any
    #[inline]
    #[must_use]
    pub fn anchor(self) -> Option<NodeId> {
        match self {
            Position::After(id) => Some(id),
            Position::Top | Position::Bottom => None,
        }
    }
}
