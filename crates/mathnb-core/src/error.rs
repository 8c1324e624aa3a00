//! Error types for notebook sessions
//!
//! Provides error handling for:
//! - Structural failures that reject a whole batch
//! - Rule and analyzer failures during synchronous propagation
//! - Fixed-point non-convergence
//! - Tool lookup, closed notebooks and configuration

use mathnb_rules::RuleError;
use mathnb_store::{NodeId, StoreError};

/// Result alias for notebook operations
pub type NotebookResult<T> = Result<T, NotebookError>;

/// Main notebook error type
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    /// Structural error; the batch was rejected and the notebook is unchanged
    #[error("structural error: {0}")]
    Store(#[from] StoreError),

    /// Sync rule or analyzer failed; the batch was rejected
    #[error("rule error: {0}")]
    Rule(#[from] RuleError),

    /// Sync propagation kept producing changes
    #[error("sync rules did not converge after {passes} passes")]
    NonConvergence {
        /// Passes run before giving up
        passes: usize,
    },

    /// No observer is registered under a node's source
    #[error("unknown observer: {0}")]
    UnknownObserver(String),

    /// Node is not a tool, or its observer has no tool hook
    #[error("no tool available for node {0}")]
    ToolNotAvailable(NodeId),

    /// Notebook was closed
    #[error("notebook closed: {0}")]
    NotebookClosed(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl NotebookError {
    /// Check if the error is a structural rejection of the batch
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Check if the error indicates a rule-authoring bug
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NonConvergence { .. } | Self::Rule(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let structural: NotebookError = StoreError::UnknownNode(NodeId(3)).into();
        assert!(structural.is_structural());
        assert!(!structural.is_fatal());

        let runaway = NotebookError::NonConvergence { passes: 100 };
        assert!(runaway.is_fatal());
        assert_eq!(runaway.to_string(), "sync rules did not converge after 100 passes");

        assert!(!NotebookError::NotebookClosed("a".into()).is_fatal());
    }
}
