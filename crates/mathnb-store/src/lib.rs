//! MathNB Node Store
//!
//! The notebook document model and its structural operations.
//!
//! # Core Concepts
//!
//! - [`Notebook`]: forest of [`Node`]s, [`Relationship`]s and the top-level order
//! - [`NodePattern`]: declarative predicate used by queries and rule dispatch
//! - [`ChangeRequest`] / [`NotebookChange`]: the batch protocol and its events
//! - [`NotebookDocument`]: the serialized form
//!
//! # Example
//!
//! ```rust
//! use mathnb_store::{InsertNode, Notebook, Position};
//!
//! let mut notebook = Notebook::new();
//! let (a, _) = notebook.insert(InsertNode::formula("X = 4")).unwrap();
//! let (b, _) = notebook.insert(InsertNode::formula("X + 1").at(Position::Top)).unwrap();
//! assert_eq!(notebook.top_level_order(), &[b, a]);
//! ```

#![warn(unreachable_pub)]

// Core modules
mod change;
mod document;
mod error;
mod ids;
mod node;
mod notebook;
mod pattern;
mod position;

// Re-exports
pub use change::{inverse_of, replay_of, ChangeRequest, InsertNode, InsertRelationship, NotebookChange};
pub use document::{NotebookDocument, PageConfig, PageMargins, PageSize, FORMAT_VERSION};
pub use error::{StoreError, StoreResult};
pub use ids::{NodeId, RelationshipId};
pub use node::{Node, NodeKind, NodeType, Relationship, RelationshipRole, Role, Subrole, USER_SOURCE};
pub use notebook::Notebook;
pub use pattern::{NodePattern, ParentScope};
pub use position::Position;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
