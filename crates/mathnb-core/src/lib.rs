//! MathNB Core
//!
//! Turns the store and rule engine into a running notebook service:
//! - Applies change batches atomically and propagates sync rules to a fixed point
//! - Records undo/redo history from the events each batch produced
//! - Serializes async rule jobs per notebook on a tokio task
//! - Keeps at most one open instance per notebook name
//!
//! # Example
//!
//! ```rust
//! use mathnb_core::{ApplyOptions, NotebookRegistry};
//! use mathnb_store::{InsertNode, RelationshipRole};
//!
//! let registry = NotebookRegistry::default();
//! let notebook = registry.open("algebra").unwrap();
//! notebook
//!     .apply(&[InsertNode::formula("X = 4").into(), InsertNode::formula("X + Y").into()], ApplyOptions::tracked())
//!     .unwrap();
//!
//! let dependencies = notebook.read(|nb| {
//!     nb.relationships().filter(|r| r.role == RelationshipRole::SymbolDependency).count()
//! });
//! assert_eq!(dependencies, 1);
//!
//! notebook.undo().unwrap();
//! assert!(notebook.read(|nb| nb.is_empty()));
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod processor;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod undo;

pub use config::NotebookConfig;
pub use error::{NotebookError, NotebookResult};
pub use processor::{ApplyOptions, BatchResponse, ChangeProcessor, ProcessedBatch};
pub use registry::{NotebookRegistry, ObserverFactory};
pub use session::NotebookSession;
pub use undo::{UndoEntry, UndoStack};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with MathNB notebooks
    pub use crate::{ApplyOptions, NotebookConfig, NotebookError, NotebookRegistry, NotebookSession};
    pub use mathnb_rules::{AsyncRule, DerivedProps, Observer, Relation, SyncRule};
    pub use mathnb_store::{ChangeRequest, InsertNode, NodeId, Notebook, NotebookChange, Position};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
