//! MathNB Rule Engine
//!
//! Observers derive content from the notebook through declarative rules.
//!
//! # Core Concepts
//!
//! - [`Observer`]: named bundle of [`SyncRule`]s, [`AsyncRule`]s,
//!   [`ChangeAnalyzer`]s and lifecycle hooks
//! - [`RuleEngine`]: dispatches rules on the `(role, type)` of changed nodes
//!   and turns their output into [`mathnb_store::ChangeRequest`]s
//! - [`Adapter`]: async boundary to recognition, typesetting and CAS backends
//!
//! The engine is pure: it reads a notebook and returns requests. Applying
//! them, looping to a fixed point and queueing async work belong to the
//! caller.

#![warn(unreachable_pub)]

mod engine;
mod error;
mod observer;
mod rule;

pub use engine::{AsyncJob, IdReserver, JobKey, RuleEngine};
pub use error::{RuleError, RuleResult};
pub use observer::{ChangeAnalyzer, CloseHook, Observer, ToolHook};
pub use rule::{Adapter, AsyncCompute, AsyncRule, DerivedProps, Relation, SyncCompute, SyncRule};
