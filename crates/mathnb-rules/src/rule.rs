//! Rule tables
//!
//! Rules are plain data: a trigger [`NodePattern`], a [`Relation`] saying
//! where the derived node goes, the [`DerivedProps`] it is created with, and
//! a compute function. Sync rules compute inline during a batch; async rules
//! return a future whose result is applied later as its own batch.

use crate::error::RuleResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use mathnb_store::{Node, NodePattern, NodeType, Notebook, Role, Subrole};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Where a derived node is placed relative to its trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Sibling of the trigger (same parent), linked by a `DERIVATION` relationship
    PeerToPeer,
    /// Child of the trigger, one per observer and props
    ParentToChild,
}

/// Classification given to a derived node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedProps {
    /// Role of the derived node
    pub role: Role,
    /// Subrole of the derived node
    pub subrole: Option<Subrole>,
    /// Payload type of the derived node
    pub node_type: NodeType,
}

impl DerivedProps {
    /// Create props without subrole
    #[inline]
    #[must_use]
    pub fn new(role: Role, node_type: NodeType) -> Self {
        Self {
            role,
            subrole: None,
            node_type,
        }
    }

    /// With subrole
    #[inline]
    #[must_use]
    pub fn with_subrole(mut self, subrole: Subrole) -> Self {
        self.subrole = Some(subrole);
        self
    }

    /// Check if `node` carries these props
    #[inline]
    #[must_use]
    pub fn describes(&self, node: &Node) -> bool {
        node.role == self.role && node.subrole == self.subrole && node.node_type == self.node_type
    }
}

/// Synchronous compute: `None` means the trigger has no derived output
pub type SyncCompute = Arc<dyn Fn(&Node, &Notebook) -> RuleResult<Option<Value>> + Send + Sync>;

/// Asynchronous compute, run on a snapshot of the trigger
pub type AsyncCompute =
    Arc<dyn Fn(Node) -> BoxFuture<'static, RuleResult<Option<Value>>> + Send + Sync>;

/// Rule evaluated inline while a batch propagates
#[derive(Clone)]
pub struct SyncRule {
    /// Rule name, for logging
    pub name: String,
    /// Trigger predicate
    pub trigger: NodePattern,
    /// Placement of the derived node
    pub relation: Relation,
    /// Classification of the derived node
    pub props: DerivedProps,
    compute: SyncCompute,
}

impl SyncRule {
    /// Create new sync rule
    pub fn new<F>(
        name: impl Into<String>,
        trigger: NodePattern,
        relation: Relation,
        props: DerivedProps,
        compute: F,
    ) -> Self
    where
        F: Fn(&Node, &Notebook) -> RuleResult<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            trigger,
            relation,
            props,
            compute: Arc::new(compute),
        }
    }

    /// Compute the derived payload for `trigger`
    ///
    /// # Errors
    /// Whatever the compute function raises
    pub fn compute(&self, trigger: &Node, notebook: &Notebook) -> RuleResult<Option<Value>> {
        (self.compute)(trigger, notebook)
    }
}

impl fmt::Debug for SyncRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRule")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("relation", &self.relation)
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// Rule whose output arrives later from an external computation
#[derive(Clone)]
pub struct AsyncRule {
    /// Rule name, for logging
    pub name: String,
    /// Trigger predicate
    pub trigger: NodePattern,
    /// Placement of the derived node
    pub relation: Relation,
    /// Classification of the derived node
    pub props: DerivedProps,
    compute: AsyncCompute,
}

impl AsyncRule {
    /// Create new async rule from a future-returning function
    pub fn new<F, Fut>(
        name: impl Into<String>,
        trigger: NodePattern,
        relation: Relation,
        props: DerivedProps,
        compute: F,
    ) -> Self
    where
        F: Fn(Node) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RuleResult<Option<Value>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            trigger,
            relation,
            props,
            compute: Arc::new(move |node| compute(node).boxed()),
        }
    }

    /// Create async rule that sends the trigger's payload through `adapter`
    ///
    /// A `null` adapter result means "no output".
    pub fn from_adapter(
        name: impl Into<String>,
        trigger: NodePattern,
        relation: Relation,
        props: DerivedProps,
        adapter: Arc<dyn Adapter>,
    ) -> Self {
        Self::new(name, trigger, relation, props, move |node: Node| {
            let adapter = Arc::clone(&adapter);
            async move {
                let output = adapter.convert(&node.data).await?;
                Ok((!output.is_null()).then_some(output))
            }
        })
    }

    /// Start the computation for `trigger`
    #[must_use]
    pub fn compute(&self, trigger: Node) -> BoxFuture<'static, RuleResult<Option<Value>>> {
        (self.compute)(trigger)
    }
}

impl fmt::Debug for AsyncRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRule")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("relation", &self.relation)
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// External recognition, typesetting or CAS backend
///
/// Implementations own their timeouts; a slow adapter only delays its own
/// notebook's queue.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter name, used in error messages
    fn name(&self) -> &str;

    /// Convert one payload
    async fn convert(&self, input: &Value) -> RuleResult<Value>;
}
