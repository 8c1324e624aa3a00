//! Testing utilities for MathNB workspace
//!
//! Shared fixtures: formula batches, a scripted CAS adapter and small
//! observers that exercise async rules, tools and runaway propagation.

#![allow(missing_docs)]

use async_trait::async_trait;
use mathnb_rules::{Adapter, AsyncRule, DerivedProps, Observer, Relation, RuleError, RuleResult, SyncRule};
use mathnb_store::{
    ChangeRequest, InsertNode, Node, NodeId, NodePattern, NodeType, Notebook, RelationshipRole, Role, Subrole,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const CAS_OBSERVER: &str = "CAS";
pub const PLOT_OBSERVER: &str = "PLOT";
pub const PING_PONG_OBSERVER: &str = "PING-PONG";

/// One top-level formula insert per text, in order
pub fn formulas(texts: &[&str]) -> Vec<ChangeRequest> {
    texts.iter().map(|t| InsertNode::formula(*t).into()).collect()
}

/// Top-level plain-text formula trigger
pub fn formula_trigger() -> NodePattern {
    NodePattern::of(Role::Input, NodeType::Text).subrole(Subrole::Formula)
}

/// `(from, to, role)` of every relationship
pub fn triples(notebook: &Notebook) -> BTreeSet<(NodeId, NodeId, RelationshipRole)> {
    notebook.relationships().map(|r| (r.from_id, r.to_id, r.role)).collect()
}

/// Children of `parent` with `role`
pub fn children_with_role(notebook: &Notebook, parent: NodeId, role: Role) -> Vec<Value> {
    notebook
        .children_of(parent)
        .filter(|n| n.role == role)
        .map(|n| n.data.clone())
        .collect()
}

/// Scripted CAS backend
///
/// Sums of integers evaluate to their total, anything mentioning `fail`
/// is rejected, everything else comes back with whitespace stripped.
/// Tracks how many calls overlapped.
#[derive(Debug, Default)]
pub struct FakeCas {
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeCas {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were in flight at once
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn evaluate(text: &str) -> RuleResult<Value> {
        if text.contains("fail") {
            return Err(RuleError::adapter("fake-cas", format!("cannot evaluate {text}")));
        }
        let terms: Option<Vec<i64>> = text.split('+').map(|t| t.trim().parse().ok()).collect();
        Ok(match terms {
            Some(terms) => json!(terms.iter().sum::<i64>().to_string()),
            None => json!(text.split_whitespace().collect::<String>()),
        })
    }
}

#[async_trait]
impl Adapter for FakeCas {
    fn name(&self) -> &str {
        "fake-cas"
    }

    async fn convert(&self, input: &Value) -> RuleResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        Self::evaluate(input.as_str().unwrap_or_default())
    }
}

/// Observer that evaluates formulas into an EVALUATION child
pub fn cas_observer(cas: Arc<FakeCas>) -> Observer {
    cas_observer_named(CAS_OBSERVER, cas)
}

/// Same as [`cas_observer`] under another observer name
pub fn cas_observer_named(name: &str, cas: Arc<FakeCas>) -> Observer {
    Observer::new(name).with_async_rule(AsyncRule::from_adapter(
        "evaluate",
        formula_trigger(),
        Relation::ParentToChild,
        DerivedProps::new(Role::Evaluation, NodeType::Text),
        cas,
    ))
}

/// Observer that gives formulas a plot tool; using it adds an exposition
pub fn plot_observer() -> Observer {
    Observer::new(PLOT_OBSERVER)
        .with_sync_rule(SyncRule::new(
            "plot-tool",
            formula_trigger(),
            Relation::ParentToChild,
            DerivedProps::new(Role::Tool, NodeType::ToolData),
            |_, _| Ok(Some(json!({"name": "plot"}))),
        ))
        .with_tool(|tool, notebook| {
            let formula = notebook.get_node(tool.parent_id).map_err(RuleError::from)?;
            let caption = format!("plot of {}", formula.text().unwrap_or_default());
            Ok(vec![InsertNode::new(Role::Exposition, NodeType::Text, json!(caption))
                .child_of(formula.id)
                .from_source(PLOT_OBSERVER)
                .into()])
        })
}

/// Two peer rules that keep deriving each other
pub fn ping_pong_observer() -> Observer {
    Observer::new(PING_PONG_OBSERVER)
        .with_sync_rule(SyncRule::new(
            "ping",
            NodePattern::of(Role::Hint, NodeType::Text),
            Relation::PeerToPeer,
            DerivedProps::new(Role::Exposition, NodeType::Text),
            |node, _| echo(node, "!"),
        ))
        .with_sync_rule(SyncRule::new(
            "pong",
            NodePattern::of(Role::Exposition, NodeType::Text).source(PING_PONG_OBSERVER),
            Relation::PeerToPeer,
            DerivedProps::new(Role::Hint, NodeType::Text),
            |node, _| echo(node, "?"),
        ))
}

fn echo(node: &Node, suffix: &str) -> RuleResult<Option<Value>> {
    Ok(Some(json!(format!("{}{suffix}", node.text().unwrap_or_default()))))
}

/// Top-level hint that starts the ping-pong cascade
pub fn hint(text: &str) -> ChangeRequest {
    InsertNode::new(Role::Hint, NodeType::Text, json!(text)).into()
}
