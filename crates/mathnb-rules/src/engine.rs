//! Rule engine
//!
//! The engine never mutates a notebook. Each entry point reads the current
//! state plus the events of the last step and returns the change requests
//! that bring derived content back in line; the caller applies them and
//! calls again until nothing comes back.
//!
//! - [`RuleEngine::sync_pass`]: one round of sync rules and analyzers
//! - [`RuleEngine::async_jobs`]: async invocations a finished batch triggers
//! - [`RuleEngine::resolve_async`]: requests for an async result, or `None` if stale
//!
//! Derived nodes are found again by provenance: a `ParentToChild` output is
//! the trigger's child carrying the observer as `source` and the rule's
//! role and type; a `PeerToPeer` output is the target of a `DERIVATION`
//! relationship from the trigger. Re-deriving updates in place.

use crate::error::{RuleError, RuleResult};
use crate::observer::Observer;
use crate::rule::{AsyncRule, DerivedProps, Relation};
use futures::future::BoxFuture;
use mathnb_store::{
    ChangeRequest, InsertNode, InsertRelationship, Node, NodeId, NodePattern, NodeType, Notebook,
    NotebookChange, Position, RelationshipId, RelationshipRole, Role, USER_SOURCE,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Hands out explicit ids for derived content, starting at `nextId`
///
/// Reserving instead of letting the store assign keeps every request of a
/// pass self-describing, so the pass can be replayed verbatim on redo.
#[derive(Debug, Clone)]
pub struct IdReserver {
    next: u64,
}

impl IdReserver {
    /// Create reserver for `notebook`'s current counter
    #[inline]
    #[must_use]
    pub fn new(notebook: &Notebook) -> Self {
        Self {
            next: notebook.next_id(),
        }
    }

    /// Reserve a node id
    pub fn node(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// Reserve a relationship id
    pub fn relationship(&mut self) -> RelationshipId {
        RelationshipId(self.node().get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RuleRef {
    observer: usize,
    rule: usize,
}

/// Rule tables indexed by the `(role, type)` of their trigger
#[derive(Debug, Default)]
struct DispatchIndex {
    keyed: HashMap<(Role, NodeType), Vec<RuleRef>>,
    wildcard: Vec<RuleRef>,
}

impl DispatchIndex {
    fn add(&mut self, trigger: &NodePattern, rule: RuleRef) {
        match trigger.dispatch_key() {
            Some(key) => self.keyed.entry(key).or_default().push(rule),
            None => self.wildcard.push(rule),
        }
    }

    /// Candidate rules for `node` in registration order
    fn candidates(&self, node: &Node) -> Vec<RuleRef> {
        let mut refs: Vec<RuleRef> = self
            .keyed
            .get(&(node.role, node.node_type))
            .into_iter()
            .flatten()
            .chain(&self.wildcard)
            .copied()
            .collect();
        refs.sort_by_key(|r| (r.observer, r.rule));
        refs
    }
}

/// Where one rule's output lives, and how to reconcile it
#[derive(Debug, Clone, Copy)]
struct Output<'a> {
    observer: &'a str,
    relation: Relation,
    props: DerivedProps,
}

impl<'a> Output<'a> {
    fn existing<'n>(&self, notebook: &'n Notebook, trigger: &Node) -> Option<&'n Node> {
        match self.relation {
            Relation::ParentToChild => notebook
                .children_of(trigger.id)
                .find(|n| n.source == self.observer && self.props.describes(n)),
            Relation::PeerToPeer => notebook
                .relationships_touching(trigger.id)
                .filter(|r| r.role == RelationshipRole::Derivation && r.from_id == trigger.id)
                .filter_map(|r| notebook.node(r.to_id))
                .find(|n| n.source == self.observer && self.props.describes(n)),
        }
    }

    fn reconcile(
        &self,
        notebook: &Notebook,
        trigger: &Node,
        data: Option<Value>,
        ids: &mut IdReserver,
    ) -> Vec<ChangeRequest> {
        match (self.existing(notebook, trigger), data) {
            (Some(node), Some(data)) if node.data == data => Vec::new(),
            (Some(node), Some(data)) => vec![ChangeRequest::change(node.id, data)],
            (Some(node), None) => vec![ChangeRequest::delete(node.id)],
            (None, Some(data)) => self.insert(trigger, data, ids),
            (None, None) => Vec::new(),
        }
    }

    fn insert(&self, trigger: &Node, data: Value, ids: &mut IdReserver) -> Vec<ChangeRequest> {
        let id = ids.node();
        let mut insert = InsertNode::new(self.props.role, self.props.node_type, data)
            .from_source(self.observer)
            .with_id(id);
        insert.subrole = self.props.subrole;

        match self.relation {
            Relation::ParentToChild => vec![insert.child_of(trigger.id).into()],
            Relation::PeerToPeer => {
                let mut insert = insert.child_of(trigger.parent_id);
                if trigger.is_top_level() {
                    insert = insert.at(Position::After(trigger.id));
                }
                let mut link = InsertRelationship::new(
                    trigger.id,
                    id,
                    RelationshipRole::Derivation,
                    Value::Null,
                );
                link.relationship_id = Some(ids.relationship());
                vec![insert.into(), link.into()]
            }
        }
    }
}

/// Node-level summary of a step's events
#[derive(Debug, Default)]
struct Touched {
    /// Inserted, changed or converted nodes in first-seen order
    order: Vec<NodeId>,
    inserted: HashSet<NodeId>,
    modified: HashSet<NodeId>,
    converted: HashSet<NodeId>,
}

impl Touched {
    fn from_events(events: &[NotebookChange]) -> Self {
        let mut touched = Self::default();
        let mut seen = HashSet::new();
        for event in events {
            let id = match event {
                NotebookChange::NodeInserted { node, .. } => {
                    touched.inserted.insert(node.id);
                    node.id
                }
                NotebookChange::NodeChanged { node_id, .. } => {
                    touched.modified.insert(*node_id);
                    *node_id
                }
                NotebookChange::NodeConverted { node_id, .. } => {
                    touched.modified.insert(*node_id);
                    touched.converted.insert(*node_id);
                    *node_id
                }
                _ => continue,
            };
            if seen.insert(id) {
                touched.order.push(id);
            }
        }
        touched
    }

    /// Inserted in this step and not modified since
    fn only_inserted(&self, id: NodeId) -> bool {
        self.inserted.contains(&id) && !self.modified.contains(&id)
    }
}

/// Identity of an async invocation, used to coalesce duplicates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    /// Observer name
    pub observer: String,
    /// Rule name
    pub rule: String,
    /// Trigger node
    pub node: NodeId,
}

/// One pending async rule invocation
#[derive(Debug, Clone)]
pub struct AsyncJob {
    observer: String,
    rule: AsyncRule,
    trigger: Node,
}

impl AsyncJob {
    /// Observer that owns the rule
    #[inline]
    #[must_use]
    pub fn observer(&self) -> &str {
        &self.observer
    }

    /// Rule to run
    #[inline]
    #[must_use]
    pub fn rule(&self) -> &AsyncRule {
        &self.rule
    }

    /// Snapshot of the trigger at dispatch time
    #[inline]
    #[must_use]
    pub fn trigger(&self) -> &Node {
        &self.trigger
    }

    /// Coalescing key
    #[must_use]
    pub fn key(&self) -> JobKey {
        JobKey {
            observer: self.observer.clone(),
            rule: self.rule.name.clone(),
            node: self.trigger.id,
        }
    }

    /// Start the external computation
    #[must_use]
    pub fn run(&self) -> BoxFuture<'static, RuleResult<Option<Value>>> {
        self.rule.compute(self.trigger.clone())
    }

    fn output(&self) -> Output<'_> {
        Output {
            observer: &self.observer,
            relation: self.rule.relation,
            props: self.rule.props,
        }
    }
}

/// Per-notebook rule engine
#[derive(Debug, Default)]
pub struct RuleEngine {
    observers: Vec<Observer>,
    sync_index: DispatchIndex,
    async_index: DispatchIndex,
}

impl RuleEngine {
    /// Create engine with no observers
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer and index its rules
    ///
    /// # Errors
    /// `RuleError::DuplicateObserver` if the name is taken
    pub fn register(&mut self, observer: Observer) -> RuleResult<()> {
        if self.observer(observer.name()).is_some() {
            return Err(RuleError::DuplicateObserver(observer.name().to_string()));
        }
        let index = self.observers.len();
        for (rule, sync) in observer.sync_rules().iter().enumerate() {
            self.sync_index.add(&sync.trigger, RuleRef { observer: index, rule });
        }
        for (rule, rule_def) in observer.async_rules().iter().enumerate() {
            self.async_index.add(&rule_def.trigger, RuleRef { observer: index, rule });
        }
        tracing::debug!(
            observer = observer.name(),
            sync_rules = observer.sync_rules().len(),
            async_rules = observer.async_rules().len(),
            "registered observer"
        );
        self.observers.push(observer);
        Ok(())
    }

    /// Observer by name
    #[must_use]
    pub fn observer(&self, name: &str) -> Option<&Observer> {
        self.observers.iter().find(|o| o.name() == name)
    }

    /// Observers in registration order
    pub fn observers(&self) -> impl Iterator<Item = &Observer> {
        self.observers.iter()
    }

    /// Check if no observer is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Run one round of sync rules and analyzers over `events`
    ///
    /// Rule output comes first and uses reserved ids; analyzer output
    /// follows and may let the store assign ids.
    ///
    /// # Errors
    /// A failing sync rule or analyzer
    pub fn sync_pass(
        &self,
        notebook: &Notebook,
        events: &[NotebookChange],
    ) -> RuleResult<Vec<ChangeRequest>> {
        let touched = Touched::from_events(events);
        let mut ids = IdReserver::new(notebook);
        let mut requests = Vec::new();

        for &id in &touched.order {
            let Some(node) = notebook.node(id) else {
                continue;
            };
            for rule_ref in self.sync_index.candidates(node) {
                let observer = &self.observers[rule_ref.observer];
                let rule = &observer.sync_rules()[rule_ref.rule];
                if !rule.trigger.matches(node, notebook) {
                    continue;
                }
                let data = rule.compute(node, notebook)?;
                tracing::trace!(observer = observer.name(), rule = %rule.name, node_id = %id, "sync rule fired");
                let output = Output {
                    observer: observer.name(),
                    relation: rule.relation,
                    props: rule.props,
                };
                requests.extend(output.reconcile(notebook, node, data, &mut ids));
            }
            if touched.converted.contains(&id) {
                requests.extend(self.retract(notebook, node));
            }
        }

        requests.extend(orphaned_peers(notebook, events));

        for observer in &self.observers {
            for analyzer in observer.analyzers() {
                requests.extend(analyzer.analyze(notebook, events, observer.name())?);
            }
        }

        tracing::debug!(events = events.len(), requests = requests.len(), "sync pass");
        Ok(requests)
    }

    /// Delete outputs of rules the converted `node` no longer triggers
    ///
    /// ERROR children go too once none of their observer's async rules match.
    fn retract(&self, notebook: &Notebook, node: &Node) -> Vec<ChangeRequest> {
        let mut live = HashSet::new();
        let mut stale = Vec::new();
        let mut failing = Vec::new();
        for (index, observer) in self.observers.iter().enumerate() {
            if !observer
                .async_rules()
                .iter()
                .any(|r| r.trigger.matches(node, notebook))
            {
                failing.extend(error_children(notebook, node, observer.name()).map(|n| n.id));
            }
            let rules = observer
                .sync_rules()
                .iter()
                .map(|r| (&r.trigger, r.relation, r.props))
                .chain(
                    observer
                        .async_rules()
                        .iter()
                        .map(|r| (&r.trigger, r.relation, r.props)),
                );
            for (trigger, relation, props) in rules {
                let key = (index, relation, props);
                if trigger.matches(node, notebook) {
                    live.insert(key);
                } else {
                    stale.push(key);
                }
            }
        }

        let mut doomed = Vec::new();
        for key @ (index, relation, props) in stale {
            if live.contains(&key) {
                continue;
            }
            let output = Output {
                observer: self.observers[index].name(),
                relation,
                props,
            };
            if let Some(existing) = output.existing(notebook, node) {
                if !doomed.contains(&existing.id) {
                    doomed.push(existing.id);
                }
            }
        }
        for id in failing {
            if !doomed.contains(&id) {
                doomed.push(id);
            }
        }
        doomed.into_iter().map(ChangeRequest::delete).collect()
    }

    /// Async invocations triggered by a finished batch
    ///
    /// A node that was only inserted (typically restored by undo or redo)
    /// is skipped when the rule's output or error is already present.
    #[must_use]
    pub fn async_jobs(&self, notebook: &Notebook, events: &[NotebookChange]) -> Vec<AsyncJob> {
        let touched = Touched::from_events(events);
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();

        for &id in &touched.order {
            let Some(node) = notebook.node(id) else {
                continue;
            };
            for rule_ref in self.async_index.candidates(node) {
                let observer = &self.observers[rule_ref.observer];
                let rule = &observer.async_rules()[rule_ref.rule];
                if !rule.trigger.matches(node, notebook) {
                    continue;
                }
                let job = AsyncJob {
                    observer: observer.name().to_string(),
                    rule: rule.clone(),
                    trigger: node.clone(),
                };
                if touched.only_inserted(id)
                    && (job.output().existing(notebook, node).is_some()
                        || error_children(notebook, node, observer.name()).next().is_some())
                {
                    continue;
                }
                if seen.insert(job.key()) {
                    jobs.push(job);
                }
            }
        }
        jobs
    }

    /// Requests that apply an async outcome, or `None` if the trigger moved on
    ///
    /// A result is stale when the trigger was deleted or differs from the
    /// snapshot the job ran on. Success replaces the observer's ERROR children
    /// with the output; failure leaves exactly one ERROR child from the
    /// observer. Children from other sources are never touched.
    #[must_use]
    pub fn resolve_async(
        &self,
        notebook: &Notebook,
        job: &AsyncJob,
        outcome: RuleResult<Option<Value>>,
    ) -> Option<Vec<ChangeRequest>> {
        let current = notebook.node(job.trigger.id)?;
        if *current != job.trigger {
            tracing::debug!(observer = job.observer(), node_id = %current.id, "trigger changed, dropping async result");
            return None;
        }

        let mut ids = IdReserver::new(notebook);
        let mut requests: Vec<ChangeRequest> = Vec::new();
        match outcome {
            Ok(data) => {
                requests.extend(
                    error_children(notebook, current, job.observer())
                        .map(|n| ChangeRequest::delete(n.id)),
                );
                requests.extend(job.output().reconcile(notebook, current, data, &mut ids));
            }
            Err(error) => {
                let message = Value::String(error.to_string());
                tracing::warn!(observer = job.observer(), rule = %job.rule.name, node_id = %current.id, %error, "async rule failed");
                let mut errors = error_children(notebook, current, job.observer());
                match errors.next() {
                    Some(first) if first.data == message => {}
                    Some(first) => requests.push(ChangeRequest::change(first.id, message)),
                    None => {
                        let insert = InsertNode::new(Role::Error, NodeType::Text, message)
                            .child_of(current.id)
                            .from_source(job.observer())
                            .with_id(ids.node());
                        requests.push(insert.into());
                    }
                }
                requests.extend(errors.map(|n| ChangeRequest::delete(n.id)));
            }
        }
        Some(requests)
    }

    /// Run every observer's close hook
    pub fn close(&self, notebook: &str) {
        for observer in &self.observers {
            observer.close(notebook);
        }
    }
}

/// ERROR children of `node` attributed to `observer`
fn error_children<'n>(
    notebook: &'n Notebook,
    node: &Node,
    observer: &'n str,
) -> impl Iterator<Item = &'n Node> {
    notebook
        .children_of(node.id)
        .filter(move |n| n.role == Role::Error && n.source == observer)
}

/// Derived peers whose trigger was deleted in this step
fn orphaned_peers(notebook: &Notebook, events: &[NotebookChange]) -> Vec<ChangeRequest> {
    let mut doomed = Vec::new();
    for event in events {
        let NotebookChange::RelationshipDeleted { relationship } = event else {
            continue;
        };
        if relationship.role != RelationshipRole::Derivation
            || notebook.contains_node(relationship.from_id)
        {
            continue;
        }
        if let Some(peer) = notebook.node(relationship.to_id) {
            if peer.source != USER_SOURCE && !doomed.contains(&peer.id) {
                doomed.push(peer.id);
            }
        }
    }
    doomed.into_iter().map(ChangeRequest::delete).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{AsyncRule, SyncRule};
    use mathnb_store::Subrole;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn apply(notebook: &mut Notebook, requests: &[ChangeRequest]) -> Vec<NotebookChange> {
        let mut events = Vec::new();
        for request in requests {
            events.extend(notebook.apply(request).unwrap());
        }
        events
    }

    /// Apply `requests`, then sync passes until quiet
    fn settle(engine: &RuleEngine, notebook: &mut Notebook, requests: &[ChangeRequest]) {
        let mut events = apply(notebook, requests);
        for _ in 0..10 {
            let follow_ups = engine.sync_pass(notebook, &events).unwrap();
            if follow_ups.is_empty() {
                return;
            }
            events = apply(notebook, &follow_ups);
        }
        panic!("did not settle");
    }

    fn formula_pattern() -> NodePattern {
        NodePattern::of(Role::Input, NodeType::Text).subrole(Subrole::Formula)
    }

    fn echo_child() -> SyncRule {
        SyncRule::new(
            "echo",
            formula_pattern(),
            Relation::ParentToChild,
            DerivedProps::new(Role::Representation, NodeType::Latex),
            |node, _| Ok(node.text().filter(|t| !t.is_empty()).map(|t| json!(format!("${t}$")))),
        )
    }

    fn echo_peer() -> SyncRule {
        SyncRule::new(
            "peer",
            formula_pattern(),
            Relation::PeerToPeer,
            DerivedProps::new(Role::Exposition, NodeType::Text),
            |node, _| Ok(node.text().map(|t| json!(format!("about {t}")))),
        )
    }

    fn engine_with(observer: Observer) -> RuleEngine {
        let mut engine = RuleEngine::new();
        engine.register(observer).unwrap();
        engine
    }

    #[test]
    fn duplicate_observer_is_rejected() {
        let mut engine = RuleEngine::new();
        engine.register(Observer::new("cas")).unwrap();
        assert!(matches!(
            engine.register(Observer::new("cas")),
            Err(RuleError::DuplicateObserver(name)) if name == "cas"
        ));
    }

    #[test]
    fn parent_to_child_output_is_created_then_updated_in_place() {
        let engine = engine_with(Observer::new("tex").with_sync_rule(echo_child()));
        let mut nb = Notebook::new();
        settle(&engine, &mut nb, &[InsertNode::formula("x").into()]);

        let formula = nb.top_level_order()[0];
        let children: Vec<&Node> = nb.children_of(formula).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].data, json!("$x$"));
        assert_eq!(children[0].source, "tex");
        let derived = children[0].id;

        settle(&engine, &mut nb, &[ChangeRequest::change(formula, json!("y"))]);
        let child = nb.node(derived).unwrap();
        assert_eq!(child.data, json!("$y$"));

        settle(&engine, &mut nb, &[ChangeRequest::change(formula, json!(""))]);
        assert!(!nb.contains_node(derived));
    }

    #[test]
    fn settled_state_produces_no_requests() {
        let engine = engine_with(Observer::new("tex").with_sync_rule(echo_child()));
        let mut nb = Notebook::new();
        let events = apply(&mut nb, &[InsertNode::formula("x").into()]);
        let first = engine.sync_pass(&nb, &events).unwrap();
        apply(&mut nb, &first);

        // re-running on the original events is a no-op once the output exists
        assert!(engine.sync_pass(&nb, &events).unwrap().is_empty());
    }

    #[test]
    fn peer_output_is_linked_and_follows_trigger_deletion() {
        let engine = engine_with(Observer::new("notes").with_sync_rule(echo_peer()));
        let mut nb = Notebook::new();
        settle(&engine, &mut nb, &[InsertNode::formula("x").into()]);

        let order = nb.top_level_order().to_vec();
        assert_eq!(order.len(), 2);
        let (trigger, peer) = (order[0], order[1]);
        let link = nb.relationships().next().unwrap();
        assert_eq!((link.from_id, link.to_id), (trigger, peer));
        assert_eq!(link.role, RelationshipRole::Derivation);

        settle(&engine, &mut nb, &[ChangeRequest::delete(trigger)]);
        assert!(nb.is_empty());
    }

    #[test]
    fn peer_rule_reserves_explicit_ids() {
        let engine = engine_with(Observer::new("notes").with_sync_rule(echo_peer()));
        let mut nb = Notebook::new();
        let events = apply(&mut nb, &[InsertNode::formula("x").into()]);

        let requests = engine.sync_pass(&nb, &events).unwrap();
        let ChangeRequest::InsertNode(insert) = &requests[0] else {
            panic!("expected insertNode");
        };
        assert_eq!(insert.node_id, Some(NodeId(2)));
        assert_eq!(insert.position, Position::After(NodeId(1)));
        let ChangeRequest::InsertRelationship(link) = &requests[1] else {
            panic!("expected insertRelationship");
        };
        assert_eq!(link.relationship_id, Some(RelationshipId(3)));
    }

    #[test]
    fn conversion_retracts_outputs_of_rules_no_longer_triggered() {
        let engine = engine_with(Observer::new("tex").with_sync_rule(echo_child()));
        let mut nb = Notebook::new();
        settle(&engine, &mut nb, &[InsertNode::formula("x").into()]);
        let formula = nb.top_level_order()[0];
        assert_eq!(nb.children_of(formula).count(), 1);

        let convert = ChangeRequest::ConvertNode {
            node_id: formula,
            role: Role::Input,
            subrole: Some(Subrole::Text),
            node_type: None,
            data: None,
        };
        settle(&engine, &mut nb, &[convert]);
        assert_eq!(nb.children_of(formula).count(), 0);
    }

    fn slow_upper() -> AsyncRule {
        AsyncRule::new(
            "upper",
            formula_pattern(),
            Relation::ParentToChild,
            DerivedProps::new(Role::Representation, NodeType::Text),
            |node: Node| async move { Ok(node.text().map(|t| json!(t.to_uppercase()))) },
        )
    }

    #[tokio::test]
    async fn async_result_becomes_child() {
        let engine = engine_with(Observer::new("cas").with_async_rule(slow_upper()));
        let mut nb = Notebook::new();
        let events = apply(&mut nb, &[InsertNode::formula("x").into()]);

        let jobs = engine.async_jobs(&nb, &events);
        assert_eq!(jobs.len(), 1);
        let outcome = jobs[0].run().await;
        let requests = engine.resolve_async(&nb, &jobs[0], outcome).unwrap();
        apply(&mut nb, &requests);

        let formula = nb.top_level_order()[0];
        let child = nb.children_of(formula).next().unwrap();
        assert_eq!(child.data, json!("X"));
        assert_eq!(child.source, "cas");
    }

    #[tokio::test]
    async fn stale_async_result_is_dropped() {
        let engine = engine_with(Observer::new("cas").with_async_rule(slow_upper()));
        let mut nb = Notebook::new();
        let events = apply(&mut nb, &[InsertNode::formula("x").into()]);
        let job = engine.async_jobs(&nb, &events).remove(0);
        let outcome = job.run().await;

        nb.change(job.trigger().id, json!("y")).unwrap();
        assert!(engine.resolve_async(&nb, &job, outcome.clone()).is_none());

        nb.delete(job.trigger().id).unwrap();
        assert!(engine.resolve_async(&nb, &job, outcome).is_none());
    }

    #[test]
    fn failure_becomes_error_child_and_success_clears_it() {
        let engine = engine_with(Observer::new("cas").with_async_rule(slow_upper()));
        let mut nb = Notebook::new();
        let events = apply(&mut nb, &[InsertNode::formula("x").into()]);
        let job = engine.async_jobs(&nb, &events).remove(0);
        let formula = job.trigger().id;

        let failed = engine
            .resolve_async(&nb, &job, Err(RuleError::adapter("cas", "unreachable")))
            .unwrap();
        apply(&mut nb, &failed);
        let error = nb.children_of(formula).next().unwrap();
        assert_eq!(error.role, Role::Error);
        assert_eq!(error.data, json!("adapter cas failed: unreachable"));

        // the same failure again changes nothing
        let again = engine
            .resolve_async(&nb, &job, Err(RuleError::adapter("cas", "unreachable")))
            .unwrap();
        assert!(again.is_empty());

        let ok = engine.resolve_async(&nb, &job, Ok(Some(json!("X")))).unwrap();
        apply(&mut nb, &ok);
        let roles: Vec<Role> = nb.children_of(formula).map(|n| n.role).collect();
        assert_eq!(roles, vec![Role::Representation]);
    }

    #[test]
    fn restored_nodes_with_output_are_not_redispatched() {
        let engine = engine_with(Observer::new("cas").with_async_rule(slow_upper()));
        let mut nb = Notebook::new();
        let events = apply(&mut nb, &[InsertNode::formula("x").into()]);
        let job = engine.async_jobs(&nb, &events).remove(0);
        let ok = engine.resolve_async(&nb, &job, Ok(Some(json!("X")))).unwrap();
        apply(&mut nb, &ok);

        // delete and restore the formula with its output, as undo would
        let formula = job.trigger().id;
        let deleted = nb.delete(formula).unwrap();
        let restored = apply(&mut nb, &mathnb_store::inverse_of(&deleted));
        assert!(engine.async_jobs(&nb, &restored).is_empty());

        // an edit dispatches again, once
        let mut edits = nb.change(formula, json!("y")).unwrap();
        edits.extend(nb.change(formula, json!("z")).unwrap());
        assert_eq!(engine.async_jobs(&nb, &edits).len(), 1);
    }

    #[test]
    fn wildcard_rules_see_every_node() {
        let counter = SyncRule::new(
            "len",
            NodePattern::any().top_level(),
            Relation::ParentToChild,
            DerivedProps::new(Role::Attribute, NodeType::Text),
            |node, _| Ok(Some(json!(node.data.to_string().len()))),
        );
        let engine = engine_with(Observer::new("meta").with_sync_rule(counter));
        let mut nb = Notebook::new();
        settle(
            &engine,
            &mut nb,
            &[
                InsertNode::formula("x").into(),
                InsertNode::new(Role::Exposition, NodeType::Text, json!("hello")).into(),
            ],
        );
        for &top in nb.top_level_order() {
            assert_eq!(nb.children_of(top).count(), 1);
        }
    }

    fn sources_of(nb: &Notebook, parent: NodeId) -> Vec<&str> {
        nb.children_of(parent).map(|n| n.source.as_str()).collect()
    }

    #[test]
    fn observers_sharing_output_props_keep_their_own_children() {
        let mut engine = RuleEngine::new();
        engine.register(Observer::new("a").with_sync_rule(echo_child())).unwrap();
        engine.register(Observer::new("b").with_sync_rule(echo_child())).unwrap();
        let mut nb = Notebook::new();
        settle(&engine, &mut nb, &[InsertNode::formula("x").into()]);

        let formula = nb.top_level_order()[0];
        assert_eq!(sources_of(&nb, formula), vec!["a", "b"]);

        settle(&engine, &mut nb, &[ChangeRequest::change(formula, json!("y"))]);
        assert_eq!(sources_of(&nb, formula), vec!["a", "b"]);
        assert!(nb.children_of(formula).all(|n| n.data == json!("$y$")));
    }

    #[test]
    fn rederiving_leaves_user_siblings_alone() {
        let engine = engine_with(Observer::new("tex").with_sync_rule(echo_child()));
        let mut nb = Notebook::new();
        settle(&engine, &mut nb, &[InsertNode::formula("x").into()]);
        let formula = nb.top_level_order()[0];

        let own = InsertNode::new(Role::Representation, NodeType::Latex, json!("\\chi")).child_of(formula);
        settle(&engine, &mut nb, &[own.into()]);
        settle(&engine, &mut nb, &[ChangeRequest::change(formula, json!("y"))]);

        let children: Vec<(&str, &Value)> = nb.children_of(formula).map(|n| (n.source.as_str(), &n.data)).collect();
        assert_eq!(children, vec![("tex", &json!("$y$")), (USER_SOURCE, &json!("\\chi"))]);
    }

    #[test]
    fn outputs_differing_by_subrole_are_distinct() {
        let rule = |name: &str, subrole: Subrole| {
            SyncRule::new(
                name,
                formula_pattern(),
                Relation::ParentToChild,
                DerivedProps::new(Role::Exposition, NodeType::Text).with_subrole(subrole),
                move |_, _| Ok(Some(json!(format!("{subrole:?}")))),
            )
        };
        let engine = engine_with(
            Observer::new("notes")
                .with_sync_rule(rule("prose", Subrole::Text))
                .with_sync_rule(rule("figure", Subrole::Figure)),
        );
        let mut nb = Notebook::new();
        settle(&engine, &mut nb, &[InsertNode::formula("x").into()]);

        let formula = nb.top_level_order()[0];
        let subroles: Vec<Option<Subrole>> = nb.children_of(formula).map(|n| n.subrole).collect();
        assert_eq!(subroles, vec![Some(Subrole::Text), Some(Subrole::Figure)]);
    }

    #[test]
    fn failures_from_two_observers_coexist() {
        let mut engine = RuleEngine::new();
        engine.register(Observer::new("a").with_async_rule(slow_upper())).unwrap();
        engine.register(Observer::new("b").with_async_rule(slow_upper())).unwrap();
        let mut nb = Notebook::new();
        let events = apply(&mut nb, &[InsertNode::formula("x").into()]);
        let jobs = engine.async_jobs(&nb, &events);
        assert_eq!(jobs.len(), 2);
        let formula = jobs[0].trigger().id;

        for job in &jobs {
            let failed = engine
                .resolve_async(&nb, job, Err(RuleError::adapter(job.observer(), "down")))
                .unwrap();
            apply(&mut nb, &failed);
        }
        assert_eq!(sources_of(&nb, formula), vec!["a", "b"]);

        // a different failure from "a" rewrites its own error only
        let again = engine
            .resolve_async(&nb, &jobs[0], Err(RuleError::adapter("a", "timeout")))
            .unwrap();
        assert!(matches!(again.as_slice(), [ChangeRequest::ChangeNode { .. }]));
        apply(&mut nb, &again);

        let ok = engine.resolve_async(&nb, &jobs[1], Ok(Some(json!("X")))).unwrap();
        apply(&mut nb, &ok);
        let children: Vec<(&str, Role)> = nb.children_of(formula).map(|n| (n.source.as_str(), n.role)).collect();
        assert_eq!(children, vec![("a", Role::Error), ("b", Role::Representation)]);
        assert_eq!(
            error_children(&nb, nb.node(formula).unwrap(), "a").next().unwrap().data,
            json!("adapter a failed: timeout")
        );
    }

    #[test]
    fn conversion_retracts_error_children_of_unmatched_async_rules() {
        let engine = engine_with(Observer::new("cas").with_async_rule(slow_upper()));
        let mut nb = Notebook::new();
        let events = apply(&mut nb, &[InsertNode::formula("x").into()]);
        let job = engine.async_jobs(&nb, &events).remove(0);
        let failed = engine
            .resolve_async(&nb, &job, Err(RuleError::adapter("cas", "unreachable")))
            .unwrap();
        apply(&mut nb, &failed);
        let formula = job.trigger().id;
        assert_eq!(nb.children_of(formula).count(), 1);

        let convert = ChangeRequest::ConvertNode {
            node_id: formula,
            role: Role::Input,
            subrole: Some(Subrole::Text),
            node_type: None,
            data: None,
        };
        settle(&engine, &mut nb, &[convert]);
        assert_eq!(nb.children_of(formula).count(), 0);
    }
}
