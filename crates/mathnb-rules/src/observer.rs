//! Observers: named bundles of rules, analyzers and lifecycle hooks

use crate::error::RuleResult;
use crate::rule::{AsyncRule, SyncRule};
use mathnb_store::{ChangeRequest, Node, Notebook, NotebookChange};
use std::fmt;
use std::sync::Arc;

/// Whole-batch analysis run on every sync pass
///
/// Analyzers see every event of the pass, not just one trigger node, so they
/// can maintain state that spans nodes (relationships, symbol tables). They
/// must be idempotent: once the notebook is consistent they return nothing.
pub trait ChangeAnalyzer: Send + Sync {
    /// Analyzer name, for logging
    fn name(&self) -> &str;

    /// Requests that bring the notebook back in line after `events`
    ///
    /// `source` is the owning observer's name; derived nodes must carry it.
    ///
    /// # Errors
    /// An analyzer failure aborts the batch
    fn analyze(
        &self,
        notebook: &Notebook,
        events: &[NotebookChange],
        source: &str,
    ) -> RuleResult<Vec<ChangeRequest>>;
}

/// Follow-up requests for a tool node owned by the observer
pub type ToolHook = Arc<dyn Fn(&Node, &Notebook) -> RuleResult<Vec<ChangeRequest>> + Send + Sync>;

/// Called with the notebook name when the notebook closes
pub type CloseHook = Arc<dyn Fn(&str) + Send + Sync>;

/// A pluggable unit owning rules that derive content
pub struct Observer {
    name: String,
    sync_rules: Vec<SyncRule>,
    async_rules: Vec<AsyncRule>,
    analyzers: Vec<Box<dyn ChangeAnalyzer>>,
    use_tool: Option<ToolHook>,
    on_close: Option<CloseHook>,
}

impl Observer {
    /// Create new observer with no rules
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sync_rules: Vec::new(),
            async_rules: Vec::new(),
            analyzers: Vec::new(),
            use_tool: None,
            on_close: None,
        }
    }

    /// Add a sync rule
    #[must_use]
    pub fn with_sync_rule(mut self, rule: SyncRule) -> Self {
        self.sync_rules.push(rule);
        self
    }

    /// Add an async rule
    #[must_use]
    pub fn with_async_rule(mut self, rule: AsyncRule) -> Self {
        self.async_rules.push(rule);
        self
    }

    /// Add a change analyzer
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: impl ChangeAnalyzer + 'static) -> Self {
        self.analyzers.push(Box::new(analyzer));
        self
    }

    /// Set the tool hook
    #[must_use]
    pub fn with_tool<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Node, &Notebook) -> RuleResult<Vec<ChangeRequest>> + Send + Sync + 'static,
    {
        self.use_tool = Some(Arc::new(hook));
        self
    }

    /// Set the close hook
    #[must_use]
    pub fn with_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(hook));
        self
    }

    /// Observer name; also the `source` of every node it derives
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sync rules in registration order
    #[inline]
    #[must_use]
    pub fn sync_rules(&self) -> &[SyncRule] {
        &self.sync_rules
    }

    /// Async rules in registration order
    #[inline]
    #[must_use]
    pub fn async_rules(&self) -> &[AsyncRule] {
        &self.async_rules
    }

    /// Change analyzers in registration order
    pub fn analyzers(&self) -> impl Iterator<Item = &dyn ChangeAnalyzer> {
        self.analyzers.iter().map(AsRef::as_ref)
    }

    /// Check if the observer answers `useTool`
    #[inline]
    #[must_use]
    pub fn has_tool(&self) -> bool {
        self.use_tool.is_some()
    }

    /// Run the tool hook, if any
    #[must_use]
    pub fn use_tool(&self, node: &Node, notebook: &Notebook) -> Option<RuleResult<Vec<ChangeRequest>>> {
        self.use_tool.as_ref().map(|hook| hook(node, notebook))
    }

    /// Run the close hook, if any
    pub fn close(&self, notebook: &str) {
        if let Some(hook) = &self.on_close {
            hook(notebook);
        }
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("name", &self.name)
            .field("sync_rules", &self.sync_rules)
            .field("async_rules", &self.async_rules)
            .field(
                "analyzers",
                &self.analyzers.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .field("has_tool", &self.has_tool())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathnb_store::{InsertNode, NodeType, Role};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Nothing;

    impl ChangeAnalyzer for Nothing {
        fn name(&self) -> &str {
            "nothing"
        }

        fn analyze(&self, _: &Notebook, _: &[NotebookChange], _: &str) -> RuleResult<Vec<ChangeRequest>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn builder_collects_parts() {
        let observer = Observer::new("cas").with_analyzer(Nothing);
        assert_eq!(observer.name(), "cas");
        assert_eq!(observer.analyzers().count(), 1);
        assert!(!observer.has_tool());
        assert!(format!("{observer:?}").contains("nothing"));
    }

    #[test]
    fn tool_hook_returns_follow_ups() {
        let observer = Observer::new("plot").with_tool(|node, _| {
            Ok(vec![InsertNode::new(Role::Exposition, NodeType::Text, json!("plotted"))
                .child_of(node.id)
                .into()])
        });
        let mut notebook = Notebook::new();
        let (id, _) = notebook
            .insert(InsertNode::new(Role::Tool, NodeType::ToolData, json!({})))
            .unwrap();
        let node = notebook.node(id).unwrap();

        let follow_ups = observer.use_tool(node, &notebook).unwrap().unwrap();
        assert_eq!(follow_ups.len(), 1);
    }

    #[test]
    fn close_hook_sees_notebook_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let observer = Observer::new("cas").with_close(move |name| {
            assert_eq!(name, "algebra");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        observer.close("algebra");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
