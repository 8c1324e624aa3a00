//! Change Request Processor
//!
//! Applies one batch atomically:
//! - Validates and applies each request on a working copy
//! - Expands `useTool` requests into their observer's follow-ups
//! - Runs sync propagation to a fixed point
//! - Commits the working copy only if every step succeeded
//!
//! Inverse and redo batches are derived from the committed events.

use crate::error::{NotebookError, NotebookResult};
use mathnb_rules::{AsyncJob, RuleEngine};
use mathnb_store::{inverse_of, replay_of, ChangeRequest, NodeId, Notebook, NotebookChange, Role};
use serde::{Deserialize, Serialize};

/// Per-call options of [`ChangeProcessor::apply`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Return the inverse batch and record the batch for undo
    pub want_undo: bool,
}

impl ApplyOptions {
    /// Tracked apply
    #[inline]
    #[must_use]
    pub fn tracked() -> Self {
        Self { want_undo: true }
    }

    /// Untracked apply
    #[inline]
    #[must_use]
    pub fn untracked() -> Self {
        Self { want_undo: false }
    }
}

/// Wire response of a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// Every structural effect, in application order
    pub events: Vec<NotebookChange>,
    /// Batch that undoes `events`, if requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<Vec<ChangeRequest>>,
}

/// Committed batch: events plus the async work they triggered
#[derive(Debug, Default)]
pub struct ProcessedBatch {
    /// Direct and rule-derived events, in application order
    pub events: Vec<NotebookChange>,
    /// Async rule invocations to queue
    pub jobs: Vec<AsyncJob>,
}

impl ProcessedBatch {
    /// Check if the batch changed nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Batch that undoes every event
    #[must_use]
    pub fn inverse(&self) -> Vec<ChangeRequest> {
        inverse_of(&self.events)
    }

    /// Batch that replays every event with resolved ids
    #[must_use]
    pub fn forward(&self) -> Vec<ChangeRequest> {
        replay_of(&self.events)
    }

    /// Wire response, with the inverse if `options` ask for it
    #[must_use]
    pub fn response(&self, options: ApplyOptions) -> BatchResponse {
        BatchResponse {
            events: self.events.clone(),
            inverse: options.want_undo.then(|| self.inverse()),
        }
    }
}

/// Stateless batch processor
#[derive(Debug, Clone, Copy)]
pub struct ChangeProcessor {
    max_sync_passes: usize,
}

impl ChangeProcessor {
    /// Create processor with a sync pass cap
    #[inline]
    #[must_use]
    pub fn new(max_sync_passes: usize) -> Self {
        Self { max_sync_passes }
    }

    /// Sync pass cap
    #[inline]
    #[must_use]
    pub fn max_sync_passes(&self) -> usize {
        self.max_sync_passes
    }

    /// Apply `batch` to `notebook`, all or nothing
    ///
    /// # Errors
    /// - `NotebookError::Store` if a request is structurally invalid
    /// - `NotebookError::Rule` if a sync rule, analyzer or tool fails
    /// - `NotebookError::NonConvergence` if propagation does not settle
    ///
    /// On error `notebook` is unchanged.
    pub fn apply(
        &self,
        notebook: &mut Notebook,
        engine: &RuleEngine,
        batch: &[ChangeRequest],
    ) -> NotebookResult<ProcessedBatch> {
        let mut work = notebook.clone();
        let mut events = Vec::new();
        let mut follow_ups = Vec::new();

        for request in batch {
            work.validate(request)?;
            if let ChangeRequest::UseTool { node_id } = request {
                follow_ups.extend(tool_requests(&work, engine, *node_id)?);
            }
            events.extend(work.apply(request)?);
        }
        for request in &follow_ups {
            work.validate(request)?;
            events.extend(work.apply(request)?);
        }

        let derived = self.propagate(&mut work, engine, &events)?;
        events.extend(derived);

        let jobs = engine.async_jobs(&work, &events);
        tracing::debug!(
            requests = batch.len(),
            tool_requests = follow_ups.len(),
            events = events.len(),
            jobs = jobs.len(),
            "batch committed"
        );
        *notebook = work;
        Ok(ProcessedBatch { events, jobs })
    }

    /// Re-derive all content as if every node and relationship were new
    ///
    /// Used after loading documents written elsewhere.
    ///
    /// # Errors
    /// Same as [`ChangeProcessor::apply`]
    pub fn rederive(&self, notebook: &mut Notebook, engine: &RuleEngine) -> NotebookResult<ProcessedBatch> {
        let mut seeds: Vec<NotebookChange> = Vec::with_capacity(notebook.node_count());
        for &top in notebook.top_level_order() {
            for id in std::iter::once(top).chain(notebook.descendants(top)) {
                if let Some(node) = notebook.node(id) {
                    seeds.push(NotebookChange::NodeInserted {
                        node: node.clone(),
                        position: None,
                    });
                }
            }
        }
        seeds.extend(notebook.relationships().map(|r| NotebookChange::RelationshipInserted {
            relationship: r.clone(),
        }));

        let mut work = notebook.clone();
        let events = self.propagate(&mut work, engine, &seeds)?;
        let jobs = engine.async_jobs(&work, &seeds);
        tracing::debug!(seeds = seeds.len(), events = events.len(), "notebook re-derived");
        *notebook = work;
        Ok(ProcessedBatch { events, jobs })
    }

    /// Run sync passes until no rule or analyzer asks for more
    ///
    /// Derived requests whose target vanished earlier in the same pass are
    /// dropped; the next pass sees the deletion and re-derives.
    fn propagate(
        &self,
        work: &mut Notebook,
        engine: &RuleEngine,
        seed: &[NotebookChange],
    ) -> NotebookResult<Vec<NotebookChange>> {
        let mut derived = Vec::new();
        let mut step = seed.to_vec();

        for pass in 0..self.max_sync_passes {
            let requests = engine.sync_pass(work, &step)?;
            if requests.is_empty() {
                tracing::trace!(passes = pass, "sync propagation settled");
                return Ok(derived);
            }
            step.clear();
            for request in &requests {
                match work.validate(request) {
                    Ok(()) => step.extend(work.apply(request)?),
                    Err(e) if e.is_missing_reference() => {
                        tracing::debug!(request = request.name(), error = %e, "dropping derived request");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            derived.extend(step.iter().cloned());
        }

        tracing::error!(passes = self.max_sync_passes, "sync rules did not converge");
        Err(NotebookError::NonConvergence {
            passes: self.max_sync_passes,
        })
    }
}

impl Default for ChangeProcessor {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Follow-up requests of the tool node `node_id`
fn tool_requests(
    notebook: &Notebook,
    engine: &RuleEngine,
    node_id: NodeId,
) -> NotebookResult<Vec<ChangeRequest>> {
    let node = notebook.get_node(node_id)?;
    if !matches!(node.role, Role::Tool | Role::Attribute) {
        return Err(NotebookError::ToolNotAvailable(node_id));
    }
    let observer = engine
        .observer(&node.source)
        .ok_or_else(|| NotebookError::UnknownObserver(node.source.clone()))?;
    let requests = observer
        .use_tool(node, notebook)
        .ok_or(NotebookError::ToolNotAvailable(node_id))??;
    tracing::debug!(observer = observer.name(), node_id = %node_id, requests = requests.len(), "tool used");
    Ok(requests)
}
