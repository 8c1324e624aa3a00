//! One open notebook
//!
//! A [`NotebookSession`] owns a notebook, its rule engine and undo history
//! behind a single lock, so batches never interleave. Async rule jobs go
//! to a per-session queue drained by one tokio task: a job starts only
//! after the previous job's result and its sync cascade were applied.

use crate::config::NotebookConfig;
use crate::error::{NotebookError, NotebookResult};
use crate::processor::{ApplyOptions, BatchResponse, ChangeProcessor, ProcessedBatch};
use crate::undo::{UndoEntry, UndoStack};
use mathnb_rules::{AsyncJob, JobKey, RuleEngine, RuleResult};
use mathnb_store::{ChangeRequest, NodeId, Notebook, NotebookChange};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};

const EVENT_FEED_CAPACITY: usize = 256;

struct SessionState {
    notebook: Notebook,
    engine: RuleEngine,
    undo: UndoStack,
}

/// Async queue state
///
/// The channel carries keys in arrival order; `queued` holds the latest job
/// per key, so a re-queued trigger runs once on its newest snapshot. The
/// receiver moves into the worker on first use.
struct JobQueue {
    sender: Option<mpsc::UnboundedSender<JobKey>>,
    receiver: Option<mpsc::UnboundedReceiver<JobKey>>,
    queued: HashMap<JobKey, AsyncJob>,
}

/// An open notebook with its rules, history and async queue
pub struct NotebookSession {
    name: String,
    me: Weak<NotebookSession>,
    processor: ChangeProcessor,
    state: Mutex<SessionState>,
    queue: Mutex<JobQueue>,
    pending: watch::Sender<usize>,
    events: broadcast::Sender<Vec<NotebookChange>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for NotebookSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookSession")
            .field("name", &self.name)
            .field("pending_jobs", &self.pending_jobs())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl NotebookSession {
    /// Create session over `notebook` with the observers registered on `engine`
    ///
    /// Async rules need a tokio runtime; the queue worker is spawned on the
    /// current runtime the first time a job is queued.
    #[must_use]
    pub fn new(name: impl Into<String>, notebook: Notebook, engine: RuleEngine, config: &NotebookConfig) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_FEED_CAPACITY);
        Arc::new_cyclic(|me| Self {
            name: name.into(),
            me: me.clone(),
            processor: ChangeProcessor::new(config.max_sync_passes),
            state: Mutex::new(SessionState {
                notebook,
                engine,
                undo: UndoStack::new(config.undo_limit),
            }),
            queue: Mutex::new(JobQueue {
                sender: Some(sender),
                receiver: Some(receiver),
                queued: HashMap::new(),
            }),
            pending,
            events,
            closed: AtomicBool::new(false),
        })
    }

    /// Notebook name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the session was closed
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Apply a batch
    ///
    /// With `options.want_undo` the batch is recorded for undo and the
    /// response carries its inverse.
    ///
    /// # Errors
    /// `NotebookError::NotebookClosed`, or any batch failure; the notebook is
    /// unchanged on error.
    pub fn apply(&self, batch: &[ChangeRequest], options: ApplyOptions) -> NotebookResult<BatchResponse> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let processed = self.commit(&mut state, batch)?;
        if options.want_undo && !processed.is_empty() {
            state.undo.push(UndoEntry {
                forward: processed.forward(),
                inverse: processed.inverse(),
            });
        }
        let response = processed.response(options);
        self.enqueue(processed.jobs);
        Ok(response)
    }

    /// Invoke a tool node and record the result for undo
    ///
    /// # Errors
    /// `NotebookError::ToolNotAvailable` or `NotebookError::UnknownObserver`
    /// when the node has no usable tool, or any batch failure.
    pub fn use_tool(&self, node_id: NodeId) -> NotebookResult<BatchResponse> {
        self.apply(&[ChangeRequest::UseTool { node_id }], ApplyOptions::tracked())
    }

    /// Undo the last recorded batch; `None` when there is nothing to undo
    ///
    /// # Errors
    /// Any batch failure; the history cursor does not move on error.
    pub fn undo(&self) -> NotebookResult<Option<BatchResponse>> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let Some(batch) = state.undo.next_undo().map(<[ChangeRequest]>::to_vec) else {
            tracing::debug!(notebook = %self.name, "nothing to undo");
            return Ok(None);
        };
        let processed = self.commit(&mut state, &batch)?;
        state.undo.undone();
        Ok(Some(self.finish(processed)))
    }

    /// Redo the last undone batch; `None` when there is nothing to redo
    ///
    /// # Errors
    /// Any batch failure; the history cursor does not move on error.
    pub fn redo(&self) -> NotebookResult<Option<BatchResponse>> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let Some(batch) = state.undo.next_redo().map(<[ChangeRequest]>::to_vec) else {
            tracing::debug!(notebook = %self.name, "nothing to redo");
            return Ok(None);
        };
        let processed = self.commit(&mut state, &batch)?;
        state.undo.redone();
        Ok(Some(self.finish(processed)))
    }

    /// Check if undo would do anything
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.state.lock().undo.can_undo()
    }

    /// Check if redo would do anything
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.state.lock().undo.can_redo()
    }

    /// Re-derive all rule and analyzer output without recording undo
    ///
    /// # Errors
    /// Any batch failure
    pub fn rederive(&self) -> NotebookResult<BatchResponse> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let SessionState { notebook, engine, .. } = &mut *state;
        let processed = self.processor.rederive(notebook, engine)?;
        self.publish(&processed.events);
        Ok(self.finish(processed))
    }

    /// Copy of the current notebook
    #[must_use]
    pub fn snapshot(&self) -> Notebook {
        self.state.lock().notebook.clone()
    }

    /// Run `f` against the current notebook under the session lock
    pub fn read<R>(&self, f: impl FnOnce(&Notebook) -> R) -> R {
        f(&self.state.lock().notebook)
    }

    /// Serialized document
    ///
    /// # Errors
    /// `NotebookError::Store` if serialization fails
    pub fn to_json(&self) -> NotebookResult<String> {
        Ok(self.state.lock().notebook.to_json()?)
    }

    /// Feed of committed event lists, including async and undo batches
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<NotebookChange>> {
        self.events.subscribe()
    }

    /// Async jobs queued or running
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until the async queue is empty and every result is applied
    pub async fn settled(&self) {
        let mut pending = self.pending.subscribe();
        if pending.wait_for(|&n| n == 0).await.is_err() {
            tracing::debug!(notebook = %self.name, "pending counter dropped");
        }
    }

    /// Close the session; outstanding async results are discarded
    ///
    /// Runs every observer's close hook once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut queue = self.queue.lock();
            queue.sender = None;
            queue.receiver = None;
            queue.queued.clear();
        }
        let state = self.state.lock();
        state.engine.close(&self.name);
        tracing::info!(notebook = %self.name, pending = self.pending_jobs(), "notebook closed");
    }

    fn ensure_open(&self) -> NotebookResult<()> {
        if self.is_closed() {
            return Err(NotebookError::NotebookClosed(self.name.clone()));
        }
        Ok(())
    }

    fn commit(&self, state: &mut SessionState, batch: &[ChangeRequest]) -> NotebookResult<ProcessedBatch> {
        let SessionState { notebook, engine, .. } = state;
        match self.processor.apply(notebook, engine, batch) {
            Ok(processed) => {
                self.publish(&processed.events);
                Ok(processed)
            }
            Err(error) => {
                tracing::warn!(notebook = %self.name, requests = batch.len(), %error, "batch rejected");
                Err(error)
            }
        }
    }

    fn finish(&self, processed: ProcessedBatch) -> BatchResponse {
        let response = processed.response(ApplyOptions::untracked());
        self.enqueue(processed.jobs);
        response
    }

    fn publish(&self, events: &[NotebookChange]) {
        if !events.is_empty() && self.events.receiver_count() > 0 {
            // lagging or departed receivers are their own concern
            let _ = self.events.send(events.to_vec());
        }
    }

    fn enqueue(&self, jobs: Vec<AsyncJob>) {
        if jobs.is_empty() || self.is_closed() {
            return;
        }
        let mut guard = self.queue.lock();
        let queue = &mut *guard;
        if let Some(receiver) = queue.receiver.take() {
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(run_jobs(self.me.clone(), receiver));
                    tracing::debug!(notebook = %self.name, "async queue worker started");
                }
                Err(_) => {
                    queue.receiver = Some(receiver);
                    tracing::warn!(notebook = %self.name, jobs = jobs.len(), "no tokio runtime, async rules skipped");
                    return;
                }
            }
        }
        let Some(sender) = &queue.sender else {
            return;
        };
        for job in jobs {
            let key = job.key();
            if queue.queued.insert(key.clone(), job).is_some() {
                tracing::trace!(notebook = %self.name, observer = %key.observer, node_id = %key.node, "async job coalesced");
                continue;
            }
            self.pending.send_modify(|n| *n += 1);
            if sender.send(key.clone()).is_err() {
                queue.queued.remove(&key);
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
            }
        }
    }

    fn resolve(&self, job: &AsyncJob, outcome: RuleResult<Option<Value>>) {
        let mut state = self.state.lock();
        if self.is_closed() {
            tracing::warn!(notebook = %self.name, observer = job.observer(), "notebook closed, async result discarded");
            return;
        }
        let Some(requests) = state.engine.resolve_async(&state.notebook, job, outcome) else {
            return;
        };
        if requests.is_empty() {
            return;
        }
        match self.commit(&mut state, &requests) {
            Ok(processed) => {
                tracing::debug!(
                    notebook = %self.name,
                    observer = job.observer(),
                    node_id = %job.trigger().id,
                    events = processed.events.len(),
                    "async result applied"
                );
                self.enqueue(processed.jobs);
            }
            Err(error) => {
                tracing::warn!(notebook = %self.name, observer = job.observer(), %error, "async result rejected");
            }
        }
    }

    fn take_job(&self, key: &JobKey) -> Option<AsyncJob> {
        self.queue.lock().queued.remove(key)
    }

    fn job_done(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Drain one session's async queue, one job at a time
async fn run_jobs(session: Weak<NotebookSession>, mut receiver: mpsc::UnboundedReceiver<JobKey>) {
    while let Some(key) = receiver.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        match session.take_job(&key) {
            Some(job) if !session.is_closed() => {
                let outcome = job.run().await;
                session.resolve(&job, outcome);
            }
            _ => {
                tracing::debug!(notebook = %session.name, observer = %key.observer, "notebook closed, async job skipped");
            }
        }
        session.job_done();
    }
}
