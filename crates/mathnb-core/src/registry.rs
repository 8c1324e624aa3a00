//! Notebook Registry
//!
//! Process-wide map of open notebooks by name. Each open builds a fresh
//! rule engine from the registered observer factories, so observers hold
//! per-notebook state only.

use crate::config::NotebookConfig;
use crate::error::NotebookResult;
use crate::session::NotebookSession;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mathnb_rules::{Observer, RuleEngine};
use mathnb_store::Notebook;
use mathnb_symbol::symbol_observer;
use std::sync::Arc;

/// Builds one observer for a newly opened notebook
pub type ObserverFactory = Arc<dyn Fn() -> Observer + Send + Sync>;

/// Registry of open notebooks
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct NotebookRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    open: DashMap<String, Arc<NotebookSession>>,
    config: NotebookConfig,
    factories: Vec<ObserverFactory>,
}

impl NotebookRegistry {
    /// Create registry with the built-in symbol observer
    #[must_use]
    pub fn new(config: NotebookConfig) -> Self {
        Self::with_observers(config, vec![Arc::new(symbol_observer) as ObserverFactory])
    }

    /// Create registry with exactly `factories`
    #[must_use]
    pub fn with_observers(config: NotebookConfig, factories: Vec<ObserverFactory>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                open: DashMap::new(),
                config,
                factories,
            }),
        }
    }

    /// Shared configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &NotebookConfig {
        &self.inner.config
    }

    /// Open an empty notebook, or return the one already open under `name`
    ///
    /// # Errors
    /// `NotebookError::Rule` if two factories build observers with the same name
    pub fn open(&self, name: &str) -> NotebookResult<Arc<NotebookSession>> {
        self.open_with(name, || Ok(Notebook::with_page_config(self.inner.config.page.clone())))
    }

    /// Open a serialized document, or return the one already open under `name`
    ///
    /// `json` is not read when the notebook is already open.
    ///
    /// # Errors
    /// `NotebookError::Store` if the document is invalid, or as [`NotebookRegistry::open`]
    pub fn open_document(&self, name: &str, json: &str) -> NotebookResult<Arc<NotebookSession>> {
        self.open_with(name, || Ok(Notebook::from_json(json)?))
    }

    fn open_with(
        &self,
        name: &str,
        load: impl FnOnce() -> NotebookResult<Notebook>,
    ) -> NotebookResult<Arc<NotebookSession>> {
        match self.inner.open.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let notebook = load()?;
                let engine = self.engine()?;
                let session = NotebookSession::new(name, notebook, engine, &self.inner.config);
                tracing::info!(notebook = %name, observers = self.inner.factories.len(), "notebook opened");
                Ok(Arc::clone(entry.insert(session).value()))
            }
        }
    }

    fn engine(&self) -> NotebookResult<RuleEngine> {
        let mut engine = RuleEngine::new();
        for factory in &self.inner.factories {
            engine.register(factory())?;
        }
        Ok(engine)
    }

    /// Open notebook by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<NotebookSession>> {
        self.inner.open.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a notebook is open under `name`
    #[inline]
    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.inner.open.contains_key(name)
    }

    /// Close and remove a notebook; returns false if it was not open
    pub fn close(&self, name: &str) -> bool {
        match self.inner.open.remove(name) {
            Some((_, session)) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every open notebook
    pub fn close_all(&self) {
        for name in self.names() {
            self.close(&name);
        }
    }

    /// Names of open notebooks, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.open.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of open notebooks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.open.len()
    }

    /// Check if no notebook is open
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.open.is_empty()
    }
}

impl Default for NotebookRegistry {
    fn default() -> Self {
        Self::new(NotebookConfig::default())
    }
}

impl std::fmt::Debug for NotebookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookRegistry")
            .field("open", &self.names())
            .field("observers", &self.inner.factories.len())
            .finish()
    }
}
