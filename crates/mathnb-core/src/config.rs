//! Notebook configuration

use crate::error::{NotebookError, NotebookResult};
use mathnb_store::PageConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by every notebook a registry opens
///
/// Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookConfig {
    /// Sync propagation passes before a batch fails as non-convergent
    pub max_sync_passes: usize,
    /// Undo entries kept per notebook; the oldest is dropped beyond this
    pub undo_limit: usize,
    /// Page layout of new notebooks
    pub page: PageConfig,
}

impl NotebookConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With sync pass cap
    #[inline]
    #[must_use]
    pub fn with_max_sync_passes(mut self, passes: usize) -> Self {
        self.max_sync_passes = passes;
        self
    }

    /// With undo depth
    #[inline]
    #[must_use]
    pub fn with_undo_limit(mut self, limit: usize) -> Self {
        self.undo_limit = limit;
        self
    }

    /// With page layout
    #[inline]
    #[must_use]
    pub fn with_page(mut self, page: PageConfig) -> Self {
        self.page = page;
        self
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `NotebookError::Config` on malformed TOML or invalid values
    pub fn from_toml_str(text: &str) -> NotebookResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| NotebookError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `NotebookError::Config` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> NotebookResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NotebookError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> NotebookResult<()> {
        if self.max_sync_passes == 0 {
            return Err(NotebookError::Config("max_sync_passes must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            max_sync_passes: 100,
            undo_limit: 256,
            page: PageConfig::default(),
        }
    }
}
