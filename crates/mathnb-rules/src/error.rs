//! Error types for rule evaluation

use mathnb_store::StoreError;

/// Result alias for rule evaluation
pub type RuleResult<T> = Result<T, RuleError>;

/// Errors raised by rules, analyzers and adapters
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleError {
    /// External adapter call failed
    #[error("adapter {adapter} failed: {message}")]
    Adapter {
        /// Adapter name
        adapter: String,
        /// Failure description
        message: String,
    },

    /// Rule computed output it cannot express
    #[error("rule {rule} produced invalid output: {message}")]
    InvalidOutput {
        /// Rule name
        rule: String,
        /// What was wrong
        message: String,
    },

    /// Change analyzer failed
    #[error("analyzer {analyzer} failed: {message}")]
    Analyzer {
        /// Analyzer name
        analyzer: String,
        /// Failure description
        message: String,
    },

    /// Observer name already registered on this engine
    #[error("observer already registered: {0}")]
    DuplicateObserver(String),

    /// Tool hook failed
    #[error("tool of observer {observer} failed: {message}")]
    Tool {
        /// Observer name
        observer: String,
        /// Failure description
        message: String,
    },

    /// Structural error while reading the notebook
    #[error("store error: {0}")]
    Store(String),
}

impl RuleError {
    /// Create adapter failure
    #[inline]
    pub fn adapter(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Adapter {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Create invalid-output failure
    #[inline]
    pub fn invalid_output(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOutput {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Create analyzer failure
    #[inline]
    pub fn analyzer(analyzer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Analyzer {
            analyzer: analyzer.into(),
            message: message.into(),
        }
    }

    /// Check if the failure came from an external computation
    ///
    /// External failures become ERROR nodes instead of aborting a batch.
    #[inline]
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Adapter { .. })
    }
}

impl From<StoreError> for RuleError {
    fn from(error: StoreError) -> Self {
        Self::Store(error.to_string())
    }
}
