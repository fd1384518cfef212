//! State identity
//!
//! A state is identified by a `(context, key)` pair. The context is the
//! coarse phase of a widget's life, the key the fine-grained situation within
//! it. The well-known names used by the standard state table live in
//! [`contexts`] and [`keys`]; widgets are free to add their own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known context names
pub mod contexts {
    /// Widget creation and (re-)initialization
    pub const INITIAL: &str = "Initial";
    /// Waiting for parameters (and optionally the data path) to be valid
    pub const PARAM_VALIDATION: &str = "ParamValidation";
    /// First data fetch after initialization
    pub const LOAD: &str = "Load";
    /// Steady-state polling
    pub const NORMAL: &str = "Normal";
    /// Forced re-fetch without re-initialization
    pub const RELOAD: &str = "Reload";
    /// Live parameter change
    pub const RESET: &str = "Reset";
    /// Teardown
    pub const BEFORE_DESTRUCTION: &str = "BeforeDestruction";

    /// Contexts a widget may switch to from any key
    pub const REENTRANT: &[&str] = &[RELOAD, RESET];
}

/// Well-known key names
pub mod keys {
    pub const NORMAL: &str = "Normal";
    pub const ERROR: &str = "Error";
    pub const NOT_APPLICABLE: &str = "NotApplicable";
    pub const STOP: &str = "Stop";
    pub const STATIC: &str = "Static";
    /// First error seen, still polling
    pub const TEMPORARY: &str = "Temporary";
    /// Like `TEMPORARY`, for errors expected to last longer
    pub const DELAY: &str = "Delay";
    /// Error persisted past the transient-error delay
    pub const TRANSIENT_ERROR: &str = "TransientError";
    pub const NOT_AVAILABLE: &str = "NotAvailable";
}

/// Identity of a state: `(context, key)`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId {
    pub context: String,
    pub key: String,
}

impl StateId {
    pub fn new(context: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            key: key.into(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Same context, different key
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self::new(self.context.clone(), key)
    }

    /// Same key, different context
    pub fn with_context(&self, context: impl Into<String>) -> Self {
        Self::new(context, self.key.clone())
    }

    pub fn is(&self, context: &str, key: &str) -> bool {
        self.context == context && self.key == key
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.context, self.key)
    }
}

impl<C: Into<String>, K: Into<String>> From<(C, K)> for StateId {
    fn from((context, key): (C, K)) -> Self {
        Self::new(context, key)
    }
}
