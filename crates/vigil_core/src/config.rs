//! Lifecycle configuration
//!
//! Timing defaults shared by every widget on a dashboard. Widgets can
//! override the refresh period, transient-error delay and request timeout
//! individually; anything they leave unset falls back to these values.
//!
//! Configuration is usually loaded from a `vigil.toml` file:
//!
//! ```toml
//! refresh_period_ms = 5000
//! transient_error_delay_ms = 60000
//! auth = "login"
//! ```
//!
//! Missing fields take their defaults.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// How requests are authenticated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication, or handled entirely by the transport
    #[default]
    None,
    /// Login-based tokens, refreshed before every request
    Login,
}

/// Timing and policy configuration for the lifecycle engine
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Steady-state polling interval
    #[serde(default = "default_refresh_period")]
    pub refresh_period_ms: u64,
    /// Dwell time in a temporary-error state before escalating
    #[serde(default = "default_transient_error_delay")]
    pub transient_error_delay_ms: u64,
    /// Request timeout handed to the transport
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Re-check interval while a widget is not visible
    #[serde(default = "default_visibility_recheck")]
    pub visibility_recheck_ms: u64,
    /// How long parameter validation may stay pending before showing an error
    #[serde(default = "default_param_validation_timeout")]
    pub param_validation_timeout_ms: u64,
    /// Upper bound on transitions chained from a single stimulus
    #[serde(default = "default_max_transition_depth")]
    pub max_transition_depth: usize,
    #[serde(default)]
    pub auth: AuthMode,
}

fn default_refresh_period() -> u64 {
    10_000
}

fn default_transient_error_delay() -> u64 {
    30_000
}

fn default_request_timeout() -> u64 {
    20_000
}

fn default_visibility_recheck() -> u64 {
    200
}

fn default_param_validation_timeout() -> u64 {
    5_000
}

fn default_max_transition_depth() -> usize {
    32
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            refresh_period_ms: default_refresh_period(),
            transient_error_delay_ms: default_transient_error_delay(),
            request_timeout_ms: default_request_timeout(),
            visibility_recheck_ms: default_visibility_recheck(),
            param_validation_timeout_ms: default_param_validation_timeout(),
            max_transition_depth: default_max_transition_depth(),
            auth: AuthMode::default(),
        }
    }
}

impl LifecycleConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if it exists, otherwise use the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.refresh_period_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "refresh_period_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.visibility_recheck_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "visibility_recheck_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_transition_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_transition_depth",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
