//! Dashboard configuration file handling
//!
//! A dashboard directory holds `vigil.toml`:
//!
//! - `[dashboard]` - name and optional state table file
//! - `[lifecycle]` - timing and authentication for the lifecycle engine
//! - `[simulation]` - widgets and backend behavior for `vigil simulate`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use vigil_core::LifecycleConfig;
use vigil_lifecycle::StateTable;

pub const CONFIG_FILE: &str = "vigil.toml";

/// Contents of `vigil.toml`
#[derive(Debug, Deserialize, Serialize)]
pub struct DashboardConfig {
    pub dashboard: DashboardMetadata,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DashboardMetadata {
    pub name: String,
    /// State table file, relative to the dashboard directory
    #[serde(default)]
    pub table: Option<String>,
}

/// Synthetic backend and widget set
#[derive(Debug, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Simulated time to run
    #[serde(default = "default_duration")]
    pub duration_ms: u64,
    /// Backend response latency
    #[serde(default = "default_latency")]
    pub latency_ms: u64,
    /// Windows during which the backend misbehaves
    #[serde(default)]
    pub outages: Vec<OutageConfig>,
    #[serde(default = "default_widgets")]
    pub widgets: Vec<WidgetConfig>,
}

fn default_duration() -> u64 {
    120_000
}

fn default_latency() -> u64 {
    150
}

fn default_widgets() -> Vec<WidgetConfig> {
    vec![WidgetConfig {
        name: "speed".to_string(),
        machine: "M-01".to_string(),
        refresh_period_ms: None,
        hidden_until_ms: None,
        post: false,
    }]
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration(),
            latency_ms: default_latency(),
            outages: Vec::new(),
            widgets: default_widgets(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WidgetConfig {
    pub name: String,
    /// Machine the widget shows; empty fails parameter validation
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub refresh_period_ms: Option<u64>,
    /// Widget is off screen until this time
    #[serde(default)]
    pub hidden_until_ms: Option<u64>,
    /// Query with a POST body instead of a GET
    #[serde(default)]
    pub post: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutageKind {
    /// Server answers with an application error
    Error,
    /// Requests time out
    Timeout,
    /// Connection refused
    Down,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutageConfig {
    pub from_ms: u64,
    pub to_ms: u64,
    pub kind: OutageKind,
}

impl SimulationConfig {
    /// Outage in effect at `now`, if any
    pub fn outage_at(&self, now: u64) -> Option<OutageKind> {
        self.outages
            .iter()
            .find(|outage| outage.from_ms <= now && now < outage.to_ms)
            .map(|outage| outage.kind)
    }
}

impl DashboardConfig {
    /// Load `vigil.toml` from a dashboard directory
    pub fn load_from_dir(path: &Path) -> Result<Self> {
        let config_path = path.join(CONFIG_FILE);

        if !config_path.exists() {
            anyhow::bail!(
                "No {} found in {}. Run `vigil init` to create one.",
                CONFIG_FILE,
                path.display()
            );
        }

        Self::load(&config_path)
    }

    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DashboardConfig = toml::from_str(content)?;
        config.lifecycle.validate()?;
        for outage in &config.simulation.outages {
            if outage.to_ms <= outage.from_ms {
                anyhow::bail!(
                    "Outage window {}..{} ms is empty",
                    outage.from_ms,
                    outage.to_ms
                );
            }
        }
        for widget in &config.simulation.widgets {
            if widget.refresh_period_ms == Some(0) {
                anyhow::bail!("Widget '{}' has a zero refresh period", widget.name);
            }
        }
        Ok(config)
    }

    /// Create a new dashboard configuration
    pub fn new(name: &str) -> Self {
        Self {
            dashboard: DashboardMetadata {
                name: name.to_string(),
                table: None,
            },
            lifecycle: LifecycleConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// State table for this dashboard: the configured file or the standard one
    pub fn state_table(&self, dir: &Path) -> Result<StateTable> {
        match self.table_path(dir) {
            Some(path) => StateTable::load(&path)
                .with_context(|| format!("Failed to load state table {}", path.display())),
            None => Ok(StateTable::standard()),
        }
    }

    pub fn table_path(&self, dir: &Path) -> Option<PathBuf> {
        self.dashboard.table.as_ref().map(|table| dir.join(table))
    }
}
