//! Simulated dashboard
//!
//! Mounts one demo gauge per configured widget and runs them against a
//! synthetic backend on the runtime's virtual clock. Responses arrive after
//! the configured latency; outage windows turn them into server errors,
//! timeouts or connection failures.

use std::rc::Rc;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use vigil_core::{Outcome, Request, RequestId, Topic, Transport};
use vigil_lifecycle::{
    contexts, keys, Component, ComponentId, Cx, Runtime, RuntimeStats, StateId, StateTable,
    TransientErrorHooks, Validate,
};

use crate::config::{OutageKind, SimulationConfig, WidgetConfig};

// =============================================================================
// Demo widget
// =============================================================================

/// A gauge showing one machine's speed
pub struct DemoGauge {
    name: String,
    machine: String,
    refresh_period: Option<u64>,
    post: bool,
    hidden_until: Option<u64>,
    visible: bool,
    initialized: bool,
    pub value: Option<f64>,
    pub refreshes: usize,
    pub error_shown: bool,
    pub transitions: Vec<StateId>,
}

impl DemoGauge {
    pub fn new(config: &WidgetConfig) -> Self {
        Self {
            name: config.name.clone(),
            machine: config.machine.clone(),
            refresh_period: config.refresh_period_ms,
            post: config.post,
            hidden_until: config.hidden_until_ms,
            visible: config.hidden_until_ms.is_none(),
            initialized: false,
            value: None,
            refreshes: 0,
            error_shown: false,
            transitions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn update_visibility(&mut self, now: u64) {
        self.visible = self.hidden_until.map_or(true, |until| now >= until);
    }
}

impl Component for DemoGauge {
    fn initialize(&mut self, cx: &mut Cx<'_>) {
        self.initialized = true;
        cx.switch_to_next_context();
    }

    fn clear_initialization(&mut self) {
        self.initialized = false;
        self.value = None;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn set_error(&mut self, message: &str) {
        warn!(widget = %self.name, "{message}");
    }

    fn show_error(&mut self) {
        self.error_shown = true;
    }

    fn remove_error(&mut self) {
        self.error_shown = false;
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn url(&self) -> String {
        format!("/api/machines/{}/speed", self.machine)
    }

    fn post_data(&self) -> Option<Value> {
        self.post
            .then(|| json!({ "machine": self.machine, "fields": ["speed"] }))
    }

    fn refresh(&mut self, data: &Value) {
        self.value = data["speed"].as_f64();
        self.refreshes += 1;
    }

    fn refresh_period(&self) -> Option<u64> {
        self.refresh_period
    }

    fn info(&self) -> String {
        format!("{} ({})", self.name, self.machine)
    }

    fn state_entered(&mut self, state: &StateId) {
        info!(widget = %self.name, state = %state, "state");
        self.transitions.push(state.clone());
    }

    fn as_validate(&mut self) -> Option<&mut dyn Validate> {
        Some(self)
    }

    fn as_transient_error_hooks(&mut self) -> Option<&mut dyn TransientErrorHooks> {
        Some(self)
    }
}

impl Validate for DemoGauge {
    fn validate_parameters(&mut self, cx: &mut Cx<'_>) {
        if self.machine.is_empty() {
            self.set_error("no machine configured");
        } else {
            cx.switch_to_next_context();
        }
    }
}

impl TransientErrorHooks for DemoGauge {
    fn enter_transient_error_state(&mut self) {
        warn!(widget = %self.name, "data source keeps failing");
    }

    fn exit_transient_error_state(&mut self) {
        info!(widget = %self.name, "data source recovered");
    }
}

// =============================================================================
// Synthetic backend
// =============================================================================

/// Transport that hands requests to the simulation loop
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    outbox: Vec<Request>,
    pub sent: usize,
    pub auth_refreshes: usize,
}

impl SimulatedBackend {
    fn drain(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.outbox)
    }
}

impl Transport for SimulatedBackend {
    fn send(&mut self, request: Request) {
        self.sent += 1;
        self.outbox.push(request);
    }

    fn refresh_auth(&mut self) {
        self.auth_refreshes += 1;
    }
}

/// A response waiting to be delivered
struct Reply {
    due: u64,
    request: RequestId,
    outcome: Outcome,
}

// =============================================================================
// Simulation
// =============================================================================

/// How a simulation ended
#[derive(Debug)]
pub struct Report {
    pub widgets: Vec<WidgetReport>,
    pub stats: RuntimeStats,
    pub requests: usize,
    pub disconnects: usize,
}

#[derive(Debug)]
pub struct WidgetReport {
    pub name: String,
    pub state: Option<StateId>,
    pub value: Option<f64>,
    pub refreshes: usize,
    pub error_shown: bool,
    pub transitions: usize,
}

pub struct Simulation {
    runtime: Runtime<SimulatedBackend>,
    config: SimulationConfig,
    widgets: Vec<ComponentId>,
    replies: Vec<Reply>,
}

impl Simulation {
    pub fn new(runtime: Runtime<SimulatedBackend>, config: SimulationConfig) -> Self {
        Self {
            runtime,
            config,
            widgets: Vec::new(),
            replies: Vec::new(),
        }
    }

    /// Mount every configured widget
    pub fn mount_all(&mut self, table: StateTable) -> Result<()> {
        let table = Rc::new(table);
        let start = StateId::new(contexts::INITIAL, keys::NORMAL);
        for widget in &self.config.widgets {
            let id = self
                .runtime
                .mount(DemoGauge::new(widget), table.clone(), start.clone())?;
            debug!(widget = %widget.name, id = id.to_raw(), "mounted");
            self.widgets.push(id);
        }
        Ok(())
    }

    /// Run until the configured duration has elapsed
    pub fn run(&mut self) -> Result<()> {
        let end = self.runtime.now() + self.config.duration_ms;

        loop {
            self.collect_requests();

            let next_reply = self.replies.iter().map(|reply| reply.due).min();
            let next = match (self.runtime.next_deadline(), next_reply) {
                (Some(timer), Some(reply)) => Some(timer.min(reply)),
                (timer, reply) => timer.or(reply),
            };
            let Some(next) = next.filter(|next| *next <= end) else {
                break;
            };

            let now = self.runtime.now();
            self.sync_visibility(next);
            self.runtime.advance(next.saturating_sub(now))?;
            self.deliver_replies()?;
        }

        let now = self.runtime.now();
        self.runtime.advance(end.saturating_sub(now))?;
        Ok(())
    }

    fn collect_requests(&mut self) {
        let now = self.runtime.now();
        for request in self.runtime.transport_mut().drain() {
            let (due, outcome) = match self.config.outage_at(now) {
                None => (
                    now + self.config.latency_ms,
                    Outcome::Success(json!({ "speed": synthetic_speed(now) })),
                ),
                Some(OutageKind::Error) => (
                    now + self.config.latency_ms,
                    Outcome::Error(json!({ "message": "machine offline" })),
                ),
                Some(OutageKind::Timeout) => (now + request.timeout_ms, Outcome::timeout()),
                Some(OutageKind::Down) => (now, Outcome::failure(0)),
            };
            debug!(url = %request.url, token = request.token, due, "request");
            self.replies.push(Reply {
                due,
                request: request.id,
                outcome,
            });
        }
    }

    fn deliver_replies(&mut self) -> Result<()> {
        let now = self.runtime.now();
        let (due, pending): (Vec<_>, Vec<_>) =
            self.replies.drain(..).partition(|reply| reply.due <= now);
        self.replies = pending;

        for reply in due {
            if !self.runtime.complete(reply.request, reply.outcome)? {
                debug!(request = ?reply.request, "reply for a finished widget");
            }
        }
        Ok(())
    }

    fn sync_visibility(&mut self, now: u64) {
        for id in &self.widgets {
            if let Some(gauge) = self.runtime.component_mut::<DemoGauge>(*id) {
                gauge.update_visibility(now);
            }
        }
    }

    /// Unmount everything and summarize
    pub fn finish(mut self) -> Result<Report> {
        let widgets = self
            .widgets
            .iter()
            .filter_map(|id| {
                let gauge = self.runtime.component::<DemoGauge>(*id)?;
                Some(WidgetReport {
                    name: gauge.name().to_string(),
                    state: self.runtime.current_state(*id).cloned(),
                    value: gauge.value,
                    refreshes: gauge.refreshes,
                    error_shown: gauge.error_shown,
                    transitions: gauge.transitions.len(),
                })
            })
            .collect();
        let stats = self.runtime.stats();
        let disconnects = self
            .runtime
            .bus()
            .published_count(&Topic::ServerProbablyDisconnected);

        for id in std::mem::take(&mut self.widgets) {
            self.runtime.unmount(id)?;
        }

        Ok(Report {
            widgets,
            stats,
            requests: self.runtime.transport().sent,
            disconnects,
        })
    }
}

/// Deterministic machine speed for a point in time
fn synthetic_speed(now: u64) -> f64 {
    let phase = (now / 1_000) % 60;
    1_200.0 + (phase as f64) * 5.0
}
