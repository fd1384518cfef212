//! Component contract
//!
//! A component is a dashboard widget (gauge, bar, table, dialog) seen from
//! the lifecycle engine. The engine owns it, drives it through its states and
//! calls back into it through the [`Component`] trait.
//!
//! Optional behavior is expressed as capability traits. A widget that can
//! validate its parameters implements [`Validate`] and returns itself from
//! [`Component::as_validate`]; widgets without the capability keep the
//! default `None`, and the engine takes the documented fallback path.
//!
//! Hooks that may move the widget to another state receive a [`Cx`]. The
//! transition they request is recorded and applied by the engine once the
//! hook returns.
//!
//! ```ignore
//! impl Component for MachineGauge {
//!     fn initialize(&mut self, cx: &mut Cx<'_>) {
//!         self.build_gauge();
//!         cx.switch_to_next_context();
//!     }
//!
//!     fn url(&self) -> String {
//!         format!("/api/machines/{}/status", self.machine_id)
//!     }
//!
//!     fn refresh(&mut self, data: &Value) {
//!         self.value = data["speed"].as_f64();
//!     }
//! }
//! ```

use std::any::Any;

use serde_json::Value;
use vigil_core::{EventBus, LifecycleConfig, Message, Topic};

use crate::id::{contexts, keys, StateId};
use crate::kind::{Action, StateKind};
use crate::runtime::ComponentId;

/// Downcasting support for boxed components
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A widget driven by the lifecycle engine
pub trait Component: AsAny {
    // =========================================================================
    // Initialization
    // =========================================================================

    /// Build the widget; usually ends with `cx.switch_to_next_context()`
    fn initialize(&mut self, cx: &mut Cx<'_>);

    /// Undo `initialize` before running it again
    fn clear_initialization(&mut self) {}

    fn is_initialized(&self) -> bool {
        false
    }

    /// Apply a live parameter change without re-initializing
    ///
    /// The default resumes polling in the next context.
    fn reset(&mut self, cx: &mut Cx<'_>) {
        cx.switch_to_next_context();
    }

    /// Drop stale dynamic presentation state before initializing
    fn clear_dynamic_state(&mut self) {}

    // =========================================================================
    // Error display
    // =========================================================================

    /// Record an error message for later display
    fn set_error(&mut self, message: &str) {
        let _ = message;
    }

    /// Display the recorded error
    fn show_error(&mut self) {}

    fn remove_error(&mut self) {}

    // =========================================================================
    // Data
    // =========================================================================

    /// Whether the widget is on screen; invisible widgets postpone requests
    fn is_visible(&self) -> bool {
        true
    }

    fn url(&self) -> String;

    /// Request timeout in milliseconds, `None` for the configured default
    fn timeout(&self) -> Option<u64> {
        None
    }

    /// Request body; `Some` turns the request into a POST
    fn post_data(&self) -> Option<Value> {
        None
    }

    /// Update the widget with fresh data
    fn refresh(&mut self, data: &Value);

    /// Data arrived for the current polling cycle
    ///
    /// Refreshes the widget and settles into steady-state polling.
    fn manage_success(&mut self, data: Value, cx: &mut Cx<'_>) {
        self.refresh(&data);
        cx.switch_to_state(contexts::NORMAL, keys::NORMAL);
    }

    /// The server reported an application error
    fn manage_error(&mut self, data: Value, cx: &mut Cx<'_>) {
        tracing::debug!(info = %self.info(), error = %data, "server error");
        escalate(cx);
    }

    /// The request timed out or the connection failed
    fn manage_failure(&mut self, timed_out: bool, status: u16, cx: &mut Cx<'_>) {
        tracing::debug!(info = %self.info(), timed_out, status, "request failed");
        escalate(cx);
    }

    // =========================================================================
    // Timing
    // =========================================================================

    /// Steady-state polling interval, `None` for the configured default
    fn refresh_period(&self) -> Option<u64> {
        None
    }

    /// Dwell time before a temporary error escalates, `None` for the default
    fn transient_error_delay(&self) -> Option<u64> {
        None
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Short description used in diagnostics
    fn info(&self) -> String {
        String::new()
    }

    fn state_entered(&mut self, state: &StateId) {
        let _ = state;
    }

    fn state_exited(&mut self, state: &StateId) {
        let _ = state;
    }

    /// A bus message arrived on a subscribed topic
    ///
    /// Re-initializes on configuration or path changes, parks in `Stop`
    /// while the server is offline and resumes polling when it is back.
    fn on_notification(&mut self, message: &Message, cx: &mut Cx<'_>) {
        let stopped = cx.current().key() == keys::STOP;
        match message.topic {
            Topic::ConfigChanged | Topic::PathChanged => {
                cx.switch_to_state(contexts::INITIAL, keys::NORMAL);
            }
            Topic::StopRefreshing => cx.switch_to_key(keys::STOP),
            Topic::ServerAvailable if stopped => cx.switch_to_key(keys::NORMAL),
            _ => {}
        }
    }

    /// Override the state table for this widget
    fn define_state(&self, state: &StateId) -> Option<StateKind> {
        let _ = state;
        None
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    fn as_validate(&mut self) -> Option<&mut dyn Validate> {
        None
    }

    fn as_path_resolver(&mut self) -> Option<&mut dyn ResolvePath> {
        None
    }

    fn as_alternate_source(&mut self) -> Option<&mut dyn AlternateDataSource> {
        None
    }

    fn as_before_reload(&mut self) -> Option<&mut dyn BeforeReload> {
        None
    }

    fn as_error_hooks(&mut self) -> Option<&mut dyn ErrorStateHooks> {
        None
    }

    fn as_transient_error_hooks(&mut self) -> Option<&mut dyn TransientErrorHooks> {
        None
    }
}

/// Stay while already in an error key, otherwise start the escalation ladder
///
/// A re-entrant context keeps its own state for every error key, so errors
/// seen there continue the ladder in `Normal`.
pub(crate) fn escalate(cx: &mut Cx<'_>) {
    let current = cx.current();
    let reentrant = contexts::REENTRANT
        .iter()
        .any(|context| *context == current.context());
    let in_error = matches!(
        current.key(),
        keys::TEMPORARY | keys::DELAY | keys::TRANSIENT_ERROR
    );
    if reentrant {
        cx.switch_to_state(contexts::NORMAL, keys::TEMPORARY);
    } else if in_error {
        cx.stay();
    } else {
        cx.switch_to_key(keys::TEMPORARY);
    }
}

/// Parameter validation
pub trait Validate {
    /// Switch onward when parameters are valid; otherwise call `set_error`
    /// and leave the validation timeout pending
    fn validate_parameters(&mut self, cx: &mut Cx<'_>);
}

/// Data path resolution from configuration or attributes
pub trait ResolvePath {
    /// Returns `false` while the path cannot be resolved yet
    fn update_path_from_config_or_attribute(&mut self) -> bool;
}

/// Local data synthesis instead of a network round trip
pub trait AlternateDataSource {
    /// Returns `true` when the polling cycle was fully handled
    fn run_alternate_get_data(&mut self, cx: &mut Cx<'_>) -> bool;
}

pub trait BeforeReload {
    /// Flush cached view data before a forced re-fetch
    fn before_reload(&mut self);
}

pub trait ErrorStateHooks {
    fn enter_error_state(&mut self);
    fn exit_error_state(&mut self);
}

pub trait TransientErrorHooks {
    fn enter_transient_error_state(&mut self);
    fn exit_transient_error_state(&mut self);
}

// =============================================================================
// Transitions
// =============================================================================

/// Destination of a requested transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    State(StateId),
    /// Current context, given key
    Key(String),
    /// Given context, current key
    Context(String),
    /// Successor of the current context, current key
    NextContext,
}

/// A requested transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub target: Target,
    /// Run before the current state exits
    pub pre_action: Option<Action>,
    /// Attached to the target, run when the target exits
    pub exit_action: Option<Action>,
}

impl Transition {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            pre_action: None,
            exit_action: None,
        }
    }

    pub fn with_actions(mut self, pre_action: Option<Action>, exit_action: Option<Action>) -> Self {
        self.pre_action = pre_action;
        self.exit_action = exit_action;
        self
    }
}

/// Context handed to component hooks
///
/// Records at most one transition; a later request replaces an earlier one.
pub struct Cx<'a> {
    component: ComponentId,
    current: &'a StateId,
    now: u64,
    config: &'a LifecycleConfig,
    bus: &'a mut EventBus<ComponentId>,
    pending: &'a mut Option<Transition>,
}

impl<'a> Cx<'a> {
    pub(crate) fn new(
        component: ComponentId,
        current: &'a StateId,
        now: u64,
        config: &'a LifecycleConfig,
        bus: &'a mut EventBus<ComponentId>,
        pending: &'a mut Option<Transition>,
    ) -> Self {
        Self {
            component,
            current,
            now,
            config,
            bus,
            pending,
        }
    }

    /// Handle of the component being driven
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// State the component is in
    pub fn current(&self) -> &StateId {
        self.current
    }

    /// Virtual time in milliseconds
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn config(&self) -> &LifecycleConfig {
        self.config
    }

    /// Queue a bus message
    pub fn publish(&mut self, topic: Topic, payload: Value) {
        self.bus.publish(topic, payload);
    }

    /// Request a transition
    pub fn request(&mut self, transition: Transition) {
        if let Some(previous) = self.pending.replace(transition) {
            tracing::debug!(
                state = %self.current,
                replaced = ?previous.target,
                "pending transition replaced"
            );
        }
    }

    pub fn switch_to_state(&mut self, context: &str, key: &str) {
        self.request(Transition::new(Target::State(StateId::new(context, key))));
    }

    pub fn switch_to_state_with(
        &mut self,
        context: &str,
        key: &str,
        pre_action: Option<Action>,
        exit_action: Option<Action>,
    ) {
        self.request(
            Transition::new(Target::State(StateId::new(context, key)))
                .with_actions(pre_action, exit_action),
        );
    }

    pub fn switch_to_key(&mut self, key: &str) {
        self.request(Transition::new(Target::Key(key.to_string())));
    }

    pub fn switch_to_key_with(
        &mut self,
        key: &str,
        pre_action: Option<Action>,
        exit_action: Option<Action>,
    ) {
        self.request(
            Transition::new(Target::Key(key.to_string())).with_actions(pre_action, exit_action),
        );
    }

    pub fn switch_to_context(&mut self, context: &str) {
        self.request(Transition::new(Target::Context(context.to_string())));
    }

    pub fn switch_to_context_with(
        &mut self,
        context: &str,
        pre_action: Option<Action>,
        exit_action: Option<Action>,
    ) {
        self.request(
            Transition::new(Target::Context(context.to_string()))
                .with_actions(pre_action, exit_action),
        );
    }

    pub fn switch_to_next_context(&mut self) {
        self.request(Transition::new(Target::NextContext));
    }

    pub fn switch_to_next_context_with(
        &mut self,
        pre_action: Option<Action>,
        exit_action: Option<Action>,
    ) {
        self.request(Transition::new(Target::NextContext).with_actions(pre_action, exit_action));
    }

    /// Remain in the current state and re-run its periodic behavior
    pub fn stay(&mut self) {
        self.request(Transition::new(Target::State(self.current.clone())));
    }

    /// Transition requested so far, if any
    pub fn pending(&self) -> Option<&Transition> {
        self.pending.as_ref()
    }
}
