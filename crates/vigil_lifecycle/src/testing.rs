//! Test fixtures: a recording component and a standalone environment

use serde_json::Value;
use slotmap::SlotMap;
use vigil_core::{EventBus, Fired, LifecycleConfig, RecordingTransport, RequestId, TimerQueue};

use crate::component::{
    escalate, AlternateDataSource, BeforeReload, Component, Cx, ErrorStateHooks, ResolvePath,
    TransientErrorHooks, Validate,
};
use crate::id::{contexts, keys, StateId};
use crate::kind::{DelaySource, StateKind, WaitSpec};
use crate::request::Ticket;
use crate::runtime::ComponentId;
use crate::state::{Env, TimerEvent};

/// A hook call seen by [`Spy`]
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Initialize,
    ClearInitialization,
    ClearDynamicState,
    Reset,
    SetError(String),
    ShowError,
    RemoveError,
    Refresh(Value),
    ManageError(Value),
    ManageFailure { timed_out: bool, status: u16 },
    Entered(StateId),
    Exited(StateId),
    ValidateParameters,
    UpdatePath,
    AlternateGetData,
    BeforeReload,
    EnterErrorState,
    ExitErrorState,
    EnterTransientErrorState,
    ExitTransientErrorState,
}

/// Component that records every hook call
///
/// Optional capabilities are switched on through its fields.
pub struct Spy {
    pub calls: Vec<Call>,
    pub url: String,
    pub initialized: bool,
    pub visible: bool,
    pub post: Option<Value>,
    pub timeout: Option<u64>,
    pub period: Option<u64>,
    pub transient_delay: Option<u64>,
    /// `Some(valid)` implements [`Validate`]
    pub validates: Option<bool>,
    /// Invalid parameters also request a stay
    pub stay_on_invalid: bool,
    /// `Some(resolved)` implements [`ResolvePath`]
    pub path: Option<bool>,
    /// `Some(handled)` implements [`AlternateDataSource`]
    pub alternate: Option<bool>,
    pub reload_hook: bool,
    pub error_hooks: bool,
    pub transient_hooks: bool,
    /// Defines a 250 ms `Splash` wait state leading to `Load`
    pub splash: bool,
}

impl Spy {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            url: "/api/machines/M-12/status".to_string(),
            initialized: false,
            visible: true,
            post: None,
            timeout: None,
            period: None,
            transient_delay: None,
            validates: None,
            stay_on_invalid: false,
            path: None,
            alternate: None,
            reload_hook: false,
            error_hooks: false,
            transient_hooks: false,
            splash: false,
        }
    }

    pub fn has(&self, call: &Call) -> bool {
        self.calls.contains(call)
    }
}

impl Component for Spy {
    fn initialize(&mut self, cx: &mut Cx<'_>) {
        self.calls.push(Call::Initialize);
        self.initialized = true;
        cx.switch_to_next_context();
    }

    fn clear_initialization(&mut self) {
        self.calls.push(Call::ClearInitialization);
        self.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn reset(&mut self, cx: &mut Cx<'_>) {
        self.calls.push(Call::Reset);
        cx.switch_to_next_context();
    }

    fn clear_dynamic_state(&mut self) {
        self.calls.push(Call::ClearDynamicState);
    }

    fn set_error(&mut self, message: &str) {
        self.calls.push(Call::SetError(message.to_string()));
    }

    fn show_error(&mut self) {
        self.calls.push(Call::ShowError);
    }

    fn remove_error(&mut self) {
        self.calls.push(Call::RemoveError);
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    fn post_data(&self) -> Option<Value> {
        self.post.clone()
    }

    fn refresh(&mut self, data: &Value) {
        self.calls.push(Call::Refresh(data.clone()));
    }

    fn manage_error(&mut self, data: Value, cx: &mut Cx<'_>) {
        self.calls.push(Call::ManageError(data));
        escalate(cx);
    }

    fn manage_failure(&mut self, timed_out: bool, status: u16, cx: &mut Cx<'_>) {
        self.calls.push(Call::ManageFailure { timed_out, status });
        escalate(cx);
    }

    fn refresh_period(&self) -> Option<u64> {
        self.period
    }

    fn transient_error_delay(&self) -> Option<u64> {
        self.transient_delay
    }

    fn info(&self) -> String {
        format!("spy {}", self.url)
    }

    fn state_entered(&mut self, state: &StateId) {
        self.calls.push(Call::Entered(state.clone()));
    }

    fn state_exited(&mut self, state: &StateId) {
        self.calls.push(Call::Exited(state.clone()));
    }

    fn define_state(&self, state: &StateId) -> Option<StateKind> {
        if self.splash && state.is("Splash", keys::NORMAL) {
            let load = StateId::new(contexts::LOAD, keys::NORMAL);
            return Some(StateKind::Wait(WaitSpec::to(load, DelaySource::Fixed(250))));
        }
        None
    }

    fn as_validate(&mut self) -> Option<&mut dyn Validate> {
        if self.validates.is_some() {
            Some(self as &mut dyn Validate)
        } else {
            None
        }
    }

    fn as_path_resolver(&mut self) -> Option<&mut dyn ResolvePath> {
        if self.path.is_some() {
            Some(self as &mut dyn ResolvePath)
        } else {
            None
        }
    }

    fn as_alternate_source(&mut self) -> Option<&mut dyn AlternateDataSource> {
        if self.alternate.is_some() {
            Some(self as &mut dyn AlternateDataSource)
        } else {
            None
        }
    }

    fn as_before_reload(&mut self) -> Option<&mut dyn BeforeReload> {
        if self.reload_hook {
            Some(self as &mut dyn BeforeReload)
        } else {
            None
        }
    }

    fn as_error_hooks(&mut self) -> Option<&mut dyn ErrorStateHooks> {
        if self.error_hooks {
            Some(self as &mut dyn ErrorStateHooks)
        } else {
            None
        }
    }

    fn as_transient_error_hooks(&mut self) -> Option<&mut dyn TransientErrorHooks> {
        if self.transient_hooks {
            Some(self as &mut dyn TransientErrorHooks)
        } else {
            None
        }
    }
}

impl Validate for Spy {
    fn validate_parameters(&mut self, cx: &mut Cx<'_>) {
        self.calls.push(Call::ValidateParameters);
        if self.validates == Some(true) {
            cx.switch_to_next_context();
        } else {
            self.set_error("invalid parameters");
            if self.stay_on_invalid {
                cx.stay();
            }
        }
    }
}

impl ResolvePath for Spy {
    fn update_path_from_config_or_attribute(&mut self) -> bool {
        self.calls.push(Call::UpdatePath);
        self.path == Some(true)
    }
}

impl AlternateDataSource for Spy {
    fn run_alternate_get_data(&mut self, _cx: &mut Cx<'_>) -> bool {
        self.calls.push(Call::AlternateGetData);
        self.alternate == Some(true)
    }
}

impl BeforeReload for Spy {
    fn before_reload(&mut self) {
        self.calls.push(Call::BeforeReload);
    }
}

impl ErrorStateHooks for Spy {
    fn enter_error_state(&mut self) {
        self.calls.push(Call::EnterErrorState);
    }

    fn exit_error_state(&mut self) {
        self.calls.push(Call::ExitErrorState);
    }
}

impl TransientErrorHooks for Spy {
    fn enter_transient_error_state(&mut self) {
        self.calls.push(Call::EnterTransientErrorState);
    }

    fn exit_transient_error_state(&mut self) {
        self.calls.push(Call::ExitTransientErrorState);
    }
}

/// Shared services for driving a single state or machine by hand
pub struct Harness {
    _ids: SlotMap<ComponentId, ()>,
    pub id: ComponentId,
    pub timers: TimerQueue<TimerEvent>,
    pub bus: EventBus<ComponentId>,
    pub transport: RecordingTransport,
    pub tickets: SlotMap<RequestId, Ticket>,
    pub config: LifecycleConfig,
}

impl Harness {
    pub fn new() -> Self {
        let mut ids = SlotMap::with_key();
        let id = ids.insert(());
        Self {
            _ids: ids,
            id,
            timers: TimerQueue::new(),
            bus: EventBus::new(),
            transport: RecordingTransport::new(),
            tickets: SlotMap::with_key(),
            config: LifecycleConfig::default(),
        }
    }

    pub fn with_env<R>(&mut self, f: impl FnOnce(&mut Env<'_>) -> R) -> R {
        let mut env = Env::new(
            self.id,
            &mut self.timers,
            &mut self.bus,
            &mut self.transport,
            &mut self.tickets,
            &self.config,
        );
        f(&mut env)
    }

    /// Move the clock `ms` forward, returning the timers that fell due
    pub fn advance(&mut self, ms: u64) -> Vec<Fired<TimerEvent>> {
        let until = self.timers.now() + ms;
        let mut fired = Vec::new();
        while let Some(timer) = self.timers.pop_due(until) {
            fired.push(timer);
        }
        self.timers.advance_to(until);
        fired
    }
}
