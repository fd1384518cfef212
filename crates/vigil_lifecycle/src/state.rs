//! Per-component state objects
//!
//! A [`State`] is created the first time its component enters the
//! `(context, key)` pair and is reused for every later entry. Only `enter`,
//! `stay` and `exit` touch its transient fields (provenance, active flag,
//! token, timer).
//!
//! Deferred work (wait timeouts, fetch delays) is represented by a timer in
//! the shared [`TimerQueue`]. A state holds at most one timer; it is
//! cancelled before a new one is armed and on every exit. The active flag and
//! the request token are checked again when the timer fires, so a timer that
//! outlives its activation is harmless.

use slotmap::SlotMap;
use vigil_core::{EventBus, LifecycleConfig, RequestId, TimerId, TimerQueue, Topic, Transport};

use crate::component::{Component, Cx, Target, Transition};
use crate::error::Result;
use crate::id::StateId;
use crate::kind::{Action, StateKind};
use crate::request::{self, Ticket};
use crate::runtime::ComponentId;
use crate::wait;

/// Topics an `Initial` state listens to
const INITIAL_TOPICS: &[Topic] = &[Topic::ConfigChanged];

/// Topics an `AutoPathInitial` state listens to
const AUTO_PATH_TOPICS: &[Topic] = &[
    Topic::ConfigChanged,
    Topic::StopRefreshing,
    Topic::ServerAvailable,
    Topic::PathChanged,
];

/// What a timer was armed for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerPurpose {
    /// Delayed transition of a wait state
    Wait,
    /// Fetch cycle of a request state
    Fetch,
}

/// Payload of every timer armed by a state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerEvent {
    pub component: ComponentId,
    pub state: StateId,
    /// Request token at scheduling time
    pub token: u64,
    pub purpose: TimerPurpose,
}

/// Shared services a state works with while handling a stimulus
pub(crate) struct Env<'a> {
    pub id: ComponentId,
    pub timers: &'a mut TimerQueue<TimerEvent>,
    pub bus: &'a mut EventBus<ComponentId>,
    pub transport: &'a mut dyn Transport,
    pub tickets: &'a mut SlotMap<RequestId, Ticket>,
    pub config: &'a LifecycleConfig,
    pub pending: Option<Transition>,
}

impl<'a> Env<'a> {
    pub fn new(
        id: ComponentId,
        timers: &'a mut TimerQueue<TimerEvent>,
        bus: &'a mut EventBus<ComponentId>,
        transport: &'a mut dyn Transport,
        tickets: &'a mut SlotMap<RequestId, Ticket>,
        config: &'a LifecycleConfig,
    ) -> Self {
        Self {
            id,
            timers,
            bus,
            transport,
            tickets,
            config,
            pending: None,
        }
    }

    pub fn now(&self) -> u64 {
        self.timers.now()
    }

    /// Hook context for a component currently in `current`
    pub fn cx<'b>(&'b mut self, current: &'b StateId) -> Cx<'b> {
        let now = self.timers.now();
        Cx::new(
            self.id,
            current,
            now,
            self.config,
            self.bus,
            &mut self.pending,
        )
    }

    /// Record a transition requested by the state machinery itself
    pub fn request(&mut self, transition: Transition) {
        if let Some(previous) = self.pending.replace(transition) {
            tracing::debug!(replaced = ?previous.target, "pending transition replaced");
        }
    }
}

/// A state instance owned by one component
#[derive(Debug)]
pub struct State {
    id: StateId,
    kind: StateKind,
    owner: Option<ComponentId>,
    previous: Option<StateId>,
    pub(crate) active: bool,
    pub(crate) token: u64,
    pub(crate) timer: Option<TimerId>,
    pub(crate) entered_at: Option<u64>,
    exit_action: Option<Action>,
}

impl State {
    pub fn new(id: StateId, kind: StateKind, owner: ComponentId) -> Self {
        Self {
            id,
            kind,
            owner: Some(owner),
            previous: None,
            active: false,
            token: 0,
            timer: None,
            entered_at: None,
            exit_action: None,
        }
    }

    pub fn id(&self) -> &StateId {
        &self.id
    }

    pub fn context(&self) -> &str {
        &self.id.context
    }

    pub fn key(&self) -> &str {
        &self.id.key
    }

    pub fn kind(&self) -> &StateKind {
        &self.kind
    }

    /// Owning component; `None` once a teardown state severed the link
    pub fn component(&self) -> Option<ComponentId> {
        self.owner
    }

    /// State this one was entered from, for the current activation
    pub fn previous(&self) -> Option<&StateId> {
        self.previous.as_ref()
    }

    /// True between `enter`/`stay` and the matching `exit`
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of polling cycles started by this state so far
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Pending timer, if any
    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// Virtual time of the last entry, for states that track dwell time
    pub fn entered_at(&self) -> Option<u64> {
        self.entered_at
    }

    pub(crate) fn set_exit_action(&mut self, action: Option<Action>) {
        self.exit_action = action;
    }

    pub(crate) fn take_exit_action(&mut self) -> Option<Action> {
        self.exit_action.take()
    }

    /// Cancel the pending timer, if any
    pub(crate) fn clear_timeout(&mut self, timers: &mut TimerQueue<TimerEvent>) {
        if let Some(timer) = self.timer.take() {
            timers.cancel(timer);
        }
    }

    /// Arm the single timer of this state, replacing any pending one
    pub(crate) fn set_timeout(
        &mut self,
        delay_ms: u64,
        purpose: TimerPurpose,
        token: u64,
        env: &mut Env<'_>,
    ) {
        self.clear_timeout(env.timers);
        let event = TimerEvent {
            component: env.id,
            state: self.id.clone(),
            token,
            purpose,
        };
        self.timer = Some(env.timers.schedule(delay_ms, event));
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub(crate) fn enter(
        &mut self,
        previous: Option<StateId>,
        component: &mut dyn Component,
        env: &mut Env<'_>,
    ) -> Result<()> {
        self.previous = previous;

        if matches!(self.kind, StateKind::BeforeDestruction) {
            self.owner = None;
            self.active = true;
            tracing::debug!(component = ?env.id, "entered teardown, component released");
            return Ok(());
        }

        tracing::debug!(
            component = ?env.id,
            state = %self.id,
            kind = %self.kind,
            previous = ?self.previous,
            "enter"
        );
        self.active = true;
        component.state_entered(&self.id);

        match self.kind.clone() {
            StateKind::Initial => self.initialize(component, env, INITIAL_TOPICS),
            StateKind::AutoPathInitial => self.initialize(component, env, AUTO_PATH_TOPICS),
            StateKind::Reset => component.reset(&mut env.cx(&self.id)),
            StateKind::Error => {
                if let Some(hooks) = component.as_error_hooks() {
                    hooks.enter_error_state();
                }
            }
            StateKind::NoAction { target } => {
                let target = target.map(Target::State).unwrap_or(Target::NextContext);
                env.request(Transition::new(target));
            }
            StateKind::Wait(spec) => wait::arm(self, &spec.delay, component, env),
            StateKind::ParamValidationTimeout => wait::arm_and_validate(self, false, component, env)?,
            StateKind::ParamAndPathValidationTimeout => {
                wait::arm_and_validate(self, true, component, env)?
            }
            StateKind::Request(kind) => request::enter(self, kind, component, env),
            StateKind::Static | StateKind::NotApplicable | StateKind::Stop => {}
            StateKind::BeforeDestruction => {}
        }
        Ok(())
    }

    /// Remain in this state and re-run its periodic behavior
    pub(crate) fn stay(&mut self, component: &mut dyn Component, env: &mut Env<'_>) -> Result<()> {
        tracing::trace!(component = ?env.id, state = %self.id, "stay");
        match self.kind.clone() {
            StateKind::Wait(spec) => wait::arm(self, &spec.delay, component, env),
            StateKind::ParamValidationTimeout => wait::arm_and_validate(self, false, component, env)?,
            StateKind::ParamAndPathValidationTimeout => {
                wait::arm_and_validate(self, true, component, env)?
            }
            StateKind::Request(kind) => request::stay(self, kind, component, env),
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn exit(
        &mut self,
        next: Option<&StateId>,
        component: &mut dyn Component,
        env: &mut Env<'_>,
    ) {
        self.active = false;
        self.clear_timeout(env.timers);

        if matches!(self.kind, StateKind::BeforeDestruction) {
            return;
        }

        match &self.kind {
            StateKind::Error => {
                if let Some(hooks) = component.as_error_hooks() {
                    hooks.exit_error_state();
                }
            }
            StateKind::Request(kind) => request::exit(*kind, component),
            _ => {}
        }

        component.state_exited(&self.id);
        tracing::debug!(component = ?env.id, state = %self.id, next = ?next, "exit");
    }

    /// A timer armed by this state fired
    pub(crate) fn on_timer(
        &mut self,
        timer: TimerId,
        event: &TimerEvent,
        component: &mut dyn Component,
        env: &mut Env<'_>,
    ) -> Result<()> {
        if self.timer == Some(timer) {
            self.timer = None;
        }
        match event.purpose {
            TimerPurpose::Wait => wait::fire(self, env),
            TimerPurpose::Fetch => request::fetch(self, event.token, component, env),
        }
        Ok(())
    }

    fn initialize(&mut self, component: &mut dyn Component, env: &mut Env<'_>, topics: &[Topic]) {
        component.clear_dynamic_state();
        if component.is_initialized() {
            component.clear_initialization();
        }
        component.initialize(&mut env.cx(&self.id));

        for topic in topics {
            env.bus.subscribe(topic.clone(), env.id);
        }
    }
}
