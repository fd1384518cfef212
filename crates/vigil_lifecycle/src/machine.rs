//! Per-component state machine
//!
//! A [`Lifecycle`] owns one component and the states it has visited. Every
//! stimulus (timer, response, bus message, external call) is handed to the
//! current state or to the component, which may record a transition in the
//! shared [`Env`]. The machine then applies recorded transitions until none
//! is left, bounded by `max_transition_depth`.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use vigil_core::{Fired, Message, Outcome};

use crate::component::{Component, Cx, Target, Transition};
use crate::error::{LifecycleError, Result};
use crate::id::{contexts, keys, StateId};
use crate::kind::StateKind;
use crate::request::{self, Ticket};
use crate::runtime::ComponentId;
use crate::state::{Env, State, TimerEvent};
use crate::table::StateTable;

/// One component and its states
pub struct Lifecycle {
    id: ComponentId,
    component: Box<dyn Component>,
    table: Rc<StateTable>,
    states: FxHashMap<StateId, State>,
    current: Option<StateId>,
    transitions: u64,
}

impl Lifecycle {
    pub(crate) fn new(id: ComponentId, component: Box<dyn Component>, table: Rc<StateTable>) -> Self {
        Self {
            id,
            component,
            table,
            states: FxHashMap::default(),
            current: None,
            transitions: 0,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// State the component is in, `None` before the first entry
    pub fn current(&self) -> Option<&StateId> {
        self.current.as_ref()
    }

    /// A state this component has visited
    pub fn state(&self, id: &StateId) -> Option<&State> {
        self.states.get(id)
    }

    /// Number of distinct states created so far
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Number of transitions applied so far (stays excluded)
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn table(&self) -> &StateTable {
        &self.table
    }

    pub fn component(&self) -> &dyn Component {
        self.component.as_ref()
    }

    pub fn component_mut(&mut self) -> &mut dyn Component {
        self.component.as_mut()
    }

    /// Concrete component, if it is a `C`
    pub fn downcast_ref<C: Component>(&self) -> Option<&C> {
        (*self.component).as_any().downcast_ref::<C>()
    }

    pub fn downcast_mut<C: Component>(&mut self) -> Option<&mut C> {
        (*self.component).as_any_mut().downcast_mut::<C>()
    }

    // =========================================================================
    // Stimuli
    // =========================================================================

    /// Enter the start state
    pub(crate) fn start(&mut self, start: StateId, env: &mut Env<'_>) -> Result<()> {
        env.request(Transition::new(Target::State(start)));
        self.settle(env)
    }

    /// Run an external stimulus against the component
    pub(crate) fn dispatch<F>(&mut self, env: &mut Env<'_>, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Component, &mut Cx<'_>),
    {
        let current = self.current.clone().ok_or(LifecycleError::NoCurrentState)?;
        f(self.component.as_mut(), &mut env.cx(&current));
        self.settle(env)
    }

    /// Re-run the periodic behavior of the current state
    pub(crate) fn stay(&mut self, env: &mut Env<'_>) -> Result<()> {
        let current = self.current.clone().ok_or(LifecycleError::NoCurrentState)?;
        env.request(Transition::new(Target::State(current)));
        self.settle(env)
    }

    pub(crate) fn on_timer(&mut self, fired: Fired<TimerEvent>, env: &mut Env<'_>) -> Result<()> {
        let Some(state) = self.states.get_mut(&fired.payload.state) else {
            tracing::debug!(component = ?self.id, state = %fired.payload.state, "timer for unknown state dropped");
            return Ok(());
        };
        state.on_timer(fired.id, &fired.payload, self.component.as_mut(), env)?;
        self.settle(env)
    }

    pub(crate) fn on_response(
        &mut self,
        ticket: Ticket,
        outcome: Outcome,
        env: &mut Env<'_>,
    ) -> Result<()> {
        let Some(state) = self.states.get(&ticket.state) else {
            tracing::debug!(component = ?self.id, state = %ticket.state, "response for unknown state dropped");
            return Ok(());
        };
        request::complete(state, ticket.token, outcome, self.component.as_mut(), env);
        self.settle(env)
    }

    pub(crate) fn notify(&mut self, message: &Message, env: &mut Env<'_>) -> Result<()> {
        let Some(current) = self.current.clone() else {
            return Ok(());
        };
        tracing::trace!(component = ?self.id, topic = %message.topic, "notification");
        self.component.on_notification(message, &mut env.cx(&current));
        self.settle(env)
    }

    /// Move to the teardown state
    ///
    /// The teardown state is always a `BeforeDestruction`, whatever the
    /// table says.
    pub(crate) fn destroy(&mut self, env: &mut Env<'_>) -> Result<()> {
        let key = self
            .current
            .as_ref()
            .map(|current| current.key().to_string())
            .unwrap_or_else(|| keys::NORMAL.to_string());
        let target = StateId::new(contexts::BEFORE_DESTRUCTION, key);
        self.states
            .entry(target.clone())
            .or_insert_with(|| State::new(target.clone(), StateKind::BeforeDestruction, self.id));

        env.request(Transition::new(Target::State(target)));
        self.settle(env)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Apply recorded transitions until none is left
    fn settle(&mut self, env: &mut Env<'_>) -> Result<()> {
        let mut depth = 0;
        while let Some(transition) = env.pending.take() {
            depth += 1;
            if depth > env.config.max_transition_depth {
                tracing::warn!(component = ?self.id, depth, "transition loop");
                return Err(LifecycleError::TransitionLoop { depth });
            }
            self.apply(transition, env)?;
        }
        Ok(())
    }

    fn apply(&mut self, transition: Transition, env: &mut Env<'_>) -> Result<()> {
        let target = self.resolve_target(&transition.target)?;

        if self.current.as_ref() == Some(&target) {
            return match self.states.get_mut(&target) {
                Some(state) => state.stay(self.component.as_mut(), env),
                None => Ok(()),
            };
        }

        // Build the target first so an unknown state leaves the current one untouched
        if !self.states.contains_key(&target) {
            let kind = self.kind_for(&target)?;
            tracing::trace!(component = ?self.id, state = %target, kind = %kind, "state created");
            self.states
                .insert(target.clone(), State::new(target.clone(), kind, self.id));
        }

        if let Some(action) = transition.pre_action {
            action.run(self.component.as_mut());
        }

        if let Some(current) = self.current.as_ref() {
            if let Some(state) = self.states.get_mut(current) {
                state.exit(Some(&target), self.component.as_mut(), env);
                if let Some(action) = state.take_exit_action() {
                    action.run(self.component.as_mut());
                }
            }
        }

        let previous = self.current.replace(target.clone());
        self.transitions += 1;

        let Some(state) = self.states.get_mut(&target) else {
            return Err(LifecycleError::UnknownState {
                context: target.context,
                key: target.key,
            });
        };
        state.set_exit_action(transition.exit_action);
        state.enter(previous, self.component.as_mut(), env)
    }

    fn resolve_target(&self, target: &Target) -> Result<StateId> {
        let current = || self.current.as_ref().ok_or(LifecycleError::NoCurrentState);
        let id = match target {
            Target::State(id) => id.clone(),
            Target::Key(key) => current()?.with_key(key.as_str()),
            Target::Context(context) => current()?.with_context(context.as_str()),
            Target::NextContext => {
                let current = current()?;
                current.with_context(self.table.next_context(current.context())?)
            }
        };
        Ok(id)
    }

    /// Component override first, then the table
    fn kind_for(&self, id: &StateId) -> Result<StateKind> {
        match self.component.define_state(id) {
            Some(kind) => Ok(kind),
            None => self.table.resolve(id),
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("id", &self.id)
            .field("info", &self.component.info())
            .field("current", &self.current)
            .field("states", &self.states.len())
            .field("transitions", &self.transitions)
            .finish()
    }
}
