//! Vigil Runtime
//!
//! Owns every mounted component's machine together with the shared services
//! they run on: the timer queue, the event bus, the transport and the table
//! of in-flight requests.
//!
//! The runtime is single-threaded and driven entirely by its host:
//!
//! - [`Runtime::advance`] moves the virtual clock and fires due timers
//! - [`Runtime::complete`] reports the outcome of a request sent through the
//!   transport
//! - [`Runtime::dispatch`] applies an external change (attribute, parameter)
//! - [`Runtime::publish`] and [`Runtime::pump`] broadcast bus messages
//!
//! Each call is processed to completion, chained transitions and bus
//! delivery included, before it returns.
//!
//! # Example
//!
//! ```ignore
//! let mut runtime = Runtime::new(RecordingTransport::new());
//! let gauge = runtime.mount(
//!     MachineGauge::new("M-12"),
//!     StateTable::standard(),
//!     StateId::new(contexts::INITIAL, keys::NORMAL),
//! )?;
//!
//! runtime.advance(0)?;
//! let request = runtime.transport_mut().take_sent().remove(0);
//! runtime.complete(request.id, Outcome::Success(json!({ "speed": 42 })))?;
//! ```

use std::rc::Rc;

use serde_json::Value;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use vigil_core::{EventBus, LifecycleConfig, Outcome, RequestId, TimerQueue, Topic, Transport};

use crate::component::{Component, Cx};
use crate::error::{LifecycleError, Result};
use crate::id::StateId;
use crate::machine::Lifecycle;
use crate::request::Ticket;
use crate::state::{Env, State, TimerEvent};
use crate::table::StateTable;

new_key_type! {
    /// Handle of a mounted component
    pub struct ComponentId;
}

impl ComponentId {
    /// Raw handle value, for logs and host-side maps
    pub fn to_raw(self) -> u64 {
        self.0.as_ffi()
    }
}

/// Drives mounted components
pub struct Runtime<T: Transport> {
    machines: SlotMap<ComponentId, Lifecycle>,
    timers: TimerQueue<TimerEvent>,
    bus: EventBus<ComponentId>,
    transport: T,
    tickets: SlotMap<RequestId, Ticket>,
    config: LifecycleConfig,
}

/// Builds the [`Env`] for one component from disjoint runtime fields
macro_rules! env_for {
    ($self:ident, $id:expr) => {
        Env::new(
            $id,
            &mut $self.timers,
            &mut $self.bus,
            &mut $self.transport,
            &mut $self.tickets,
            &$self.config,
        )
    };
}

impl<T: Transport> Runtime<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, LifecycleConfig::default())
    }

    pub fn with_config(transport: T, config: LifecycleConfig) -> Self {
        Self {
            machines: SlotMap::with_key(),
            timers: TimerQueue::new(),
            bus: EventBus::new(),
            transport,
            tickets: SlotMap::with_key(),
            config,
        }
    }

    // =========================================================================
    // Mounting
    // =========================================================================

    /// Mount a component and enter `start`
    ///
    /// If entering the start state fails, the component is unmounted again
    /// and the error returned.
    pub fn mount<C: Component>(
        &mut self,
        component: C,
        table: impl Into<Rc<StateTable>>,
        start: StateId,
    ) -> Result<ComponentId> {
        self.mount_boxed(Box::new(component), table, start)
    }

    pub fn mount_boxed(
        &mut self,
        component: Box<dyn Component>,
        table: impl Into<Rc<StateTable>>,
        start: StateId,
    ) -> Result<ComponentId> {
        let table = table.into();
        let id = self
            .machines
            .insert_with_key(|id| Lifecycle::new(id, component, table));
        tracing::debug!(component = ?id, start = %start, "mount");

        let started = match self.machines.get_mut(id) {
            Some(machine) => machine.start(start, &mut env_for!(self, id)),
            None => Err(LifecycleError::UnknownComponent),
        };
        if let Err(err) = started {
            self.release(id);
            return Err(err);
        }

        self.pump()?;
        Ok(id)
    }

    /// Tear a component down
    ///
    /// The component passes through `BeforeDestruction`, loses its bus
    /// subscriptions and pending timers, and any response still in flight
    /// for it is dropped when it arrives.
    pub fn unmount(&mut self, id: ComponentId) -> Result<()> {
        let machine = self
            .machines
            .get_mut(id)
            .ok_or(LifecycleError::UnknownComponent)?;
        let destroyed = machine.destroy(&mut env_for!(self, id));
        self.release(id);
        tracing::debug!(component = ?id, "unmount");
        destroyed
    }

    fn release(&mut self, id: ComponentId) {
        self.machines.remove(id);
        self.bus.unsubscribe_all(id);
        self.timers.retain(|event| event.component != id);
        self.tickets.retain(|_, ticket| ticket.component != id);
    }

    // =========================================================================
    // Stimuli
    // =========================================================================

    /// Run an external stimulus against a component
    ///
    /// ```ignore
    /// runtime.dispatch(gauge, |component, cx| {
    ///     cx.switch_to_context(contexts::RESET);
    /// })?;
    /// ```
    pub fn dispatch<F>(&mut self, id: ComponentId, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Component, &mut Cx<'_>),
    {
        let machine = self
            .machines
            .get_mut(id)
            .ok_or(LifecycleError::UnknownComponent)?;
        machine.dispatch(&mut env_for!(self, id), f)?;
        self.pump()?;
        Ok(())
    }

    /// Re-run the periodic behavior of a component's current state
    pub fn stay(&mut self, id: ComponentId) -> Result<()> {
        let machine = self
            .machines
            .get_mut(id)
            .ok_or(LifecycleError::UnknownComponent)?;
        machine.stay(&mut env_for!(self, id))?;
        self.pump()?;
        Ok(())
    }

    /// Move the clock `ms` forward, firing due timers in deadline order
    ///
    /// Returns the number of timers fired. Timers armed while advancing fire
    /// in the same call if they fall due before the new time.
    pub fn advance(&mut self, ms: u64) -> Result<usize> {
        let until = self.timers.now().saturating_add(ms);
        let mut fired = 0;

        while let Some(timer) = self.timers.pop_due(until) {
            fired += 1;
            let id = timer.payload.component;
            let Some(machine) = self.machines.get_mut(id) else {
                tracing::debug!(component = ?id, "timer for unmounted component dropped");
                continue;
            };
            machine.on_timer(timer, &mut env_for!(self, id))?;
            self.pump()?;
        }

        self.timers.advance_to(until);
        Ok(fired)
    }

    /// Report how a request ended
    ///
    /// Returns `false` when the request is unknown or its component is gone.
    pub fn complete(&mut self, request: RequestId, outcome: Outcome) -> Result<bool> {
        let Some(ticket) = self.tickets.remove(request) else {
            tracing::debug!(request = ?request, "completion for unknown request dropped");
            return Ok(false);
        };
        let id = ticket.component;
        let Some(machine) = self.machines.get_mut(id) else {
            tracing::debug!(component = ?id, "completion for unmounted component dropped");
            return Ok(false);
        };
        machine.on_response(ticket, outcome, &mut env_for!(self, id))?;
        self.pump()?;
        Ok(true)
    }

    /// Queue a bus message; delivered by [`Runtime::pump`]
    pub fn publish(&mut self, topic: Topic, payload: Value) {
        self.bus.publish(topic, payload);
    }

    /// Deliver queued bus messages to their subscribers
    ///
    /// Messages published while delivering are delivered in the same call.
    /// Returns the number of messages delivered.
    pub fn pump(&mut self) -> Result<usize> {
        let mut delivered = 0;
        while let Some(message) = self.bus.take_pending() {
            delivered += 1;
            let subscribers: SmallVec<[ComponentId; 8]> =
                self.bus.subscribers(&message.topic).iter().copied().collect();
            tracing::trace!(topic = %message.topic, subscribers = subscribers.len(), "deliver");

            for id in subscribers {
                if let Some(machine) = self.machines.get_mut(id) {
                    machine.notify(&message, &mut env_for!(self, id))?;
                }
            }
        }
        Ok(delivered)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn current_state(&self, id: ComponentId) -> Option<&StateId> {
        self.machines.get(id).and_then(Lifecycle::current)
    }

    pub fn state(&self, id: ComponentId, state: &StateId) -> Option<&State> {
        self.machines.get(id).and_then(|machine| machine.state(state))
    }

    /// The mounted component, if it is a `C`
    pub fn component<C: Component>(&self, id: ComponentId) -> Option<&C> {
        self.machines.get(id).and_then(Lifecycle::downcast_ref)
    }

    pub fn component_mut<C: Component>(&mut self, id: ComponentId) -> Option<&mut C> {
        self.machines.get_mut(id).and_then(Lifecycle::downcast_mut)
    }

    pub fn lifecycle(&self, id: ComponentId) -> Option<&Lifecycle> {
        self.machines.get(id)
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.machines.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Mounted components
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.machines.keys()
    }

    /// Virtual time in milliseconds
    pub fn now(&self) -> u64 {
        self.timers.now()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn in_flight(&self) -> usize {
        self.tickets.len()
    }

    pub fn bus(&self) -> &EventBus<ComponentId> {
        &self.bus
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Get statistics about the runtime
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            components: self.machines.len(),
            states: self.machines.values().map(Lifecycle::state_count).sum(),
            transitions: self.machines.values().map(Lifecycle::transitions).sum(),
            pending_timers: self.timers.len(),
            in_flight: self.tickets.len(),
            now: self.timers.now(),
        }
    }
}

/// Statistics about the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStats {
    pub components: usize,
    pub states: usize,
    pub transitions: u64,
    pub pending_timers: usize,
    pub in_flight: usize,
    pub now: u64,
}
