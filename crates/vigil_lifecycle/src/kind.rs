//! State vocabulary
//!
//! Every state a widget can be in is one of the [`StateKind`] variants. The
//! set is closed: behavior is selected by pattern matching on the kind, and
//! polling states share one engine parameterized by their [`RequestKind`].
//!
//! There is no abstract variant. Naming an abstract kind in a declarative
//! state table is rejected when the name is parsed:
//!
//! ```rust
//! use vigil_lifecycle::{LifecycleError, StateKind};
//!
//! assert!("LoadState".parse::<StateKind>().is_ok());
//! assert!(matches!(
//!     "RequestState".parse::<StateKind>(),
//!     Err(LifecycleError::AbstractState(_))
//! ));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vigil_core::LifecycleConfig;

use crate::component::Component;
use crate::error::LifecycleError;
use crate::id::StateId;

/// Names that refer to abstract bases rather than concrete states
const ABSTRACT_NAMES: &[&str] = &["", "Abstract", "Request"];

/// Side effect attached to a transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Display the pending error indicator
    ShowError,
    /// Remove the error indicator
    RemoveError,
}

impl Action {
    pub(crate) fn run(self, component: &mut dyn Component) {
        match self {
            Action::ShowError => component.show_error(),
            Action::RemoveError => component.remove_error(),
        }
    }
}

/// Where a delay comes from
#[derive(Clone, Copy, Debug)]
pub enum DelaySource {
    /// Fire on the next turn of the timer queue
    Zero,
    /// Fixed number of milliseconds
    Fixed(u64),
    /// The widget's refresh period (or the configured default)
    RefreshPeriod,
    /// The configured parameter-validation timeout
    ParamValidationTimeout,
    /// Computed from the widget
    Custom(fn(&dyn Component) -> u64),
}

impl DelaySource {
    /// Resolve to milliseconds
    pub fn resolve(&self, component: &dyn Component, config: &LifecycleConfig) -> u64 {
        match self {
            DelaySource::Zero => 0,
            DelaySource::Fixed(ms) => *ms,
            DelaySource::RefreshPeriod => component
                .refresh_period()
                .unwrap_or(config.refresh_period_ms),
            DelaySource::ParamValidationTimeout => config.param_validation_timeout_ms,
            DelaySource::Custom(delay) => delay(component),
        }
    }
}

/// Delayed automatic transition
#[derive(Clone, Debug)]
pub struct WaitSpec {
    /// Destination; `None` means the next context
    pub target: Option<StateId>,
    /// Run just before leaving for the target
    pub pre_action: Option<Action>,
    /// Attached to the target, run when the target is exited
    pub exit_action: Option<Action>,
    pub delay: DelaySource,
}

impl WaitSpec {
    /// Wait `delay`, then move on to the next context
    pub fn next_context(delay: DelaySource) -> Self {
        Self {
            target: None,
            pre_action: None,
            exit_action: None,
            delay,
        }
    }

    /// Wait `delay`, then switch to `target`
    pub fn to(target: StateId, delay: DelaySource) -> Self {
        Self {
            target: Some(target),
            ..Self::next_context(delay)
        }
    }

    pub fn with_actions(mut self, pre_action: Option<Action>, exit_action: Option<Action>) -> Self {
        self.pre_action = pre_action;
        self.exit_action = exit_action;
        self
    }
}

/// Polling state variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// First fetch after initialization, no delay
    Load,
    /// Forced re-fetch, no delay, `before_reload` hook first
    Reload,
    /// Steady-state polling at the refresh period
    NormalRequest,
    /// Data not currently available, keep polling
    NotAvailable,
    /// Error seen, escalates after the transient-error delay
    Temporary,
    /// Same mechanism as `Temporary`, used where errors are expected to last
    Delay,
    /// Persistent problem, keeps polling with error hooks
    TransientError,
}

impl RequestKind {
    pub fn name(self) -> &'static str {
        match self {
            RequestKind::Load => "Load",
            RequestKind::Reload => "Reload",
            RequestKind::NormalRequest => "NormalRequest",
            RequestKind::NotAvailable => "NotAvailable",
            RequestKind::Temporary => "Temporary",
            RequestKind::Delay => "Delay",
            RequestKind::TransientError => "TransientError",
        }
    }
}

/// Every state a widget can be in
#[derive(Clone, Debug)]
pub enum StateKind {
    /// Terminal state before the widget is discarded
    BeforeDestruction,
    /// Initialize and listen for configuration changes
    Initial,
    /// Initialize and listen for configuration, server and path changes
    AutoPathInitial,
    /// Apply a live parameter change
    Reset,
    Static,
    NotApplicable,
    Stop,
    Error,
    /// Pass straight through to `target` (or the next context)
    NoAction { target: Option<StateId> },
    Wait(WaitSpec),
    /// Validate parameters, show an error if still invalid after the timeout
    ParamValidationTimeout,
    /// As `ParamValidationTimeout`, with a mandatory path resolver
    ParamAndPathValidationTimeout,
    Request(RequestKind),
}

impl StateKind {
    pub fn name(&self) -> &'static str {
        match self {
            StateKind::BeforeDestruction => "BeforeDestruction",
            StateKind::Initial => "Initial",
            StateKind::AutoPathInitial => "AutoPathInitial",
            StateKind::Reset => "Reset",
            StateKind::Static => "Static",
            StateKind::NotApplicable => "NotApplicable",
            StateKind::Stop => "Stop",
            StateKind::Error => "Error",
            StateKind::NoAction { .. } => "NoAction",
            StateKind::Wait(_) => "Wait",
            StateKind::ParamValidationTimeout => "ParamValidationTimeout",
            StateKind::ParamAndPathValidationTimeout => "ParamAndPathValidationTimeout",
            StateKind::Request(kind) => kind.name(),
        }
    }

    /// Polling variant, if this is a request state
    pub fn request_kind(&self) -> Option<RequestKind> {
        match self {
            StateKind::Request(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Whether this state arms a delayed transition
    pub fn is_wait(&self) -> bool {
        matches!(
            self,
            StateKind::Wait(_)
                | StateKind::ParamValidationTimeout
                | StateKind::ParamAndPathValidationTimeout
        )
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StateKind {
    type Err = LifecycleError;

    /// Parse a kind name; a trailing `State` is optional (`LoadState` == `Load`)
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let base = name.strip_suffix("State").unwrap_or(name);
        if ABSTRACT_NAMES.contains(&base) {
            return Err(LifecycleError::AbstractState(name.to_string()));
        }

        let kind = match base {
            "BeforeDestruction" => StateKind::BeforeDestruction,
            "Initial" => StateKind::Initial,
            "AutoPathInitial" => StateKind::AutoPathInitial,
            "Reset" => StateKind::Reset,
            "Static" => StateKind::Static,
            "NotApplicable" => StateKind::NotApplicable,
            "Stop" => StateKind::Stop,
            "Error" => StateKind::Error,
            "NoAction" => StateKind::NoAction { target: None },
            "Wait" => StateKind::Wait(WaitSpec::next_context(DelaySource::Zero)),
            "ParamValidationTimeout" => StateKind::ParamValidationTimeout,
            "ParamAndPathValidationTimeout" => StateKind::ParamAndPathValidationTimeout,
            "Load" => StateKind::Request(RequestKind::Load),
            "Reload" => StateKind::Request(RequestKind::Reload),
            "NormalRequest" => StateKind::Request(RequestKind::NormalRequest),
            "NotAvailable" => StateKind::Request(RequestKind::NotAvailable),
            "Temporary" => StateKind::Request(RequestKind::Temporary),
            "Delay" => StateKind::Request(RequestKind::Delay),
            "TransientError" => StateKind::Request(RequestKind::TransientError),
            _ => return Err(LifecycleError::UnknownStateKind(name.to_string())),
        };
        Ok(kind)
    }
}
