//! Delayed transitions and parameter validation
//!
//! A wait state arms one timer on `enter` and on every `stay`; when it fires
//! while the state is still active, the configured transition happens.
//!
//! The parameter-validation variants add an immediate validation pass on top
//! of the timer. The timer is the fallback: if the widget's parameters are
//! still not valid when it fires, the widget moves to its `Error` key with the
//! error indicator shown.

use crate::component::{Component, Target, Transition};
use crate::error::{LifecycleError, Result};
use crate::id::{keys, StateId};
use crate::kind::{Action, DelaySource, StateKind};
use crate::state::{Env, State, TimerPurpose};

/// (Re-)arm the timer of a wait state
pub(crate) fn arm(
    state: &mut State,
    delay: &DelaySource,
    component: &mut dyn Component,
    env: &mut Env<'_>,
) {
    state.active = true;
    let delay_ms = delay.resolve(component, env.config);
    tracing::trace!(component = ?env.id, state = %state.id(), delay_ms, "wait armed");
    state.set_timeout(delay_ms, TimerPurpose::Wait, state.token, env);
}

/// Arm the validation timeout, then validate right away
pub(crate) fn arm_and_validate(
    state: &mut State,
    path_required: bool,
    component: &mut dyn Component,
    env: &mut Env<'_>,
) -> Result<()> {
    arm(state, &DelaySource::ParamValidationTimeout, component, env);
    validate(state, path_required, component, env)
}

fn validate(
    state: &State,
    path_required: bool,
    component: &mut dyn Component,
    env: &mut Env<'_>,
) -> Result<()> {
    match component.as_path_resolver() {
        Some(resolver) => {
            if !resolver.update_path_from_config_or_attribute() {
                tracing::debug!(component = ?env.id, state = %state.id(), "waiting for path");
                return Ok(());
            }
        }
        None if path_required => {
            return Err(LifecycleError::MissingCapability {
                state: state.id().to_string(),
                capability: "ResolvePath",
            });
        }
        None => {}
    }

    let mut cx = env.cx(state.id());
    let validated = match component.as_validate() {
        Some(validator) => {
            validator.validate_parameters(&mut cx);
            true
        }
        None => false,
    };

    if !validated {
        tracing::warn!(
            info = %component.info(),
            state = %state.id(),
            "component has no parameter validation, skipping to the next context"
        );
        cx.switch_to_next_context();
    }

    // Staying leaves the armed timeout to decide; re-entering would validate again
    let stays = env
        .pending
        .as_ref()
        .is_some_and(|transition| targets(&transition.target, state.id()));
    if stays {
        tracing::debug!(component = ?env.id, state = %state.id(), "parameters invalid, waiting for timeout");
        env.pending = None;
    }
    Ok(())
}

/// Whether `target` resolves to `current`
fn targets(target: &Target, current: &StateId) -> bool {
    match target {
        Target::State(id) => id == current,
        Target::Key(key) => key == current.key(),
        Target::Context(context) => context == current.context(),
        Target::NextContext => false,
    }
}

/// The timer of a wait state fired
pub(crate) fn fire(state: &mut State, env: &mut Env<'_>) {
    if !state.active {
        tracing::debug!(component = ?env.id, state = %state.id(), "wait timer fired after exit, ignored");
        return;
    }

    let transition = match state.kind() {
        StateKind::Wait(spec) => {
            let target = spec
                .target
                .clone()
                .map(Target::State)
                .unwrap_or(Target::NextContext);
            Transition::new(target).with_actions(spec.pre_action, spec.exit_action)
        }
        StateKind::ParamValidationTimeout | StateKind::ParamAndPathValidationTimeout => {
            tracing::debug!(component = ?env.id, state = %state.id(), "parameter validation timed out");
            Transition::new(Target::Key(keys::ERROR.to_string()))
                .with_actions(Some(Action::ShowError), Some(Action::RemoveError))
        }
        _ => return,
    };
    env.request(transition);
}
