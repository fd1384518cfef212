//! Polling engine shared by every request state
//!
//! Each activation of a request state starts a polling cycle identified by a
//! token. The fetch timer and the request it leads to both carry the token;
//! anything that comes back with an older token, or after the state was
//! exited, is dropped.
//!
//! The variants differ only in their [`RequestPolicy`]: how long to wait
//! before fetching, whether errors escalate after a dwell time, and which
//! optional component hooks run on entry and exit.

use serde_json::json;
use vigil_core::{AuthMode, Method, Outcome, Request, Topic};

use crate::component::{Component, Target, Transition};
use crate::id::{keys, StateId};
use crate::kind::{Action, DelaySource, RequestKind};
use crate::runtime::ComponentId;
use crate::state::{Env, State, TimerPurpose};

/// An in-flight request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    pub component: ComponentId,
    /// State that issued the request
    pub state: StateId,
    /// Polling cycle that issued the request
    pub token: u64,
}

/// Dwell-time escalation of an error state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Escalation {
    /// Key switched to once the dwell time is exceeded
    pub to_key: &'static str,
}

/// Hook run before a request state is entered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeforeEnter {
    Nothing,
    /// [`BeforeReload::before_reload`](crate::BeforeReload::before_reload)
    BeforeReload,
}

/// Hooks run on entry and exit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestHooks {
    None,
    /// [`TransientErrorHooks`](crate::TransientErrorHooks)
    TransientError,
}

/// Behavior of one request state variant
#[derive(Clone, Copy, Debug)]
pub struct RequestPolicy {
    pub delay: DelaySource,
    pub escalation: Option<Escalation>,
    pub before_enter: BeforeEnter,
    pub hooks: RequestHooks,
}

impl RequestPolicy {
    const fn polling(delay: DelaySource) -> Self {
        Self {
            delay,
            escalation: None,
            before_enter: BeforeEnter::Nothing,
            hooks: RequestHooks::None,
        }
    }
}

impl RequestKind {
    pub fn policy(self) -> RequestPolicy {
        match self {
            RequestKind::Load => RequestPolicy::polling(DelaySource::Zero),
            RequestKind::Reload => RequestPolicy {
                before_enter: BeforeEnter::BeforeReload,
                ..RequestPolicy::polling(DelaySource::Zero)
            },
            RequestKind::NormalRequest | RequestKind::NotAvailable => {
                RequestPolicy::polling(DelaySource::RefreshPeriod)
            }
            RequestKind::Temporary | RequestKind::Delay => RequestPolicy {
                escalation: Some(Escalation {
                    to_key: keys::TRANSIENT_ERROR,
                }),
                ..RequestPolicy::polling(DelaySource::RefreshPeriod)
            },
            RequestKind::TransientError => RequestPolicy {
                hooks: RequestHooks::TransientError,
                ..RequestPolicy::polling(DelaySource::RefreshPeriod)
            },
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

pub(crate) fn enter(
    state: &mut State,
    kind: RequestKind,
    component: &mut dyn Component,
    env: &mut Env<'_>,
) {
    let policy = kind.policy();

    if policy.before_enter == BeforeEnter::BeforeReload {
        if let Some(hook) = component.as_before_reload() {
            hook.before_reload();
        }
    }
    if policy.escalation.is_some() {
        state.entered_at = Some(env.now());
    }
    if policy.hooks == RequestHooks::TransientError {
        if let Some(hooks) = component.as_transient_error_hooks() {
            hooks.enter_transient_error_state();
        }
    }

    schedule(state, &policy, component, env);
}

pub(crate) fn stay(
    state: &mut State,
    kind: RequestKind,
    component: &mut dyn Component,
    env: &mut Env<'_>,
) {
    let policy = kind.policy();

    if let (Some(escalation), Some(entered_at)) = (policy.escalation, state.entered_at) {
        let limit = component
            .transient_error_delay()
            .unwrap_or(env.config.transient_error_delay_ms);
        let dwell = env.now().saturating_sub(entered_at);
        if dwell > limit {
            tracing::debug!(
                component = ?env.id,
                state = %state.id(),
                dwell,
                limit,
                "error persisted, escalating"
            );
            env.request(
                Transition::new(Target::Key(escalation.to_key.to_string()))
                    .with_actions(Some(Action::ShowError), Some(Action::RemoveError)),
            );
            return;
        }
    }

    schedule(state, &policy, component, env);
}

pub(crate) fn exit(kind: RequestKind, component: &mut dyn Component) {
    if kind.policy().hooks == RequestHooks::TransientError {
        if let Some(hooks) = component.as_transient_error_hooks() {
            hooks.exit_transient_error_state();
        }
    }
}

/// Start a new polling cycle
fn schedule(
    state: &mut State,
    policy: &RequestPolicy,
    component: &mut dyn Component,
    env: &mut Env<'_>,
) {
    state.token += 1;
    state.active = true;
    let delay_ms = policy.delay.resolve(component, env.config);
    tracing::trace!(
        component = ?env.id,
        state = %state.id(),
        token = state.token,
        delay_ms,
        "fetch scheduled"
    );
    state.set_timeout(delay_ms, TimerPurpose::Fetch, state.token, env);
}

fn is_current(state: &State, token: u64) -> bool {
    state.active && state.token == token
}

// =============================================================================
// Fetch
// =============================================================================

/// The fetch timer of cycle `token` fired
pub(crate) fn fetch(
    state: &mut State,
    token: u64,
    component: &mut dyn Component,
    env: &mut Env<'_>,
) {
    if let Some(source) = component.as_alternate_source() {
        let mut cx = env.cx(state.id());
        if source.run_alternate_get_data(&mut cx) {
            tracing::trace!(state = %state.id(), "cycle served by alternate data source");
            return;
        }
    }

    if !is_current(state, token) {
        tracing::debug!(
            component = ?env.id,
            state = %state.id(),
            token,
            current = state.token,
            "stale fetch timer dropped"
        );
        return;
    }

    if !component.is_visible() {
        let recheck_ms = env.config.visibility_recheck_ms;
        tracing::debug!(component = ?env.id, state = %state.id(), recheck_ms, "not visible, fetch postponed");
        state.set_timeout(recheck_ms, TimerPurpose::Fetch, token, env);
        return;
    }

    if env.config.auth == AuthMode::Login {
        env.transport.refresh_auth();
    }

    let method = match component.post_data() {
        Some(body) => Method::Post(body),
        None => Method::Get,
    };
    let url = component.url();
    let timeout_ms = component.timeout().unwrap_or(env.config.request_timeout_ms);

    let id = env.tickets.insert(Ticket {
        component: env.id,
        state: state.id().clone(),
        token,
    });
    tracing::debug!(
        component = ?env.id,
        state = %state.id(),
        token,
        url = %url,
        post = method.is_post(),
        "request sent"
    );
    env.transport.send(Request {
        id,
        method,
        url,
        timeout_ms,
        token,
    });
}

/// A request issued in cycle `token` completed
pub(crate) fn complete(
    state: &State,
    token: u64,
    outcome: Outcome,
    component: &mut dyn Component,
    env: &mut Env<'_>,
) {
    if !is_current(state, token) {
        tracing::debug!(
            component = ?env.id,
            state = %state.id(),
            token,
            current = state.token,
            active = state.active,
            "stale response dropped"
        );
        return;
    }

    let mut cx = env.cx(state.id());
    match outcome {
        Outcome::Success(data) => component.manage_success(data, &mut cx),
        Outcome::Error(data) => component.manage_error(data, &mut cx),
        Outcome::Failure { timed_out, status } => {
            component.manage_failure(timed_out, status, &mut cx);
            cx.publish(
                Topic::ServerProbablyDisconnected,
                json!({ "status": status, "timed_out": timed_out }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::id::contexts;
    use crate::kind::StateKind;
    use crate::testing::{Call, Harness, Spy};
    use serde_json::Value;

    fn request_state(harness: &Harness, key: &str, kind: RequestKind) -> State {
        State::new(
            StateId::new(contexts::NORMAL, key),
            StateKind::Request(kind),
            harness.id,
        )
    }

    /// Fire every due timer up to `ms` from now against `state`
    fn run_timers(harness: &mut Harness, state: &mut State, spy: &mut Spy, ms: u64) -> Option<Transition> {
        let fired = harness.advance(ms);
        harness
            .with_env(|env| -> Result<_> {
                for timer in &fired {
                    state.on_timer(timer.id, &timer.payload, spy, env)?;
                }
                Ok(env.pending.take())
            })
            .unwrap()
    }

    #[test]
    fn test_policies() {
        assert!(matches!(RequestKind::Load.policy().delay, DelaySource::Zero));
        assert_eq!(
            RequestKind::Reload.policy().before_enter,
            BeforeEnter::BeforeReload
        );
        assert!(matches!(
            RequestKind::NormalRequest.policy().delay,
            DelaySource::RefreshPeriod
        ));
        assert!(RequestKind::Temporary.policy().escalation.is_some());
        assert!(RequestKind::Delay.policy().escalation.is_some());
        assert!(RequestKind::NotAvailable.policy().escalation.is_none());
        assert_eq!(
            RequestKind::TransientError.policy().hooks,
            RequestHooks::TransientError
        );
    }

    #[test]
    fn test_token_increments_on_enter_and_stay() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::NormalRequest);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        assert_eq!(state.token(), 1);
        for expected in 2..=4 {
            harness.with_env(|env| state.stay(&mut spy, env)).unwrap();
            assert_eq!(state.token(), expected);
            assert_eq!(harness.timers.len(), 1);
        }

        let timer = state.timer().unwrap();
        assert_eq!(harness.timers.payload(timer).map(|e| e.token), Some(4));
        assert_eq!(
            harness.timers.deadline(timer),
            Some(harness.config.refresh_period_ms)
        );
    }

    #[test]
    fn test_fetch_sends_get() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::Load);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        assert!(run_timers(&mut harness, &mut state, &mut spy, 0).is_none());

        let sent = harness.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::Get);
        assert_eq!(sent[0].url, spy.url);
        assert_eq!(sent[0].token, 1);
        assert_eq!(sent[0].timeout_ms, harness.config.request_timeout_ms);
        assert_eq!(harness.tickets.len(), 1);
        assert_eq!(harness.transport.auth_refreshes(), 0);
    }

    #[test]
    fn test_fetch_sends_post_with_login() {
        let mut harness = Harness::new();
        harness.config.auth = AuthMode::Login;
        let mut spy = Spy::new();
        spy.post = Some(json!({ "machine": 7 }));
        spy.timeout = Some(1_500);
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::Load);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        run_timers(&mut harness, &mut state, &mut spy, 0);

        let request = harness.transport.last().unwrap();
        assert_eq!(request.method, Method::Post(json!({ "machine": 7 })));
        assert_eq!(request.timeout_ms, 1_500);
        assert_eq!(harness.transport.auth_refreshes(), 1);
    }

    #[test]
    fn test_invisible_postpones_exactly_recheck_interval() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        spy.visible = false;
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::Load);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        run_timers(&mut harness, &mut state, &mut spy, 0);
        assert!(harness.transport.sent().is_empty());

        let timer = state.timer().unwrap();
        assert_eq!(harness.timers.deadline(timer), Some(200));
        assert_eq!(harness.timers.payload(timer).map(|e| e.token), Some(1));

        spy.visible = true;
        run_timers(&mut harness, &mut state, &mut spy, 199);
        assert!(harness.transport.sent().is_empty());
        run_timers(&mut harness, &mut state, &mut spy, 1);
        assert_eq!(harness.transport.sent().len(), 1);
        assert_eq!(harness.transport.sent()[0].token, 1);
    }

    #[test]
    fn test_alternate_source_skips_network() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        spy.alternate = Some(true);
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::Load);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        run_timers(&mut harness, &mut state, &mut spy, 0);

        assert!(spy.has(&Call::AlternateGetData));
        assert!(harness.transport.sent().is_empty());
    }

    #[test]
    fn test_alternate_source_can_decline() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        spy.alternate = Some(false);
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::Load);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        run_timers(&mut harness, &mut state, &mut spy, 0);

        assert!(spy.has(&Call::AlternateGetData));
        assert_eq!(harness.transport.sent().len(), 1);
    }

    #[test]
    fn test_stale_response_is_ignored() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::Load);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        harness.with_env(|env| state.stay(&mut spy, env)).unwrap();
        assert_eq!(state.token(), 2);

        let pending = harness.with_env(|env| {
            complete(&state, 1, Outcome::Success(json!(1)), &mut spy, env);
            env.pending.take()
        });
        assert!(pending.is_none());
        assert!(!spy.has(&Call::Refresh(json!(1))));

        // Same token after exit is stale too
        harness.with_env(|env| state.exit(None, &mut spy, env));
        harness.with_env(|env| complete(&state, 2, Outcome::Success(json!(2)), &mut spy, env));
        assert!(!spy.has(&Call::Refresh(json!(2))));
    }

    #[test]
    fn test_success_refreshes_and_settles() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::Load);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        let pending = harness.with_env(|env| {
            complete(&state, 1, Outcome::Success(json!({ "speed": 3 })), &mut spy, env);
            env.pending.take()
        });

        assert!(spy.has(&Call::Refresh(json!({ "speed": 3 }))));
        assert_eq!(
            pending.map(|t| t.target),
            Some(Target::State(StateId::new(contexts::NORMAL, keys::NORMAL)))
        );
    }

    #[test]
    fn test_failure_broadcasts_disconnect() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::NormalRequest);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        let pending = harness.with_env(|env| {
            complete(&state, 1, Outcome::timeout(), &mut spy, env);
            env.pending.take()
        });

        assert!(spy.has(&Call::ManageFailure {
            timed_out: true,
            status: 0
        }));
        assert_eq!(
            pending.map(|t| t.target),
            Some(Target::Key(keys::TEMPORARY.into()))
        );
        let message = harness.bus.take_pending().unwrap();
        assert_eq!(message.topic, Topic::ServerProbablyDisconnected);
        assert_eq!(message.payload["timed_out"], Value::Bool(true));
    }

    #[test]
    fn test_server_error_does_not_broadcast() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::NormalRequest);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        harness.with_env(|env| complete(&state, 1, Outcome::Error(json!("boom")), &mut spy, env));

        assert!(spy.has(&Call::ManageError(json!("boom"))));
        assert_eq!(harness.bus.pending_len(), 0);
    }

    #[test]
    fn test_temporary_escalates_after_dwell() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        spy.transient_delay = Some(1_000);
        let mut state = request_state(&harness, keys::TEMPORARY, RequestKind::Temporary);

        harness.advance(50);
        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        assert_eq!(state.entered_at(), Some(50));

        // Exactly at the limit: no escalation yet
        harness.advance(1_000);
        let pending = harness.with_env(|env| -> Result<_> {
            state.stay(&mut spy, env)?;
            Ok(env.pending.take())
        });
        assert!(pending.unwrap().is_none());
        assert_eq!(state.token(), 2);

        harness.advance(1);
        let pending = harness
            .with_env(|env| -> Result<_> {
                state.stay(&mut spy, env)?;
                Ok(env.pending.take())
            })
            .unwrap();
        assert_eq!(
            pending,
            Some(
                Transition::new(Target::Key(keys::TRANSIENT_ERROR.into()))
                    .with_actions(Some(Action::ShowError), Some(Action::RemoveError))
            )
        );
        assert_eq!(state.token(), 2);
    }

    #[test]
    fn test_reload_and_transient_hooks() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        spy.reload_hook = true;
        spy.transient_hooks = true;

        let mut reload = State::new(
            StateId::new(contexts::RELOAD, keys::NORMAL),
            StateKind::Request(RequestKind::Reload),
            harness.id,
        );
        harness.with_env(|env| reload.enter(None, &mut spy, env)).unwrap();
        assert!(spy.has(&Call::BeforeReload));

        let mut transient = request_state(&harness, keys::TRANSIENT_ERROR, RequestKind::TransientError);
        harness.with_env(|env| transient.enter(None, &mut spy, env)).unwrap();
        harness.with_env(|env| transient.exit(None, &mut spy, env));
        assert!(spy.has(&Call::EnterTransientErrorState));
        assert!(spy.has(&Call::ExitTransientErrorState));
    }

    #[test]
    fn test_exit_cancels_fetch_timer() {
        let mut harness = Harness::new();
        let mut spy = Spy::new();
        let mut state = request_state(&harness, keys::NORMAL, RequestKind::NormalRequest);

        harness.with_env(|env| state.enter(None, &mut spy, env)).unwrap();
        assert_eq!(harness.timers.len(), 1);
        harness.with_env(|env| state.exit(None, &mut spy, env));
        assert!(harness.timers.is_empty());
        assert_eq!(state.timer(), None);
        assert!(!state.is_active());
    }
}
