//! Vigil Lifecycle
//!
//! The widget lifecycle engine for Vigil monitoring dashboards:
//!
//! - **States**: a closed set of [`StateKind`]s identified by `(context, key)`
//! - **Wait States**: delayed transitions and parameter validation timeouts
//! - **Request States**: token-guarded polling with visibility postponement
//!   and error escalation
//! - **State Tables**: which state a widget gets for each `(context, key)`
//! - **Runtime**: drives mounted widgets from timers, responses and bus
//!   messages
//!
//! # Example
//!
//! ```rust
//! use serde_json::{json, Value};
//! use vigil_core::{Outcome, RecordingTransport};
//! use vigil_lifecycle::{contexts, keys, Component, Cx, Runtime, StateId, StateTable};
//!
//! struct Counter {
//!     value: Option<i64>,
//! }
//!
//! impl Component for Counter {
//!     fn initialize(&mut self, cx: &mut Cx<'_>) {
//!         cx.switch_to_next_context();
//!     }
//!
//!     fn url(&self) -> String {
//!         "/api/counter".to_string()
//!     }
//!
//!     fn refresh(&mut self, data: &Value) {
//!         self.value = data.as_i64();
//!     }
//! }
//!
//! let mut runtime = Runtime::new(RecordingTransport::new());
//! let counter = runtime
//!     .mount(
//!         Counter { value: None },
//!         StateTable::standard(),
//!         StateId::new(contexts::INITIAL, keys::NORMAL),
//!     )
//!     .unwrap();
//!
//! // The load request goes out on the first turn of the clock
//! runtime.advance(0).unwrap();
//! let request = runtime.transport_mut().take_sent().remove(0);
//! runtime.complete(request.id, Outcome::Success(json!(42))).unwrap();
//!
//! assert_eq!(runtime.component::<Counter>(counter).unwrap().value, Some(42));
//! assert_eq!(
//!     runtime.current_state(counter),
//!     Some(&StateId::new(contexts::NORMAL, keys::NORMAL))
//! );
//! ```

pub mod component;
pub mod error;
pub mod id;
pub mod kind;
pub mod machine;
pub mod request;
pub mod runtime;
pub mod state;
pub mod table;
mod wait;

#[cfg(test)]
mod testing;

pub use component::{
    AlternateDataSource, AsAny, BeforeReload, Component, Cx, ErrorStateHooks, ResolvePath, Target,
    TransientErrorHooks, Transition, Validate,
};
pub use error::{LifecycleError, Result};
pub use id::{contexts, keys, StateId};
pub use kind::{Action, DelaySource, RequestKind, StateKind, WaitSpec};
pub use machine::Lifecycle;
pub use request::{RequestPolicy, Ticket};
pub use runtime::{ComponentId, Runtime, RuntimeStats};
pub use state::{State, TimerEvent, TimerPurpose};
pub use table::{StateTable, WILDCARD};
