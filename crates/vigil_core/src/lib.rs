//! Vigil Core
//!
//! Leaf primitives shared by the Vigil dashboard lifecycle engine:
//!
//! - **Timer Queue**: cancellable one-shot timers on a virtual clock
//! - **Event Bus**: topic-based publish/subscribe with deferred delivery
//! - **Transport**: the request/outcome contract to the backend
//! - **Configuration**: timing defaults loaded from TOML
//!
//! # Example
//!
//! ```rust
//! use vigil_core::{LifecycleConfig, TimerQueue};
//!
//! let config = LifecycleConfig::default();
//! let mut timers = TimerQueue::new();
//!
//! let recheck = timers.schedule(config.visibility_recheck_ms, "recheck");
//! assert_eq!(timers.deadline(recheck), Some(200));
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod timer;
pub mod transport;

pub use bus::{EventBus, Message, Topic};
pub use config::{AuthMode, LifecycleConfig};
pub use error::{ConfigError, Result};
pub use timer::{Fired, TimerId, TimerQueue};
pub use transport::{Method, Outcome, RecordingTransport, Request, RequestId, Transport};
