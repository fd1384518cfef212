//! Lifecycle error types
//!
//! Only programming and integration mistakes surface as errors. Validation
//! failures, server errors and transport failures are routed through the
//! state machine itself and never reach the caller.

use thiserror::Error;

/// Lifecycle engine errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// An abstract state kind was named where a concrete one is required
    #[error("State kind `{0}` is abstract and cannot be instantiated")]
    AbstractState(String),

    /// Unrecognized state kind name
    #[error("Unknown state kind `{0}`")]
    UnknownStateKind(String),

    /// No state is defined for a context/key pair
    #[error("No state defined for context `{context}` and key `{key}`")]
    UnknownState { context: String, key: String },

    /// The current context has no successor
    #[error("Context `{0}` has no next context")]
    NoNextContext(String),

    /// A relative transition was requested before any state was entered
    #[error("Component has no current state")]
    NoCurrentState,

    /// A state requires a hook the component does not provide
    #[error("State `{state}` requires the component to implement {capability}")]
    MissingCapability {
        state: String,
        capability: &'static str,
    },

    /// A single stimulus chained more transitions than allowed
    #[error("Transition loop detected after {depth} chained transitions")]
    TransitionLoop { depth: usize },

    /// The component handle does not refer to a mounted component
    #[error("Unknown or unmounted component")]
    UnknownComponent,

    /// A state table definition is malformed
    #[error("Invalid state table: {0}")]
    InvalidTable(String),

    /// State table file is not valid TOML
    #[error("Failed to parse state table: {0}")]
    TableParse(#[from] toml::de::Error),

    /// Failed to read a state table file
    #[error("Failed to read state table: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
