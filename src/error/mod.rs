//! Error types for Parley.

use thiserror::Error;

/// Primary error type for all Parley operations.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// An operation was attempted in a session state that forbids it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A conversation or channel the caller named does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The execution engine failed while connecting, switching models, or
    /// streaming a turn.
    #[error("Engine error: {0}")]
    Engine(String),

    /// The persistent store rejected a read or write.
    #[error("Persistence error during {operation}: {message}")]
    Persistence { operation: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyError {
    /// Create an engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Create a persistence error tagged with the failing operation.
    pub fn persistence(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether this error terminates a single exchange while leaving the
    /// session usable. Engine and store failures are contained at the
    /// exchange boundary; the rest are caller or configuration faults
    /// reported synchronously.
    pub fn is_exchange_scoped(&self) -> bool {
        matches!(self, Self::Engine(_) | Self::Persistence { .. })
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ParleyError>;
