//! Common error types for Arachne components.

use thiserror::Error;

/// Errors surfaced by the circuit pool and its collaborators.
#[derive(Debug, Error)]
pub enum ArachneError {
    /// Control port unreachable or the connection died
    #[error("Control channel error: {0}")]
    ControlChannel(String),

    /// Control-port authentication rejected
    #[error("Control authentication failed: {0}")]
    Auth(String),

    /// Could not launch or reach a managed tor daemon
    #[error("Tor bootstrap failed: {0}")]
    Bootstrap(String),

    /// A single circuit-creation attempt failed (non-fatal; callers recycle)
    #[error("Circuit creation failed: {0}")]
    CircuitCreation(String),

    /// Pool saturated and creation failed
    #[error("No circuit available: pool is saturated and creation failed")]
    NoAvailableCircuit,

    /// Pool used before `start()` succeeded
    #[error("Circuit pool has not been started")]
    NotStarted,

    /// Caller holds a reference to a dead or unknown circuit; re-acquire
    #[error("Stale circuit reference: {0}")]
    StaleCircuit(String),

    /// Client session construction failed
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// I/O error on the control connection or tor process
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArachneError {
    /// Returns true if the caller can reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitCreation(_) | Self::StaleCircuit(_) | Self::Timeout(_)
        )
    }

    /// Returns true if the pool cannot function at all (start-time failures).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ControlChannel(_) | Self::Auth(_) | Self::Bootstrap(_) | Self::Config(_)
        )
    }
}
