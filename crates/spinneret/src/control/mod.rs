//! Control channel to the Tor daemon.
//!
//! The pool treats the daemon as an opaque capability: authenticate, create
//! circuits, report their paths. The wire protocol lives in [`tor`]; tests
//! substitute a scripted channel.

mod tor;

pub use tor::{TorControl, bootstrap_daemon};

use async_trait::async_trait;

use arachne_common::{ArachneError, CircuitId};

/// Boundary relays of a circuit path, informational only.
#[derive(Debug, Clone, Default)]
pub struct CircuitPath {
    /// First relay (entry guard)
    pub entry: Option<String>,
    /// Last relay (exit)
    pub exit: Option<String>,
}

/// Capability the pool needs from the routing daemon's control interface.
#[async_trait]
pub trait ControlChannel: Send {
    /// Authenticate the control connection. With no credential the
    /// implementation may negotiate another method (e.g. cookie auth).
    async fn authenticate(&mut self, credential: Option<&str>) -> Result<(), ArachneError>;

    /// Ask the daemon to build a new circuit and report its path.
    async fn create_circuit(&mut self) -> Result<(CircuitId, CircuitPath), ArachneError>;

    /// Detach from the daemon. Idempotent.
    async fn close(&mut self) -> Result<(), ArachneError>;
}
