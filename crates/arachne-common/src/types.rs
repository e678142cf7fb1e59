//! Core types shared across Arachne components.

use serde::{Deserialize, Serialize};

/// Opaque circuit identifier assigned by the Tor control port.
pub type CircuitId = String;

/// Lifecycle state of a Tor circuit.
///
/// Transitions are monotonic toward `Dead`:
/// - `Fresh` -> `Active` on first allocation
/// - `Active` -> `Degraded` when the per-circuit request threshold is exceeded
/// - any non-terminal state -> `Dead` on expiry, explicit kill, or rotation
///
/// `Dead` is terminal; a dead circuit is never allocated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Created, never allocated
    Fresh,
    /// Allocated at least once
    Active,
    /// Over the request threshold but still within its lifetime; usable,
    /// flagged for earlier rotation
    Degraded,
    /// Terminal; excluded from all future allocation
    Dead,
}

impl CircuitState {
    /// Terminal states never leave the state they are in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dead)
    }
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::Fresh
    }
}

/// A Tor circuit known to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    /// Unique circuit identifier (from the control port)
    pub id: CircuitId,

    /// Current lifecycle state
    pub state: CircuitState,

    /// Creation timestamp (Unix epoch seconds); never changes
    pub created_at: i64,

    /// Timestamp of the most recent allocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,

    /// Number of allocations served by this circuit
    pub request_count: u32,

    /// First relay in the circuit path (informational)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_node: Option<String>,

    /// Last relay in the circuit path (informational)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_node: Option<String>,
}

impl Circuit {
    pub fn new(id: CircuitId, created_at: i64) -> Self {
        Self {
            id,
            state: CircuitState::Fresh,
            created_at,
            last_used: None,
            request_count: 0,
            entry_node: None,
            exit_node: None,
        }
    }

    /// Circuit age in seconds at `now`.
    pub fn age(&self, now: i64) -> i64 {
        (now - self.created_at).max(0)
    }
}

/// Read-only snapshot of pool state for observability.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Circuits known to the registry, including dead ones awaiting rotation
    pub total_circuits: usize,

    /// Circuits currently eligible for allocation
    pub active_circuits: usize,

    /// Circuits passing the health policy right now
    pub healthy_circuits: usize,

    /// Cached per-circuit client sessions
    pub sessions_cached: usize,
}
