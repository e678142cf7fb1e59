//! Shared constants for Arachne components.

/// Default Tor SOCKS port
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Default Tor control port
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Default maximum circuits kept in the pool
pub const DEFAULT_MAX_CIRCUITS: usize = 10;

/// Default circuit lifetime before forced retirement (10 minutes)
pub const DEFAULT_CIRCUIT_LIFETIME_SECS: u64 = 600;

/// Default request budget per circuit before degradation
pub const DEFAULT_MAX_REQUESTS_PER_CIRCUIT: u32 = 100;

/// Default number of Tor entry guards for a managed daemon
pub const DEFAULT_ENTRY_GUARDS: u32 = 3;

/// Circuits created at startup and after a full rotation
pub const INITIAL_CIRCUIT_COUNT: usize = 3;

/// Timeout for a single control-port connection attempt (seconds)
pub const CONTROL_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Timeout for a managed tor daemon to come up (seconds)
pub const BOOTSTRAP_TIMEOUT_SECS: u64 = 300;

/// Poll interval while waiting for a bootstrapping daemon (milliseconds)
pub const BOOTSTRAP_POLL_INTERVAL_MS: u64 = 500;

/// Fallback user-agent pool for session fingerprints.
///
/// Deployments override this from configuration; these keep a bare install
/// from egressing with the reqwest default UA.
pub const FALLBACK_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/119.0",
];
