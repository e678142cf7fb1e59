//! Per-circuit client sessions.
//!
//! Every circuit gets its own HTTP client egressing exclusively through the
//! local SOCKS proxy, with a user agent drawn from a rotatable fingerprint
//! pool. The proxy endpoint is the same for all circuits; isolation comes
//! from the daemon's per-connection circuit assignment.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, UPGRADE_INSECURE_REQUESTS};

use arachne_common::constants::FALLBACK_USER_AGENTS;
use arachne_common::{ArachneError, CircuitId};

/// Rotatable user-agent pool with a seedable entropy source.
pub struct FingerprintPool {
    agents: Vec<String>,
    rng: Mutex<StdRng>,
}

impl FingerprintPool {
    pub fn new(agents: Vec<String>) -> Self {
        Self::with_rng(agents, StdRng::from_os_rng())
    }

    /// Deterministic pool for tests.
    pub fn with_seed(agents: Vec<String>, seed: u64) -> Self {
        Self::with_rng(agents, StdRng::seed_from_u64(seed))
    }

    fn with_rng(agents: Vec<String>, rng: StdRng) -> Self {
        let agents = if agents.is_empty() {
            FALLBACK_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            agents
        };
        Self {
            agents,
            rng: Mutex::new(rng),
        }
    }

    /// Replace the entropy source with a seeded one.
    pub fn reseed(&self, seed: u64) {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        *rng = StdRng::seed_from_u64(seed);
    }

    /// Pick a user agent at random.
    pub fn pick(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let idx = rng.random_range(0..self.agents.len());
        self.agents[idx].clone()
    }
}

/// HTTP session bound to one circuit.
///
/// Cheap to clone; the underlying client is shared. Handles are scoped to a
/// unit of work: once the circuit dies, the next lookup through the pool
/// reports staleness instead of handing the session back out.
#[derive(Debug, Clone)]
pub struct TorSession {
    circuit_id: CircuitId,
    user_agent: String,
    client: reqwest::Client,
}

impl TorSession {
    /// Build a session for `circuit_id`, egressing through the SOCKS proxy
    /// with browser-like headers. No network I/O happens here.
    pub(crate) fn build(
        circuit_id: CircuitId,
        socks_port: u16,
        user_agent: String,
    ) -> Result<Self, ArachneError> {
        // socks5h: hostname resolution happens on the daemon side, so onion
        // addresses never hit local DNS
        let proxy = reqwest::Proxy::all(format!("socks5h://127.0.0.1:{socks_port}"))
            .map_err(|e| ArachneError::Session(format!("proxy setup: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .default_headers(headers)
            .user_agent(user_agent.clone())
            .build()
            .map_err(|e| ArachneError::Session(format!("client setup: {e}")))?;

        Ok(Self {
            circuit_id,
            user_agent,
            client,
        })
    }

    pub fn circuit_id(&self) -> &str {
        &self.circuit_id
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The proxied HTTP client for this circuit.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
