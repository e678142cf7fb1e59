//! Circuit pool manager.
//!
//! Owns the authoritative circuit registry, the ordered active list, and the
//! per-circuit session cache. One lock serializes every mutation, so
//! allocation, cleanup, kill, and rotation are atomic with respect to one
//! another; the control-channel round trip for circuit creation runs outside
//! that lock and re-validates capacity on commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::Mutex;

use arachne_common::constants::{CONTROL_CONNECT_TIMEOUT_SECS, INITIAL_CIRCUIT_COUNT};
use arachne_common::{ArachneError, Circuit, CircuitId, CircuitState, PoolStats};

use super::health::is_healthy;
use crate::clock::{Clock, SystemClock};
use crate::config::TorConfig;
use crate::control::{self, CircuitPath, ControlChannel, TorControl};
use crate::session::{FingerprintPool, TorSession};

/// Registry + active list + session cache, guarded together.
#[derive(Default)]
struct PoolInner {
    circuits: HashMap<CircuitId, Circuit>,
    /// Allocation scan order = creation order
    active: Vec<CircuitId>,
    sessions: HashMap<CircuitId, TorSession>,
}

impl PoolInner {
    /// Retire expired circuits, flag over-budget ones, and drop dead ids
    /// from the active list. In-memory bookkeeping only; dead registry
    /// records persist until rotation.
    fn cleanup(&mut self, now: i64, tor: &TorConfig) {
        let lifetime = tor.circuit_lifetime_secs as i64;

        for circuit in self.circuits.values_mut() {
            match circuit.state {
                CircuitState::Dead => {}
                _ if circuit.age(now) > lifetime => {
                    tracing::debug!(circuit_id = %circuit.id, "Circuit expired");
                    circuit.state = CircuitState::Dead;
                }
                CircuitState::Active if circuit.request_count > tor.max_requests_per_circuit => {
                    tracing::debug!(
                        circuit_id = %circuit.id,
                        requests = circuit.request_count,
                        "Circuit degraded"
                    );
                    circuit.state = CircuitState::Degraded;
                }
                _ => {}
            }
        }

        let circuits = &self.circuits;
        self.active
            .retain(|id| circuits.get(id).is_some_and(|c| c.state != CircuitState::Dead));
    }

    /// First healthy circuit in creation order; `require_fresh` additionally
    /// demands a circuit that has never served a request.
    fn select(&mut self, now: i64, require_fresh: bool, tor: &TorConfig) -> Option<Circuit> {
        let id = self
            .active
            .iter()
            .find(|id| {
                self.circuits.get(id.as_str()).is_some_and(|c| {
                    is_healthy(c, now, tor.circuit_lifetime_secs, tor.max_requests_per_circuit)
                        && (!require_fresh || c.request_count == 0)
                })
            })?
            .clone();
        self.touch(&id, now)
    }

    /// Saturation fallback: least-recent `last_used` (never-used sorts
    /// first), ties broken by earliest `created_at`. Trades isolation for
    /// availability.
    fn recycle(&mut self, now: i64) -> Option<Circuit> {
        let id = self
            .active
            .iter()
            .filter_map(|id| self.circuits.get(id))
            .min_by_key(|c| (c.last_used.unwrap_or(0), c.created_at))
            .map(|c| c.id.clone())?;
        self.touch(&id, now)
    }

    /// Record an allocation: bump the counter, stamp `last_used`, promote
    /// `Fresh` to `Active`.
    fn touch(&mut self, id: &str, now: i64) -> Option<Circuit> {
        let circuit = self.circuits.get_mut(id)?;
        circuit.request_count += 1;
        circuit.last_used = Some(now);
        if circuit.state == CircuitState::Fresh {
            circuit.state = CircuitState::Active;
        }
        Some(circuit.clone())
    }

    /// Add a newly built circuit to the registry and active list.
    fn register(&mut self, id: CircuitId, path: CircuitPath, now: i64) -> Circuit {
        let mut circuit = Circuit::new(id.clone(), now);
        circuit.entry_node = path.entry;
        circuit.exit_node = path.exit;
        self.circuits.insert(id.clone(), circuit.clone());
        self.active.push(id);
        circuit
    }

    fn kill(&mut self, id: &str) {
        if let Some(circuit) = self.circuits.get_mut(id) {
            circuit.state = CircuitState::Dead;
        }
        self.active.retain(|cid| cid != id);
    }
}

/// Tor circuit pool: creates, health-checks, allocates, recycles, and
/// rotates circuits, and binds client sessions to them.
///
/// Owned by whoever starts it; safe to share behind an `Arc` across worker
/// tasks.
pub struct CircuitPool {
    tor: TorConfig,
    fingerprints: FingerprintPool,
    clock: Arc<dyn Clock>,
    control: Mutex<Option<Box<dyn ControlChannel>>>,
    inner: Mutex<PoolInner>,
    daemon: Mutex<Option<Child>>,
}

impl CircuitPool {
    pub fn new(tor: TorConfig, user_agents: Vec<String>) -> Self {
        Self::with_clock(tor, user_agents, Arc::new(SystemClock))
    }

    /// Pool with an explicit time source, so tests can drive expiry.
    pub fn with_clock(tor: TorConfig, user_agents: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tor,
            fingerprints: FingerprintPool::new(user_agents),
            clock,
            control: Mutex::new(None),
            inner: Mutex::new(PoolInner::default()),
            daemon: Mutex::new(None),
        }
    }

    /// Seed the fingerprint entropy source (deterministic session
    /// fingerprints).
    pub fn with_fingerprint_seed(self, seed: u64) -> Self {
        self.fingerprints.reseed(seed);
        self
    }

    /// Establish the control channel and build the initial circuit set.
    ///
    /// Tries an existing daemon on the configured control port first; when
    /// none is reachable, bootstraps a managed `tor` process. Fails if
    /// neither path yields an authenticated channel within its timeout.
    pub async fn start(&self) -> Result<(), ArachneError> {
        let connect_timeout = Duration::from_secs(CONTROL_CONNECT_TIMEOUT_SECS);

        let mut channel = match TorControl::connect(self.tor.control_port, connect_timeout).await {
            Ok(channel) => {
                tracing::info!(
                    control_port = self.tor.control_port,
                    "Connected to existing tor daemon"
                );
                channel
            }
            Err(e) => {
                tracing::info!(error = %e, "No reachable control port, launching managed tor");
                let child = control::bootstrap_daemon(&self.tor).await?;
                *self.daemon.lock().await = Some(child);
                TorControl::connect(self.tor.control_port, connect_timeout).await?
            }
        };

        channel
            .authenticate(self.tor.control_credential.as_deref())
            .await?;

        self.start_with_channel(Box::new(channel)).await
    }

    /// Attach an already-authenticated control channel and build the initial
    /// circuit set (`min(3, max_circuits)` circuits).
    pub async fn start_with_channel(
        &self,
        channel: Box<dyn ControlChannel>,
    ) -> Result<(), ArachneError> {
        *self.control.lock().await = Some(channel);
        self.spin_initial_circuits().await;
        Ok(())
    }

    /// Get a circuit for a unit of work.
    ///
    /// Order: cleanup, first healthy circuit in creation order (skipping
    /// used circuits when `require_fresh`), create below capacity, recycle
    /// the least-recently used circuit at capacity.
    pub async fn acquire(&self, require_fresh: bool) -> Result<Circuit, ArachneError> {
        {
            let mut inner = self.inner.lock().await;
            let now = self.clock.now_ts();
            inner.cleanup(now, &self.tor);

            if let Some(circuit) = inner.select(now, require_fresh, &self.tor) {
                return Ok(circuit);
            }

            if inner.active.len() >= self.tor.max_circuits {
                return inner.recycle(now).ok_or(ArachneError::NoAvailableCircuit);
            }
        }

        // Below capacity and nothing suitable: create without holding the
        // registry lock across the control round trip
        match self.create_raw().await {
            Ok((id, path)) => {
                let mut inner = self.inner.lock().await;
                let now = self.clock.now_ts();
                if inner.active.len() < self.tor.max_circuits {
                    inner.register(id.clone(), path, now);
                    inner.touch(&id, now).ok_or(ArachneError::NoAvailableCircuit)
                } else {
                    // Another worker filled the pool during the round trip.
                    // Serve from the existing set; the daemon reclaims the
                    // surplus circuit on its own timeout.
                    tracing::debug!(circuit_id = %id, "Pool filled during creation, discarding surplus circuit");
                    inner.cleanup(now, &self.tor);
                    inner
                        .select(now, require_fresh, &self.tor)
                        .or_else(|| inner.recycle(now))
                        .ok_or(ArachneError::NoAvailableCircuit)
                }
            }
            Err(e @ ArachneError::NotStarted) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Circuit creation failed, falling back to recycling");
                let mut inner = self.inner.lock().await;
                let now = self.clock.now_ts();
                inner.cleanup(now, &self.tor);
                inner.recycle(now).ok_or(ArachneError::NoAvailableCircuit)
            }
        }
    }

    /// Mark a circuit dead and withdraw it from allocation. Idempotent;
    /// unknown ids are a no-op. The cached session is reaped on next lookup.
    pub async fn mark_dead(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.circuits.contains_key(id) {
            tracing::debug!(circuit_id = %id, "Circuit marked dead");
        }
        inner.kill(id);
    }

    /// Retire every circuit, drop every session binding, and rebuild the
    /// initial circuit set. Scheduled hygiene or emergency response.
    pub async fn rotate_all(&self) {
        tracing::warn!("Rotating all circuits");

        {
            let mut inner = self.inner.lock().await;
            inner.circuits.clear();
            inner.active.clear();
            inner.sessions.clear();
        }

        self.spin_initial_circuits().await;
    }

    /// Session bound to `circuit`: cached per circuit id, lazily built with
    /// SOCKS egress and a rotated fingerprint.
    ///
    /// A dead or unknown circuit yields [`ArachneError::StaleCircuit`] after
    /// dropping any cached binding; the caller re-acquires and retries.
    pub async fn session_for(&self, circuit: &Circuit) -> Result<TorSession, ArachneError> {
        let mut inner = self.inner.lock().await;

        let live = inner
            .circuits
            .get(&circuit.id)
            .is_some_and(|c| c.state != CircuitState::Dead);
        if !live {
            inner.sessions.remove(&circuit.id);
            return Err(ArachneError::StaleCircuit(circuit.id.clone()));
        }

        if let Some(session) = inner.sessions.get(&circuit.id) {
            return Ok(session.clone());
        }

        let session = TorSession::build(
            circuit.id.clone(),
            self.tor.socks_port,
            self.fingerprints.pick(),
        )?;
        inner.sessions.insert(circuit.id.clone(), session.clone());
        Ok(session)
    }

    /// Read-only snapshot for observability.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let now = self.clock.now_ts();

        PoolStats {
            total_circuits: inner.circuits.len(),
            active_circuits: inner.active.len(),
            healthy_circuits: inner
                .circuits
                .values()
                .filter(|c| {
                    is_healthy(
                        c,
                        now,
                        self.tor.circuit_lifetime_secs,
                        self.tor.max_requests_per_circuit,
                    )
                })
                .count(),
            sessions_cached: inner.sessions.len(),
        }
    }

    /// Release session bindings, detach the control connection, and
    /// terminate a self-managed daemon. Idempotent.
    pub async fn stop(&self) {
        tracing::info!("Stopping circuit pool");

        self.inner.lock().await.sessions.clear();

        if let Some(mut channel) = self.control.lock().await.take() {
            if let Err(e) = channel.close().await {
                tracing::debug!(error = %e, "Control channel close failed");
            }
        }

        if let Some(mut child) = self.daemon.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to terminate managed tor daemon");
            } else {
                tracing::info!("Managed tor daemon stopped");
            }
        }
    }

    /// Create `min(3, max_circuits)` circuits. Individual failures are
    /// logged and absorbed; the pool creates on demand later.
    async fn spin_initial_circuits(&self) {
        let target = INITIAL_CIRCUIT_COUNT.min(self.tor.max_circuits);

        for _ in 0..target {
            match self.create_raw().await {
                Ok((id, path)) => {
                    let mut inner = self.inner.lock().await;
                    if inner.active.len() >= self.tor.max_circuits {
                        break;
                    }
                    let now = self.clock.now_ts();
                    inner.register(id.clone(), path, now);
                    tracing::debug!(circuit_id = %id, "Created initial circuit");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create initial circuit");
                }
            }
        }
    }

    /// Round-trip to the daemon for a new circuit. Holds only the channel
    /// lock, never the registry lock.
    async fn create_raw(&self) -> Result<(CircuitId, CircuitPath), ArachneError> {
        let mut guard = self.control.lock().await;
        let channel = guard.as_mut().ok_or(ArachneError::NotStarted)?;
        channel.create_circuit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// In-memory control channel handing out sequential circuit ids.
    struct ScriptedChannel {
        next_id: AtomicU32,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ControlChannel for ScriptedChannel {
        async fn authenticate(&mut self, _credential: Option<&str>) -> Result<(), ArachneError> {
            Ok(())
        }

        async fn create_circuit(&mut self) -> Result<(CircuitId, CircuitPath), ArachneError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ArachneError::CircuitCreation("scripted failure".into()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((
                id.to_string(),
                CircuitPath {
                    entry: Some("guard".to_string()),
                    exit: Some(format!("exit-{id}")),
                },
            ))
        }

        async fn close(&mut self) -> Result<(), ArachneError> {
            Ok(())
        }
    }

    fn tor_config(max_circuits: usize) -> TorConfig {
        TorConfig {
            max_circuits,
            circuit_lifetime_secs: 600,
            max_requests_per_circuit: 100,
            ..Default::default()
        }
    }

    async fn started_pool(
        tor: TorConfig,
    ) -> (Arc<CircuitPool>, Arc<ManualClock>, Arc<AtomicBool>) {
        let clock = ManualClock::new(1_000);
        let fail = Arc::new(AtomicBool::new(false));
        let channel = Box::new(ScriptedChannel {
            next_id: AtomicU32::new(0),
            fail: fail.clone(),
        });

        let pool = Arc::new(
            CircuitPool::with_clock(tor, vec!["ua-test".to_string()], clock.clone())
                .with_fingerprint_seed(42),
        );
        pool.start_with_channel(channel).await.unwrap();
        (pool, clock, fail)
    }

    #[tokio::test]
    async fn initial_pool_has_three_fresh_circuits() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        let stats = pool.stats().await;
        assert_eq!(stats.total_circuits, 3);
        assert_eq!(stats.active_circuits, 3);
        assert_eq!(stats.healthy_circuits, 3);
        assert_eq!(stats.sessions_cached, 0);

        let inner = pool.inner.lock().await;
        for circuit in inner.circuits.values() {
            assert_eq!(circuit.state, CircuitState::Fresh);
            assert_eq!(circuit.request_count, 0);
            assert!(circuit.last_used.is_none());
        }
    }

    #[tokio::test]
    async fn initial_count_is_capped_by_max_circuits() {
        let (pool, _clock, _fail) = started_pool(tor_config(2)).await;
        assert_eq!(pool.stats().await.active_circuits, 2);
    }

    #[tokio::test]
    async fn first_acquire_activates_one_circuit_only() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        let circuit = pool.acquire(false).await.unwrap();
        assert_eq!(circuit.request_count, 1);
        assert_eq!(circuit.state, CircuitState::Active);

        let inner = pool.inner.lock().await;
        let fresh = inner
            .circuits
            .values()
            .filter(|c| c.state == CircuitState::Fresh)
            .count();
        assert_eq!(fresh, 2);
    }

    #[tokio::test]
    async fn expiry_kills_all_circuits_and_empties_active_list() {
        let (pool, clock, _fail) = started_pool(tor_config(10)).await;

        clock.advance(601);
        {
            let mut inner = pool.inner.lock().await;
            let now = clock.now_ts();
            inner.cleanup(now, &pool.tor);

            assert!(inner.active.is_empty());
            assert_eq!(inner.circuits.len(), 3);
            for circuit in inner.circuits.values() {
                assert_eq!(circuit.state, CircuitState::Dead);
            }
        }

        assert_eq!(pool.stats().await.healthy_circuits, 0);
    }

    #[tokio::test]
    async fn over_budget_circuit_degrades_but_stays_usable() {
        let (pool, _clock, _fail) = started_pool(tor_config(1)).await;

        let mut last = None;
        for _ in 0..101 {
            last = Some(pool.acquire(false).await.unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.request_count, 101);
        assert_eq!(last.state, CircuitState::Active);

        // Still within its lifetime: degraded, not dead, and still served
        let recycled = pool.acquire(false).await.unwrap();
        assert_eq!(recycled.id, last.id);
        assert_eq!(recycled.state, CircuitState::Degraded);
        assert_eq!(recycled.request_count, 102);
    }

    #[tokio::test]
    async fn mark_dead_on_unknown_id_is_a_noop() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        pool.mark_dead("no-such-circuit").await;

        let stats = pool.stats().await;
        assert_eq!(stats.total_circuits, 3);
        assert_eq!(stats.active_circuits, 3);
    }

    #[tokio::test]
    async fn mark_dead_is_idempotent_and_terminal() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        let circuit = pool.acquire(false).await.unwrap();
        pool.mark_dead(&circuit.id).await;
        pool.mark_dead(&circuit.id).await;

        let stats = pool.stats().await;
        assert_eq!(stats.active_circuits, 2);
        assert_eq!(stats.total_circuits, 3);

        // A dead circuit is never handed back out
        for _ in 0..20 {
            let next = pool.acquire(false).await.unwrap();
            assert_ne!(next.id, circuit.id);
            assert_ne!(next.state, CircuitState::Dead);
        }
    }

    #[tokio::test]
    async fn creation_failure_falls_back_to_recycling() {
        let (pool, _clock, fail) = started_pool(tor_config(10)).await;

        pool.mark_dead("2").await;
        pool.mark_dead("3").await;
        {
            // Exhaust the survivor's request budget so nothing is selectable
            let mut inner = pool.inner.lock().await;
            let survivor = inner.circuits.get_mut("1").unwrap();
            survivor.request_count = 200;
            survivor.state = CircuitState::Active;
        }
        fail.store(true, Ordering::SeqCst);

        let circuit = pool.acquire(false).await.unwrap();
        assert_eq!(circuit.id, "1");
        assert_eq!(circuit.state, CircuitState::Degraded);
        assert_ne!(circuit.state, CircuitState::Dead);
    }

    #[tokio::test]
    async fn empty_pool_with_failing_creation_reports_exhaustion() {
        let (pool, _clock, fail) = started_pool(tor_config(10)).await;

        for id in ["1", "2", "3"] {
            pool.mark_dead(id).await;
        }
        fail.store(true, Ordering::SeqCst);

        let err = pool.acquire(false).await.unwrap_err();
        assert!(matches!(err, ArachneError::NoAvailableCircuit));
    }

    #[tokio::test]
    async fn acquire_before_start_reports_not_started() {
        let pool = CircuitPool::with_clock(
            tor_config(10),
            vec!["ua-test".to_string()],
            ManualClock::new(1_000),
        );

        let err = pool.acquire(false).await.unwrap_err();
        assert!(matches!(err, ArachneError::NotStarted));
    }

    #[tokio::test]
    async fn require_fresh_skips_used_circuits() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        let first = pool.acquire(false).await.unwrap();
        let fresh = pool.acquire(true).await.unwrap();

        assert_ne!(fresh.id, first.id);
        assert_eq!(fresh.request_count, 1);
    }

    #[tokio::test]
    async fn require_fresh_creates_when_all_circuits_are_used() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        for _ in 0..3 {
            pool.acquire(true).await.unwrap();
        }

        // All three initial circuits used; a fourth gets created
        let created = pool.acquire(true).await.unwrap();
        assert_eq!(created.request_count, 1);
        assert_eq!(pool.stats().await.active_circuits, 4);
    }

    #[tokio::test]
    async fn saturation_recycles_least_recently_used() {
        let (pool, clock, _fail) = started_pool(tor_config(2)).await;

        // Burn through both circuits' request budgets
        {
            let mut inner = pool.inner.lock().await;
            for circuit in inner.circuits.values_mut() {
                circuit.request_count = 200;
                circuit.state = CircuitState::Active;
            }
            let ids = inner.active.clone();
            inner.touch(&ids[0], 1_050);
            inner.touch(&ids[1], 1_060);
        }

        clock.advance(200);
        let recycled = pool.acquire(false).await.unwrap();
        // The circuit touched at 1_050 is the least recently used
        assert_eq!(recycled.id, "1");

        clock.advance(1);
        let next = pool.acquire(false).await.unwrap();
        assert_eq!(next.id, "2");
    }

    #[tokio::test]
    async fn active_list_never_exceeds_max_circuits() {
        let (pool, _clock, _fail) = started_pool(tor_config(3)).await;

        for _ in 0..10 {
            pool.acquire(true).await.unwrap();
            assert!(pool.stats().await.active_circuits <= 3);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_lose_no_updates() {
        let (pool, _clock, _fail) = started_pool(tor_config(2)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.acquire(false).await.unwrap().id
            }));
        }

        let mut used_ids = Vec::new();
        for handle in handles {
            used_ids.push(handle.await.unwrap());
        }

        let inner = pool.inner.lock().await;
        let total_requests: u32 = inner.circuits.values().map(|c| c.request_count).sum();
        assert_eq!(total_requests, 8);
        assert!(inner.active.len() <= 2);

        used_ids.sort();
        used_ids.dedup();
        assert!(used_ids.len() <= 2);
    }

    #[tokio::test]
    async fn rotation_replaces_pool_and_clears_sessions() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        let circuit = pool.acquire(false).await.unwrap();
        pool.session_for(&circuit).await.unwrap();
        assert_eq!(pool.stats().await.sessions_cached, 1);

        pool.rotate_all().await;

        let stats = pool.stats().await;
        assert_eq!(stats.active_circuits, 3);
        assert_eq!(stats.total_circuits, 3);
        assert_eq!(stats.sessions_cached, 0);

        // Old ids are gone; the replacement set is entirely new
        let inner = pool.inner.lock().await;
        assert!(!inner.circuits.contains_key(&circuit.id));
    }

    #[tokio::test]
    async fn rotation_respects_max_circuits() {
        let (pool, _clock, _fail) = started_pool(tor_config(2)).await;
        pool.rotate_all().await;
        assert_eq!(pool.stats().await.active_circuits, 2);
    }

    #[tokio::test]
    async fn sessions_are_cached_per_circuit() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        let circuit = pool.acquire(false).await.unwrap();
        let first = pool.session_for(&circuit).await.unwrap();
        let second = pool.session_for(&circuit).await.unwrap();

        assert_eq!(first.circuit_id(), second.circuit_id());
        assert_eq!(first.user_agent(), second.user_agent());
        assert_eq!(pool.stats().await.sessions_cached, 1);
    }

    #[tokio::test]
    async fn dead_circuit_session_lookup_is_stale_and_reaps_binding() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        let circuit = pool.acquire(false).await.unwrap();
        pool.session_for(&circuit).await.unwrap();
        pool.mark_dead(&circuit.id).await;

        let err = pool.session_for(&circuit).await.unwrap_err();
        assert!(matches!(err, ArachneError::StaleCircuit(_)));
        assert_eq!(pool.stats().await.sessions_cached, 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (pool, _clock, _fail) = started_pool(tor_config(10)).await;

        let circuit = pool.acquire(false).await.unwrap();
        pool.session_for(&circuit).await.unwrap();

        pool.stop().await;
        assert_eq!(pool.stats().await.sessions_cached, 0);

        pool.stop().await;

        // A stopped pool reports NotStarted once circuits run out
        pool.rotate_all().await;
        let err = pool.acquire(false).await.unwrap_err();
        assert!(matches!(err, ArachneError::NotStarted));
    }
}
