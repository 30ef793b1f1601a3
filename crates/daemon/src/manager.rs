// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

// LLM Tunnel Manager - Tunnel Manager Module
// Runs health-check passes over all enabled transports and aggregates them

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use llm_tunnel_common::{
    Capabilities, ConnectionStatus, Error, ManagerPhase, OverallState, ProbeKind, Result,
    StatusMap, StatusSnapshot, TunnelConfig,
};

use crate::auth::TokenProvider;
use crate::probe::{run_probe, ConnectionProbe, HttpProbeFactory, ProbeFactory};
use crate::status_publisher::{StatusPublisher, Subscription, SubscriptionId};
use crate::storage::ConfigStore;

type ProbeSet = BTreeMap<ProbeKind, Arc<dyn ConnectionProbe>>;

/// Mutable manager state. Every field holding shared data is replaced
/// wholesale, so readers clone an `Arc` and never see a half-applied update.
struct ManagerState {
    phase: ManagerPhase,
    config: Arc<TunnelConfig>,
    /// Bumped on every accepted config; passes started under an older
    /// generation are discarded
    generation: u64,
    probes: Arc<ProbeSet>,
    statuses: Arc<StatusMap>,
    overall: OverallState,
    is_connecting: bool,
    last_error: Option<String>,
    pass_count: u64,
    last_snapshot: Option<Arc<StatusSnapshot>>,
    running: bool,
    shut_down: bool,
}

struct Inner {
    state: RwLock<ManagerState>,
    store: Arc<dyn ConfigStore>,
    factory: Arc<dyn ProbeFactory>,
    capabilities: Capabilities,
    publisher: StatusPublisher,
    /// Serializes initialize and update_configuration
    update_lock: Mutex<()>,
    /// Highest pass request handed out
    requested: AtomicU64,
    /// Highest pass request covered by a committed pass
    completed_tx: watch::Sender<u64>,
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

enum PassOutcome {
    Committed,
    Stale,
    Closed,
}

/// Discovers, health-checks and aggregates every configured transport.
///
/// Cheap to clone; all clones share the same state. Construct one at
/// startup and hand clones to whatever needs connectivity information.
#[derive(Clone)]
pub struct TunnelManager {
    inner: Arc<Inner>,
}

impl TunnelManager {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        factory: Arc<dyn ProbeFactory>,
        capabilities: Capabilities,
    ) -> Self {
        let (completed_tx, _) = watch::channel(0);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(ManagerState {
                    phase: ManagerPhase::Uninitialized,
                    config: Arc::new(TunnelConfig::default()),
                    generation: 0,
                    probes: Arc::new(ProbeSet::new()),
                    statuses: Arc::new(StatusMap::new()),
                    overall: OverallState::Disconnected,
                    is_connecting: false,
                    last_error: None,
                    pass_count: 0,
                    last_snapshot: None,
                    running: false,
                    shut_down: false,
                }),
                store,
                factory,
                capabilities,
                publisher: StatusPublisher::new(),
                update_lock: Mutex::new(()),
                requested: AtomicU64::new(0),
                completed_tx,
                wake: Notify::new(),
                shutdown_tx,
                worker: Mutex::new(None),
            }),
        }
    }

    /// Manager backed by real HTTP probes
    pub fn with_http_probes(
        store: Arc<dyn ConfigStore>,
        tokens: Arc<dyn TokenProvider>,
        capabilities: Capabilities,
    ) -> Result<Self> {
        let factory = HttpProbeFactory::new(tokens)?;
        Ok(Self::new(store, Arc::new(factory), capabilities))
    }

    /// Load the stored config, run the first pass and start the periodic
    /// timer.
    ///
    /// Probe failures do not fail initialization; only a probe set that
    /// cannot be built does. Calling it again is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let guard = self.inner.update_lock.lock().await;

        {
            let state = self.inner.state.read().await;
            if state.shut_down {
                return Err(Error::NotRunning);
            }
            if state.phase != ManagerPhase::Uninitialized {
                debug!("Tunnel manager already initialized");
                return Ok(());
            }
        }

        let config = self.load_config();
        let probes = self.build_probes(&config)?;
        info!(
            "Tunnel manager starting with probes: {:?}",
            probes.keys().map(|k| k.as_str()).collect::<Vec<_>>()
        );

        {
            let mut state = self.inner.state.write().await;
            state.config = Arc::new(config);
            state.generation += 1;
            state.probes = Arc::new(probes);
            state.phase = ManagerPhase::Connecting;
            state.running = true;
        }

        let worker = tokio::spawn(self.clone().run_worker(self.inner.shutdown_tx.subscribe()));
        *self.inner.worker.lock().await = Some(worker);
        drop(guard);

        let ticket = self.request_pass();
        self.wait_for_pass(ticket).await;

        info!("Tunnel manager initialized: {}", self.state().await);
        Ok(())
    }

    /// Stored config, or the compiled-in default when it is missing,
    /// unreadable or out of range
    fn load_config(&self) -> TunnelConfig {
        match self.inner.store.load() {
            Ok(Some(config)) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    warn!("Stored tunnel configuration is invalid ({}), using defaults", e);
                    TunnelConfig::default()
                }
            },
            Ok(None) => {
                info!("No tunnel configuration found, using defaults");
                TunnelConfig::default()
            }
            Err(e) => {
                warn!("Failed to load tunnel configuration, using defaults: {:#}", e);
                TunnelConfig::default()
            }
        }
    }

    fn build_probes(&self, config: &TunnelConfig) -> Result<ProbeSet> {
        config
            .enabled_probes(self.inner.capabilities)
            .into_iter()
            .map(|kind| Ok((kind, self.inner.factory.build(kind, config)?)))
            .collect()
    }

    /// Request an extra pass and wait for it.
    ///
    /// Requests made while a pass is in flight are coalesced into a single
    /// follow-up pass. Returns immediately when the manager is not running.
    pub async fn reconnect(&self) {
        if !self.is_running().await {
            debug!("Reconnect ignored: tunnel manager is not running");
            return;
        }
        info!("Reconnect requested");
        let ticket = self.request_pass();
        self.wait_for_pass(ticket).await;
    }

    /// Validate and apply a new config, persist it, then run a fresh pass.
    ///
    /// An invalid config is rejected as a whole: config and statuses stay
    /// as they were and [`TunnelManager::error`] reports the reason.
    pub async fn update_configuration(&self, new_config: TunnelConfig) -> Result<()> {
        let guard = self.inner.update_lock.lock().await;

        if let Err(e) = new_config.validate() {
            warn!("Rejected tunnel configuration: {}", e);
            self.inner.state.write().await.last_error = Some(e.to_string());
            return Err(e.into());
        }

        let probes = self.build_probes(&new_config)?;
        let capabilities = self.inner.capabilities;

        let should_check = {
            let mut state = self.inner.state.write().await;
            let old = state.config.clone();

            // Keep results for probes that stay enabled and still point at
            // the same endpoint
            let retained: StatusMap = state
                .statuses
                .iter()
                .filter(|(name, _)| {
                    ProbeKind::from_name(name).is_some_and(|kind| {
                        new_config.is_enabled(kind, capabilities)
                            && !old.endpoint_changed(&new_config, kind)
                    })
                })
                .map(|(name, status)| (name.clone(), status.clone()))
                .collect();

            for kind in ProbeKind::ALL {
                let was = old.is_enabled(kind, capabilities);
                let now = new_config.is_enabled(kind, capabilities);
                if was != now {
                    info!("Probe {} {}", kind, if now { "enabled" } else { "disabled" });
                }
            }

            state.overall = OverallState::from_statuses(&retained);
            if state.running && !state.is_connecting {
                state.phase = state.overall.into();
            }
            state.statuses = Arc::new(retained);
            state.config = Arc::new(new_config.clone());
            state.probes = Arc::new(probes);
            state.generation += 1;
            state.last_error = None;

            state.running && !state.shut_down
        };

        if let Err(e) = self.inner.store.save(&new_config) {
            warn!("Failed to persist tunnel configuration: {:#}", e);
        }
        drop(guard);

        if should_check {
            let ticket = self.request_pass();
            self.wait_for_pass(ticket).await;
        }
        Ok(())
    }

    /// Stop the periodic timer and abandon any in-flight pass.
    ///
    /// Checks already running may finish in the background, but their
    /// results are never written back.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.write().await;
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.running = false;
            state.is_connecting = false;
        }

        self.inner.shutdown_tx.send_replace(true);
        if let Some(worker) = self.inner.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!("Health-check worker ended abnormally: {}", e);
            }
        }
        self.inner.publisher.close();
        info!("Tunnel manager stopped");
    }

    fn request_pass(&self) -> u64 {
        let ticket = self.inner.requested.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.wake.notify_one();
        ticket
    }

    /// Wait until a pass covering `ticket` has committed, or shutdown
    async fn wait_for_pass(&self, ticket: u64) {
        let mut completed = self.inner.completed_tx.subscribe();
        let mut shutdown = self.inner.shutdown_tx.subscribe();

        loop {
            if *completed.borrow_and_update() >= ticket || *shutdown.borrow_and_update() {
                return;
            }
            tokio::select! {
                changed = completed.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Single writer of pass results: serves pass requests and the timer
    async fn run_worker(self, mut shutdown: watch::Receiver<bool>) {
        let mut next_due = Instant::now() + self.config().await.health_check_interval();

        loop {
            if *shutdown.borrow() {
                return;
            }

            // Serve every outstanding request; requests that arrive while a
            // pass runs are folded into one follow-up pass
            loop {
                let target = self.inner.requested.load(Ordering::SeqCst);
                if target <= *self.inner.completed_tx.borrow() {
                    break;
                }

                let outcome = tokio::select! {
                    outcome = self.run_pass() => outcome,
                    _ = shutdown.changed() => {
                        debug!("Abandoning in-flight health-check pass");
                        return;
                    }
                };

                match outcome {
                    PassOutcome::Committed => {
                        self.inner.completed_tx.send_replace(target);
                        next_due = Instant::now() + self.config().await.health_check_interval();
                    }
                    PassOutcome::Stale => {
                        debug!("Configuration changed during pass, running again");
                    }
                    PassOutcome::Closed => return,
                }
            }

            tokio::select! {
                _ = self.inner.wake.notified() => {}
                _ = tokio::time::sleep_until(next_due) => {
                    debug!("Periodic health check due");
                    self.request_pass();
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Check every enabled probe concurrently and commit the results as
    /// one new status map
    async fn run_pass(&self) -> PassOutcome {
        let (generation, probes) = {
            let mut state = self.inner.state.write().await;
            if state.shut_down {
                return PassOutcome::Closed;
            }
            state.is_connecting = true;
            state.phase = ManagerPhase::Connecting;
            (state.generation, state.probes.clone())
        };

        let results = join_all(probes.values().cloned().map(run_probe)).await;
        let statuses: StatusMap = results
            .into_iter()
            .map(|status| (status.name.clone(), status))
            .collect();

        let snapshot = {
            let mut state = self.inner.state.write().await;
            if state.shut_down {
                return PassOutcome::Closed;
            }
            if state.generation != generation {
                return PassOutcome::Stale;
            }

            log_transitions(&state.statuses, &statuses);

            let overall = OverallState::from_statuses(&statuses);
            state.pass_count += 1;
            let snapshot = Arc::new(StatusSnapshot {
                pass: state.pass_count,
                state: overall,
                statuses: Arc::new(statuses),
                completed_at: Utc::now(),
            });

            state.statuses = snapshot.statuses.clone();
            state.overall = overall;
            state.phase = overall.into();
            state.is_connecting = false;
            state.last_snapshot = Some(snapshot.clone());
            snapshot
        };

        debug!("Health-check pass {} finished: {}", snapshot.pass, snapshot.state);
        self.inner.publisher.publish(snapshot);
        PassOutcome::Committed
    }

    /// Statuses from the most recently completed pass
    pub async fn connection_status(&self) -> Arc<StatusMap> {
        self.inner.state.read().await.statuses.clone()
    }

    pub async fn status(&self, kind: ProbeKind) -> Option<ConnectionStatus> {
        self.inner
            .state
            .read()
            .await
            .statuses
            .get(kind.as_str())
            .cloned()
    }

    /// True only when every enabled probe is connected
    pub async fn is_connected(&self) -> bool {
        self.inner.state.read().await.overall.is_connected()
    }

    pub async fn is_connecting(&self) -> bool {
        self.inner.state.read().await.is_connecting
    }

    /// Last configuration validation failure, if any
    pub async fn error(&self) -> Option<String> {
        self.inner.state.read().await.last_error.clone()
    }

    pub async fn config(&self) -> Arc<TunnelConfig> {
        self.inner.state.read().await.config.clone()
    }

    /// Aggregated state of the last completed pass
    pub async fn state(&self) -> OverallState {
        self.inner.state.read().await.overall
    }

    pub async fn phase(&self) -> ManagerPhase {
        self.inner.state.read().await.phase
    }

    pub async fn latest_snapshot(&self) -> Option<Arc<StatusSnapshot>> {
        self.inner.state.read().await.last_snapshot.clone()
    }

    /// Number of completed passes
    pub async fn pass_count(&self) -> u64 {
        self.inner.state.read().await.pass_count
    }

    /// Preferred route for chat traffic: the local runtime, then the cloud
    /// relay
    pub async fn best_connection(&self) -> Option<ProbeKind> {
        let statuses = self.connection_status().await;
        [ProbeKind::LocalRuntime, ProbeKind::CloudRelay]
            .into_iter()
            .find(|kind| {
                statuses
                    .get(kind.as_str())
                    .is_some_and(|status| status.is_connected)
            })
    }

    async fn is_running(&self) -> bool {
        let state = self.inner.state.read().await;
        state.running && !state.shut_down
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    /// Receive a snapshot after every completed pass
    pub fn subscribe(&self) -> Subscription {
        self.inner.publisher.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.publisher.unsubscribe(id)
    }
}

/// Log probes whose connectivity flipped between two passes
fn log_transitions(previous: &StatusMap, current: &StatusMap) {
    for (name, status) in current {
        match previous.get(name) {
            Some(old) if old.is_connected == status.is_connected => {
                debug!("Probe {} unchanged (connected: {})", name, status.is_connected);
            }
            old => {
                let from = match old {
                    Some(old) if old.is_connected => "connected",
                    Some(_) => "disconnected",
                    None => "unknown",
                };
                if status.is_connected {
                    info!("Probe {}: {} -> connected ({})", name, from, status.endpoint);
                } else {
                    info!(
                        "Probe {}: {} -> disconnected ({})",
                        name,
                        from,
                        status.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryConfigStore;

    struct NoProbes;

    impl ProbeFactory for NoProbes {
        fn build(
            &self,
            kind: ProbeKind,
            _config: &TunnelConfig,
        ) -> Result<Arc<dyn ConnectionProbe>> {
            Err(Error::ProbeSetup(format!("no probe for {}", kind)))
        }
    }

    fn manager(store: MemoryConfigStore) -> TunnelManager {
        TunnelManager::new(Arc::new(store), Arc::new(NoProbes), Capabilities::none())
    }

    #[tokio::test]
    async fn test_initial_state() {
        let manager = manager(MemoryConfigStore::new());
        assert_eq!(manager.phase().await, ManagerPhase::Uninitialized);
        assert!(!manager.is_connected().await);
        assert!(!manager.is_connecting().await);
        assert!(manager.connection_status().await.is_empty());
        assert!(manager.error().await.is_none());
    }

    #[tokio::test]
    async fn test_probe_setup_failure_fails_initialize() {
        let manager = manager(MemoryConfigStore::new());
        let err = manager.initialize().await.unwrap_err();
        assert!(matches!(err, Error::ProbeSetup(_)));
        assert_eq!(manager.phase().await, ManagerPhase::Uninitialized);
    }

    #[tokio::test]
    async fn test_no_enabled_probes_is_disconnected() {
        let config = TunnelConfig {
            enable_local_runtime: false,
            ..Default::default()
        };
        let manager = manager(MemoryConfigStore::with_config(config));
        manager.initialize().await.unwrap();

        assert_eq!(manager.phase().await, ManagerPhase::Disconnected);
        assert_eq!(manager.pass_count().await, 1);
        assert!(manager.connection_status().await.is_empty());
        assert!(manager.best_connection().await.is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_stored_config_falls_back_to_default() {
        let stored = TunnelConfig {
            enable_local_runtime: false,
            runtime_port: 0,
            ..Default::default()
        };
        let manager = manager(MemoryConfigStore::with_config(stored));
        // Default enables the local probe, which NoProbes cannot build
        assert!(manager.initialize().await.is_err());
    }

    #[test]
    fn test_log_transitions_handles_new_and_changed() {
        let mut previous = StatusMap::new();
        previous.insert(
            "local".to_string(),
            ConnectionStatus::failed(ProbeKind::LocalRuntime, "http://x", "timeout"),
        );
        let mut current = StatusMap::new();
        current.insert(
            "local".to_string(),
            ConnectionStatus::connected(ProbeKind::LocalRuntime, "http://x", None, None, Vec::new()),
        );
        current.insert(
            "cloud".to_string(),
            ConnectionStatus::failed(ProbeKind::CloudRelay, "https://y", "not authenticated"),
        );
        log_transitions(&previous, &current);
    }
}
