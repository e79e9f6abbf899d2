use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tridot_core::{AgentHealthReport, PeerRecord, WireGuardHealth, validate_peer_set};
use uuid::Uuid;

use crate::AgentError;
use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::firewall::FirewallError;
use crate::metrics::MetricsSink;
use crate::retry::{Cancelled, Retrier, RetryPolicy, Sleeper};
use crate::state::StateStore;
use crate::throughput::ThroughputTracker;
use crate::wireguard::{DeviceStats, WireGuardBackend, WireGuardError};

/// Bring-up or live-reload step run against the rendered config file.
pub type WireGuardHook = Arc<dyn Fn(&Path) -> Result<(), WireGuardError> + Send + Sync>;
/// Applies the configured firewall rule sets.
pub type NetworkPolicyStep = Box<dyn Fn() -> Result<(), FirewallError> + Send + Sync>;
/// Current CPU usage in percent.
pub type CpuProbe = Box<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Initializing,
    Registering,
    Steady,
    Draining,
    Stopped,
}

struct WireGuardBinding {
    backend: Arc<dyn WireGuardBackend>,
    config_path: PathBuf,
    up: Option<WireGuardHook>,
    sync: Option<WireGuardHook>,
}

/// The node agent control loop.
///
/// Drives Initializing -> Registering -> Steady, reporting health on a fixed
/// interval until the cancellation token fires. Register and every health
/// report are retried with jittered exponential backoff.
pub struct NodeAgent {
    control_plane: Arc<dyn ControlPlane>,
    poll_interval: Duration,
    retrier: Retrier,
    wireguard: Option<WireGuardBinding>,
    metrics: Option<Arc<dyn MetricsSink>>,
    state: Option<Arc<dyn StateStore>>,
    network_policy: Option<NetworkPolicyStep>,
    cpu_probe: Option<CpuProbe>,
    throughput: Mutex<ThroughputTracker>,
    node_id: Mutex<Option<Uuid>>,
    phase: Mutex<AgentPhase>,
}

impl NodeAgent {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        poll_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            control_plane,
            poll_interval,
            retrier: Retrier::new(retry),
            wireguard: None,
            metrics: None,
            state: None,
            network_policy: None,
            cpu_probe: None,
            throughput: Mutex::new(ThroughputTracker::new()),
            node_id: Mutex::new(None),
            phase: Mutex::new(AgentPhase::Initializing),
        }
    }

    pub fn with_wireguard(
        mut self,
        backend: Arc<dyn WireGuardBackend>,
        config_path: PathBuf,
        up: Option<WireGuardHook>,
        sync: Option<WireGuardHook>,
    ) -> Self {
        self.wireguard = Some(WireGuardBinding {
            backend,
            config_path,
            up,
            sync,
        });
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_network_policy(mut self, step: NetworkPolicyStep) -> Self {
        self.network_policy = Some(step);
        self
    }

    pub fn with_cpu_probe(mut self, probe: CpuProbe) -> Self {
        self.cpu_probe = Some(probe);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.retrier = self.retrier.with_sleeper(sleeper);
        self
    }

    pub fn phase(&self) -> AgentPhase {
        *lock(&self.phase)
    }

    pub fn node_id(&self) -> Option<Uuid> {
        *lock(&self.node_id)
    }

    fn set_phase(&self, phase: AgentPhase) {
        let mut current = lock(&self.phase);
        if *current != phase {
            debug!(from = ?*current, to = ?phase, "Agent phase changed");
            *current = phase;
        }
    }

    /// Writes the full peer set, live-reloads it, then persists it.
    ///
    /// The set is persisted only once the runtime accepted it; a persistence
    /// failure is logged and does not fail the call.
    pub fn apply_peers(&self, peers: &[PeerRecord]) -> Result<(), AgentError> {
        let wireguard = self
            .wireguard
            .as_ref()
            .ok_or(AgentError::WireGuardNotConfigured)?;
        validate_peer_set(peers)?;

        let path = wireguard.backend.write_peers(peers)?;
        if let Some(sync) = &wireguard.sync {
            sync(&path)?;
        }

        if let Some(state) = &self.state {
            if let Err(err) = state.save_peers(peers) {
                warn!(error = %err, "Failed to persist applied peer set");
            }
        }

        info!(peers = peers.len(), config = %path.display(), "Applied peer set");
        Ok(())
    }

    /// Renders the last persisted peer set into the config file so bring-up
    /// starts from the last applied configuration, even when that set is
    /// empty. Nothing is reloaded or re-persisted.
    fn restore_peers(&self) -> Result<(), AgentError> {
        let (Some(wireguard), Some(state)) = (&self.wireguard, &self.state) else {
            return Ok(());
        };
        let peers = state.load_peers()?;
        validate_peer_set(&peers)?;
        wireguard.backend.write_peers(&peers)?;
        info!(peers = peers.len(), "Restored persisted peer set");
        Ok(())
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AgentError> {
        self.set_phase(AgentPhase::Initializing);
        self.restore_peers()?;

        if let Some(wireguard) = &self.wireguard {
            if let Some(up) = &wireguard.up {
                if let Err(err) = up(&wireguard.config_path) {
                    warn!(error = %err, "WireGuard bring-up failed; continuing");
                }
            }
        }

        if let Some(apply_policy) = &self.network_policy {
            apply_policy()?;
        }

        self.set_phase(AgentPhase::Registering);
        if self
            .retrier
            .run(&cancel, "register", move || self.register_once())
            .await
            .is_err()
        {
            self.set_phase(AgentPhase::Stopped);
            return Ok(());
        }
        self.set_phase(AgentPhase::Steady);

        if self.report_with_retry(&cancel).await.is_err() {
            self.set_phase(AgentPhase::Stopped);
            return Ok(());
        }

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.report_with_retry(&cancel).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_phase(AgentPhase::Stopped);
        info!("Agent stopped");
        Ok(())
    }

    async fn register_once(&self) -> Result<(), ControlPlaneError> {
        let node_id = self.control_plane.register().await?;
        if let Some(node_id) = node_id {
            *lock(&self.node_id) = Some(node_id);
        }
        info!(node_id = ?node_id, "Registered with control plane");

        if let Some(wireguard) = &self.wireguard {
            if let Some(sync) = &wireguard.sync {
                let sync = sync.clone();
                let path = wireguard.config_path.clone();
                if let Err(err) = run_blocking(move || sync(&path)).await {
                    warn!(error = %err, "WireGuard sync after registration failed");
                }
            }
        }
        Ok(())
    }

    async fn report_with_retry(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        self.retrier
            .run(cancel, "health report", move || async move {
                let report = self.collect_health_report().await;
                self.control_plane.report_health(&report).await
            })
            .await
    }

    /// Like [`Self::build_health_report`], but the device stats are read on
    /// the blocking pool since they come from an external command.
    async fn collect_health_report(&self) -> AgentHealthReport {
        let stats = match &self.wireguard {
            Some(wireguard) => {
                let backend = wireguard.backend.clone();
                Some(run_blocking(move || backend.stats()).await)
            }
            None => None,
        };
        self.assemble_health_report(Utc::now(), stats)
    }

    /// Reads fresh device stats and assembles the health body. Failures of
    /// the stats read or the drain read drop only the affected fields.
    pub fn build_health_report(&self, now: DateTime<Utc>) -> AgentHealthReport {
        let stats = self
            .wireguard
            .as_ref()
            .map(|wireguard| wireguard.backend.stats());
        self.assemble_health_report(now, stats)
    }

    fn assemble_health_report(
        &self,
        now: DateTime<Utc>,
        stats: Option<Result<DeviceStats, WireGuardError>>,
    ) -> AgentHealthReport {
        let mut report = AgentHealthReport::new(now);
        report.node_id = self.node_id();
        report.cpu_percent = self.cpu_probe.as_ref().map(|probe| probe());

        let Some(stats) = stats else {
            return report;
        };
        let stats = match stats {
            Ok(stats) => stats,
            Err(err) => {
                warn!(error = %err, "Failed to read WireGuard stats");
                return report;
            }
        };

        let rate = lock(&self.throughput).observe(now, stats.rx_bytes, stats.tx_bytes);
        if let Some(metrics) = &self.metrics {
            metrics.update(&stats);
        }

        let drain = self.state.as_ref().and_then(|state| match state.drain_enabled() {
            Ok(drain) => Some(drain),
            Err(err) => {
                warn!(error = %err, "Failed to read drain flag");
                None
            }
        });
        match drain {
            Some(true) => self.set_phase(AgentPhase::Draining),
            Some(false) => self.set_phase(AgentPhase::Steady),
            None => {}
        }

        report.active_peers = Some(stats.active_peers);
        report.throughput_mbps = Some(rate.total_mbps());
        report.wireguard = Some(WireGuardHealth {
            peer_count: stats.peer_count,
            active_peer_count: stats.active_peers,
            handshake_ratio: stats.handshake_ratio(),
            last_handshake: stats.last_handshake,
            rx_bytes: stats.rx_bytes,
            tx_bytes: stats.tx_bytes,
            rx_bps: rate.rx_bps,
            tx_bps: rate.tx_bps,
            drain,
        });
        report
    }
}

/// Runs a WireGuard call that shells out on tokio's blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, WireGuardError>
where
    F: FnOnce() -> Result<T, WireGuardError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|join| Err(WireGuardError::Io(std::io::Error::other(join))))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
