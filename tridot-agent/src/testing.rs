//! In-memory doubles for the agent's seams.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tridot_core::{AgentHealthReport, PeerRecord};
use uuid::Uuid;

use crate::command::{CommandError, CommandRunner, render_command};
use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::metrics::MetricsSink;
use crate::state::{StateError, StateStore};
use crate::wireguard::{DeviceStats, WireGuardBackend, WireGuardError};

/// Ordered record of side effects shared between fakes.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    outputs: HashMap<String, String>,
    fail_on: Option<String>,
}

impl RecordingRunner {
    pub(crate) fn with_output(mut self, program: &str, output: &str) -> Self {
        self.outputs.insert(program.to_string(), output.to_string());
        self
    }

    /// Fails (after recording) any command whose rendered form contains `pattern`.
    pub(crate) fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        let command = render_command(program, args);
        self.calls.lock().unwrap().push(command.clone());
        if self
            .fail_on
            .as_deref()
            .is_some_and(|pattern| command.contains(pattern))
        {
            return Err(CommandError::Failed {
                command,
                stderr: "injected failure".to_string(),
            });
        }
        Ok(self.outputs.get(program).cloned().unwrap_or_default())
    }
}

pub(crate) struct FakeControlPlane {
    node_id: Option<Uuid>,
    register_failures: AtomicU32,
    report_failures: AtomicU32,
    register_calls: AtomicU32,
    reports: Mutex<Vec<AgentHealthReport>>,
    cancel_after_reports: Option<(usize, CancellationToken)>,
    log: EventLog,
}

impl FakeControlPlane {
    pub(crate) fn new() -> Self {
        Self {
            node_id: None,
            register_failures: AtomicU32::new(0),
            report_failures: AtomicU32::new(0),
            register_calls: AtomicU32::new(0),
            reports: Mutex::new(Vec::new()),
            cancel_after_reports: None,
            log: EventLog::default(),
        }
    }

    pub(crate) fn with_node_id(mut self, node_id: Uuid) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub(crate) fn failing_registrations(self, count: u32) -> Self {
        self.register_failures.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_reports(self, count: u32) -> Self {
        self.report_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Cancels `token` once `count` reports have been accepted.
    pub(crate) fn cancel_after_reports(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after_reports = Some((count, token));
        self
    }

    pub(crate) fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub(crate) fn register_calls(&self) -> u32 {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn reports(&self) -> Vec<AgentHealthReport> {
        self.reports.lock().unwrap().clone()
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn register(&self) -> Result<Option<Uuid>, ControlPlaneError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.register_failures) {
            return Err(ControlPlaneError::Status {
                endpoint: "register",
                status: 503,
            });
        }
        self.log.push("register");
        Ok(self.node_id)
    }

    async fn report_health(&self, report: &AgentHealthReport) -> Result<(), ControlPlaneError> {
        if take_failure(&self.report_failures) {
            return Err(ControlPlaneError::Status {
                endpoint: "health report",
                status: 500,
            });
        }
        self.log.push("report");
        let accepted = {
            let mut reports = self.reports.lock().unwrap();
            reports.push(report.clone());
            reports.len()
        };
        if let Some((count, token)) = &self.cancel_after_reports {
            if accepted >= *count {
                token.cancel();
            }
        }
        Ok(())
    }
}

pub(crate) struct MemoryWireGuard {
    path: PathBuf,
    written: Mutex<Vec<Vec<PeerRecord>>>,
    stats: Mutex<Option<DeviceStats>>,
    log: EventLog,
}

impl MemoryWireGuard {
    pub(crate) fn new() -> Self {
        Self {
            path: PathBuf::from("/tmp/tridot-test/wg0.conf"),
            written: Mutex::new(Vec::new()),
            stats: Mutex::new(None),
            log: EventLog::default(),
        }
    }

    pub(crate) fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.path.clone()
    }

    /// `None` makes `stats()` fail.
    pub(crate) fn set_stats(&self, stats: Option<DeviceStats>) {
        *self.stats.lock().unwrap() = stats;
    }

    pub(crate) fn written(&self) -> Vec<Vec<PeerRecord>> {
        self.written.lock().unwrap().clone()
    }
}

impl WireGuardBackend for MemoryWireGuard {
    fn write_peers(&self, peers: &[PeerRecord]) -> Result<PathBuf, WireGuardError> {
        self.log.push(format!("write:{}", peers.len()));
        self.written.lock().unwrap().push(peers.to_vec());
        Ok(self.path.clone())
    }

    fn stats(&self) -> Result<DeviceStats, WireGuardError> {
        self.stats
            .lock()
            .unwrap()
            .clone()
            .ok_or(WireGuardError::MissingInterfaceName)
    }
}

#[derive(Default)]
pub(crate) struct MemoryStateStore {
    peers: Mutex<Vec<PeerRecord>>,
    drain: AtomicBool,
    fail_save: AtomicBool,
    fail_drain: AtomicBool,
    saves: AtomicU32,
}

impl MemoryStateStore {
    pub(crate) fn with_peers(peers: Vec<PeerRecord>) -> Self {
        let store = Self::default();
        *store.peers.lock().unwrap() = peers;
        store
    }

    pub(crate) fn set_drain(&self, enabled: bool) {
        self.drain.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn fail_saves(&self) {
        self.fail_save.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_drain_reads(&self) {
        self.fail_drain.store(true, Ordering::SeqCst);
    }

    pub(crate) fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub(crate) fn peers(&self) -> Vec<PeerRecord> {
        self.peers.lock().unwrap().clone()
    }
}

fn injected_io(path: &str) -> StateError {
    StateError::Io {
        path: PathBuf::from(path),
        source: std::io::Error::other("injected failure"),
    }
}

impl StateStore for MemoryStateStore {
    fn save_peers(&self, peers: &[PeerRecord]) -> Result<(), StateError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(injected_io("peers.json"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.peers.lock().unwrap() = peers.to_vec();
        Ok(())
    }

    fn load_peers(&self) -> Result<Vec<PeerRecord>, StateError> {
        Ok(self.peers())
    }

    fn drain_enabled(&self) -> Result<bool, StateError> {
        if self.fail_drain.load(Ordering::SeqCst) {
            return Err(injected_io("drain"));
        }
        Ok(self.drain.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub(crate) struct RecordingMetrics {
    updates: Mutex<Vec<DeviceStats>>,
}

impl RecordingMetrics {
    pub(crate) fn updates(&self) -> Vec<DeviceStats> {
        self.updates.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn update(&self, stats: &DeviceStats) {
        self.updates.lock().unwrap().push(stats.clone());
    }
}
