// ── Device connection ──
//
// One control-plane session per physical device, plus the worker that
// establishes it, probes it while it is in use, and walks the
// Healthy → Degraded → Failed ladder with exponential backoff.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use camstation_api::Credentials;

use super::PoolShared;
use crate::control::Session;
use crate::error::CoreError;
use crate::model::DeviceIdentity;
use crate::notifier::StationEvent;

// ── State ────────────────────────────────────────────────────────

/// Observable state of a device connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Healthy,
    Degraded { consecutive_failures: u32 },
    Failed { cause: FailureCause },
}

/// Why a connection gave up. Both require a manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Unreachable,
    AuthRejected,
}

impl ConnectionState {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded { .. })
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded {
                consecutive_failures,
            } => write!(f, "degraded ({consecutive_failures} failures)"),
            Self::Failed {
                cause: FailureCause::Unreachable,
            } => f.write_str("offline"),
            Self::Failed {
                cause: FailureCause::AuthRejected,
            } => f.write_str("auth rejected"),
        }
    }
}

/// Point-in-time health of a device connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHealth {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Time left until the next backoff retry, when degraded.
    pub retry_in: Option<Duration>,
    pub leases: usize,
    pub demand: usize,
}

#[derive(Debug, Default)]
struct HealthRecord {
    consecutive_failures: u32,
    failures_at_cap: u32,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    backoff_deadline: Option<Instant>,
}

// ── DeviceConnection ─────────────────────────────────────────────

pub(crate) struct DeviceConnection {
    pub(crate) identity: DeviceIdentity,
    pub(crate) state: watch::Sender<ConnectionState>,
    record: Mutex<HealthRecord>,
    pub(crate) session: ArcSwapOption<Session>,
    pub(crate) credentials: ArcSwapOption<Credentials>,
    leases: AtomicUsize,
    demand: AtomicUsize,
    activity: Notify,
    probe_now: Notify,
    retry: Notify,
    /// Serializes every request to the device.
    pub(crate) gate: tokio::sync::Mutex<()>,
    pub(crate) cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceConnection {
    pub(crate) fn new(identity: DeviceIdentity, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            identity,
            state,
            record: Mutex::new(HealthRecord::default()),
            session: ArcSwapOption::empty(),
            credentials: ArcSwapOption::empty(),
            leases: AtomicUsize::new(0),
            demand: AtomicUsize::new(0),
            activity: Notify::new(),
            probe_now: Notify::new(),
            retry: Notify::new(),
            gate: tokio::sync::Mutex::new(()),
            cancel,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn attach_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn record(&self) -> std::sync::MutexGuard<'_, HealthRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    // ── Activity accounting ──────────────────────────────────────

    pub(crate) fn add_lease(&self) {
        if self.leases.fetch_add(1, Ordering::AcqRel) == 0 {
            self.activity.notify_one();
        }
    }

    pub(crate) fn drop_lease(&self) {
        self.leases.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn add_demand(&self) {
        if self.demand.fetch_add(1, Ordering::AcqRel) == 0 {
            self.activity.notify_one();
        }
    }

    pub(crate) fn drop_demand(&self) {
        self.demand.fetch_sub(1, Ordering::AcqRel);
    }

    fn is_active(&self) -> bool {
        self.leases.load(Ordering::Acquire) > 0 || self.demand.load(Ordering::Acquire) > 0
    }

    pub(crate) fn health(&self) -> DeviceHealth {
        let record = self.record();
        DeviceHealth {
            state: self.current_state(),
            consecutive_failures: record.consecutive_failures,
            last_success: record.last_success,
            last_error: record.last_error.clone(),
            retry_in: record
                .backoff_deadline
                .map(|d| d.saturating_duration_since(Instant::now())),
            leases: self.leases.load(Ordering::Acquire),
            demand: self.demand.load(Ordering::Acquire),
        }
    }

    // ── External signals ─────────────────────────────────────────

    /// A request against this device failed outside the probe loop.
    ///
    /// Auth rejection fails the connection at once. Anything else counts
    /// one failure and asks for an immediate probe; only a failed probe
    /// moves the connection to Degraded.
    pub(crate) fn report_failure(&self, shared: &PoolShared, error: &CoreError) {
        if error.is_auth_failure() {
            self.fail_auth(shared, error);
            return;
        }
        {
            let mut record = self.record();
            record.consecutive_failures += 1;
            record.last_error = Some(error.to_string());
        }
        debug!(device = %self.identity, error = %error, "device reported unhealthy");
        self.probe_now.notify_one();
    }

    /// Re-arm a failed connection. Degraded connections retry at once.
    pub(crate) fn retry(&self) -> bool {
        match self.current_state() {
            ConnectionState::Failed { .. } => {
                *self.record() = HealthRecord::default();
                self.session.store(None);
                self.state.send_replace(ConnectionState::Connecting);
                self.retry.notify_one();
                info!(device = %self.identity, "manual retry requested");
                true
            }
            ConnectionState::Degraded { .. } => {
                self.probe_now.notify_one();
                true
            }
            _ => false,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    fn on_success(&self, shared: &PoolShared) {
        let previous = self.current_state();
        if matches!(previous, ConnectionState::Failed { .. }) {
            return;
        }
        {
            let mut record = self.record();
            record.consecutive_failures = 0;
            record.failures_at_cap = 0;
            record.last_success = Some(Utc::now());
            record.last_error = None;
            record.backoff_deadline = None;
        }
        self.state.send_replace(ConnectionState::Healthy);
        if previous != ConnectionState::Healthy {
            info!(device = %self.identity, "device online");
            shared.notifier.emit(StationEvent::DeviceOnline {
                device: self.identity.clone(),
            });
        }
    }

    fn on_failure(&self, shared: &PoolShared, error: &CoreError) {
        if error.is_auth_failure() {
            self.fail_auth(shared, error);
            return;
        }
        let previous = self.current_state();
        if matches!(previous, ConnectionState::Failed { .. }) {
            return;
        }

        let backoff = shared.config.backoff;
        let mut record = self.record();
        record.consecutive_failures += 1;
        record.last_error = Some(error.to_string());
        let failures = record.consecutive_failures;
        if backoff.is_capped(failures) {
            record.failures_at_cap += 1;
        }

        if record.failures_at_cap >= shared.config.failures_at_cap_before_offline {
            record.backoff_deadline = None;
            drop(record);
            self.session.store(None);
            self.state.send_replace(ConnectionState::Failed {
                cause: FailureCause::Unreachable,
            });
            warn!(device = %self.identity, failures, error = %error, "device offline");
            shared.notifier.emit(StationEvent::DeviceOffline {
                device: self.identity.clone(),
                failures,
                last_error: error.to_string(),
            });
            return;
        }

        let delay = backoff.delay(failures);
        record.backoff_deadline = Some(Instant::now() + delay);
        drop(record);

        self.state.send_replace(ConnectionState::Degraded {
            consecutive_failures: failures,
        });
        debug!(
            device = %self.identity,
            attempt = failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "device degraded; backing off"
        );
        if !matches!(previous, ConnectionState::Degraded { .. }) {
            shared.notifier.emit(StationEvent::DeviceDegraded {
                device: self.identity.clone(),
                consecutive_failures: failures,
                retry_in: delay,
            });
        }
    }

    fn fail_auth(&self, shared: &PoolShared, error: &CoreError) {
        if matches!(
            self.current_state(),
            ConnectionState::Failed {
                cause: FailureCause::AuthRejected
            }
        ) {
            return;
        }
        {
            let mut record = self.record();
            record.last_error = Some(error.to_string());
            record.backoff_deadline = None;
        }
        self.session.store(None);
        self.state.send_replace(ConnectionState::Failed {
            cause: FailureCause::AuthRejected,
        });
        warn!(device = %self.identity, error = %error, "device rejected credentials");
        shared.notifier.emit(StationEvent::DeviceAuthFailed {
            device: self.identity.clone(),
            message: error.to_string(),
        });
        self.probe_now.notify_one();
    }

    // ── Network operations ───────────────────────────────────────

    /// Resolve credentials and authenticate.
    async fn establish(&self, shared: &PoolShared) -> Result<(), CoreError> {
        let _gate = self.gate.lock().await;
        let credentials = shared
            .credentials
            .resolve(&self.identity.credentials)
            .await?;
        let timeout = shared.config.connect_timeout;
        let session = tokio::time::timeout(
            timeout,
            shared.control.authenticate(&self.identity, &credentials),
        )
        .await
        .map_err(|_| CoreError::timeout(timeout))??;
        debug!(device = %self.identity, "control session established");
        self.credentials.store(Some(Arc::new(credentials)));
        self.session.store(Some(Arc::new(session)));
        Ok(())
    }

    /// Health probe, re-establishing the session if there is none.
    async fn probe(&self, shared: &PoolShared) -> Result<(), CoreError> {
        if self.session.load().is_none() {
            return self.establish(shared).await;
        }
        let _gate = self.gate.lock().await;
        let timeout = shared.config.request_timeout;
        tokio::time::timeout(timeout, shared.control.probe_health(&self.identity))
            .await
            .map_err(|_| CoreError::timeout(timeout))?
    }

    fn backoff_remaining(&self) -> Duration {
        self.record()
            .backoff_deadline
            .map_or(Duration::ZERO, |d| d.saturating_duration_since(Instant::now()))
    }
}

// ── Worker ───────────────────────────────────────────────────────

/// Per-connection background task. Exits on cancellation only.
pub(crate) async fn connection_worker(conn: Arc<DeviceConnection>, shared: Arc<PoolShared>) {
    debug!(device = %conn.identity, "connection worker started");
    loop {
        let proceed = match conn.current_state() {
            ConnectionState::Connecting => establish_step(&conn, &shared).await,
            ConnectionState::Healthy => {
                probe_step(&conn, &shared, shared.config.probe_interval).await
            }
            ConnectionState::Degraded { .. } => {
                let wait = conn.backoff_remaining();
                probe_step(&conn, &shared, wait).await
            }
            ConnectionState::Failed { .. } => {
                tokio::select! {
                    biased;
                    () = conn.cancel.cancelled() => false,
                    () = conn.retry.notified() => true,
                }
            }
        };
        if !proceed {
            break;
        }
    }
    debug!(device = %conn.identity, "connection worker stopped");
}

async fn establish_step(conn: &DeviceConnection, shared: &PoolShared) -> bool {
    let result = tokio::select! {
        biased;
        () = conn.cancel.cancelled() => return false,
        r = conn.establish(shared) => r,
    };
    match result {
        Ok(()) => conn.on_success(shared),
        Err(e) => conn.on_failure(shared, &e),
    }
    true
}

/// Wait out `wait` (or an explicit probe request), then probe once.
///
/// Suspended entirely while nothing leases or demands the device.
async fn probe_step(conn: &DeviceConnection, shared: &PoolShared, wait: Duration) -> bool {
    while !conn.is_active() {
        tokio::select! {
            biased;
            () = conn.cancel.cancelled() => return false,
            () = conn.activity.notified() => {}
        }
    }

    tokio::select! {
        biased;
        () = conn.cancel.cancelled() => return false,
        () = conn.probe_now.notified() => {}
        () = tokio::time::sleep(wait) => {}
    }

    if !conn.is_active() || !conn.current_state().is_usable() {
        return true;
    }

    let result = tokio::select! {
        biased;
        () = conn.cancel.cancelled() => return false,
        r = conn.probe(shared) => r,
    };
    match result {
        Ok(()) => conn.on_success(shared),
        Err(e) => {
            debug!(device = %conn.identity, error = %e, "health probe failed");
            conn.on_failure(shared, &e);
        }
    }
    true
}
