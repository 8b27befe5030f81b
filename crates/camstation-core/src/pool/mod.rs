// ── Connection Pool ──
//
// Registry of device connections keyed by `DeviceIdentity`. Exactly one
// connection exists per identity and it owns its worker's handle; callers
// only ever see scoped leases.

mod connection;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use camstation_api::{ChannelInfo, Credentials, DeviceInfo};

pub use connection::{ConnectionState, DeviceHealth, FailureCause};

use connection::{DeviceConnection, connection_worker};

use crate::config::PoolConfig;
use crate::control::{ControlPlane, CredentialSource, PtzCommand, Session};
use crate::error::CoreError;
use crate::model::DeviceIdentity;
use crate::notifier::Notifier;

/// Collaborators and tuning shared by every connection worker.
pub(crate) struct PoolShared {
    pub(crate) config: PoolConfig,
    pub(crate) control: Arc<dyn ControlPlane>,
    pub(crate) credentials: Arc<dyn CredentialSource>,
    pub(crate) notifier: Notifier,
}

/// One control connection per physical device.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    shared: Arc<PoolShared>,
    connections: DashMap<DeviceIdentity, Arc<DeviceConnection>>,
    created: AtomicUsize,
    cancel: CancellationToken,
}

impl ConnectionPool {
    pub fn new(
        config: PoolConfig,
        control: Arc<dyn ControlPlane>,
        credentials: Arc<dyn CredentialSource>,
        notifier: Notifier,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                shared: Arc::new(PoolShared {
                    config,
                    control,
                    credentials,
                    notifier,
                }),
                connections: DashMap::new(),
                created: AtomicUsize::new(0),
                cancel,
            }),
        }
    }

    /// Get or create the connection for `identity`.
    ///
    /// The map entry is locked while the connection is created, so
    /// concurrent callers for a new identity all get the same one.
    fn connection(&self, identity: &DeviceIdentity) -> Result<Arc<DeviceConnection>, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        if let Some(existing) = self.inner.connections.get(identity) {
            return Ok(Arc::clone(existing.value()));
        }
        let entry = self
            .inner
            .connections
            .entry(identity.clone())
            .or_insert_with(|| {
                let conn = Arc::new(DeviceConnection::new(
                    identity.clone(),
                    self.inner.cancel.child_token(),
                ));
                self.inner.created.fetch_add(1, Ordering::AcqRel);
                conn.attach_worker(tokio::spawn(connection_worker(
                    Arc::clone(&conn),
                    Arc::clone(&self.inner.shared),
                )));
                info!(device = %identity, "device connection created");
                conn
            });
        Ok(Arc::clone(entry.value()))
    }

    // ── Leases ───────────────────────────────────────────────────

    /// Lease the device's connection, waiting while it is still connecting.
    ///
    /// Fails fast with `AuthFailed` or `DeviceUnreachable` when the
    /// connection has given up.
    pub async fn acquire(&self, identity: &DeviceIdentity) -> Result<DeviceLease, CoreError> {
        let conn = self.connection(identity)?;
        conn.add_lease();
        let lease = DeviceLease {
            conn: Arc::clone(&conn),
            shared: Arc::clone(&self.inner.shared),
        };

        let mut rx = conn.state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                ConnectionState::Healthy | ConnectionState::Degraded { .. } => return Ok(lease),
                ConnectionState::Failed {
                    cause: FailureCause::AuthRejected,
                } => {
                    return Err(CoreError::AuthFailed {
                        message: conn
                            .health()
                            .last_error
                            .unwrap_or_else(|| format!("{identity} rejected credentials")),
                    });
                }
                ConnectionState::Failed {
                    cause: FailureCause::Unreachable,
                } => {
                    let health = conn.health();
                    return Err(CoreError::DeviceUnreachable {
                        failures: health.consecutive_failures,
                        last_error: health.last_error.unwrap_or_default(),
                    });
                }
                ConnectionState::Connecting => {
                    tokio::select! {
                        biased;
                        () = conn.cancel.cancelled() => return Err(CoreError::ShuttingDown),
                        changed = rx.changed() => {
                            changed.map_err(|_| CoreError::ShuttingDown)?;
                        }
                    }
                }
            }
        }
    }

    /// Return a lease. Equivalent to dropping it.
    #[allow(clippy::unused_self)]
    pub fn release(&self, lease: DeviceLease) {
        drop(lease);
    }

    /// Register standing demand for a device's cameras.
    ///
    /// Creates the connection if needed and keeps health probing active
    /// until the guard is dropped.
    pub fn demand(&self, identity: &DeviceIdentity) -> Result<DeviceDemand, CoreError> {
        let conn = self.connection(identity)?;
        conn.add_demand();
        Ok(DeviceDemand { conn })
    }

    // ── Health ───────────────────────────────────────────────────

    /// Report a failure seen outside the probe loop.
    pub fn mark_unhealthy(&self, identity: &DeviceIdentity, error: &CoreError) {
        if let Some(conn) = self.inner.connections.get(identity) {
            conn.report_failure(&self.inner.shared, error);
        }
    }

    pub fn health_status(&self, identity: &DeviceIdentity) -> Option<DeviceHealth> {
        self.inner.connections.get(identity).map(|c| c.health())
    }

    /// Re-arm a Failed connection or hurry a Degraded one.
    ///
    /// Returns `false` if there was nothing to retry.
    pub fn retry(&self, identity: &DeviceIdentity) -> bool {
        self.inner
            .connections
            .get(identity)
            .is_some_and(|c| c.retry())
    }

    /// Tear down a device's connection. Outstanding leases stay valid
    /// but the worker stops and is no longer tracked.
    pub fn remove(&self, identity: &DeviceIdentity) -> bool {
        match self.inner.connections.remove(identity) {
            Some((_, conn)) => {
                conn.cancel.cancel();
                drop(conn.take_worker());
                info!(device = %identity, "device connection removed");
                true
            }
            None => false,
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Connections created over the pool's lifetime.
    pub fn connections_created(&self) -> usize {
        self.inner.created.load(Ordering::Acquire)
    }

    /// Cancel every worker and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let workers: Vec<_> = self
            .inner
            .connections
            .iter()
            .filter_map(|c| c.take_worker())
            .collect();
        for worker in workers {
            let _ = worker.await;
        }
        self.inner.connections.clear();
        debug!("connection pool shut down");
    }
}

// ── Lease ────────────────────────────────────────────────────────

/// Scoped access to a device connection.
///
/// Requests through a lease are serialized per device and bounded by the
/// request timeout. Dropping the lease releases it.
pub struct DeviceLease {
    conn: Arc<DeviceConnection>,
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for DeviceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLease")
            .field("device", &self.conn.identity)
            .finish_non_exhaustive()
    }
}

impl DeviceLease {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.conn.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.current_state()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.conn.session.load_full()
    }

    /// Credentials resolved when the session was established.
    pub fn credentials(&self) -> Option<Credentials> {
        self.conn.credentials.load_full().map(|c| (*c).clone())
    }

    pub async fn probe(&self) -> Result<(), CoreError> {
        let result = {
            let _gate = self.conn.gate.lock().await;
            with_timeout(
                self.shared.config.request_timeout,
                self.shared.control.probe_health(&self.conn.identity),
            )
            .await
        };
        self.observe(result)
    }

    pub async fn device_info(&self) -> Result<DeviceInfo, CoreError> {
        let result = {
            let _gate = self.conn.gate.lock().await;
            with_timeout(
                self.shared.config.request_timeout,
                self.shared.control.device_info(&self.conn.identity),
            )
            .await
        };
        self.observe(result)
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelInfo>, CoreError> {
        let result = {
            let _gate = self.conn.gate.lock().await;
            with_timeout(
                self.shared.config.request_timeout,
                self.shared.control.list_channels(&self.conn.identity),
            )
            .await
        };
        self.observe(result)
    }

    pub async fn ptz(&self, channel: u32, command: PtzCommand) -> Result<(), CoreError> {
        let result = {
            let _gate = self.conn.gate.lock().await;
            with_timeout(
                self.shared.config.request_timeout,
                self.shared
                    .control
                    .ptz_command(&self.conn.identity, channel, command),
            )
            .await
        };
        self.observe(result)
    }

    fn observe<T>(&self, result: Result<T, CoreError>) -> Result<T, CoreError> {
        if let Err(e) = &result {
            if e.is_retryable() || e.is_auth_failure() {
                self.conn.report_failure(&self.shared, e);
            }
        }
        result
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.conn.drop_lease();
    }
}

/// Standing demand on a device, held by the stream manager per handle.
pub struct DeviceDemand {
    conn: Arc<DeviceConnection>,
}

impl std::fmt::Debug for DeviceDemand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDemand")
            .field("device", &self.conn.identity)
            .finish()
    }
}

impl Drop for DeviceDemand {
    fn drop(&mut self) {
        self.conn.drop_demand();
    }
}

async fn with_timeout<T>(
    duration: std::time::Duration,
    fut: impl Future<Output = Result<T, CoreError>>,
) -> Result<T, CoreError> {
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| CoreError::timeout(duration))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use camstation_api::DeviceProtocol;

    use crate::backoff::BackoffPolicy;
    use crate::control::StaticCredentials;
    use crate::model::{CredentialsRef, Transport};
    use crate::notifier::StationEvent;

    #[derive(Default)]
    struct ScriptedPlane {
        authenticates: AtomicUsize,
        probes: AtomicUsize,
        auth_error: Mutex<Option<CoreError>>,
        probe_error: Mutex<Option<CoreError>>,
    }

    impl ScriptedPlane {
        fn failing_auth(error: CoreError) -> Self {
            Self {
                auth_error: Mutex::new(Some(error)),
                ..Self::default()
            }
        }

        fn set_probe_error(&self, error: Option<CoreError>) {
            *self.probe_error.lock().unwrap() = error;
        }
    }

    #[async_trait]
    impl ControlPlane for ScriptedPlane {
        async fn authenticate(
            &self,
            _identity: &DeviceIdentity,
            _credentials: &Credentials,
        ) -> Result<Session, CoreError> {
            self.authenticates.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            match self.auth_error.lock().unwrap().clone() {
                Some(e) => Err(e),
                None => Ok(Session::new("token")),
            }
        }

        async fn probe_health(&self, _identity: &DeviceIdentity) -> Result<(), CoreError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            match self.probe_error.lock().unwrap().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn device_info(&self, _identity: &DeviceIdentity) -> Result<DeviceInfo, CoreError> {
            Ok(DeviceInfo::default())
        }

        async fn list_channels(
            &self,
            _identity: &DeviceIdentity,
        ) -> Result<Vec<ChannelInfo>, CoreError> {
            Ok(Vec::new())
        }

        async fn ptz_command(
            &self,
            _identity: &DeviceIdentity,
            _channel: u32,
            _command: PtzCommand,
        ) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            host: "10.0.0.5".into(),
            port: 80,
            transport: Transport::Http,
            protocol: DeviceProtocol::Isapi,
            credentials: CredentialsRef::from("nvr"),
        }
    }

    fn pool_with(plane: Arc<ScriptedPlane>, config: PoolConfig) -> (ConnectionPool, Notifier) {
        let notifier = Notifier::new(64);
        let credentials =
            StaticCredentials::new().with("nvr", Credentials::new("admin", "hunter22"));
        let pool = ConnectionPool::new(
            config,
            plane,
            Arc::new(credentials),
            notifier.clone(),
            CancellationToken::new(),
        );
        (pool, notifier)
    }

    fn connect_failed() -> CoreError {
        CoreError::ConnectFailed {
            target: "10.0.0.5:80".into(),
            reason: "connection refused".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_share_one_connection() {
        let plane = Arc::new(ScriptedPlane::default());
        let (pool, _) = pool_with(Arc::clone(&plane), PoolConfig::default());
        let id = identity();

        let leases =
            futures_util::future::join_all((0..16).map(|_| pool.acquire(&id))).await;

        assert!(leases.iter().all(Result::is_ok));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.connections_created(), 1);
        assert_eq!(plane.authenticates.load(Ordering::SeqCst), 1);
        assert_eq!(pool.health_status(&id).unwrap().leases, 16);

        drop(leases);
        assert_eq!(pool.health_status(&id).unwrap().leases, 0);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credentials_are_never_retried_automatically() {
        let plane = Arc::new(ScriptedPlane::failing_auth(CoreError::AuthFailed {
            message: "401 Unauthorized".into(),
        }));
        let (pool, notifier) = pool_with(Arc::clone(&plane), PoolConfig::default());
        let mut events = notifier.subscribe();
        let id = identity();

        let err = pool.acquire(&id).await.unwrap_err();
        assert!(err.is_auth_failure());
        assert!(matches!(
            *events.recv().await.unwrap(),
            StationEvent::DeviceAuthFailed { .. }
        ));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(plane.authenticates.load(Ordering::SeqCst), 1);

        *plane.auth_error.lock().unwrap() = None;
        assert!(pool.retry(&id));
        pool.acquire(&id).await.unwrap();
        assert_eq!(plane.authenticates.load(Ordering::SeqCst), 2);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_device_backs_off_then_goes_offline() {
        let plane = Arc::new(ScriptedPlane::failing_auth(connect_failed()));
        let config = PoolConfig {
            backoff: BackoffPolicy {
                base: Duration::from_secs(1),
                factor: 2.0,
                cap: Duration::from_secs(4),
                jitter: 0.0,
            },
            failures_at_cap_before_offline: 2,
            ..PoolConfig::default()
        };
        let (pool, notifier) = pool_with(Arc::clone(&plane), config);
        let mut events = notifier.subscribe();
        let id = identity();
        let _demand = pool.demand(&id).unwrap();
        let started = tokio::time::Instant::now();

        match &*events.recv().await.unwrap() {
            StationEvent::DeviceDegraded {
                consecutive_failures,
                retry_in,
                ..
            } => {
                assert_eq!(*consecutive_failures, 1);
                assert_eq!(*retry_in, Duration::from_secs(1));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &*events.recv().await.unwrap() {
            StationEvent::DeviceOffline { failures, .. } => assert_eq!(*failures, 4),
            other => panic!("unexpected event {other:?}"),
        }

        // 1s + 2s + 4s of backoff between the four attempts.
        assert!(started.elapsed() >= Duration::from_secs(7));
        assert_eq!(plane.authenticates.load(Ordering::SeqCst), 4);

        let err = pool.acquire(&id).await.unwrap_err();
        assert!(matches!(err, CoreError::DeviceUnreachable { failures: 4, .. }));
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn probes_run_only_while_device_is_in_use() {
        let plane = Arc::new(ScriptedPlane::default());
        let (pool, _) = pool_with(Arc::clone(&plane), PoolConfig::default());
        let id = identity();

        drop(pool.acquire(&id).await.unwrap());
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(plane.probes.load(Ordering::SeqCst), 0);

        let demand = pool.demand(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(plane.probes.load(Ordering::SeqCst), 1);

        drop(demand);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(plane.probes.load(Ordering::SeqCst) <= 2);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reported_failure_degrades_only_if_probe_fails() {
        let plane = Arc::new(ScriptedPlane::default());
        let (pool, notifier) = pool_with(Arc::clone(&plane), PoolConfig::default());
        let mut events = notifier.subscribe();
        let id = identity();
        let lease = pool.acquire(&id).await.unwrap();
        assert!(matches!(
            *events.recv().await.unwrap(),
            StationEvent::DeviceOnline { .. }
        ));

        // Probe succeeds: the timeout alone does not degrade the device.
        pool.mark_unhealthy(&id, &CoreError::Timeout { timeout_secs: 10 });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(lease.state(), ConnectionState::Healthy);

        plane.set_probe_error(Some(connect_failed()));
        pool.mark_unhealthy(&id, &CoreError::Timeout { timeout_secs: 10 });
        assert!(matches!(
            *events.recv().await.unwrap(),
            StationEvent::DeviceDegraded { .. }
        ));

        plane.set_probe_error(None);
        assert!(matches!(
            *events.recv().await.unwrap(),
            StationEvent::DeviceOnline { .. }
        ));
        let health = pool.health_status(&id).unwrap();
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_success.is_some());
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn removed_device_gets_a_fresh_connection() {
        let plane = Arc::new(ScriptedPlane::default());
        let (pool, _) = pool_with(Arc::clone(&plane), PoolConfig::default());
        let id = identity();

        drop(pool.acquire(&id).await.unwrap());
        assert!(pool.remove(&id));
        assert!(pool.is_empty());

        drop(pool.acquire(&id).await.unwrap());
        assert_eq!(pool.connections_created(), 2);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_device_lets_its_worker_go() {
        let plane = Arc::new(ScriptedPlane::default());
        let (pool, _) = pool_with(Arc::clone(&plane), PoolConfig::default());
        let id = identity();

        let mut retired = Vec::new();
        for _ in 0..20 {
            drop(pool.acquire(&id).await.unwrap());
            let conn = Arc::clone(pool.inner.connections.get(&id).unwrap().value());
            retired.push(Arc::downgrade(&conn));
            drop(conn);
            assert!(pool.remove(&id));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(pool.connections_created(), 20);
        assert!(pool.is_empty());
        assert!(retired.iter().all(|w| w.upgrade().is_none()));

        drop(pool.acquire(&id).await.unwrap());
        let live = Arc::downgrade(pool.inner.connections.get(&id).unwrap().value());
        pool.shutdown().await;
        assert!(live.upgrade().is_none());
    }
}
