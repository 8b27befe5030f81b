// ── Station facade ──
//
// The surface the UI layer talks to. Owns the catalog, the Connection
// Pool, the Stream Manager and the notifier, and wires them to the
// injected collaborators.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use camstation_api::{ChannelInfo, DeviceInfo};

use crate::channel::FrameReceiver;
use crate::config::StationConfig;
use crate::control::{ControlPlane, CredentialSource, PtzCommand};
use crate::decode::Decoder;
use crate::error::CoreError;
use crate::manager::{
    Admission, DemandRequest, ManagerContext, StreamInfo, StreamManager, StreamState,
};
use crate::model::{
    Camera, CameraId, Device, DeviceId, Frame, Priority, RequesterId, StreamKey, StreamProfile,
};
use crate::notifier::{EventSubscription, Notifier};
use crate::persistence::{DeviceRecords, DeviceRepository};
use crate::pool::{ConnectionPool, DeviceHealth};
use crate::store::Catalog;
use crate::stream::CatalogSubscription;

/// External capabilities the station depends on.
pub struct Collaborators {
    pub control: Arc<dyn ControlPlane>,
    pub credentials: Arc<dyn CredentialSource>,
    pub decoder: Arc<dyn Decoder>,
    pub repository: Arc<dyn DeviceRepository>,
}

/// Streaming and connection core.
///
/// Cheaply cloneable via `Arc<StationInner>`. Every method is safe to call
/// from a UI task: none of them wait on the network except the explicit
/// control-plane operations (`probe`, `device_info`, `list_channels`,
/// `ptz`) and
/// `snapshot`.
#[derive(Clone)]
pub struct Station {
    inner: Arc<StationInner>,
}

struct StationInner {
    config: StationConfig,
    catalog: Arc<Catalog>,
    pool: ConnectionPool,
    manager: StreamManager,
    notifier: Notifier,
    repository: Arc<dyn DeviceRepository>,
    cancel: CancellationToken,
}

impl Station {
    // ── Lifecycle ────────────────────────────────────────────────

    /// Validate the config, load the device records and start the
    /// manager. Must run inside a tokio runtime.
    pub async fn start(
        config: StationConfig,
        collaborators: Collaborators,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let Collaborators {
            control,
            credentials,
            decoder,
            repository,
        } = collaborators;

        let catalog = Arc::new(Catalog::new());
        let records = repository.load().await?;
        let skipped = catalog.load(records);
        if skipped > 0 {
            warn!(skipped, "some cameras reference unknown devices");
        }

        let cancel = CancellationToken::new();
        let notifier = Notifier::new(config.event_channel_capacity);
        let pool = ConnectionPool::new(
            config.pool.clone(),
            control,
            credentials,
            notifier.clone(),
            cancel.child_token(),
        );
        let manager = StreamManager::start(ManagerContext {
            catalog: Arc::clone(&catalog),
            pool: pool.clone(),
            decoder,
            notifier: notifier.clone(),
            config: config.clone(),
            cancel: cancel.child_token(),
        });

        info!(
            devices = catalog.devices().len(),
            cameras = catalog.cameras().len(),
            ceiling = config.max_streams,
            "station started"
        );
        Ok(Self {
            inner: Arc::new(StationInner {
                config,
                catalog,
                pool,
                manager,
                notifier,
                repository,
                cancel,
            }),
        })
    }

    /// Close every stream and connection, waiting for workers to exit.
    pub async fn shutdown(&self) {
        self.inner.manager.shutdown().await;
        self.inner.pool.shutdown().await;
        self.inner.cancel.cancel();
        info!("station stopped");
    }

    pub fn config(&self) -> &StationConfig {
        &self.inner.config
    }

    // ── Demand ───────────────────────────────────────────────────

    /// Declare that `camera` is wanted at `profile` by the default requester.
    pub async fn set_demand(
        &self,
        camera: &CameraId,
        profile: StreamProfile,
        priority: Priority,
        visible: bool,
    ) -> Result<Admission, CoreError> {
        self.set_demand_for(DemandRequest {
            requester: RequesterId::default(),
            camera: camera.clone(),
            profile,
            priority,
            visible,
        })
        .await
    }

    /// Declare demand on behalf of a specific requester.
    ///
    /// Each `(requester, camera)` pair holds at most one reference; a
    /// repeated call updates it instead of adding another.
    pub async fn set_demand_for(&self, request: DemandRequest) -> Result<Admission, CoreError> {
        self.inner.manager.set_demand(request).await
    }

    /// Drop the default requester's demand. The stream stays open until
    /// evicted or released.
    pub async fn clear_demand(&self, camera: &CameraId) -> Result<bool, CoreError> {
        self.clear_demand_for(RequesterId::default(), camera).await
    }

    pub async fn clear_demand_for(
        &self,
        requester: RequesterId,
        camera: &CameraId,
    ) -> Result<bool, CoreError> {
        self.inner
            .manager
            .clear_demand(requester, camera.clone())
            .await
    }

    // ── Frames ───────────────────────────────────────────────────

    /// Attach a consumer to the stream of the camera's standing demand.
    ///
    /// A visible demand beats a hidden one, then higher priority wins. With
    /// no demand at all, any open stream of the camera is used, main first.
    pub async fn frames(&self, camera: &CameraId) -> Result<FrameReceiver, CoreError> {
        self.inner.manager.frames(camera.clone(), None).await
    }

    pub async fn frames_for(
        &self,
        camera: &CameraId,
        profile: StreamProfile,
    ) -> Result<FrameReceiver, CoreError> {
        self.inner.manager.frames(camera.clone(), Some(profile)).await
    }

    /// One picture from the camera, without touching the stream ceiling.
    pub async fn snapshot(&self, camera: &CameraId) -> Result<Frame, CoreError> {
        self.inner.manager.snapshot(camera.clone()).await
    }

    // ── Stream control & introspection ───────────────────────────

    /// Close an unreferenced stream now. Returns `false` if it is still
    /// referenced or not open.
    pub async fn release_stream(
        &self,
        camera: &CameraId,
        profile: StreamProfile,
    ) -> Result<bool, CoreError> {
        self.inner
            .manager
            .release_stream(StreamKey::new(camera.clone(), profile))
            .await
    }

    /// Clear a failed stream's record and re-admit its demand.
    pub async fn retry_stream(
        &self,
        camera: &CameraId,
        profile: StreamProfile,
    ) -> Result<Admission, CoreError> {
        self.inner
            .manager
            .retry_stream(StreamKey::new(camera.clone(), profile))
            .await
    }

    pub fn stream_status(&self, camera: &CameraId, profile: StreamProfile) -> StreamState {
        let key = StreamKey::new(camera.clone(), profile);
        self.inner
            .manager
            .streams()
            .iter()
            .filter(|s| s.key == key)
            .map(|s| s.state)
            .min_by_key(|state| *state == StreamState::Closing)
            .unwrap_or(StreamState::Idle)
    }

    pub fn streams(&self) -> Arc<Vec<StreamInfo>> {
        self.inner.manager.streams()
    }

    /// Receiver that changes on every stream transition.
    pub fn watch_streams(&self) -> watch::Receiver<Arc<Vec<StreamInfo>>> {
        self.inner.manager.subscribe_streams()
    }

    /// Streams currently counted against the ceiling.
    pub fn active_stream_count(&self) -> usize {
        self.streams()
            .iter()
            .filter(|s| s.state.occupies_slot())
            .count()
    }

    // ── Devices & health ─────────────────────────────────────────

    /// Connection health, or `None` if nothing has used the device yet.
    pub fn health_status(&self, device: &DeviceId) -> Result<Option<DeviceHealth>, CoreError> {
        let device = self.device(device)?;
        Ok(self.inner.pool.health_status(&device.identity))
    }

    /// Subscribe to device and stream state changes.
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.notifier.subscribe()
    }

    /// Re-arm a failed device connection and the streams it took down.
    pub fn retry_device(&self, device: &DeviceId) -> Result<bool, CoreError> {
        let device = self.device(device)?;
        let retried = self.inner.pool.retry(&device.identity);
        let cameras = self
            .inner
            .catalog
            .cameras_for(&device.id)
            .iter()
            .map(|c| c.id.clone())
            .collect();
        self.inner.manager.retry_cameras(cameras);
        Ok(retried)
    }

    /// Authenticate (if needed) and run one health probe now.
    pub async fn probe(&self, device: &DeviceId) -> Result<DeviceHealth, CoreError> {
        let device = self.device(device)?;
        let lease = self.inner.pool.acquire(&device.identity).await?;
        lease.probe().await?;
        self.inner
            .pool
            .health_status(&device.identity)
            .ok_or_else(|| CoreError::Internal(format!("no connection for {}", device.id)))
    }

    /// Model, serial and firmware reported by the device.
    pub async fn device_info(&self, device: &DeviceId) -> Result<DeviceInfo, CoreError> {
        let device = self.device(device)?;
        let lease = self.inner.pool.acquire(&device.identity).await?;
        lease.device_info().await
    }

    pub async fn list_channels(&self, device: &DeviceId) -> Result<Vec<ChannelInfo>, CoreError> {
        let device = self.device(device)?;
        let lease = self.inner.pool.acquire(&device.identity).await?;
        lease.list_channels().await
    }

    pub async fn ptz(&self, camera: &CameraId, command: PtzCommand) -> Result<(), CoreError> {
        let (camera, device) = self.inner.catalog.resolve(camera)?;
        let lease = self.inner.pool.acquire(&device.identity).await?;
        lease.ptz(camera.channel, command).await
    }

    // ── Catalog ──────────────────────────────────────────────────

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn devices(&self) -> CatalogSubscription<Device> {
        self.inner.catalog.subscribe_devices()
    }

    pub fn cameras(&self) -> CatalogSubscription<Camera> {
        self.inner.catalog.subscribe_cameras()
    }

    fn device(&self, id: &DeviceId) -> Result<Arc<Device>, CoreError> {
        self.inner
            .catalog
            .device(id)
            .ok_or_else(|| CoreError::UnknownDevice(id.clone()))
    }

    /// Register or update a device.
    ///
    /// Changing an existing device's identity closes its streams and
    /// drops the old connection.
    pub async fn add_device(&self, device: Device) -> Result<(), CoreError> {
        self.inner.repository.save_device(&device).await?;
        if let Some(previous) = self.inner.catalog.device(&device.id) {
            if previous.identity != device.identity {
                debug!(device = %device.id, "device identity changed");
                let cameras = self
                    .inner
                    .catalog
                    .cameras_for(&previous.id)
                    .iter()
                    .map(|c| c.id.clone())
                    .collect();
                self.detach(&previous, cameras).await?;
            }
        }
        info!(device = %device.id, address = %device.identity, "device added");
        self.inner.catalog.upsert_device(device);
        Ok(())
    }

    /// Remove a device, its cameras, their streams and its connection.
    pub async fn remove_device(&self, id: &DeviceId) -> Result<bool, CoreError> {
        self.inner.repository.remove_device(id).await?;
        let Some((device, cameras)) = self.inner.catalog.remove_device(id) else {
            return Ok(false);
        };
        self.detach(&device, cameras.iter().map(|c| c.id.clone()).collect())
            .await?;
        info!(device = %id, "device removed");
        Ok(true)
    }

    /// Close a device's streams and drop its connection unless another
    /// device shares the identity.
    async fn detach(&self, device: &Device, cameras: Vec<CameraId>) -> Result<(), CoreError> {
        self.inner.manager.remove_cameras(cameras).await?;
        let shared = self
            .inner
            .catalog
            .devices()
            .iter()
            .any(|d| d.id != device.id && d.identity == device.identity);
        if !shared {
            self.inner.pool.remove(&device.identity);
        }
        Ok(())
    }

    pub async fn add_camera(&self, camera: Camera) -> Result<(), CoreError> {
        if self.inner.catalog.device(&camera.device).is_none() {
            return Err(CoreError::UnknownDevice(camera.device));
        }
        self.inner.repository.save_camera(&camera).await?;
        info!(camera = %camera.id, device = %camera.device, channel = camera.channel, "camera added");
        self.inner.catalog.upsert_camera(camera)?;
        Ok(())
    }

    pub async fn remove_camera(&self, id: &CameraId) -> Result<bool, CoreError> {
        self.inner.repository.remove_camera(id).await?;
        self.inner.manager.remove_cameras(vec![id.clone()]).await?;
        Ok(self.inner.catalog.remove_camera(id).is_some())
    }

    /// Re-read the repository, closing streams of cameras that are gone.
    pub async fn reload(&self) -> Result<DeviceRecords, CoreError> {
        let records = self.inner.repository.load().await?;
        let before: Vec<CameraId> = self
            .inner
            .catalog
            .cameras()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        self.inner.catalog.load(records.clone());
        let gone: Vec<CameraId> = before
            .into_iter()
            .filter(|id| self.inner.catalog.camera(id).is_none())
            .collect();
        if !gone.is_empty() {
            self.inner.manager.remove_cameras(gone).await?;
        }
        Ok(records)
    }
}
