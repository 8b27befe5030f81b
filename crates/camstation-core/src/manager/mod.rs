// ── Stream Manager ──
//
// Decides which streams are open. All admission, eviction and reference
// counting happens inside a single actor task; callers and stream workers
// talk to it by message only.

mod actor;
mod worker;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use actor::ManagerActor;

use crate::channel::{ChannelCounters, FrameReceiver};
use crate::config::StationConfig;
use crate::decode::{DecodeEvent, Decoder, PipelineGuard, StreamSource};
use crate::error::CoreError;
use crate::model::{CameraId, Frame, Priority, RequesterId, StreamKey, StreamProfile};
use crate::notifier::{CloseReason, Notifier};
use crate::pool::ConnectionPool;
use crate::store::Catalog;

// ── Public types ─────────────────────────────────────────────────

/// Outcome of a demand change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// An existing handle took the reference; nothing was opened.
    Reused,
    Opened,
    /// Opened after closing the least recently used evictable stream.
    OpenedAfterEvicting(StreamKey),
    /// Over the ceiling with nothing evictable; queued.
    Pending,
    /// The demand is recorded but not visible, so it holds no reference.
    Hidden,
    /// The stream closed with an error and waits for a manual retry.
    Failed,
}

impl Admission {
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Reused | Self::Opened | Self::OpenedAfterEvicting(_)
        )
    }
}

/// Lifecycle state of one `(camera, profile)` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamState {
    /// Demanded but waiting for a free slot.
    Pending,
    Opening,
    Live,
    /// No frame within the liveness window; reconnecting.
    Stalled,
    /// Cancelled; the worker is releasing its pipeline.
    Closing,
    /// Closed with an error; needs `retry_stream`.
    Failed,
    /// No handle.
    Idle,
}

impl StreamState {
    /// Whether a handle in this state counts against the stream ceiling.
    pub fn occupies_slot(self) -> bool {
        matches!(self, Self::Opening | Self::Live | Self::Stalled)
    }
}

/// Point-in-time view of one stream handle.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub key: StreamKey,
    pub state: StreamState,
    /// Visible demands holding this stream.
    pub refs: usize,
    pub priority: Priority,
    pub failures: u32,
    pub last_error: Option<String>,
    /// Live delivery counters; keep updating after the snapshot is taken.
    pub counters: Arc<ChannelCounters>,
}

impl StreamInfo {
    pub fn is_evictable(&self) -> bool {
        self.refs == 0 && self.state.occupies_slot()
    }
}

/// One consumer's interest in a camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemandRequest {
    pub requester: RequesterId,
    pub camera: CameraId,
    pub profile: StreamProfile,
    pub priority: Priority,
    pub visible: bool,
}

// ── Commands ─────────────────────────────────────────────────────

pub(crate) type HandleId = u64;

/// Progress reported by a stream worker.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    Live,
    Stalled { attempt: u32, error: String },
    /// The worker has released its pipeline. `None` when it was cancelled.
    Exited(Option<CloseReason>),
}

pub(crate) enum ManagerCommand {
    SetDemand {
        request: DemandRequest,
        reply: oneshot::Sender<Result<Admission, CoreError>>,
    },
    ClearDemand {
        requester: RequesterId,
        camera: CameraId,
        reply: oneshot::Sender<bool>,
    },
    Frames {
        camera: CameraId,
        profile: Option<StreamProfile>,
        reply: oneshot::Sender<Result<FrameReceiver, CoreError>>,
    },
    LatestFrame {
        camera: CameraId,
        reply: oneshot::Sender<Option<Frame>>,
    },
    ReleaseStream {
        key: StreamKey,
        reply: oneshot::Sender<bool>,
    },
    RetryStream {
        key: StreamKey,
        reply: oneshot::Sender<Result<Admission, CoreError>>,
    },
    RetryCameras {
        cameras: Vec<CameraId>,
    },
    RemoveCameras {
        cameras: Vec<CameraId>,
        reply: oneshot::Sender<()>,
    },
    Report {
        handle: HandleId,
        report: WorkerReport,
    },
}

// ── Manager handle ───────────────────────────────────────────────

/// Everything the manager needs from the rest of the station.
#[derive(Clone)]
pub(crate) struct ManagerContext {
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) pool: ConnectionPool,
    pub(crate) decoder: Arc<dyn Decoder>,
    pub(crate) notifier: Notifier,
    pub(crate) config: StationConfig,
    pub(crate) cancel: CancellationToken,
}

/// Cheap front door to the manager actor.
pub(crate) struct StreamManager {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    status: watch::Receiver<Arc<Vec<StreamInfo>>>,
    ctx: ManagerContext,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamManager {
    /// Spawn the actor.
    pub(crate) fn start(ctx: ManagerContext) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Arc::new(Vec::new()));
        let actor = ManagerActor::new(ctx.clone(), commands.clone(), rx, status_tx);
        let task = tokio::spawn(actor.run());
        Self {
            commands,
            status,
            ctx,
            task: Mutex::new(Some(task)),
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| CoreError::ShuttingDown)?;
        rx.await.map_err(|_| CoreError::ShuttingDown)
    }

    pub(crate) async fn set_demand(&self, request: DemandRequest) -> Result<Admission, CoreError> {
        self.request(|reply| ManagerCommand::SetDemand { request, reply })
            .await?
    }

    pub(crate) async fn clear_demand(
        &self,
        requester: RequesterId,
        camera: CameraId,
    ) -> Result<bool, CoreError> {
        self.request(|reply| ManagerCommand::ClearDemand {
            requester,
            camera,
            reply,
        })
        .await
    }

    pub(crate) async fn frames(
        &self,
        camera: CameraId,
        profile: Option<StreamProfile>,
    ) -> Result<FrameReceiver, CoreError> {
        self.request(|reply| ManagerCommand::Frames {
            camera,
            profile,
            reply,
        })
        .await?
    }

    pub(crate) async fn release_stream(&self, key: StreamKey) -> Result<bool, CoreError> {
        self.request(|reply| ManagerCommand::ReleaseStream { key, reply })
            .await
    }

    pub(crate) async fn retry_stream(&self, key: StreamKey) -> Result<Admission, CoreError> {
        self.request(|reply| ManagerCommand::RetryStream { key, reply })
            .await?
    }

    pub(crate) fn retry_cameras(&self, cameras: Vec<CameraId>) {
        let _ = self.commands.send(ManagerCommand::RetryCameras { cameras });
    }

    pub(crate) async fn remove_cameras(&self, cameras: Vec<CameraId>) -> Result<(), CoreError> {
        self.request(|reply| ManagerCommand::RemoveCameras { cameras, reply })
            .await
    }

    // ── Introspection ────────────────────────────────────────────

    pub(crate) fn streams(&self) -> Arc<Vec<StreamInfo>> {
        self.status.borrow().clone()
    }

    pub(crate) fn subscribe_streams(&self) -> watch::Receiver<Arc<Vec<StreamInfo>>> {
        self.status.clone()
    }

    // ── Snapshot ─────────────────────────────────────────────────

    /// One decoded picture from `camera`.
    ///
    /// Reuses a Live stream when there is one. Otherwise opens a transient
    /// main-profile pipeline outside the ceiling and closes it after the
    /// first frame.
    pub(crate) async fn snapshot(&self, camera: CameraId) -> Result<Frame, CoreError> {
        let live = self
            .request(|reply| ManagerCommand::LatestFrame {
                camera: camera.clone(),
                reply,
            })
            .await?;
        if let Some(frame) = live {
            return Ok(frame);
        }

        let (cam, device) = self.ctx.catalog.resolve(&camera)?;
        let profile = StreamProfile::Main;
        let lease = self.ctx.pool.acquire(&device.identity).await?;
        let source = StreamSource {
            url: cam.source_url(&device, profile)?,
            profile,
            credentials: lease.credentials(),
        };
        debug!(camera = %camera, url = %source.url, "opening transient snapshot pipeline");

        let config = &self.ctx.config.stream;
        let session = tokio::time::timeout(config.open_timeout, self.ctx.decoder.open(&source))
            .await
            .map_err(|_| CoreError::timeout(config.open_timeout))??;
        let mut pipeline = PipelineGuard::new(session);
        let event = tokio::time::timeout(config.liveness_timeout, pipeline.next_frame())
            .await
            .map_err(|_| CoreError::StreamStalled {
                timeout_secs: config.liveness_timeout.as_secs(),
            })?;
        match event {
            DecodeEvent::Frame(frame) => Ok(frame),
            DecodeEvent::EndOfStream => Err(CoreError::ConnectFailed {
                target: source.url.to_string(),
                reason: "stream ended before the first frame".into(),
            }),
            DecodeEvent::Error(e) => Err(e),
        }
    }

    /// Stop the actor, closing every handle and waiting for its worker.
    pub(crate) async fn shutdown(&self) {
        self.ctx.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
