// ── Manager actor ──
//
// Sole owner of the demand table, the handle table and the failure
// records. Every method here is synchronous: network and decode work
// happens in stream workers, which report back through the same queue.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::worker::StreamWorker;
use super::{
    Admission, DemandRequest, HandleId, ManagerCommand, ManagerContext, StreamInfo, StreamState,
    WorkerReport,
};
use crate::channel::{AccessClock, ChannelCounters, FrameChannel, FrameReceiver};
use crate::decode::StreamSource;
use crate::error::CoreError;
use crate::model::{CameraId, Frame, Priority, RequesterId, StreamKey, StreamProfile};
use crate::notifier::{CloseReason, StationEvent};
use crate::pool::DeviceDemand;

struct DemandEntry {
    profile: StreamProfile,
    priority: Priority,
    visible: bool,
}

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// A stream handle: Pending (no worker yet), Opening, Live or Stalled.
struct HandleEntry {
    id: HandleId,
    key: StreamKey,
    state: StreamState,
    refs: usize,
    priority: Priority,
    channel: FrameChannel,
    access: Arc<AccessClock>,
    worker: Option<WorkerHandle>,
    failures: u32,
    last_error: Option<String>,
    /// Keeps the device's health probe running while the handle exists.
    _device: DeviceDemand,
}

/// A cancelled handle whose worker has not yet confirmed release.
struct ClosingEntry {
    key: StreamKey,
    reason: CloseReason,
    counters: Arc<ChannelCounters>,
    join: JoinHandle<()>,
}

struct FailureRecord {
    reason: CloseReason,
    failures: u32,
    priority: Priority,
    counters: Arc<ChannelCounters>,
}

pub(super) struct ManagerActor {
    ctx: ManagerContext,
    commands: mpsc::UnboundedSender<ManagerCommand>,
    rx: mpsc::UnboundedReceiver<ManagerCommand>,
    status: watch::Sender<Arc<Vec<StreamInfo>>>,
    demands: HashMap<(RequesterId, CameraId), DemandEntry>,
    handles: HashMap<StreamKey, HandleEntry>,
    closing: HashMap<HandleId, ClosingEntry>,
    failed: HashMap<StreamKey, FailureRecord>,
    next_id: HandleId,
    epoch: Instant,
}

impl ManagerActor {
    pub(super) fn new(
        ctx: ManagerContext,
        commands: mpsc::UnboundedSender<ManagerCommand>,
        rx: mpsc::UnboundedReceiver<ManagerCommand>,
        status: watch::Sender<Arc<Vec<StreamInfo>>>,
    ) -> Self {
        Self {
            ctx,
            commands,
            rx,
            status,
            demands: HashMap::new(),
            handles: HashMap::new(),
            closing: HashMap::new(),
            failed: HashMap::new(),
            next_id: 0,
            epoch: Instant::now(),
        }
    }

    pub(super) async fn run(mut self) {
        debug!(ceiling = self.ctx.config.max_streams, "stream manager started");
        loop {
            tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => break,
                command = self.rx.recv() => {
                    let Some(command) = command else { break };
                    self.dispatch(command);
                    self.publish();
                }
            }
        }
        self.shutdown().await;
        debug!("stream manager stopped");
    }

    fn dispatch(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::SetDemand { request, reply } => {
                let _ = reply.send(self.set_demand(request));
            }
            ManagerCommand::ClearDemand {
                requester,
                camera,
                reply,
            } => {
                let _ = reply.send(self.clear_demand(requester, &camera));
            }
            ManagerCommand::Frames {
                camera,
                profile,
                reply,
            } => {
                let _ = reply.send(self.frames(&camera, profile));
            }
            ManagerCommand::LatestFrame { camera, reply } => {
                let _ = reply.send(self.latest_frame(&camera));
            }
            ManagerCommand::ReleaseStream { key, reply } => {
                let _ = reply.send(self.release(&key));
            }
            ManagerCommand::RetryStream { key, reply } => {
                let _ = reply.send(self.retry(&key));
            }
            ManagerCommand::RetryCameras { cameras } => self.retry_cameras(&cameras),
            ManagerCommand::RemoveCameras { cameras, reply } => {
                self.remove_cameras(&cameras);
                let _ = reply.send(());
            }
            ManagerCommand::Report { handle, report } => self.on_report(handle, report),
        }
    }

    // ── Demand ───────────────────────────────────────────────────

    fn set_demand(&mut self, request: DemandRequest) -> Result<Admission, CoreError> {
        self.ctx.catalog.resolve(&request.camera)?;
        let DemandRequest {
            requester,
            camera,
            profile,
            priority,
            visible,
        } = request;
        let key = StreamKey::new(camera.clone(), profile);
        debug!(
            requester = %requester,
            stream = %key,
            priority = %priority,
            visible,
            "demand set"
        );

        let previous = self.demands.insert(
            (requester, camera.clone()),
            DemandEntry {
                profile,
                priority,
                visible,
            },
        );
        // A profile switch is a clear of the old profile plus a new demand.
        if let Some(previous) = previous {
            if previous.profile != profile {
                self.reconcile_quietly(&StreamKey::new(camera, previous.profile));
            }
        }
        self.reconcile(&key)
    }

    fn clear_demand(&mut self, requester: RequesterId, camera: &CameraId) -> bool {
        let Some(previous) = self.demands.remove(&(requester, camera.clone())) else {
            return false;
        };
        debug!(camera = %camera, "demand cleared");
        self.reconcile_quietly(&StreamKey::new(camera.clone(), previous.profile));
        true
    }

    fn refs_for(&self, key: &StreamKey) -> usize {
        self.demands
            .iter()
            .filter(|((_, camera), d)| d.visible && camera == &key.camera && d.profile == key.profile)
            .count()
    }

    fn priority_for(&self, key: &StreamKey) -> Option<Priority> {
        self.demands
            .iter()
            .filter(|((_, camera), d)| camera == &key.camera && d.profile == key.profile)
            .map(|(_, d)| d.priority)
            .max()
    }

    /// Bring the handle for `key` in line with the demand table.
    fn reconcile(&mut self, key: &StreamKey) -> Result<Admission, CoreError> {
        let refs = self.refs_for(key);
        let priority = self.priority_for(key);

        if let Some(entry) = self.handles.get_mut(key) {
            entry.refs = refs;
            if let Some(priority) = priority {
                entry.priority = priority;
            }
            if refs > 0 {
                entry.access.touch();
                return Ok(if entry.state == StreamState::Pending {
                    Admission::Pending
                } else {
                    Admission::Reused
                });
            }
            if entry.state == StreamState::Pending {
                self.close_handle(key, CloseReason::Released);
            } else {
                debug!(stream = %key, "stream evictable");
                self.admit_pending();
            }
            return Ok(Admission::Hidden);
        }

        if refs == 0 {
            if self.failed.remove(key).is_some() {
                debug!(stream = %key, "failure record dropped with last reference");
            }
            return Ok(Admission::Hidden);
        }
        if self.failed.contains_key(key) {
            return Ok(Admission::Failed);
        }

        self.create(key, refs, priority.unwrap_or_default())?;
        self.admit(key)
    }

    fn reconcile_quietly(&mut self, key: &StreamKey) {
        if let Err(e) = self.reconcile(key) {
            warn!(stream = %key, error = %e, "could not update stream demand");
        }
    }

    // ── Admission & eviction ─────────────────────────────────────

    fn create(&mut self, key: &StreamKey, refs: usize, priority: Priority) -> Result<(), CoreError> {
        let (_, device) = self.ctx.catalog.resolve(&key.camera)?;
        let demand = self.ctx.pool.demand(&device.identity)?;
        let access = Arc::new(AccessClock::new(self.epoch));
        self.next_id += 1;
        self.handles.insert(
            key.clone(),
            HandleEntry {
                id: self.next_id,
                key: key.clone(),
                state: StreamState::Pending,
                refs,
                priority,
                channel: FrameChannel::new(self.ctx.config.frame_buffer_depth, Arc::clone(&access)),
                access,
                worker: None,
                failures: 0,
                last_error: None,
                _device: demand,
            },
        );
        Ok(())
    }

    fn active_count(&self) -> usize {
        self.handles
            .values()
            .filter(|h| h.state.occupies_slot())
            .count()
    }

    /// Least recently used handle with no references.
    ///
    /// Ties go to the lower priority, then to the older handle.
    fn eviction_candidate(&self) -> Option<StreamKey> {
        self.handles
            .values()
            .filter(|h| h.refs == 0 && h.state.occupies_slot())
            .min_by_key(|h| (h.access.last(), h.priority, h.id))
            .map(|h| h.key.clone())
    }

    /// Find room for a freshly created Pending handle.
    fn admit(&mut self, key: &StreamKey) -> Result<Admission, CoreError> {
        if self.active_count() < self.ctx.config.max_streams {
            self.start(key)?;
            return Ok(Admission::Opened);
        }
        if let Some(victim) = self.eviction_candidate() {
            info!(evicted = %victim, for_stream = %key, "evicting least recently used stream");
            self.close_handle(&victim, CloseReason::Evicted);
            self.start(key)?;
            return Ok(Admission::OpenedAfterEvicting(victim));
        }
        info!(stream = %key, ceiling = self.ctx.config.max_streams, "stream ceiling reached; queued");
        self.ctx
            .notifier
            .emit(StationEvent::StreamPending { key: key.clone() });
        Ok(Admission::Pending)
    }

    /// Admit queued handles, highest priority first, then oldest.
    fn admit_pending(&mut self) {
        loop {
            let next = self
                .handles
                .values()
                .filter(|h| h.state == StreamState::Pending)
                .min_by_key(|h| (Reverse(h.priority), h.id))
                .map(|h| h.key.clone());
            let Some(key) = next else { break };

            if self.active_count() >= self.ctx.config.max_streams {
                let Some(victim) = self.eviction_candidate() else {
                    break;
                };
                info!(evicted = %victim, for_stream = %key, "evicting for queued stream");
                self.close_handle(&victim, CloseReason::Evicted);
            }
            if let Err(e) = self.start(&key) {
                warn!(stream = %key, error = %e, "queued stream could not start");
            }
        }
    }

    /// Spawn the worker for a Pending handle. On error the handle is gone.
    fn start(&mut self, key: &StreamKey) -> Result<(), CoreError> {
        let source = self.ctx.catalog.resolve(&key.camera).and_then(|(camera, device)| {
            Ok((
                device.identity.clone(),
                camera.source_url(&device, key.profile)?,
            ))
        });
        let (identity, url) = match source {
            Ok(source) => source,
            Err(e) => {
                self.close_handle(key, CloseReason::Removed);
                return Err(e);
            }
        };
        let Some(entry) = self.handles.get_mut(key) else {
            return Err(CoreError::Internal(format!("no handle for {key}")));
        };

        let cancel = self.ctx.cancel.child_token();
        let worker = StreamWorker {
            id: entry.id,
            key: key.clone(),
            identity,
            source: StreamSource {
                url,
                profile: key.profile,
                credentials: None,
            },
            pool: self.ctx.pool.clone(),
            decoder: Arc::clone(&self.ctx.decoder),
            channel: entry.channel.clone(),
            config: self.ctx.config.stream.clone(),
            reports: self.commands.clone(),
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(worker.run());
        entry.worker = Some(WorkerHandle { cancel, join });
        entry.state = StreamState::Opening;
        entry.access.touch();
        info!(stream = %key, "stream opening");
        self.ctx
            .notifier
            .emit(StationEvent::StreamOpening { key: key.clone() });
        Ok(())
    }

    /// Remove a handle, cancel its worker and close its channel.
    ///
    /// `StreamClosed` fires once the worker confirms its pipeline is
    /// released, or at once if there was no worker.
    fn close_handle(&mut self, key: &StreamKey, reason: CloseReason) {
        let Some(entry) = self.handles.remove(key) else {
            return;
        };
        entry.channel.close();
        if reason == CloseReason::Evicted {
            self.ctx
                .notifier
                .emit(StationEvent::StreamEvicted { key: key.clone() });
        }
        match entry.worker {
            Some(worker) => {
                worker.cancel.cancel();
                debug!(stream = %key, reason = %reason, "stream closing");
                self.closing.insert(
                    entry.id,
                    ClosingEntry {
                        key: key.clone(),
                        reason,
                        counters: entry.channel.counters(),
                        join: worker.join,
                    },
                );
            }
            None => {
                debug!(stream = %key, reason = %reason, "queued stream dropped");
                self.ctx.notifier.emit(StationEvent::StreamClosed {
                    key: key.clone(),
                    reason,
                });
            }
        }
    }

    // ── Worker reports ───────────────────────────────────────────

    fn entry_by_id(&mut self, id: HandleId) -> Option<&mut HandleEntry> {
        self.handles.values_mut().find(|h| h.id == id)
    }

    fn on_report(&mut self, id: HandleId, report: WorkerReport) {
        match report {
            WorkerReport::Live => {
                let Some(entry) = self.entry_by_id(id) else {
                    return;
                };
                entry.state = StreamState::Live;
                entry.failures = 0;
                entry.last_error = None;
                let key = entry.key.clone();
                info!(stream = %key, "stream live");
                self.ctx.notifier.emit(StationEvent::StreamLive { key });
            }
            WorkerReport::Stalled { attempt, error } => {
                let Some(entry) = self.entry_by_id(id) else {
                    return;
                };
                entry.state = StreamState::Stalled;
                entry.failures = attempt;
                entry.last_error = Some(error.clone());
                let key = entry.key.clone();
                self.ctx
                    .notifier
                    .emit(StationEvent::StreamStalled { key, attempt, error });
            }
            WorkerReport::Exited(reason) => self.on_exit(id, reason),
        }
    }

    fn on_exit(&mut self, id: HandleId, reason: Option<CloseReason>) {
        if let Some(closing) = self.closing.remove(&id) {
            debug!(stream = %closing.key, reason = %closing.reason, "stream closed");
            self.ctx.notifier.emit(StationEvent::StreamClosed {
                key: closing.key,
                reason: closing.reason,
            });
            return;
        }

        let Some(key) = self.entry_by_id(id).map(|h| h.key.clone()) else {
            return;
        };
        let Some(entry) = self.handles.remove(&key) else {
            return;
        };
        entry.channel.close();
        let reason = reason.unwrap_or(CloseReason::Released);

        if reason.is_error() {
            let failures = match &reason {
                CloseReason::Failed { failures, .. } => *failures,
                _ => entry.failures.max(1),
            };
            error!(stream = %key, reason = %reason, "stream closed with error");
            self.failed.insert(
                key.clone(),
                FailureRecord {
                    reason: reason.clone(),
                    failures,
                    priority: entry.priority,
                    counters: entry.channel.counters(),
                },
            );
        } else {
            info!(stream = %key, reason = %reason, "stream closed");
        }
        self.ctx
            .notifier
            .emit(StationEvent::StreamClosed { key, reason });
        self.admit_pending();
    }

    // ── Consumers ────────────────────────────────────────────────

    /// Profile of the strongest standing demand for `camera`: visible
    /// demands first, then by priority.
    fn demanded_profile(&self, camera: &CameraId) -> Option<StreamProfile> {
        self.demands
            .iter()
            .filter(|((_, c), _)| c == camera)
            .map(|(_, d)| d)
            .max_by_key(|d| (d.visible, d.priority, d.profile == StreamProfile::Sub))
            .map(|d| d.profile)
    }

    fn lookup(&self, camera: &CameraId, profile: Option<StreamProfile>) -> Option<&HandleEntry> {
        let handle = |p| self.handles.get(&StreamKey::new(camera.clone(), p));
        match profile.or_else(|| self.demanded_profile(camera)) {
            Some(profile) => handle(profile),
            None => [StreamProfile::Main, StreamProfile::Sub]
                .into_iter()
                .find_map(handle),
        }
    }

    fn frames(
        &self,
        camera: &CameraId,
        profile: Option<StreamProfile>,
    ) -> Result<FrameReceiver, CoreError> {
        let profile = profile.or_else(|| self.demanded_profile(camera));
        if let Some(entry) = self.lookup(camera, profile) {
            entry.access.touch();
            return Ok(entry.channel.subscribe());
        }
        if let Some(profile) = profile {
            let key = StreamKey::new(camera.clone(), profile);
            if self.failed.contains_key(&key) {
                return Err(CoreError::StreamFailed { key });
            }
        }
        Err(CoreError::NotStreaming {
            camera: camera.clone(),
        })
    }

    fn latest_frame(&self, camera: &CameraId) -> Option<Frame> {
        [StreamProfile::Main, StreamProfile::Sub]
            .into_iter()
            .filter_map(|p| self.handles.get(&StreamKey::new(camera.clone(), p)))
            .filter(|h| h.state == StreamState::Live)
            .find_map(|h| h.channel.latest())
    }

    // ── Manual control ───────────────────────────────────────────

    /// Close an unreferenced handle now instead of waiting for eviction.
    fn release(&mut self, key: &StreamKey) -> bool {
        match self.handles.get(key) {
            Some(entry) if entry.refs == 0 => {
                self.close_handle(key, CloseReason::Released);
                self.admit_pending();
                true
            }
            _ => false,
        }
    }

    fn retry(&mut self, key: &StreamKey) -> Result<Admission, CoreError> {
        if self.failed.remove(key).is_some() {
            info!(stream = %key, "manual stream retry");
        }
        self.reconcile(key)
    }

    fn retry_cameras(&mut self, cameras: &[CameraId]) {
        let keys: Vec<StreamKey> = self
            .failed
            .keys()
            .filter(|k| cameras.contains(&k.camera))
            .cloned()
            .collect();
        for key in keys {
            self.failed.remove(&key);
            self.reconcile_quietly(&key);
        }
    }

    fn remove_cameras(&mut self, cameras: &[CameraId]) {
        self.demands
            .retain(|(_, camera), _| !cameras.contains(camera));
        self.failed.retain(|key, _| !cameras.contains(&key.camera));
        let keys: Vec<StreamKey> = self
            .handles
            .keys()
            .filter(|k| cameras.contains(&k.camera))
            .cloned()
            .collect();
        for key in keys {
            self.close_handle(&key, CloseReason::Removed);
        }
        self.admit_pending();
    }

    // ── Status ───────────────────────────────────────────────────

    fn publish(&self) {
        let mut streams: Vec<StreamInfo> = self
            .handles
            .values()
            .map(|h| StreamInfo {
                key: h.key.clone(),
                state: h.state,
                refs: h.refs,
                priority: h.priority,
                failures: h.failures,
                last_error: h.last_error.clone(),
                counters: h.channel.counters(),
            })
            .collect();
        streams.extend(self.closing.values().map(|c| StreamInfo {
            key: c.key.clone(),
            state: StreamState::Closing,
            refs: 0,
            priority: Priority::default(),
            failures: 0,
            last_error: None,
            counters: Arc::clone(&c.counters),
        }));
        streams.extend(self.failed.iter().map(|(key, f)| StreamInfo {
            key: key.clone(),
            state: StreamState::Failed,
            refs: self.refs_for(key),
            priority: f.priority,
            failures: f.failures,
            last_error: Some(f.reason.to_string()),
            counters: Arc::clone(&f.counters),
        }));
        streams.sort_by(|a, b| a.key.cmp(&b.key));
        self.status.send_replace(Arc::new(streams));
    }

    // ── Shutdown ─────────────────────────────────────────────────

    async fn shutdown(&mut self) {
        let mut finished: Vec<(StreamKey, CloseReason, Option<JoinHandle<()>>)> = Vec::new();
        for (key, entry) in self.handles.drain() {
            entry.channel.close();
            let join = entry.worker.map(|w| {
                w.cancel.cancel();
                w.join
            });
            finished.push((key, CloseReason::Shutdown, join));
        }
        for (_, closing) in self.closing.drain() {
            finished.push((closing.key, closing.reason, Some(closing.join)));
        }
        for (key, reason, join) in finished {
            if let Some(join) = join {
                let _ = join.await;
            }
            self.ctx
                .notifier
                .emit(StationEvent::StreamClosed { key, reason });
        }
        self.demands.clear();
        self.publish();
    }
}
