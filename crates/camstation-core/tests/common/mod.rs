// Shared fakes for the station integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use camstation_core::{
    BackoffPolicy, Camera, CameraId, ChannelInfo, Collaborators, ControlPlane, CoreError,
    CredentialSource, Credentials, CredentialsRef, DecodeEvent, DecodeSession, Decoder, Device,
    DeviceId, DeviceIdentity, DeviceInfo, DeviceProtocol, DeviceRecords, DeviceRepository,
    EventSubscription, Frame, MemoryRepository, PtzCommand, Session, StaticCredentials, Station,
    StationConfig, StationEvent, StreamInfo, StreamProfile, StreamSource, Transport,
};

pub const FRAME_INTERVAL: Duration = Duration::from_millis(40);

// ── Control plane ────────────────────────────────────────────────

/// Counts calls; authentication fails with the configured error, if any.
#[derive(Default)]
pub struct FakeControlPlane {
    pub authentications: AtomicUsize,
    pub probes: AtomicUsize,
    pub ptz_calls: Mutex<Vec<(u32, PtzCommand)>>,
    pub info_requests: AtomicUsize,
    auth_error: Mutex<Option<CoreError>>,
}

impl FakeControlPlane {
    pub fn rejecting(message: &str) -> Self {
        let plane = Self::default();
        *plane.auth_error.lock().unwrap() = Some(CoreError::AuthFailed {
            message: message.into(),
        });
        plane
    }

    pub fn authentications(&self) -> usize {
        self.authentications.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn authenticate(
        &self,
        _identity: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<Session, CoreError> {
        self.authentications.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Some(e) = self.auth_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(Session::new(credentials.username.clone()))
    }

    async fn probe_health(&self, _identity: &DeviceIdentity) -> Result<(), CoreError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn device_info(&self, _identity: &DeviceIdentity) -> Result<DeviceInfo, CoreError> {
        self.info_requests.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceInfo {
            model: Some("DS-7608NI".into()),
            serial_number: Some("DS-7608NI0120190101".into()),
            firmware_version: Some("V4.30.085".into()),
            ..DeviceInfo::default()
        })
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
        channel: u32,
        command: PtzCommand,
    ) -> Result<(), CoreError> {
        self.ptz_calls.lock().unwrap().push((channel, command));
        Ok(())
    }
}

// ── Decoder ──────────────────────────────────────────────────────

/// What one decode session does.
#[derive(Debug, Clone)]
pub enum Script {
    /// A frame every [`FRAME_INTERVAL`], forever.
    Frames,
    /// `n` frames, then nothing.
    FramesThenSilence(u64),
    /// Never produces a frame.
    Silent,
    /// `n` frames, then an undecodable one.
    DecodeErrorAfter(u64),
    /// `open` itself fails.
    FailOpen(CoreError),
    /// `open` never returns.
    HangOpen,
}

/// Decoder whose sessions follow per-URL scripts.
///
/// Scripts for a URL are consumed in order; the last one repeats. URLs
/// without a script stream frames forever.
#[derive(Default)]
pub struct FakeDecoder {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    opened: Mutex<Vec<StreamSource>>,
    closes: Arc<AtomicUsize>,
}

impl FakeDecoder {
    pub fn script(&self, path: &str, scripts: impl IntoIterator<Item = Script>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(path.to_owned(), scripts.into_iter().collect());
    }

    pub fn opens(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn opens_of(&self, path: &str) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.url.path() == path)
            .count()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> Vec<StreamSource> {
        self.opened.lock().unwrap().clone()
    }

    fn next_script(&self, path: &str) -> Script {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Script::Frames),
            None => Script::Frames,
        }
    }
}

#[async_trait]
impl Decoder for FakeDecoder {
    async fn open(&self, source: &StreamSource) -> Result<Box<dyn DecodeSession>, CoreError> {
        let script = self.next_script(source.url.path());
        if let Script::FailOpen(e) = script {
            return Err(e);
        }
        self.opened.lock().unwrap().push(source.clone());
        if let Script::HangOpen = script {
            std::future::pending::<()>().await;
        }
        Ok(Box::new(FakeSession {
            script,
            sent: 0,
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct FakeSession {
    script: Script,
    sent: u64,
    closes: Arc<AtomicUsize>,
}

impl FakeSession {
    async fn frame(&mut self) -> DecodeEvent {
        tokio::time::sleep(FRAME_INTERVAL).await;
        self.sent += 1;
        DecodeEvent::Frame(Frame {
            image: Bytes::from_static(b"\x00\x01\x02\x03"),
            width: 2,
            height: 2,
            pts: FRAME_INTERVAL * u32::try_from(self.sent).unwrap(),
            sequence: self.sent,
        })
    }
}

#[async_trait]
impl DecodeSession for FakeSession {
    async fn next_frame(&mut self) -> DecodeEvent {
        match self.script {
            Script::Frames => self.frame().await,
            Script::FramesThenSilence(n) if self.sent < n => self.frame().await,
            Script::DecodeErrorAfter(n) if self.sent < n => self.frame().await,
            Script::DecodeErrorAfter(_) => DecodeEvent::Error(CoreError::DecodeError {
                message: "corrupt NAL unit".into(),
            }),
            _ => std::future::pending().await,
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Fixtures ─────────────────────────────────────────────────────

/// An NVR at 10.0.0.5 with cameras `cam1..=cam4` on channels 1-4.
pub fn nvr() -> Device {
    device("nvr", "10.0.0.5", "nvr")
}

pub fn device(id: &str, host: &str, credentials: &str) -> Device {
    Device {
        id: DeviceId::from(id),
        name: id.to_uppercase(),
        identity: DeviceIdentity {
            host: host.into(),
            port: 80,
            transport: Transport::Http,
            protocol: DeviceProtocol::Isapi,
            credentials: CredentialsRef::from(credentials),
        },
        rtsp_port: 554,
    }
}

pub fn camera(id: &str, device: &str, channel: u32) -> Camera {
    Camera {
        id: CameraId::from(id),
        device: DeviceId::from(device),
        channel,
        name: format!("Camera {channel}"),
        preferred_profile: StreamProfile::Sub,
        main_path: None,
        sub_path: None,
    }
}

pub fn records() -> DeviceRecords {
    DeviceRecords {
        devices: vec![nvr()],
        cameras: (1..=4)
            .map(|n| camera(&format!("cam{n}"), "nvr", n))
            .collect(),
    }
}

/// RTSP path of a camera's sub stream in [`records`].
pub fn sub_path(channel: u32) -> String {
    format!("/Streaming/Channels/{channel}02")
}

pub fn main_path(channel: u32) -> String {
    format!("/Streaming/Channels/{channel}01")
}

pub fn cam(n: u32) -> CameraId {
    CameraId::from(format!("cam{n}"))
}

/// Fast, deterministic settings: no jitter, 1s stream backoff base.
pub fn config(max_streams: usize) -> StationConfig {
    let mut config = StationConfig {
        max_streams,
        ..StationConfig::default()
    };
    config.stream.backoff = BackoffPolicy {
        base: Duration::from_secs(1),
        factor: 2.0,
        cap: Duration::from_secs(8),
        jitter: 0.0,
    };
    config.pool.backoff.jitter = 0.0;
    config
}

pub struct Harness {
    pub station: Station,
    pub control: Arc<FakeControlPlane>,
    pub decoder: Arc<FakeDecoder>,
    pub repository: Arc<MemoryRepository>,
}

pub fn credentials() -> StaticCredentials {
    StaticCredentials::new()
        .with("nvr", Credentials::new("admin", "hunter22"))
        .with("cam-b", Credentials::new("viewer", "pw"))
}

pub async fn harness(config: StationConfig) -> Harness {
    harness_with(config, FakeControlPlane::default(), FakeDecoder::default(), records()).await
}

pub async fn harness_with(
    config: StationConfig,
    control: FakeControlPlane,
    decoder: FakeDecoder,
    records: DeviceRecords,
) -> Harness {
    let control = Arc::new(control);
    let decoder = Arc::new(decoder);
    let repository = Arc::new(MemoryRepository::new(records));
    let credentials: Arc<dyn CredentialSource> = Arc::new(credentials());
    let station = Station::start(
        config,
        Collaborators {
            control: Arc::clone(&control) as Arc<dyn ControlPlane>,
            credentials,
            decoder: Arc::clone(&decoder) as Arc<dyn Decoder>,
            repository: Arc::clone(&repository) as Arc<dyn DeviceRepository>,
        },
    )
    .await
    .unwrap();
    Harness {
        station,
        control,
        decoder,
        repository,
    }
}

// ── Waiting ──────────────────────────────────────────────────────

/// Wait (in virtual time) until the stream table satisfies `cond`.
pub async fn wait_streams(station: &Station, cond: impl Fn(&[StreamInfo]) -> bool) {
    let mut rx = station.watch_streams();
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            if cond(&rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("stream table never reached the expected state");
}

/// Wait for the first event matching `pred`, returning it.
pub async fn wait_event(
    events: &mut EventSubscription,
    pred: impl Fn(&StationEvent) -> bool,
) -> StationEvent {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return (*event).clone();
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

/// Drain events that are already queued.
pub fn drain(events: &mut EventSubscription) -> Vec<StationEvent> {
    std::iter::from_fn(|| events.try_recv().map(|e| (*e).clone())).collect()
}
