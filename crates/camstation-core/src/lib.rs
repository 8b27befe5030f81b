//! Streaming and connection core for a network-camera client.
//!
//! This crate decides, under a fixed ceiling, which remote video streams
//! are open, fans decoded frames out to consumers without ever blocking a
//! decode loop, and shares one control connection per physical device:
//!
//! - **[`Station`]**: Facade owning everything below. Consumers declare
//!   demand with [`set_demand()`](Station::set_demand), read frames through
//!   [`frames()`](Station::frames), and observe transitions through
//!   [`subscribe()`](Station::subscribe).
//!
//! - **[`ConnectionPool`]**: One device connection per [`DeviceIdentity`],
//!   created single-flight, health-probed while in use, backing off through
//!   Healthy → Degraded → Failed. Callers only ever hold a [`DeviceLease`].
//!
//! - **Stream Manager**: Single-owner actor holding the demand and handle
//!   tables. Admits, evicts (least recently used, unreferenced first) and
//!   queues streams; spawns one worker per open stream.
//!
//! - **[`FrameChannel`]**: Per-stream bounded delivery with drop-oldest
//!   backpressure and per-consumer drop counters.
//!
//! - **Collaborator seams**: [`ControlPlane`], [`CredentialSource`],
//!   [`Decoder`] and [`DeviceRepository`] are injected, so every backoff and
//!   liveness path runs on virtual time in tests.

pub mod backoff;
pub mod channel;
pub mod config;
pub mod control;
pub mod decode;
pub mod error;
mod manager;
pub mod model;
pub mod notifier;
pub mod persistence;
pub mod pool;
mod station;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backoff::BackoffPolicy;
pub use channel::{ChannelCounters, FrameChannel, FrameReceiver};
pub use config::{PoolConfig, StationConfig, StreamConfig};
pub use control::{
    ControlPlane, CredentialSource, IsapiControlPlane, PtzCommand, Session, StaticCredentials,
};
pub use decode::{DecodeEvent, DecodeSession, Decoder, PipelineGuard, StreamSource};
pub use error::CoreError;
pub use manager::{Admission, DemandRequest, StreamInfo, StreamState};
pub use notifier::{CloseReason, EventSubscription, Notifier, StationEvent};
pub use persistence::{DeviceRecords, DeviceRepository, MemoryRepository};
pub use pool::{
    ConnectionPool, ConnectionState, DeviceDemand, DeviceHealth, DeviceLease, FailureCause,
};
pub use station::{Collaborators, Station};
pub use store::Catalog;
pub use stream::CatalogSubscription;

pub use model::{
    Camera, CameraId, CredentialsRef, DEFAULT_RTSP_PORT, Device, DeviceId, DeviceIdentity, Frame,
    Priority, RequesterId, StreamKey, StreamProfile, Transport,
};

// Control-plane types surface through the core API.
pub use camstation_api::{
    ChannelInfo, Credentials, DeviceInfo, DeviceProtocol, TlsMode, TransportConfig,
};
