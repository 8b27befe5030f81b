// ── State-change notifications ──
//
// Fan-out of device and stream transitions to any number of observers.
// Emitting never blocks: a slow observer lags and skips, it never holds
// up a worker.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

use crate::model::{DeviceIdentity, StreamKey};

/// Why a stream handle was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Demand went away and the handle was released.
    Released,
    /// Reclaimed to make room for another stream.
    Evicted,
    /// Reconnect budget exhausted.
    Failed { failures: u32, last_error: String },
    /// The pipeline reported corrupt data.
    DecodeError { message: String },
    /// Device or stream credentials were rejected.
    AuthFailed { message: String },
    /// The owning device is offline.
    DeviceUnreachable { failures: u32, last_error: String },
    /// The camera or its device was removed from the catalog.
    Removed,
    Shutdown,
}

impl CloseReason {
    /// Whether the close is a failure the user should see.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Failed { .. }
                | Self::DecodeError { .. }
                | Self::AuthFailed { .. }
                | Self::DeviceUnreachable { .. }
        )
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Released => f.write_str("released"),
            Self::Evicted => f.write_str("evicted"),
            Self::Failed {
                failures,
                last_error,
            } => write!(f, "failed after {failures} attempts: {last_error}"),
            Self::DecodeError { message } => write!(f, "decode error: {message}"),
            Self::AuthFailed { message } => write!(f, "authentication failed: {message}"),
            Self::DeviceUnreachable {
                failures,
                last_error,
            } => write!(f, "device unreachable ({failures} failures): {last_error}"),
            Self::Removed => f.write_str("removed"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// A device or stream state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationEvent {
    DeviceOnline {
        device: DeviceIdentity,
    },
    DeviceDegraded {
        device: DeviceIdentity,
        consecutive_failures: u32,
        retry_in: Duration,
    },
    DeviceOffline {
        device: DeviceIdentity,
        failures: u32,
        last_error: String,
    },
    DeviceAuthFailed {
        device: DeviceIdentity,
        message: String,
    },
    /// Demand could not be admitted under the ceiling; queued.
    StreamPending {
        key: StreamKey,
    },
    StreamOpening {
        key: StreamKey,
    },
    StreamLive {
        key: StreamKey,
    },
    StreamStalled {
        key: StreamKey,
        attempt: u32,
        error: String,
    },
    StreamEvicted {
        key: StreamKey,
    },
    StreamClosed {
        key: StreamKey,
        reason: CloseReason,
    },
}

impl StationEvent {
    /// The stream this event concerns, if any.
    pub fn stream_key(&self) -> Option<&StreamKey> {
        match self {
            Self::StreamPending { key }
            | Self::StreamOpening { key }
            | Self::StreamLive { key }
            | Self::StreamStalled { key, .. }
            | Self::StreamEvicted { key }
            | Self::StreamClosed { key, .. } => Some(key),
            _ => None,
        }
    }

    /// The device this event concerns, if any.
    pub fn device(&self) -> Option<&DeviceIdentity> {
        match self {
            Self::DeviceOnline { device }
            | Self::DeviceDegraded { device, .. }
            | Self::DeviceOffline { device, .. }
            | Self::DeviceAuthFailed { device, .. } => Some(device),
            _ => None,
        }
    }
}

// ── Notifier ─────────────────────────────────────────────────────

/// Cheaply cloneable sender side.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Arc<StationEvent>>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: StationEvent) {
        trace!(?event, "station event");
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of the event fan-out.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<Arc<StationEvent>>,
}

impl EventSubscription {
    /// Wait for the next event. Lagged events are skipped with a warning.
    /// Returns `None` once the station is gone.
    pub async fn recv(&mut self) -> Option<Arc<StationEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll.
    pub fn try_recv(&mut self) -> Option<Arc<StationEvent>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Convert into a `Stream`, dropping lag markers.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = Arc<StationEvent>> + Send>> {
        Box::pin(BroadcastStream::new(self.rx).filter_map(Result::ok))
    }
}
