// ── Frame delivery channel ──
//
// Single producer (a stream worker's decode loop), any number of
// consumers. Each consumer gets its own ring of depth K; when a ring is
// full the oldest frame is dropped and counted. `try_send` never waits,
// so a slow consumer can never stall the decode loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use arc_swap::ArcSwapOption;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::model::Frame;

// ── Access clock ─────────────────────────────────────────────────

/// Lock-free "last accessed" timestamp shared between the manager and
/// consumers. This is the LRU key for eviction.
#[derive(Debug)]
pub(crate) struct AccessClock {
    epoch: Instant,
    micros: AtomicU64,
}

impl AccessClock {
    pub(crate) fn new(epoch: Instant) -> Self {
        let clock = Self {
            epoch,
            micros: AtomicU64::new(0),
        };
        clock.touch();
        clock
    }

    pub(crate) fn touch(&self) {
        let elapsed = u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_max(elapsed, Ordering::AcqRel);
    }

    /// Microseconds since the manager's epoch.
    pub(crate) fn last(&self) -> u64 {
        self.micros.load(Ordering::Acquire)
    }
}

// ── Counters ─────────────────────────────────────────────────────

/// Per-handle delivery counters, readable without locking.
#[derive(Debug, Default)]
pub struct ChannelCounters {
    produced: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelCounters {
    /// Frames handed to the channel by the decode loop.
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Frames read by consumers.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames discarded from full consumer rings. Monotonic.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── Channel ──────────────────────────────────────────────────────

struct Ring {
    frames: Mutex<VecDeque<Frame>>,
    notify: Notify,
    dropped: AtomicU64,
}

struct Shared {
    depth: usize,
    rings: Mutex<Vec<Weak<Ring>>>,
    latest: ArcSwapOption<Frame>,
    closed: AtomicBool,
    counters: Arc<ChannelCounters>,
    access: Arc<AccessClock>,
}

/// Producer side. Cloning shares the same channel.
#[derive(Clone)]
pub struct FrameChannel {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FrameChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameChannel")
            .field("depth", &self.shared.depth)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl FrameChannel {
    pub(crate) fn new(depth: usize, access: Arc<AccessClock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                depth: depth.max(1),
                rings: Mutex::new(Vec::new()),
                latest: ArcSwapOption::empty(),
                closed: AtomicBool::new(false),
                counters: Arc::new(ChannelCounters::default()),
                access,
            }),
        }
    }

    /// Hand a frame to every consumer without waiting.
    ///
    /// Returns the number of frames dropped to make room. Sending on a
    /// closed channel discards the frame.
    pub fn try_send(&self, frame: Frame) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.shared.counters.produced.fetch_add(1, Ordering::Relaxed);

        let rings: Vec<Arc<Ring>> = {
            let mut guard = self
                .shared
                .rings
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.retain(|w| w.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };

        let mut dropped = 0;
        for ring in &rings {
            {
                let mut frames = ring.frames.lock().unwrap_or_else(PoisonError::into_inner);
                frames.push_back(frame.clone());
                while frames.len() > self.shared.depth {
                    frames.pop_front();
                    dropped += 1;
                    ring.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            ring.notify.notify_one();
        }
        if dropped > 0 {
            self.shared
                .counters
                .dropped
                .fetch_add(u64::try_from(dropped).unwrap_or(u64::MAX), Ordering::Relaxed);
        }

        self.shared.latest.store(Some(Arc::new(frame)));
        dropped
    }

    /// Attach a new consumer. It sees frames produced from now on.
    pub fn subscribe(&self) -> FrameReceiver {
        let ring = Arc::new(Ring {
            frames: Mutex::new(VecDeque::with_capacity(self.shared.depth)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        self.shared
            .rings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&ring));
        FrameReceiver {
            shared: Arc::clone(&self.shared),
            ring,
        }
    }

    /// Close the channel. Consumers drain what is buffered, then see `None`.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let rings = self
            .shared
            .rings
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for ring in rings.iter().filter_map(Weak::upgrade) {
            ring.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Most recent frame produced, regardless of consumers.
    pub fn latest(&self) -> Option<Frame> {
        self.shared.latest.load_full().map(|f| (*f).clone())
    }

    pub fn counters(&self) -> Arc<ChannelCounters> {
        Arc::clone(&self.shared.counters)
    }

    /// Number of attached consumers.
    pub fn receiver_count(&self) -> usize {
        self.shared
            .rings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

// ── Receiver ─────────────────────────────────────────────────────

/// Consumer side. Every read refreshes the stream's LRU timestamp.
pub struct FrameReceiver {
    shared: Arc<Shared>,
    ring: Arc<Ring>,
}

impl std::fmt::Debug for FrameReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReceiver")
            .field("buffered", &self.len())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl FrameReceiver {
    /// Wait for the next frame. Returns `None` once the channel is closed
    /// and this consumer's ring is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            let ring = Arc::clone(&self.ring);
            let notified = ring.notify.notified();
            if let Some(frame) = self.try_recv() {
                return Some(frame);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return self.try_recv();
            }
            notified.await;
        }
    }

    /// Take the oldest buffered frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        let frame = self
            .ring
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()?;
        self.shared.access.touch();
        self.shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Skip to the newest buffered frame, discarding older ones.
    pub fn latest(&mut self) -> Option<Frame> {
        let frame = {
            let mut frames = self.ring.frames.lock().unwrap_or_else(PoisonError::into_inner);
            let newest = frames.pop_back()?;
            frames.clear();
            newest
        };
        self.shared.access.touch();
        self.shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Frames currently buffered for this consumer. Never exceeds the depth.
    pub fn len(&self) -> usize {
        self.ring
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames this consumer lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
