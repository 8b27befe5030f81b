// ── Runtime tuning ──
//
// These types describe how the core behaves under load and failure.
// They never touch disk: camstation-config (or a test) builds a
// `StationConfig` and hands it in.

use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Top-level configuration for a [`Station`](crate::Station).
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Ceiling on concurrently open media streams (Opening, Live or Stalled).
    pub max_streams: usize,
    /// Frames buffered per consumer before the oldest is dropped.
    pub frame_buffer_depth: usize,
    /// Capacity of the state-change broadcast channel.
    pub event_channel_capacity: usize,
    pub pool: PoolConfig,
    pub stream: StreamConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            max_streams: 16,
            frame_buffer_depth: 2,
            event_channel_capacity: 256,
            pool: PoolConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Connection Pool tuning, applied per device.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Deadline for establishing a control session.
    pub connect_timeout: Duration,
    /// Deadline for any single control-plane request.
    pub request_timeout: Duration,
    /// Health-probe cadence while a device is in use.
    pub probe_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Probe failures at the backoff cap before the device is declared offline.
    pub failures_at_cap_before_offline: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            failures_at_cap_before_offline: 3,
        }
    }
}

/// Per-stream failure handling.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// A stream with no frame for this long is Stalled.
    pub liveness_timeout: Duration,
    /// Deadline for opening the media pipeline.
    pub open_timeout: Duration,
    /// Consecutive failures before the handle is Closed for good.
    pub max_consecutive_failures: u32,
    pub backoff: BackoffPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(5),
            open_timeout: Duration::from_secs(5),
            max_consecutive_failures: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl StationConfig {
    /// Reject settings the core cannot run with.
    pub fn validate(&self) -> Result<(), crate::CoreError> {
        let fail = |message: &str| {
            Err(crate::CoreError::Config {
                message: message.to_owned(),
            })
        };
        if self.max_streams == 0 {
            return fail("max_streams must be at least 1");
        }
        if self.frame_buffer_depth == 0 {
            return fail("frame_buffer_depth must be at least 1");
        }
        if self.event_channel_capacity == 0 {
            return fail("event_channel_capacity must be at least 1");
        }
        if self.stream.max_consecutive_failures == 0 {
            return fail("max_consecutive_failures must be at least 1");
        }
        if self.pool.failures_at_cap_before_offline == 0 {
            return fail("failures_at_cap_before_offline must be at least 1");
        }
        for backoff in [&self.pool.backoff, &self.stream.backoff] {
            if backoff.factor < 1.0 || !(0.0..1.0).contains(&backoff.jitter) {
                return fail("backoff factor must be >= 1 and jitter in [0, 1)");
            }
        }
        Ok(())
    }
}
