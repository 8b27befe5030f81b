// ── Exponential backoff with jitter ──
//
// Shared by device connections (health-probe retries) and stream handles
// (reconnect after a stall). Attempts are 1-based: the first retry after
// the first failure is attempt 1.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff shape: `min(cap, base * factor^(n-1)) * (1 ± jitter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure. Default: 1s.
    pub base: Duration,
    /// Growth per consecutive failure. Default: 2.0.
    pub factor: f64,
    /// Upper bound on the un-jittered delay. Default: 60s.
    pub cap: Duration,
    /// Relative jitter, `0.2` meaning ±20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay for the given attempt.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.base.as_secs_f64() * self.factor.powi(exponent);
        let capped = raw.min(self.cap.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.cap
        }
    }

    /// Whether this attempt's delay has reached the cap.
    pub fn is_capped(&self, attempt: u32) -> bool {
        self.nominal(attempt) >= self.cap
    }

    /// Jittered delay for the given attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Jittered delay drawing from a caller-supplied RNG.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal(attempt).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rng.gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        Duration::from_secs_f64(nominal * factor)
    }
}
