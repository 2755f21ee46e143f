// Humanized pacing and bounded retries
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Turns a nominal delay into the one actually slept.
pub trait DelayStrategy: Send + Sync {
    /// `variation` is relative: 0.5 allows anything in `base * [0.5, 1.5]`.
    fn jitter(&self, base: Duration, variation: f64) -> Duration;
}

#[derive(Debug, Clone)]
pub struct RandomizedDelay {
    /// Lower bound for any non-zero delay
    pub floor: Duration,
}

impl Default for RandomizedDelay {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(100),
        }
    }
}

impl DelayStrategy for RandomizedDelay {
    fn jitter(&self, base: Duration, variation: f64) -> Duration {
        if base.is_zero() {
            return Duration::ZERO;
        }
        let variation = variation.clamp(0.0, 1.0);
        let factor = if variation > 0.0 {
            rand::rng().random_range((1.0 - variation)..=(1.0 + variation))
        } else {
            1.0
        };
        base.mul_f64(factor).max(self.floor)
    }
}

/// Always the nominal delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelay;

impl DelayStrategy for FixedDelay {
    fn jitter(&self, base: Duration, _variation: f64) -> Duration {
        base
    }
}

/// Never waits; for tests and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayStrategy for NoDelay {
    fn jitter(&self, _base: Duration, _variation: f64) -> Duration {
        Duration::ZERO
    }
}

/// Short and long pauses between device operations, with an extra pause every
/// n-th operation.
pub struct Pacer {
    delays: Arc<dyn DelayStrategy>,
    short: Duration,
    long: Duration,
    variation: f64,
    extra_pause_every: u64,
    extra_pause: Duration,
    operations: AtomicU64,
}

impl Pacer {
    pub fn new(delays: Arc<dyn DelayStrategy>, short: Duration, long: Duration, variation: f64) -> Self {
        Self {
            delays,
            short,
            long,
            variation,
            extra_pause_every: 0,
            extra_pause: Duration::ZERO,
            operations: AtomicU64::new(0),
        }
    }

    pub fn with_extra_pause(mut self, every: u64, pause: Duration) -> Self {
        self.extra_pause_every = every;
        self.extra_pause = pause;
        self
    }

    /// Delay for the next operation, counting it.
    pub fn next_delay(&self, long: bool) -> Duration {
        let count = self.operations.fetch_add(1, Ordering::Relaxed) + 1;
        let base = if long { self.long } else { self.short };
        let mut delay = self.delays.jitter(base, self.variation);
        if self.extra_pause_every > 0 && count % self.extra_pause_every == 0 {
            delay += self.delays.jitter(self.extra_pause, self.variation);
        }
        delay
    }

    pub async fn pause_short(&self) {
        sleep(self.next_delay(false)).await;
    }

    pub async fn pause_long(&self) {
        sleep(self.next_delay(true)).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub attempts: u32,
    /// No new attempt starts once this much time has passed
    pub ceiling: Duration,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            ceiling: Duration::from_secs(10),
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `n + 1`, doubling from `base_delay`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `op` until it succeeds or the policy is exhausted; the last error is returned.
pub async fn wait_and_retry<T, E, F, Fut>(
    what: &str,
    policy: &RetryPolicy,
    delays: &dyn DelayStrategy,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    log::debug!("🔁 {what} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(e) => {
                let wait = delays.jitter(policy.backoff(attempt), 0.5);
                let out_of_time = started.elapsed() + wait >= policy.ceiling;
                if attempt >= attempts || out_of_time {
                    log::warn!("❌ {what} failed after {attempt} attempt(s): {e}");
                    return Err(e);
                }
                log::debug!("🔁 {what} attempt {attempt} failed: {e}, retrying in {wait:?}");
                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
