use rand::Rng;
use std::time::Duration;

/// Scheduled retry delays for poll loops and backend reconnects.
///
/// Each call to [`Backoff::next_delay`] multiplies the current delay by
/// `factor` (a factor of 1.0 gives a fixed delay), caps it at `max` and adds
/// up to `jitter` of random extra time. [`Backoff::reset`] goes back to `base`
/// after a successful attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: Duration,
    current: Duration,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self::exponential(delay, delay, 1.0)
    }

    pub fn exponential(base: Duration, max: Duration, factor: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            factor: factor.max(1.0),
            jitter: Duration::ZERO,
            current: base,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = self.current.mul_f64(self.factor);
        self.current = grown.min(self.max);
        delay + self.sample_jitter()
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Sleeps for the next delay.
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let frac: f64 = rand::rng().random_range(0.0..1.0);
        self.jitter.mul_f64(frac)
    }
}
