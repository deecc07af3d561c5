//! Retry pacing for list/watch attempts.

use std::cmp;
use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `base` doubling up to `max`, plus up to +25%
/// uniform jitter so restarting watchers do not stampede the server.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, current: base }
    }

    /// Delay to sleep before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = cmp::min(self.current.saturating_mul(2), self.max);
        jittered(delay)
    }

    /// Back to the initial delay after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

fn jittered(d: Duration) -> Duration {
    d.mul_f64(rand::thread_rng().gen_range(1.0..1.25))
}
