//! Exponential backoff with jitter for the subscription retry path.

use std::time::Duration;

/// Shape of the retry delays. Retries never give up.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    /// Fraction of the current interval the delay may deviate by, either way.
    pub randomization_factor: f64,
    /// Cap on the un-jittered interval.
    pub max_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let current = policy.initial_interval;
        Self { policy, current }
    }

    /// Interval the next delay is drawn around.
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// Delay for this attempt, then grow the interval.
    ///
    /// `sample` is a uniform draw from `[0, 1)`; it maps linearly onto
    /// `[current * (1 - factor), current * (1 + factor)]`.
    pub fn next_delay(&mut self, sample: f64) -> Duration {
        let current = self.current.as_secs_f64();
        let delta = self.policy.randomization_factor.clamp(0.0, 1.0) * current;
        let low = current - delta;
        let high = current + delta;
        let delay = low + sample.clamp(0.0, 1.0) * (high - low);

        let max = self.policy.max_interval;
        let grown = (current * self.policy.multiplier).min(max.as_secs_f64());
        self.current = Duration::try_from_secs_f64(grown.max(0.0)).unwrap_or(max);

        Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(max)
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial_interval;
    }
}
