use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RetrySettings {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl RetrySettings {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = if max < initial { initial } else { max };
        Self {
            initial,
            max,
            multiplier: multiplier.clamp(1.1, 10.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_ms),
            Duration::from_millis(config.max_ms),
            config.multiplier,
        )
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(5), 2.0)
    }
}

/// Exponential backoff over [`RetrySettings`], reset on success.
pub struct RetryBackoff {
    policy: RetrySettings,
    current: Duration,
}

impl RetryBackoff {
    pub fn new(policy: RetrySettings) -> Self {
        let current = policy.initial;
        Self { policy, current }
    }

    pub fn on_success(&mut self) {
        self.current = self.policy.initial;
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// backoff window.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current.max(Duration::from_millis(50));
        let next = (delay.as_millis() as f64 * self.policy.multiplier)
            .round()
            .max(self.policy.initial.as_millis() as f64);
        let capped = next.min(self.policy.max.as_millis() as f64);
        let next_duration = Duration::from_millis(capped as u64);
        self.current = std::cmp::min(next_duration, self.policy.max);
        delay
    }
}

/// Bounded redelivery contract for one endpoint: a message gets
/// `max_attempts` retries after its initial delivery, then a single
/// dead-letter outcome.
#[derive(Clone, Debug)]
pub struct RedeliveryPolicy {
    pub max_attempts: u32,
    pub backoff: RetrySettings,
}

impl RedeliveryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: RetrySettings::from_config(config),
        }
    }

    pub fn total_invocations(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: RetrySettings::default(),
        }
    }
}

/// Uniform sample in `[min, max]`; collapses to `min` when the range is
/// empty.
pub fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let min_secs = min.as_secs_f64();
    let span = max.as_secs_f64() - min_secs;
    let sample = rng.gen::<f64>() * span + min_secs;
    Duration::from_secs_f64(sample)
}
