//! Configuration for the scheduler and retry policy.

use rand::Rng;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to spread delays by up to ±25%.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter && capped > 0.0 {
            let factor = rand::thread_rng().gen_range(-0.25..=0.25);
            Duration::from_secs_f64((capped * (1.0 + factor)).max(0.0))
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// How strictly one trigger kind is treated.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerPolicy {
    /// Retry policy for jobs of this trigger.
    pub retry: RetryConfig,
    /// Whether the device must be idle before the job starts.
    pub require_idle: bool,
    /// Whether to wait for unmet preconditions instead of skipping.
    pub wait_for_preconditions: bool,
}

impl TriggerPolicy {
    /// Policy for user-initiated syncs: waits for preconditions, ignores idleness.
    pub fn on_demand() -> Self {
        Self {
            retry: RetryConfig::default(),
            require_idle: false,
            wait_for_preconditions: true,
        }
    }

    /// Policy for background syncs: requires idleness, skips when not ready.
    pub fn periodic() -> Self {
        Self {
            retry: RetryConfig::default(),
            require_idle: true,
            wait_for_preconditions: false,
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets whether the device must be idle.
    pub fn with_require_idle(mut self, require: bool) -> Self {
        self.require_idle = require;
        self
    }
}

/// Configuration for the sync scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Policy for on-demand requests.
    pub on_demand: TriggerPolicy,
    /// Policy for periodic requests.
    pub periodic: TriggerPolicy,
    /// Number of jobs that may run at once across all owners.
    pub worker_slots: usize,
    /// Interval between precondition checks while waiting.
    pub precondition_poll: Duration,
    /// How long an on-demand job waits for preconditions.
    pub precondition_wait: Duration,
    /// Time limit for a single attempt.
    pub attempt_timeout: Option<Duration>,
    /// Age after which confirmed deletes are purged. `None` keeps them.
    pub tombstone_retention: Option<Duration>,
}

impl SchedulerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            on_demand: TriggerPolicy::on_demand(),
            periodic: TriggerPolicy::periodic(),
            worker_slots: 1,
            precondition_poll: Duration::from_millis(500),
            precondition_wait: Duration::from_secs(30),
            attempt_timeout: None,
            tombstone_retention: None,
        }
    }

    /// Sets the on-demand policy.
    pub fn with_on_demand(mut self, policy: TriggerPolicy) -> Self {
        self.on_demand = policy;
        self
    }

    /// Sets the periodic policy.
    pub fn with_periodic(mut self, policy: TriggerPolicy) -> Self {
        self.periodic = policy;
        self
    }

    /// Sets the retry policy for both triggers.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.on_demand.retry = retry.clone();
        self.periodic.retry = retry;
        self
    }

    /// Sets the number of concurrent jobs.
    pub fn with_worker_slots(mut self, slots: usize) -> Self {
        self.worker_slots = slots.max(1);
        self
    }

    /// Sets the precondition polling interval.
    pub fn with_precondition_poll(mut self, poll: Duration) -> Self {
        self.precondition_poll = poll;
        self
    }

    /// Sets how long on-demand jobs wait for preconditions.
    pub fn with_precondition_wait(mut self, wait: Duration) -> Self {
        self.precondition_wait = wait;
        self
    }

    /// Sets the per-attempt time limit.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Sets the tombstone retention.
    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = Some(retention);
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_builder() {
        let config = SchedulerConfig::new()
            .with_worker_slots(0)
            .with_precondition_wait(Duration::from_secs(5))
            .with_attempt_timeout(Duration::from_secs(60))
            .with_retry(RetryConfig::no_retry());

        assert_eq!(config.worker_slots, 1);
        assert_eq!(config.precondition_wait, Duration::from_secs(5));
        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.on_demand.retry.max_attempts, 1);
        assert_eq!(config.periodic.retry.max_attempts, 1);
        assert!(config.periodic.require_idle);
        assert!(!config.on_demand.require_idle);
    }

    #[test]
    fn default_retry_is_three_attempts() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_jitter_stays_within_a_quarter() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));
        for _ in 0..100 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(74));
            assert!(delay <= Duration::from_millis(126));
        }
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }
}
