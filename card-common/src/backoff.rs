use std::time::Duration;

/// Exponential backoff used between failed stream reads.
#[derive(Copy, Clone, Debug)]
pub struct BackoffPolicy {
    /// Coefficient to multiply initial_interval with for every consecutive failure.
    backoff_coefficient: u32,
    /// The delay after the first failure.
    initial_interval: Duration,
    /// The maximum possible delay between attempts.
    maximum_interval: Duration,
}

impl BackoffPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: Duration,
        maximum_interval: Duration,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Delay to wait after the `attempt`-th consecutive failure, counting from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_interval
            .checked_mul(factor)
            .map_or(self.maximum_interval, |candidate| {
                std::cmp::min(candidate, self.maximum_interval)
            })
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: Duration::from_secs(1),
            maximum_interval: Duration::from_secs(30),
        }
    }
}

/// Running backoff state: each call to `next_delay` moves one step up the curve until `reset`.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
