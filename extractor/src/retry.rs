use std::time::Duration;

use rand::Rng;

pub const DEFAULT_BASE_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Upper bound of the jitter, as a fraction of the doubled wait.
const JITTER_RATIO: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Wait before the first doubling.
    pub base_wait: Duration,
    /// Ceiling. A range whose next wait reaches it is given up.
    pub max_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryState {
    Normal,
    Backoff(Duration),
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Sleep this long, then start the range over.
    Retry(Duration),
    Exhausted,
}

/// Exponential backoff with jitter for one block range.
///
/// Every failure doubles the wait. Once the doubled wait reaches the
/// ceiling the policy is exhausted and stays so. The policy only computes
/// waits; the caller sleeps.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    options: RetryOptions,
    state: RetryState,
    failures: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            base_wait: DEFAULT_BASE_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options,
            state: RetryState::Normal,
            failures: 0,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn on_failure<R: Rng>(&mut self, rng: &mut R) -> RetryDecision {
        let wait = match self.state {
            RetryState::Normal => self.options.base_wait,
            RetryState::Backoff(wait) => wait,
            RetryState::Exhausted => return RetryDecision::Exhausted,
        };

        self.failures += 1;

        let doubled = wait.saturating_mul(2).min(self.options.max_wait);
        if doubled >= self.options.max_wait {
            self.state = RetryState::Exhausted;
            return RetryDecision::Exhausted;
        }

        let jitter = rng.gen_range(0.0..=JITTER_RATIO) * doubled.as_secs_f64();
        let next = doubled + Duration::from_secs_f64(jitter);

        self.state = RetryState::Backoff(next);
        RetryDecision::Retry(next)
    }
}
