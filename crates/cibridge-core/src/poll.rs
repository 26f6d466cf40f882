//! Fixed-interval polling bounds for pipeline discovery and completion.

use std::time::Duration;

/// How often and how many times to poll before giving up.
///
/// Intervals are fixed; there is no exponential backoff. The total wait is
/// bounded by `interval * max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        PollPolicy {
            interval,
            max_attempts,
        }
    }

    /// Waiting for a freshly pushed branch to get a pipeline: 60 x 3s.
    pub fn discovery() -> Self {
        PollPolicy::new(Duration::from_secs(3), 60)
    }

    /// Waiting for a pipeline to finish: 1440 x 60s, one day.
    pub fn completion() -> Self {
        PollPolicy::new(Duration::from_secs(60), 1440)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Upper bound on the time spent sleeping under this policy.
    pub fn timeout(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}
