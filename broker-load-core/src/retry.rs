//! Retry bookkeeping for timed out load statements.

use crate::config::LoadConfig;
use std::time::Duration;

/// How many timed out attempts are tolerated and how long to wait between them.
///
/// The backoff is fixed: a load that timed out is re-issued unchanged after the
/// same interval every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &LoadConfig) -> Self {
        Self::new(config.max_retries, config.retry_backoff())
    }

    pub fn state(&self) -> RetryState {
        RetryState {
            timeouts: 0,
            max_retries: self.max_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

/// Forward-only timeout counter for one load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    timeouts: u32,
    max_retries: u32,
}

impl RetryState {
    /// Count a timeout. Returns `true` while another attempt is allowed.
    pub fn record_timeout(&mut self) -> bool {
        self.timeouts = self.timeouts.saturating_add(1);
        !self.is_exhausted()
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub fn is_exhausted(&self) -> bool {
        self.timeouts >= self.max_retries
    }
}
