use rand::Rng;
use std::time::Duration;

/// Retry schedule for failed jobs, decoupled from the delivery transport.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first delivery.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// True once a job that already failed `retry_count` retries has used up
    /// its attempt budget.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count + 1 >= self.max_attempts
    }

    /// Exponential backoff with up to 10% jitter: base * 2^retry_count.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let backoff_ms = base_ms.saturating_mul(1u64 << retry_count.min(16));
        let jitter_max = backoff_ms / 10;
        let jitter_ms = if jitter_max > 0 {
            rand::thread_rng().gen_range(0..=jitter_max)
        } else {
            0
        };
        Duration::from_millis(backoff_ms + jitter_ms)
    }
}

/// Read-path TTL pair: populated responses live longer than cached empties,
/// which only exist to bound repeated-miss cost for ineligible users.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub positive_secs: u64,
    pub empty_secs: u64,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            positive_secs: 300,
            empty_secs: 60,
        }
    }
}
