use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures after which publishing is reported as an alert.
    pub alert_after: u32,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): the base delay doubled
    /// per earlier attempt, capped at `max_delay`, stretched by up to 10%.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(doublings) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };

        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay));

        delay.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            alert_after: config.alert_after.max(1),
        }
    }
}
