use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`; `attempt` counts consecutive failures so far.
    RetryAfter { attempt: u32, delay: Duration },
    /// Ceiling reached. Needs manual intervention.
    GiveUp { attempts: u32 },
}

/// Exponential reconnect schedule: the Nth consecutive failure waits `base * 2^N`,
/// and the failure that brings N up to `max_attempts` stops retrying.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn on_failure(&mut self) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        RetryDecision::RetryAfter {
            attempt: self.attempts,
            delay: self.delay_for(self.attempts),
        }
    }

    /// Called on every successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }
}
