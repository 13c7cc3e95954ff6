//! Reconnect policy
//!
//! Fixed-delay retry budget for the reconnecting client. The counter resets
//! on every successful open and on every normal closure.

use std::time::Duration;

/// `max_retries` value meaning "retry forever"
pub const RECONNECT_UNLIMITED: i32 = -1;

/// Close codes that count as an intentional shutdown (1000 normal, 1005 no status)
pub const NORMAL_CLOSURE_CODES: [u16; 2] = [1000, 1005];

/// Close code reported when the connection dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

pub fn is_normal_closure(code: u16) -> bool {
    NORMAL_CLOSURE_CODES.contains(&code)
}

/// What to do after a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnection is switched off (zero timeout)
    Disabled,
    /// Schedule attempt number `attempt` after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Budget consumed after `attempts` tries
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    timeout: Duration,
    max_retries: i32,
    retry_count: u32,
}

impl ReconnectPolicy {
    pub fn new(timeout: Duration, max_retries: i32) -> Self {
        Self {
            timeout,
            max_retries,
            retry_count: 0,
        }
    }

    /// Build from the configuration surface: timeout in seconds (0 disables),
    /// `-1` retries for unlimited.
    pub fn from_config(timeout_secs: u64, max_retries: i32) -> Self {
        Self::new(Duration::from_secs(timeout_secs), max_retries)
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    pub fn is_disabled(&self) -> bool {
        self.timeout.is_zero()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn on_open(&mut self) {
        self.retry_count = 0;
    }

    /// Record a close. Returns true when the close is abnormal and a
    /// reconnect should be attempted.
    pub fn on_close(&mut self, code: u16) -> bool {
        if is_normal_closure(code) {
            self.retry_count = 0;
            false
        } else {
            true
        }
    }

    /// Consume one attempt from the budget.
    pub fn next_attempt(&mut self) -> ReconnectDecision {
        if self.is_disabled() {
            return ReconnectDecision::Disabled;
        }
        let within_budget = self.max_retries == RECONNECT_UNLIMITED
            || i64::from(self.retry_count) < i64::from(self.max_retries);
        if within_budget {
            self.retry_count += 1;
            ReconnectDecision::Retry {
                attempt: self.retry_count,
                delay: self.timeout,
            }
        } else {
            ReconnectDecision::Exhausted {
                attempts: self.retry_count,
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(10, RECONNECT_UNLIMITED)
    }
}
