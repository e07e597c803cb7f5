//! Connection state machine and bounded reconnection
//!
//! Design:
//!     - Close code 1000 is a deliberate close: never reconnect
//!     - Any other code (or a transport failure, reported as 1006) schedules
//!       exactly one attempt after the policy delay
//!     - A successful open resets the attempt counter
//!     - Once `max_attempts` consecutive attempts fail the connection is
//!       Unavailable and stays that way

use crate::config::{BackoffKind, ViewerConfig};
use std::time::Duration;
use tracing::{info, warn};

pub const CLOSE_NORMAL: u16 = 1000;
/// No close frame at all (transport dropped, connect refused)
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedNormal,
    ClosedAbnormal { code: u16 },
    /// Retry budget spent
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential { max_delay: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ViewerConfig) -> Self {
        let backoff = match config.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                max_delay: Duration::from_millis(config.max_delay_ms),
            },
        };
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff,
        }
    }

    /// Delay before the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential { max_delay } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor).min(max_delay)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ViewerConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Normal close; stay closed
    Stop,
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    attempts: u32,
    state: ConnectionState,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attempts spent since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn on_connecting(&mut self) {
        if self.state != ConnectionState::Unavailable {
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn on_open(&mut self) {
        if self.attempts > 0 {
            info!("Reconnected after {} attempt(s)", self.attempts);
        }
        self.attempts = 0;
        self.state = ConnectionState::Open;
    }

    pub fn on_close(&mut self, code: u16) -> Decision {
        if self.state == ConnectionState::Unavailable {
            return Decision::GiveUp;
        }
        if code == CLOSE_NORMAL {
            self.state = ConnectionState::ClosedNormal;
            return Decision::Stop;
        }

        if self.attempts >= self.policy.max_attempts {
            warn!(
                "Connection closed ({}), {} reconnect attempts exhausted",
                code, self.policy.max_attempts
            );
            self.state = ConnectionState::Unavailable;
            return Decision::GiveUp;
        }

        self.attempts += 1;
        self.state = ConnectionState::ClosedAbnormal { code };
        let delay = self.policy.delay_for(self.attempts);
        warn!(
            "Connection closed ({}), reconnect {}/{} in {:?}",
            code, self.attempts, self.policy.max_attempts, delay
        );
        Decision::RetryAfter(delay)
    }
}
