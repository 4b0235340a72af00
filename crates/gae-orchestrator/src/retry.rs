// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry classification and backoff.

use std::time::Duration;

use rand::Rng;

use crate::error::{ConfigError, EngineError};

/// Whether retrying an error can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Outcome of a retry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    GiveUp,
}

/// Exponential backoff with jitter, applied per stage operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per retry.
    pub factor: f64,
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Random extra fraction in `[0, jitter)` added to each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: 5,
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Classify an error.
    ///
    /// Auth errors are transient here; the once-per-job limit is enforced by
    /// [`RetryBudget`].
    pub fn classify(error: &EngineError) -> ErrorClass {
        match error {
            EngineError::Transient(_) | EngineError::Auth(_) => ErrorClass::Transient,
            EngineError::NotFound(_)
            | EngineError::Validation(_)
            | EngineError::Fatal(_)
            | EngineError::DeadlineExceeded(_) => ErrorClass::Permanent,
        }
    }

    /// Delay without jitter before retry `attempt` (1-indexed).
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retry `attempt` (1-indexed), jittered and capped.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if self.jitter > 0.0 {
            secs *= 1.0 + rand::thread_rng().gen_range(0.0..self.jitter);
        }
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.factor.is_finite() && self.factor >= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "retry.factor",
                reason: format!("must be a finite number >= 1.0, got {}", self.factor),
            });
        }
        // Jitter below factor - 1 keeps successive delays strictly increasing.
        if !(0.0..1.0).contains(&self.jitter)
            || (self.factor > 1.0 && self.jitter >= self.factor - 1.0)
        {
            return Err(ConfigError::InvalidValue {
                name: "retry.jitter",
                reason: format!(
                    "must be in [0, min(1, factor - 1)), got {}",
                    self.jitter
                ),
            });
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::InvalidValue {
                name: "retry.max_delay",
                reason: "must not be shorter than base_delay".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-job retry bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RetryBudget {
    auth_retry_used: bool,
    retries: u32,
}

impl RetryBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what to do after `attempt` attempts (1-indexed) ended in `error`.
    ///
    /// The first auth error of the budget is retried immediately; the caller is
    /// expected to force re-authentication first. Later auth errors give up.
    pub fn decide(
        &mut self,
        policy: &RetryPolicy,
        error: &EngineError,
        attempt: u32,
    ) -> RetryDecision {
        if attempt >= policy.max_attempts {
            return RetryDecision::GiveUp;
        }
        if RetryPolicy::classify(error) == ErrorClass::Permanent {
            return RetryDecision::GiveUp;
        }
        if error.is_auth() {
            if self.auth_retry_used {
                return RetryDecision::GiveUp;
            }
            self.auth_retry_used = true;
            self.retries += 1;
            return RetryDecision::Retry {
                after: Duration::ZERO,
            };
        }
        self.retries += 1;
        RetryDecision::Retry {
            after: policy.next_delay(attempt),
        }
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn auth_retry_used(&self) -> bool {
        self.auth_retry_used
    }
}
