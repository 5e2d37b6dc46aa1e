//! Retry policy evaluation and backoff between attempts.
//!
//! The functions here are pure: they look at counters and an error and
//! decide what to do next. Executing the decision is the request's job.

use crate::captcha::CaptchaChallenge;
use crate::errors::{ErrorClass, RequestError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Returns true if another attempt may start.
///
/// A budget of zero means unlimited attempts.
#[must_use]
pub const fn can_send(attempts: u32, max_attempts: u32) -> bool {
    max_attempts == 0 || attempts < max_attempts
}

/// Counters the retry decision looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Token refreshes already made during this send.
    pub auth_fails: u32,
    /// Token refreshes allowed per send.
    pub max_auth_retries: u32,
    /// Whether automatic recovery is permitted.
    pub catch_errors: bool,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Start another attempt, budget permitting.
    Retry,
    /// Hold the request until a captcha answer arrives, then retry.
    SolicitCaptcha(CaptchaChallenge),
    /// Refresh the access token, then retry.
    RefreshToken,
    /// Report the error.
    GiveUp,
}

/// Decides how to react to `error`.
#[must_use]
pub fn decide(error: &RequestError, ctx: &RetryContext) -> RetryDecision {
    match error.class() {
        ErrorClass::Retryable => RetryDecision::Retry,
        ErrorClass::Captcha(challenge) if ctx.catch_errors => {
            RetryDecision::SolicitCaptcha(challenge)
        }
        ErrorClass::Auth if ctx.catch_errors && ctx.auth_fails < ctx.max_auth_retries => {
            RetryDecision::RefreshToken
        }
        ErrorClass::Captcha(_) | ErrorClass::Auth | ErrorClass::Terminal => RetryDecision::GiveUp,
    }
}

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry immediately.
    #[default]
    None,
    /// delay = base
    Constant,
    /// delay = base * attempt
    Linear,
    /// delay = base * 2^(attempt - 1)
    Exponential,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Delay between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Backoff strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::None,
            jitter: JitterStrategy::None,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffConfig {
    /// Creates a config that never waits.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Creates an exponential backoff config.
    #[must_use]
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Calculates the delay after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;

        let delay = match self.strategy {
            BackoffStrategy::None => return Duration::ZERO,
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt.max(1))),
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            }
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}
