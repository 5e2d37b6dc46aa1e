//! Pipeline machinery: retry policy, cancellation, transmission and chains.
//!
//! This module provides:
//! - The pure retry decision and inter-attempt backoff
//! - Per-request cancellation flags
//! - Asynchronous and current-thread transmission strategies
//! - The chain combinator and the shared [`Call`] surface

mod call;
mod cancellation;
mod chain;
mod retry;
mod transmission;

mod pipeline_tests;

pub use call::Call;
pub use cancellation::CancelFlag;
pub use chain::{forced_int, forced_str, optional_str, Chain, StepBuilder};
pub use retry::{
    can_send, decide, BackoffConfig, BackoffStrategy, JitterStrategy, RetryContext,
    RetryDecision,
};
pub use transmission::{transmit, AttemptOutcome};
