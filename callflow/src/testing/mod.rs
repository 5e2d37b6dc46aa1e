//! Testing utilities for callflow requests.
//!
//! This module provides:
//! - A scripted in-memory transport that records every attempt
//! - Assertions over send outcomes
//! - Session fixtures with fast timeouts and no backoff

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_api_error, assert_cancelled, assert_exhausted, assert_succeeded, outcome_json,
};
pub use fixtures::{test_config, test_session, test_session_with, TEST_BASE_URL, TEST_TOKEN};
pub use mocks::{MockReply, MockTransport};
