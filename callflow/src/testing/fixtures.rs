//! Session fixtures for tests.

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::pipeline::BackoffConfig;
use crate::session::Session;
use crate::token::StaticToken;
use crate::transport::Transport;

/// Base URL of API calls in test sessions.
pub const TEST_BASE_URL: &str = "http://test/method";

/// Access token supplied by test sessions.
pub const TEST_TOKEN: &str = "token";

/// Configuration with a one-second timeout, no backoff and quiet logs.
#[must_use]
pub fn test_config() -> SessionConfig {
    SessionConfig::new()
        .with_api_base_url(TEST_BASE_URL)
        .with_timeout(1.0)
        .with_backoff(BackoffConfig::immediate())
        .with_log_to_console(false)
}

/// A session over `transport` using [`test_config`].
pub fn test_session(transport: Arc<dyn Transport>) -> Session {
    test_session_with(transport, test_config())
}

/// A session over `transport` with a custom configuration and the test token.
pub fn test_session_with(transport: Arc<dyn Transport>, config: SessionConfig) -> Session {
    Session::builder(transport)
        .with_config(config)
        .with_token(Arc::new(StaticToken::new(TEST_TOKEN)))
        .build()
}
