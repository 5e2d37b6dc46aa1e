//! Access-token supply.

use async_trait::async_trait;
use parking_lot::RwLock;

/// Supplies the access token attached to every attempt.
///
/// The pipeline only reads tokens. When the remote service rejects a token
/// and the request may recover, [`TokenProvider::refresh`] gets a chance to
/// obtain a new one before the next attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, if any.
    fn current_token(&self) -> Option<String>;

    /// Tries to obtain a fresh token. Returns true on success.
    async fn refresh(&self) -> bool {
        false
    }
}

/// A provider that never has a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    fn current_token(&self) -> Option<String> {
        None
    }
}

/// A provider holding a token set by the application.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    /// Creates a provider with a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Replaces the token.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Removes the token.
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    fn current_token(&self) -> Option<String> {
        self.token.read().clone()
    }
}
