//! The service bundle every request is built from.

use crate::captcha::CaptchaCoordinator;
use crate::config::SessionConfig;
use crate::ids::IdAllocator;
use crate::request::{Media, Params, PartType, Request, RequestKind};
use crate::token::{NoToken, TokenProvider};
use crate::transport::Transport;
use std::sync::Arc;

struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    token: Arc<dyn TokenProvider>,
    captcha: Arc<CaptchaCoordinator>,
    ids: Arc<IdAllocator>,
}

/// Transport, token supply, captcha coordinator, id allocator and defaults,
/// shared by every request created from it.
///
/// Cloning is cheap; clones share the same services.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session with default configuration and no token.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    /// Starts building a session around `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder::new(transport)
    }

    /// Creates a named API call.
    pub fn api(&self, method: impl Into<String>, params: impl Into<Params>) -> Request {
        Request::new(
            self,
            RequestKind::Api {
                method: method.into(),
            },
            params.into().into_inner(),
        )
    }

    /// Creates a media upload to `url`.
    pub fn upload(&self, url: impl Into<String>, media: Vec<Media>, part_type: PartType) -> Request {
        Request::new(
            self,
            RequestKind::Upload {
                url: url.into(),
                media,
                part_type,
            },
            Default::default(),
        )
    }

    /// Creates a call to an arbitrary URL.
    pub fn url(&self, url: impl Into<String>) -> Request {
        Request::new(self, RequestKind::Url { url: url.into() }, Default::default())
    }

    /// Session defaults.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The transport attempts go through.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport)
    }

    /// The access-token supply.
    #[must_use]
    pub fn token(&self) -> &Arc<dyn TokenProvider> {
        &self.inner.token
    }

    /// The captcha coordinator.
    #[must_use]
    pub fn captcha(&self) -> &Arc<CaptchaCoordinator> {
        &self.inner.captcha
    }

    /// The request id allocator.
    #[must_use]
    pub fn ids(&self) -> &Arc<IdAllocator> {
        &self.inner.ids
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("captcha", &self.inner.captcha)
            .field("last_id", &self.inner.ids.last_issued())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    token: Arc<dyn TokenProvider>,
    captcha: Arc<CaptchaCoordinator>,
    ids: Arc<IdAllocator>,
}

impl SessionBuilder {
    /// Creates a builder with defaults.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            config: SessionConfig::default(),
            transport,
            token: Arc::new(NoToken),
            captcha: Arc::new(CaptchaCoordinator::new()),
            ids: IdAllocator::process(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the token provider.
    #[must_use]
    pub fn with_token(mut self, token: Arc<dyn TokenProvider>) -> Self {
        self.token = token;
        self
    }

    /// Shares a captcha coordinator with other sessions.
    #[must_use]
    pub fn with_captcha(mut self, captcha: Arc<CaptchaCoordinator>) -> Self {
        self.captcha = captcha;
        self
    }

    /// Replaces the process-wide id allocator.
    ///
    /// Sessions sharing a captcha coordinator must also share an allocator.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<IdAllocator>) -> Self {
        self.ids = ids;
        self
    }

    /// Builds the session.
    #[must_use]
    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                config: self.config,
                transport: self.transport,
                token: self.token,
                captcha: self.captcha,
                ids: self.ids,
            }),
        }
    }
}
