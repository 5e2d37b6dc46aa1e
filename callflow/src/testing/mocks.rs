//! Scripted transport for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::errors::{ApiError, TransportError};
use crate::transport::{AttemptRequest, ProgressReporter, Transport};

/// What the mock transport does for one attempt.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this raw body.
    Body(Vec<u8>),
    /// Fail with this error.
    Fail(TransportError),
    /// Never complete.
    Hang,
    /// Report each `(done, total)` step, then return the body.
    Progress(Vec<(u64, u64)>, Vec<u8>),
    /// Wait for a permit on the gate, then play the inner reply.
    Gated(Arc<Notify>, Box<MockReply>),
}

impl MockReply {
    /// A raw body.
    pub fn body(body: impl Into<Vec<u8>>) -> Self {
        Self::Body(body.into())
    }

    /// A JSON body.
    pub fn json(value: serde_json::Value) -> Self {
        Self::Body(value.to_string().into_bytes())
    }

    /// A `{"response": value}` envelope.
    pub fn response(value: serde_json::Value) -> Self {
        Self::json(serde_json::json!({ "response": value }))
    }

    /// A declared API error envelope.
    pub fn api_error(error: ApiError) -> Self {
        let mut declared = serde_json::json!({
            "error_code": error.code,
            "error_msg": error.message,
        });
        if let Some(sid) = error.captcha_sid {
            declared["captcha_sid"] = sid.into();
        }
        if let Some(img) = error.captcha_img {
            declared["captcha_img"] = img.into();
        }
        Self::json(serde_json::json!({ "error": declared }))
    }

    /// Progress steps followed by a body.
    pub fn progress(steps: Vec<(u64, u64)>, body: impl Into<Vec<u8>>) -> Self {
        Self::Progress(steps, body.into())
    }

    /// Holds `reply` until `gate` is notified.
    pub fn gated(gate: Arc<Notify>, reply: Self) -> Self {
        Self::Gated(gate, Box::new(reply))
    }
}

/// A transport that plays scripted replies and records every attempt.
///
/// Replies routed to a URL suffix take precedence over the shared queue.
/// When nothing is scripted the fallback reply is used, and without a
/// fallback the attempt fails with a connection error.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<(String, VecDeque<MockReply>)>>,
    queue: Mutex<VecDeque<MockReply>>,
    fallback: Mutex<Option<MockReply>>,
    calls: Mutex<Vec<AttemptRequest>>,
    called: Notify,
}

impl MockTransport {
    /// Creates a transport with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for the next unrouted attempt.
    pub fn push(&self, reply: MockReply) {
        self.queue.lock().push_back(reply);
    }

    /// Queues a reply for the next attempt whose URL ends with `suffix`.
    pub fn route(&self, suffix: impl Into<String>, reply: MockReply) {
        let suffix = suffix.into();
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|(s, _)| *s == suffix) {
            Some((_, queue)) => queue.push_back(reply),
            None => routes.push((suffix, VecDeque::from([reply]))),
        }
    }

    /// Sets the reply used when nothing else is scripted.
    pub fn set_fallback(&self, reply: MockReply) {
        *self.fallback.lock() = Some(reply);
    }

    /// Returns every recorded attempt.
    #[must_use]
    pub fn calls(&self) -> Vec<AttemptRequest> {
        self.calls.lock().clone()
    }

    /// Returns the number of recorded attempts.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the URLs of recorded attempts, in order.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.url.clone()).collect()
    }

    /// Completes once at least `count` attempts were recorded.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.called.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }

    fn next_reply(&self, url: &str) -> Option<MockReply> {
        let routed = self
            .routes
            .lock()
            .iter_mut()
            .find(|(suffix, queue)| url.ends_with(suffix.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());

        routed
            .or_else(|| self.queue.lock().pop_front())
            .or_else(|| self.fallback.lock().clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn attempt(
        &self,
        request: AttemptRequest,
        progress: ProgressReporter,
    ) -> Result<Vec<u8>, TransportError> {
        let reply = self.next_reply(&request.url);
        self.calls.lock().push(request);
        self.called.notify_waiters();

        let mut reply = reply.ok_or_else(|| TransportError::Connection("no scripted reply".into()))?;
        while let MockReply::Gated(gate, inner) = reply {
            gate.notified().await;
            reply = *inner;
        }

        match reply {
            MockReply::Body(body) => Ok(body),
            MockReply::Fail(error) => Err(error),
            MockReply::Hang => futures::future::pending().await,
            MockReply::Progress(steps, body) => {
                for (done, total) in steps {
                    progress.report(done, total);
                }
                Ok(body)
            }
            MockReply::Gated(..) => Err(TransportError::Worker("unreachable gate".into())),
        }
    }
}
