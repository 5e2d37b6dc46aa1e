//! Sequential composition of dependent requests.
//!
//! A [`Chain`] sends its head request, parses the successful payload as JSON
//! and hands it to the next builder to obtain the next request, which is
//! swapped in behind the previous one. Only one request is live at a time.
//! The first terminal failure ends the chain; later builders never run.

use crate::config::RequestConfig;
use crate::errors::RequestError;
use crate::request::{Outcome, Request};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Builds the next step from the previous step's parsed payload.
pub type StepBuilder = Arc<dyn Fn(Value) -> Result<Request, RequestError> + Send + Sync>;

/// A head request followed by lazily built steps.
///
/// Callbacks, configuration and cancellation set on the chain apply to the
/// step that is live at that moment, and are inherited by later steps.
#[derive(Clone)]
pub struct Chain {
    head: Request,
    steps: Vec<StepBuilder>,
}

impl Chain {
    /// Creates a chain with only `head`.
    #[must_use]
    pub fn new(head: Request) -> Self {
        Self {
            head,
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn chain<F>(mut self, builder: F) -> Self
    where
        F: Fn(Value) -> Result<Request, RequestError> + Send + Sync + 'static,
    {
        self.steps.push(Arc::new(builder));
        self
    }

    /// The first request.
    #[must_use]
    pub fn head(&self) -> &Request {
        &self.head
    }

    /// The step currently live.
    #[must_use]
    pub fn live(&self) -> Request {
        self.head.live()
    }

    /// Id of the live step.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.live().id()
    }

    /// Number of steps, head included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len() + 1
    }

    /// Always false: a chain has at least its head.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Installs the success callback on the live step.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.head.on_success(callback);
        self
    }

    /// Installs the error callback on the live step.
    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&RequestError) + Send + Sync + 'static,
    {
        self.head.on_error(callback);
        self
    }

    /// Installs the progress callback on the live step.
    pub fn on_progress<F>(&self, callback: F) -> &Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.head.on_progress(callback);
        self
    }

    /// Sets the live step's timeout.
    pub fn set_timeout(&self, timeout: Duration) {
        self.head.set_timeout(timeout);
    }

    /// Sets the live step's attempt budget.
    pub fn set_max_attempts(&self, max_attempts: u32) {
        self.head.set_max_attempts(max_attempts);
    }

    /// Applies overrides to the live step.
    pub fn configure(&self, config: &RequestConfig) {
        self.head.configure(config);
    }

    /// Cancels the live step. Later builders will not run.
    pub fn cancel(&self) {
        self.head.cancel();
    }

    /// Cancels the live step, recording `reason`.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        self.head.cancel_with_reason(reason);
    }

    /// Returns true if the live step was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.head.is_cancelled()
    }

    /// Sends the whole chain and waits for the final outcome.
    pub async fn send(&self) -> Outcome {
        self.prepare();
        self.drive().await
    }

    /// Installs both terminal callbacks, then sends.
    pub async fn send_with<S, E>(&self, success: S, error: E) -> Outcome
    where
        S: Fn(&[u8]) + Send + Sync + 'static,
        E: Fn(&RequestError) + Send + Sync + 'static,
    {
        self.on_success(success);
        self.on_error(error);
        self.send().await
    }

    /// Sends the chain on a runtime task.
    pub fn spawn(&self) -> JoinHandle<Outcome> {
        self.prepare();
        let chain = self.clone();
        tokio::spawn(async move { chain.drive().await })
    }

    /// Puts the head back in charge for a fresh send.
    fn prepare(&self) {
        self.head.unswap();
        self.head.reset_for_send();
    }

    async fn drive(&self) -> Outcome {
        let outcome = self.run().await;
        self.head.live().finish(outcome)
    }

    async fn run(&self) -> Outcome {
        let mut live = self.head.clone();
        let mut payload = live.run().await?;

        for (index, builder) in self.steps.iter().enumerate() {
            if live.local_is_cancelled() {
                return Err(live.cancellation());
            }

            let parsed: Value = serde_json::from_slice(&payload).map_err(|e| {
                RequestError::parse(format!("step {} returned invalid JSON: {e}", index + 1))
            })?;
            let next = builder(parsed)?;

            next.reset_for_send();
            live.swap_to(&next);
            debug!(
                from = live.id(),
                to = next.id(),
                step = index + 2,
                total = self.len(),
                "Chain advanced"
            );

            live = next;
            payload = live.run().await?;
        }

        Ok(payload)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("head", &self.head)
            .field("steps", &self.len())
            .finish()
    }
}

/// Reads a required string field from a step result.
///
/// Numbers are accepted and rendered in decimal.
pub fn forced_str(value: &Value, key: &str) -> Result<String, RequestError> {
    match value.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RequestError::parse(format!("missing string field `{key}`"))),
    }
}

/// Reads a required integer field from a step result.
///
/// Numeric strings are accepted.
pub fn forced_int(value: &Value, key: &str) -> Result<i64, RequestError> {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| RequestError::parse(format!("field `{key}` is not an integer"))),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| RequestError::parse(format!("field `{key}` is not an integer"))),
        _ => Err(RequestError::parse(format!("missing integer field `{key}`"))),
    }
}

/// Reads an optional string field from a step result.
#[must_use]
pub fn optional_str(value: &Value, key: &str) -> Option<String> {
    forced_str(value, key).ok()
}
