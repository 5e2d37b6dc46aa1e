//! The request state machine.
//!
//! A [`Request`] is one addressable network call. Sending it runs attempts
//! one after another until one succeeds, the retry policy gives up, the
//! attempt budget runs out or the caller cancels. Exactly one terminal
//! outcome is delivered per send.
//!
//! When a request is used as a chain step, later steps are swapped in
//! behind it. Callback setters, configuration and cancellation then write
//! through to the innermost live request, so callers keep a single handle for
//! the whole chain.

use super::callbacks::{Callbacks, ErrorCallback, ProgressCallback, SuccessCallback};
use super::envelope::unwrap_envelope;
use super::kind::{HttpMethod, RequestKind};
use super::log::{LogEntry, RequestLog};
use super::params::{Parameters, Params};
use super::response::ResponseSlot;
use crate::config::{RequestConfig, SendMode};
use crate::errors::RequestError;
use crate::observability::{RequestSpanAttributes, SpanTimer};
use crate::pipeline::{
    can_send, decide, transmit, AttemptOutcome, CancelFlag, Chain, RetryContext, RetryDecision,
};
use crate::session::Session;
use crate::transport::{AttemptRequest, ProgressReporter};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Terminal outcome of a send: the raw payload or the error.
pub type Outcome = Result<Vec<u8>, RequestError>;

const DEFAULT_CANCEL_REASON: &str = "Cancelled by caller";

#[derive(Debug, Clone)]
struct RequestState {
    parameters: Parameters,
    timeout: Duration,
    max_attempts: u32,
    attempts: u32,
    auth_fails: u32,
    catch_errors: bool,
    send_mode: SendMode,
    language: Option<String>,
}

struct RequestInner {
    id: u64,
    kind: RequestKind,
    session: Session,
    state: Mutex<RequestState>,
    callbacks: Mutex<Callbacks>,
    swapped: Mutex<Option<Request>>,
    cancel: CancelFlag,
    response: ResponseSlot,
    log: RequestLog,
}

/// One network call with its own retry budget, callbacks and log.
///
/// `Request` is a cheap handle; clones share the same underlying request.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl Request {
    pub(crate) fn new(session: &Session, kind: RequestKind, parameters: Parameters) -> Self {
        let config = session.config();
        let id = session.ids().next_id();
        let max_attempts = match kind {
            RequestKind::Upload { .. } => config.upload_max_attempts,
            RequestKind::Api { .. } | RequestKind::Url { .. } => config.max_attempts,
        };

        let log = RequestLog::new(id, config.log_to_console);
        match &kind {
            RequestKind::Api { method } => {
                log.put(format!("INIT with method name: {method} and parameters: {parameters:?}"));
            }
            RequestKind::Upload { url, media, .. } => {
                log.put(format!("INIT upload of {} file(s) to {url}", media.len()));
            }
            RequestKind::Url { url } => log.put(format!("INIT with custom url: {url}")),
        }

        Self {
            inner: Arc::new(RequestInner {
                id,
                kind,
                session: session.clone(),
                state: Mutex::new(RequestState {
                    parameters,
                    timeout: config.timeout(),
                    max_attempts,
                    attempts: 0,
                    auth_fails: 0,
                    catch_errors: config.catch_errors,
                    send_mode: config.send_mode,
                    language: None,
                }),
                callbacks: Mutex::new(Callbacks::default()),
                swapped: Mutex::new(None),
                cancel: CancelFlag::new(),
                response: ResponseSlot::new(),
                log,
            }),
        }
    }

    // -- identity ---------------------------------------------------------

    /// Process-unique id of this request.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// What this request calls.
    #[must_use]
    pub fn kind(&self) -> &RequestKind {
        &self.inner.kind
    }

    /// HTTP verb used for every attempt.
    #[must_use]
    pub fn http_method(&self) -> HttpMethod {
        self.inner.kind.http_method()
    }

    /// The session this request was built from.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// This request's own log.
    #[must_use]
    pub fn log(&self) -> Vec<LogEntry> {
        self.inner.log.entries()
    }

    /// The request currently live behind this handle.
    ///
    /// Returns a clone of `self` unless a chain step was swapped in.
    #[must_use]
    pub fn live(&self) -> Self {
        self.with_live(Clone::clone)
    }

    // -- parameters -------------------------------------------------------

    /// Declared parameters, without per-attempt additions.
    #[must_use]
    pub fn parameters(&self) -> Parameters {
        self.inner.state.lock().parameters.clone()
    }

    /// Merges `params` into the declared parameters. Last write wins.
    pub fn add_parameters(&self, params: impl Into<Params>) {
        let params = params.into().into_inner();
        let mut state = self.inner.state.lock();
        for (name, value) in params {
            self.inner.log.put(format!("Add parameter: {name}={value}"));
            state.parameters.insert(name, value);
        }
    }

    // -- configuration ----------------------------------------------------

    /// Attempts made during the current send.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.with_live(|live| live.inner.state.lock().attempts)
    }

    /// Attempt budget (0 = unlimited).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.with_live(|live| live.inner.state.lock().max_attempts)
    }

    /// Sets the attempt budget (0 = unlimited).
    pub fn set_max_attempts(&self, max_attempts: u32) {
        self.with_live(|live| {
            live.inner.state.lock().max_attempts = max_attempts;
            live.inner.log.put(format!("Set max attempts: {max_attempts}"));
        });
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.with_live(|live| live.inner.state.lock().timeout)
    }

    /// Sets the per-attempt timeout.
    pub fn set_timeout(&self, timeout: Duration) {
        self.with_live(|live| {
            live.inner.state.lock().timeout = timeout;
            live.inner.log.put(format!("Set timeout: {timeout:?}"));
        });
    }

    /// Whether captcha and auth errors are recovered automatically.
    #[must_use]
    pub fn catch_errors(&self) -> bool {
        self.with_live(|live| live.inner.state.lock().catch_errors)
    }

    /// Enables or disables automatic error recovery.
    pub fn set_catch_errors(&self, catch_errors: bool) {
        self.with_live(|live| live.inner.state.lock().catch_errors = catch_errors);
    }

    /// Where attempts execute.
    #[must_use]
    pub fn send_mode(&self) -> SendMode {
        self.with_live(|live| live.inner.state.lock().send_mode)
    }

    /// Chooses where attempts execute.
    pub fn set_send_mode(&self, mode: SendMode) {
        self.with_live(|live| live.inner.state.lock().send_mode = mode);
    }

    /// Response language: the override if set, else the session default.
    #[must_use]
    pub fn language(&self) -> Option<String> {
        self.with_live(Self::local_language)
    }

    /// Sets or clears the language override.
    ///
    /// Unsupported codes are ignored. Returns true if the override changed.
    pub fn set_language(&self, language: Option<&str>) -> bool {
        self.with_live(|live| {
            if let Some(code) = language {
                if !live.inner.session.config().supports_language(code) {
                    live.inner.log.put(format!("Ignore unsupported language: {code}"));
                    return false;
                }
            }
            live.inner.state.lock().language = language.map(String::from);
            live.inner.log.put(format!("Set language: {language:?}"));
            true
        })
    }

    /// Applies every override present in `config`.
    pub fn configure(&self, config: &RequestConfig) {
        if let Some(timeout) = config.timeout {
            self.set_timeout(timeout);
        }
        if let Some(max_attempts) = config.max_attempts {
            self.set_max_attempts(max_attempts);
        }
        if let Some(catch_errors) = config.catch_errors {
            self.set_catch_errors(catch_errors);
        }
        if let Some(mode) = config.send_mode {
            self.set_send_mode(mode);
        }
        if let Some(language) = &config.language {
            self.set_language(Some(language.as_str()));
        }
    }

    /// Builder-style [`Request::configure`].
    #[must_use]
    pub fn configured(self, config: &RequestConfig) -> Self {
        self.configure(config);
        self
    }

    // -- callbacks --------------------------------------------------------

    /// Installs the success callback.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.set_success_callback(Arc::new(callback));
        self
    }

    /// Installs the error callback.
    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&RequestError) + Send + Sync + 'static,
    {
        self.set_error_callback(Arc::new(callback));
        self
    }

    /// Installs the progress callback.
    pub fn on_progress<F>(&self, callback: F) -> &Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.set_progress_callback(Arc::new(callback));
        self
    }

    pub(crate) fn set_success_callback(&self, callback: SuccessCallback) {
        self.with_live(|live| {
            live.inner.callbacks.lock().success = Some(callback);
            live.inner.log.put("Set new success block");
        });
    }

    pub(crate) fn set_error_callback(&self, callback: ErrorCallback) {
        self.with_live(|live| {
            live.inner.callbacks.lock().error = Some(callback);
            live.inner.log.put("Set new error block");
        });
    }

    pub(crate) fn set_progress_callback(&self, callback: ProgressCallback) {
        self.with_live(|live| {
            live.inner.callbacks.lock().progress = Some(callback);
            live.inner.log.put("Set new progress block");
        });
    }

    // -- results ----------------------------------------------------------

    /// Payload of the last delivered success.
    #[must_use]
    pub fn payload(&self) -> Option<Vec<u8>> {
        self.with_live(|live| live.inner.response.payload())
    }

    /// Error of the last delivered failure.
    #[must_use]
    pub fn error(&self) -> Option<RequestError> {
        self.with_live(|live| live.inner.response.error())
    }

    /// Parses the last delivered payload as JSON.
    pub fn json(&self) -> Option<Result<Value, RequestError>> {
        self.payload().map(|payload| {
            serde_json::from_slice(&payload).map_err(|e| RequestError::parse(e.to_string()))
        })
    }

    // -- cancellation -----------------------------------------------------

    /// Cancels the live request.
    pub fn cancel(&self) {
        self.cancel_with_reason(DEFAULT_CANCEL_REASON);
    }

    /// Cancels the live request, recording `reason`.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.with_live(|live| {
            if live.inner.cancel.cancel(reason.clone()) {
                live.inner.log.put(format!("Cancel: {reason}"));
                info!(request_id = live.id(), reason = %reason, "Request cancelled");
            }
        });
    }

    /// Returns true if the live request was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.with_live(|live| live.inner.cancel.is_cancelled())
    }

    // -- sending ----------------------------------------------------------

    /// Sends the request and waits for its terminal outcome.
    ///
    /// Every call restarts from zero attempts. The outcome is also delivered
    /// through the installed callbacks.
    pub async fn send(&self) -> Outcome {
        self.unswap();
        self.reset_for_send();
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

    /// Sends the request on a runtime task.
    ///
    /// The send is reset before this returns, so a `cancel()` issued right
    /// after is never lost.
    pub fn spawn(&self) -> JoinHandle<Outcome> {
        self.unswap();
        self.reset_for_send();
        let request = self.clone();
        tokio::spawn(async move { request.drive().await })
    }

    /// Chains `builder` after this request.
    ///
    /// The builder receives this request's parsed payload and returns the
    /// next request.
    pub fn chain<F>(self, builder: F) -> Chain
    where
        F: Fn(Value) -> Result<Self, RequestError> + Send + Sync + 'static,
    {
        Chain::new(self).chain(builder)
    }

    /// Runs one attempt on a runtime worker.
    ///
    /// Returns `None` without contacting the transport once the budget is
    /// spent.
    pub(crate) async fn try_send(&self) -> Option<AttemptOutcome> {
        let attempt = self.begin_attempt(SendMode::Asynchronous)?;
        Some(self.dispatch(SendMode::Asynchronous, attempt).await)
    }

    /// Runs one attempt on the calling task.
    ///
    /// Returns `None` without contacting the transport once the budget is
    /// spent.
    pub(crate) async fn try_in_current_thread(&self) -> Option<AttemptOutcome> {
        let attempt = self.begin_attempt(SendMode::Synchronous)?;
        Some(self.dispatch(SendMode::Synchronous, attempt).await)
    }

    // -- internals --------------------------------------------------------

    /// Calls `f` with the innermost live request.
    ///
    /// The swap cell stays locked while `f` runs on the innermost request,
    /// so a concurrent swap cannot slip in between.
    fn with_live<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let swapped = self.inner.swapped.lock();
        match swapped.as_ref() {
            Some(next) => {
                let next = next.clone();
                drop(swapped);
                next.with_live(f)
            }
            None => f(self),
        }
    }

    fn local_language(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .language
            .clone()
            .or_else(|| self.inner.session.config().language.clone())
    }

    pub(crate) fn local_is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn callbacks(&self) -> Callbacks {
        self.inner.callbacks.lock().clone()
    }

    /// Swaps `next` in behind this request.
    ///
    /// `next` inherits this request's callbacks and cancellation.
    pub(crate) fn swap_to(&self, next: &Self) {
        let mut swapped = self.inner.swapped.lock();
        *next.inner.callbacks.lock() = self.inner.callbacks.lock().clone();
        *swapped = Some(next.clone());
        let reason = self
            .inner
            .cancel
            .is_cancelled()
            .then(|| self.inner.cancel.reason().unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()));
        drop(swapped);

        self.inner.log.put(format!("Swap to request {}", next.id()));
        if let Some(reason) = reason {
            next.cancel_with_reason(reason);
        }
    }

    /// Drops a successor left by an earlier chain run and takes back the
    /// callbacks installed on it.
    pub(crate) fn unswap(&self) {
        let live = self.live();
        if live.id() != self.id() {
            self.restore(live.callbacks());
        }
    }

    /// Removes any swapped-in successor and takes back `callbacks`.
    pub(crate) fn restore(&self, callbacks: Callbacks) {
        let mut swapped = self.inner.swapped.lock();
        if swapped.take().is_some() {
            *self.inner.callbacks.lock() = callbacks;
            self.inner.log.put("Restore after chain");
        }
    }

    pub(crate) fn reset_for_send(&self) {
        {
            let mut state = self.inner.state.lock();
            state.attempts = 0;
            state.auth_fails = 0;
        }
        self.inner.cancel.reset();
        self.inner.response.reset();
        self.inner.log.put("Send");
    }

    /// Runs the attempt loop, then delivers the outcome.
    pub(crate) async fn drive(&self) -> Outcome {
        let outcome = self.run().await;
        self.finish(outcome)
    }

    /// Runs the attempt loop without delivering.
    pub(crate) async fn run(&self) -> Outcome {
        let outcome = self.attempt_loop().await;
        if let Some(sid) = self.inner.session.captcha().abandon(self.id()) {
            self.inner.log.put(format!("Release captcha {sid}"));
        }
        outcome
    }

    /// Delivers `outcome` through this request's slot and callbacks.
    ///
    /// A cancelled request always delivers the cancellation error.
    pub(crate) fn finish(&self, outcome: Outcome) -> Outcome {
        let outcome = match outcome {
            Err(e) if e.is_cancelled() => Err(e),
            _ if self.local_is_cancelled() => Err(self.cancellation()),
            other => other,
        };

        let callbacks = self.callbacks();
        let delivered = match &outcome {
            Ok(payload) => {
                self.inner.log.put("Execute success block");
                self.inner.response.execute_success(payload.clone(), &callbacks)
            }
            Err(error) => {
                self.inner.log.put(format!("Execute error block: {error}"));
                self.inner.response.execute_error(error.clone(), &callbacks)
            }
        };
        if !delivered {
            self.inner.log.put("Already answered, outcome dropped");
        }
        outcome
    }

    pub(crate) fn cancellation(&self) -> RequestError {
        RequestError::cancelled(
            self.inner
                .cancel
                .reason()
                .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()),
        )
    }

    async fn attempt_loop(&self) -> Outcome {
        let mut last_error: Option<RequestError> = None;

        loop {
            if self.local_is_cancelled() {
                return Err(self.cancellation());
            }

            let mode = self.inner.state.lock().send_mode;
            let attempt = match mode {
                SendMode::Asynchronous => self.try_send().await,
                SendMode::Synchronous => self.try_in_current_thread().await,
            };

            let body = match attempt {
                None => return Err(self.exhausted(last_error)),
                Some(AttemptOutcome::Cancelled) => return Err(self.cancellation()),
                Some(AttemptOutcome::Completed(body)) => body,
            };

            let error = match body.map_err(RequestError::from).and_then(unwrap_envelope) {
                Ok(payload) => {
                    self.inner.log.put(format!("Success with {} bytes", payload.len()));
                    return Ok(payload);
                }
                Err(error) => error,
            };

            let (attempt, ctx) = {
                let state = self.inner.state.lock();
                let ctx = RetryContext {
                    auth_fails: state.auth_fails,
                    max_auth_retries: self.inner.session.config().max_auth_retries,
                    catch_errors: state.catch_errors,
                };
                (state.attempts, ctx)
            };
            self.inner.log.put(format!("Attempt {attempt} failed: {error}"));

            match decide(&error, &ctx) {
                RetryDecision::Retry => self.pause_before_retry(attempt).await,
                RetryDecision::SolicitCaptcha(challenge) => {
                    let captcha = self.inner.session.captcha();
                    self.inner.log.put(format!("Solicit captcha {}", challenge.sid));
                    captcha.solicit(self.id(), challenge)?;

                    let timeout = self.inner.state.lock().timeout;
                    tokio::select! {
                        biased;
                        () = self.inner.cancel.cancelled() => return Err(self.cancellation()),
                        resolved = captcha.wait_resolved(self.id(), timeout) => {
                            self.inner.log.put(if resolved {
                                "Captcha answered"
                            } else {
                                "Captcha still pending, retrying"
                            });
                        }
                    }
                }
                RetryDecision::RefreshToken => {
                    self.inner.state.lock().auth_fails += 1;
                    let refreshed = self.inner.session.token().refresh().await;
                    self.inner.log.put(format!("Token refresh: {refreshed}"));
                    if !refreshed {
                        return Err(error);
                    }
                }
                RetryDecision::GiveUp => return Err(error),
            }

            last_error = Some(error);
        }
    }

    fn exhausted(&self, last_error: Option<RequestError>) -> RequestError {
        let (attempts, max_attempts) = {
            let state = self.inner.state.lock();
            (state.attempts, state.max_attempts)
        };
        self.inner
            .log
            .put(format!("Can no longer send! {attempts} of {max_attempts} times"));
        warn!(request_id = self.id(), attempts, max_attempts, "Attempt budget spent");

        match self.inner.session.captcha().abandon(self.id()) {
            Some(sid) => RequestError::CaptchaUnresolved {
                request_id: self.id(),
                sid,
            },
            None => RequestError::attempts_exhausted(attempts, last_error),
        }
    }

    async fn pause_before_retry(&self, attempt: u32) {
        let delay = self.inner.session.config().backoff.delay(attempt);
        if delay.is_zero() {
            return;
        }
        self.inner.log.put(format!("Wait {delay:?} before retry"));
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = self.inner.cancel.cancelled() => {}
        }
    }

    fn begin_attempt(&self, mode: SendMode) -> Option<AttemptRequest> {
        let (attempt, max_attempts, timeout) = {
            let mut state = self.inner.state.lock();
            if !can_send(state.attempts, state.max_attempts) {
                return None;
            }
            state.attempts += 1;
            (state.attempts, state.max_attempts, state.timeout)
        };

        self.inner
            .log
            .put(format!("Prepare to send {mode} {attempt} of {max_attempts} times"));
        self.inner.response.clean();

        let config = self.inner.session.config();
        let (url, media, part_type) = match &self.inner.kind {
            RequestKind::Api { method } => (
                format!("{}/{method}", config.api_base_url.trim_end_matches('/')),
                Vec::new(),
                None,
            ),
            RequestKind::Upload {
                url,
                media,
                part_type,
            } => (url.clone(), media.clone(), Some(*part_type)),
            RequestKind::Url { url } => (url.clone(), Vec::new(), None),
        };

        Some(AttemptRequest {
            request_id: self.id(),
            attempt,
            url,
            http_method: self.http_method(),
            parameters: self.effective_parameters(),
            media,
            part_type,
            timeout,
        })
    }

    /// Parameters for the next attempt. Never cached: the token, captcha
    /// answer and language are read fresh every time.
    fn effective_parameters(&self) -> Parameters {
        let session = &self.inner.session;
        let mut parameters = self.inner.state.lock().parameters.clone();

        if let Some(token) = session.token().current_token() {
            parameters.insert("access_token".to_string(), token);
        }
        if let Some(answer) = session.captcha().take_answer(self.id()) {
            self.inner.log.put(format!("Attach captcha answer for {}", answer.sid));
            parameters.insert("captcha_sid".to_string(), answer.sid);
            parameters.insert("captcha_key".to_string(), answer.key);
        }
        parameters.insert("v".to_string(), session.config().api_version.clone());
        parameters.insert("https".to_string(), "1".to_string());
        if let Some(language) = self.local_language() {
            parameters.insert("lang".to_string(), language);
        }

        parameters
    }

    async fn dispatch(&self, mode: SendMode, attempt: AttemptRequest) -> AttemptOutcome {
        let number = attempt.attempt;
        let progress = {
            let request = self.clone();
            ProgressReporter::new(move |done, total| {
                request
                    .inner
                    .response
                    .execute_progress(done, total, &request.callbacks());
            })
        };

        let timer = SpanTimer::start(self.inner.kind.label());
        let outcome = transmit(
            mode,
            self.inner.session.transport(),
            attempt,
            progress,
            &self.inner.cancel,
        )
        .await;

        let mut attributes = RequestSpanAttributes::new(self.id(), timer.name())
            .with_attempt(number, self.inner.state.lock().max_attempts)
            .with_send_mode(mode)
            .with_duration_ms(timer.elapsed_ms());
        if let AttemptOutcome::Completed(Err(e)) = &outcome {
            attributes = attributes.with_error(e.to_string());
        }
        debug!(request_id = self.id(), fields = ?attributes.to_fields(), "Attempt finished");
        outcome
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        write!(
            f,
            "Request {}: {} parameters: {:?}, attempts: {}",
            self.inner.id,
            self.inner.kind.label(),
            state.parameters,
            state.max_attempts
        )
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("attempts", &state.attempts)
            .field("max_attempts", &state.max_attempts)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
