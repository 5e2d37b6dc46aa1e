//! The surface shared by single requests and chains.

use super::chain::Chain;
use crate::config::RequestConfig;
use crate::request::{ErrorCallback, Outcome, ProgressCallback, Request, SuccessCallback};
use async_trait::async_trait;

/// Anything that can be configured, observed, cancelled and sent as one
/// logical call.
///
/// Implemented by [`Request`] and [`Chain`] so callers can hold either
/// behind `Arc<dyn Call>`.
#[async_trait]
pub trait Call: Send + Sync {
    /// Id of the live request.
    fn id(&self) -> u64;

    /// The live request.
    fn live(&self) -> Request;

    /// Installs the success callback on the live request.
    fn set_success_callback(&self, callback: SuccessCallback);

    /// Installs the error callback on the live request.
    fn set_error_callback(&self, callback: ErrorCallback);

    /// Installs the progress callback on the live request.
    fn set_progress_callback(&self, callback: ProgressCallback);

    /// Applies overrides to the live request.
    fn configure(&self, config: &RequestConfig);

    /// Cancels the live request.
    fn cancel(&self);

    /// Returns true if the live request was cancelled.
    fn is_cancelled(&self) -> bool;

    /// Sends and waits for the terminal outcome.
    async fn send(&self) -> Outcome;
}

#[async_trait]
impl Call for Request {
    fn id(&self) -> u64 {
        Request::id(self)
    }

    fn live(&self) -> Request {
        Request::live(self)
    }

    fn set_success_callback(&self, callback: SuccessCallback) {
        Request::set_success_callback(self, callback);
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        Request::set_error_callback(self, callback);
    }

    fn set_progress_callback(&self, callback: ProgressCallback) {
        Request::set_progress_callback(self, callback);
    }

    fn configure(&self, config: &RequestConfig) {
        Request::configure(self, config);
    }

    fn cancel(&self) {
        Request::cancel(self);
    }

    fn is_cancelled(&self) -> bool {
        Request::is_cancelled(self)
    }

    async fn send(&self) -> Outcome {
        Request::send(self).await
    }
}

#[async_trait]
impl Call for Chain {
    fn id(&self) -> u64 {
        Chain::id(self)
    }

    fn live(&self) -> Request {
        Chain::live(self)
    }

    fn set_success_callback(&self, callback: SuccessCallback) {
        self.head().set_success_callback(callback);
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        self.head().set_error_callback(callback);
    }

    fn set_progress_callback(&self, callback: ProgressCallback) {
        self.head().set_progress_callback(callback);
    }

    fn configure(&self, config: &RequestConfig) {
        Chain::configure(self, config);
    }

    fn cancel(&self) {
        Chain::cancel(self);
    }

    fn is_cancelled(&self) -> bool {
        Chain::is_cancelled(self)
    }

    async fn send(&self) -> Outcome {
        Chain::send(self).await
    }
}
