//! Success, error and progress callbacks.

use crate::errors::RequestError;
use std::sync::Arc;
use tracing::warn;

/// Invoked with the raw payload of a successful request.
pub type SuccessCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Invoked with the terminal error of a failed request.
pub type ErrorCallback = Arc<dyn Fn(&RequestError) + Send + Sync>;
/// Invoked with `(done, total)` byte counts while an attempt is in flight.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// The callbacks installed on a request.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub(crate) success: Option<SuccessCallback>,
    pub(crate) error: Option<ErrorCallback>,
    pub(crate) progress: Option<ProgressCallback>,
}

impl Callbacks {
    /// Returns true if a success callback is installed.
    #[must_use]
    pub fn has_success(&self) -> bool {
        self.success.is_some()
    }

    /// Returns true if an error callback is installed.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn fire_success(&self, payload: &[u8]) {
        if let Some(callback) = &self.success {
            guarded("success", || callback(payload));
        }
    }

    pub(crate) fn fire_error(&self, error: &RequestError) {
        if let Some(callback) = &self.error {
            guarded("error", || callback(error));
        }
    }

    pub(crate) fn fire_progress(&self, done: u64, total: u64) {
        if let Some(callback) = &self.progress {
            guarded("progress", || callback(done, total));
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

// A panicking callback must not take the pipeline down with it.
fn guarded(kind: &str, f: impl FnOnce()) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        warn!(callback = kind, "Callback panicked: {:?}", e);
    }
}
