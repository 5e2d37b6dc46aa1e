//! The result holder attached to every request.

use super::callbacks::Callbacks;
use crate::errors::RequestError;
use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Default)]
enum SlotContent {
    #[default]
    Empty,
    Success(Vec<u8>),
    Error(RequestError),
}

#[derive(Debug, Default)]
struct SlotState {
    content: SlotContent,
    answered: bool,
}

/// Holds the payload or error of the current send and delivers it.
///
/// The content is cleaned before every attempt. Delivery happens at most once
/// per send: after a success or error has been delivered, further deliveries
/// are refused until [`ResponseSlot::reset`].
#[derive(Debug, Default)]
pub struct ResponseSlot {
    state: Mutex<SlotState>,
}

impl ResponseSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any stored payload or error.
    pub fn clean(&self) {
        self.state.lock().content = SlotContent::Empty;
    }

    /// Clears content and the delivered marker for a fresh send.
    pub fn reset(&self) {
        *self.state.lock() = SlotState::default();
    }

    /// Returns true once a terminal outcome has been delivered.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.state.lock().answered
    }

    /// Returns the stored payload, if the last outcome was a success.
    #[must_use]
    pub fn payload(&self) -> Option<Vec<u8>> {
        match &self.state.lock().content {
            SlotContent::Success(payload) => Some(payload.clone()),
            _ => None,
        }
    }

    /// Returns the stored error, if the last outcome was a failure.
    #[must_use]
    pub fn error(&self) -> Option<RequestError> {
        match &self.state.lock().content {
            SlotContent::Error(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Stores `payload` and fires the success callback.
    ///
    /// Returns false, without firing anything, if this send was already
    /// answered.
    pub fn execute_success(&self, payload: Vec<u8>, callbacks: &Callbacks) -> bool {
        {
            let mut state = self.state.lock();
            if state.answered {
                warn!("Refusing second delivery: request already answered");
                return false;
            }
            state.answered = true;
            state.content = SlotContent::Success(payload.clone());
        }
        callbacks.fire_success(&payload);
        true
    }

    /// Stores `error` and fires the error callback.
    ///
    /// Returns false, without firing anything, if this send was already
    /// answered.
    pub fn execute_error(&self, error: RequestError, callbacks: &Callbacks) -> bool {
        {
            let mut state = self.state.lock();
            if state.answered {
                warn!(error = %error, "Refusing second delivery: request already answered");
                return false;
            }
            state.answered = true;
            state.content = SlotContent::Error(error.clone());
        }
        callbacks.fire_error(&error);
        true
    }

    /// Forwards transfer progress to the progress callback.
    pub fn execute_progress(&self, done: u64, total: u64, callbacks: &Callbacks) {
        if !self.state.lock().answered {
            callbacks.fire_progress(done, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting() -> (Callbacks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let successes = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let (s, e) = (successes.clone(), errors.clone());
        let callbacks = Callbacks {
            success: Some(Arc::new(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            error: Some(Arc::new(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })),
            progress: None,
        };
        (callbacks, successes, errors)
    }

    #[test]
    fn test_success_delivered_once() {
        let slot = ResponseSlot::new();
        let (callbacks, successes, errors) = counting();

        assert!(slot.execute_success(b"{}".to_vec(), &callbacks));
        assert!(!slot.execute_success(b"{}".to_vec(), &callbacks));
        assert!(!slot.execute_error(RequestError::parse("late"), &callbacks));

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(slot.payload(), Some(b"{}".to_vec()));
        assert!(slot.error().is_none());
    }

    #[test]
    fn test_error_holds_no_payload() {
        let slot = ResponseSlot::new();
        let (callbacks, _, errors) = counting();

        slot.execute_error(RequestError::cancelled("user"), &callbacks);

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(slot.payload().is_none());
        assert!(slot.error().unwrap().is_cancelled());
    }

    #[test]
    fn test_clean_keeps_answered_marker() {
        let slot = ResponseSlot::new();
        let (callbacks, successes, _) = counting();

        slot.execute_success(b"1".to_vec(), &callbacks);
        slot.clean();
        assert!(slot.payload().is_none());
        assert!(slot.is_answered());

        slot.reset();
        assert!(slot.execute_success(b"2".to_vec(), &callbacks));
        assert_eq!(successes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_progress_stops_after_answer() {
        let slot = ResponseSlot::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();
        let callbacks = Callbacks {
            progress: Some(Arc::new(move |_, _| {
                ticks_clone.fetch_add(1, Ordering::SeqCst);
            })),
            ..Callbacks::default()
        };

        slot.execute_progress(1, 10, &callbacks);
        slot.execute_success(Vec::new(), &callbacks);
        slot.execute_progress(10, 10, &callbacks);

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
