//! Test assertions for send outcomes.

use crate::errors::RequestError;
use crate::request::Outcome;

/// Asserts that the outcome is a success and returns its payload.
pub fn assert_succeeded(outcome: &Outcome) -> &[u8] {
    match outcome {
        Ok(payload) => payload,
        Err(e) => panic!("Expected success, got error: {e}"),
    }
}

/// Asserts that the outcome is a declared API error with `code`.
pub fn assert_api_error(outcome: &Outcome, code: i64) {
    let actual = outcome.as_ref().err().and_then(RequestError::api).map(|e| e.code);
    assert_eq!(
        actual,
        Some(code),
        "Expected API error {code}, got {outcome:?}"
    );
}

/// Asserts that the outcome is a cancellation.
pub fn assert_cancelled(outcome: &Outcome) {
    assert!(
        matches!(outcome, Err(e) if e.is_cancelled()),
        "Expected cancellation, got {outcome:?}"
    );
}

/// Asserts that the budget ran out after exactly `attempts` attempts.
pub fn assert_exhausted(outcome: &Outcome, attempts: u32) {
    assert!(
        matches!(outcome, Err(RequestError::AttemptsExhausted { attempts: a, .. }) if *a == attempts),
        "Expected exhaustion after {attempts} attempts, got {outcome:?}"
    );
}

/// Parses a successful outcome's payload as JSON.
pub fn outcome_json(outcome: &Outcome) -> serde_json::Value {
    let payload = assert_succeeded(outcome);
    serde_json::from_slice(payload)
        .unwrap_or_else(|e| panic!("Expected JSON payload, got {e}: {payload:?}"))
}
