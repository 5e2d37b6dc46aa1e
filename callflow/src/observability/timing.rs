//! Span attributes and timing for request attempts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Correlation fields attached to a request's log lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSpanAttributes {
    /// Request id.
    pub request_id: u64,
    /// API method or target URL.
    pub target: String,
    /// Attempt number within the current send.
    pub attempt: Option<u32>,
    /// Attempt budget.
    pub max_attempts: Option<u32>,
    /// Send mode.
    pub send_mode: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Error message if the attempt failed.
    pub error: Option<String>,
}

impl RequestSpanAttributes {
    /// Creates attributes for a request.
    #[must_use]
    pub fn new(request_id: u64, target: impl Into<String>) -> Self {
        Self {
            request_id,
            target: target.into(),
            ..Default::default()
        }
    }

    /// Sets the attempt counters.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = Some(attempt);
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Sets the send mode.
    #[must_use]
    pub fn with_send_mode(mut self, mode: impl ToString) -> Self {
        self.send_mode = Some(mode.to_string());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Flattens the attributes into dotted keys.
    #[must_use]
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("request.id".to_string(), self.request_id.to_string());
        fields.insert("request.target".to_string(), self.target.clone());

        if let Some(v) = self.attempt {
            fields.insert("request.attempt".to_string(), v.to_string());
        }
        if let Some(v) = self.max_attempts {
            fields.insert("request.max_attempts".to_string(), v.to_string());
        }
        if let Some(ref v) = self.send_mode {
            fields.insert("request.send_mode".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            fields.insert("request.duration_ms".to_string(), format!("{v:.3}"));
        }
        if let Some(ref v) = self.error {
            fields.insert("request.error".to_string(), v.clone());
        }

        fields
    }
}

/// Measures how long something took.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
