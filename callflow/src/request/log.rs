//! Per-request trace log.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;

/// One line of a request's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// When the entry was recorded.
    pub at: DateTime<Utc>,
    /// What happened.
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }
}

/// Append-only log scoped to one request's lifetime.
///
/// Entries are also forwarded to `tracing` at debug level when `echo` is set.
#[derive(Debug)]
pub struct RequestLog {
    request_id: u64,
    echo: bool,
    entries: Mutex<Vec<LogEntry>>,
}

impl RequestLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new(request_id: u64, echo: bool) -> Self {
        Self {
            request_id,
            echo,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Appends an entry.
    pub fn put(&self, message: impl Into<String>) {
        let message = message.into();
        if self.echo {
            tracing::debug!(request_id = self.request_id, "{}", message);
        }
        self.entries.lock().push(LogEntry {
            at: Utc::now(),
            message,
        });
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Returns just the messages.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.message.clone()).collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
