//! Session-wide defaults and per-request overrides.

use crate::errors::ConfigError;
use crate::pipeline::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Where a request's transport attempts execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Each attempt runs on a runtime worker task.
    #[default]
    Asynchronous,
    /// Each attempt runs on the caller's own task.
    Synchronous,
}

impl std::fmt::Display for SendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asynchronous => write!(f, "asynchronously"),
            Self::Synchronous => write!(f, "synchronously"),
        }
    }
}

/// Defaults shared by every request of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// API version sent as `v`.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Base URL for named API calls.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// Attempt budget for API calls (0 = unlimited).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Attempt budget for media uploads (0 = unlimited).
    #[serde(default = "default_upload_max_attempts")]
    pub upload_max_attempts: u32,
    /// Whether requests recover from captcha and auth errors automatically.
    #[serde(default = "default_catch_errors")]
    pub catch_errors: bool,
    /// Default transmission mode.
    #[serde(default)]
    pub send_mode: SendMode,
    /// Default response language.
    #[serde(default)]
    pub language: Option<String>,
    /// Language codes the remote service understands.
    #[serde(default = "default_supported_languages")]
    pub supported_languages: Vec<String>,
    /// Token refreshes allowed per send after auth failures.
    #[serde(default = "default_max_auth_retries")]
    pub max_auth_retries: u32,
    /// Delay between retryable attempts.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Whether request logs are forwarded to `tracing`.
    #[serde(default = "default_log_to_console")]
    pub log_to_console: bool,
}

fn default_api_version() -> String {
    "5.131".to_string()
}

fn default_api_base_url() -> String {
    "https://api.vk.com/method".to_string()
}

fn default_timeout() -> f64 {
    10.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_upload_max_attempts() -> u32 {
    10
}

fn default_catch_errors() -> bool {
    true
}

fn default_supported_languages() -> Vec<String> {
    ["ru", "uk", "be", "en", "es", "fi", "de", "it"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_auth_retries() -> u32 {
    1
}

fn default_log_to_console() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            api_base_url: default_api_base_url(),
            timeout_seconds: default_timeout(),
            max_attempts: default_max_attempts(),
            upload_max_attempts: default_upload_max_attempts(),
            catch_errors: default_catch_errors(),
            send_mode: SendMode::default(),
            language: None,
            supported_languages: default_supported_languages(),
            max_auth_retries: default_max_auth_retries(),
            backoff: BackoffConfig::default(),
            log_to_console: default_log_to_console(),
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Sets the API version.
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the API attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the upload attempt budget.
    #[must_use]
    pub fn with_upload_max_attempts(mut self, attempts: u32) -> Self {
        self.upload_max_attempts = attempts;
        self
    }

    /// Enables or disables automatic error recovery.
    #[must_use]
    pub fn with_catch_errors(mut self, catch_errors: bool) -> Self {
        self.catch_errors = catch_errors;
        self
    }

    /// Sets the default transmission mode.
    #[must_use]
    pub fn with_send_mode(mut self, mode: SendMode) -> Self {
        self.send_mode = mode;
        self
    }

    /// Sets the default language. Unsupported codes are ignored.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        let language = language.into();
        if self.supports_language(&language) {
            self.language = Some(language);
        }
        self
    }

    /// Sets the token refresh budget.
    #[must_use]
    pub fn with_max_auth_retries(mut self, retries: u32) -> Self {
        self.max_auth_retries = retries;
        self
    }

    /// Sets the backoff between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables or disables forwarding request logs to `tracing`.
    #[must_use]
    pub fn with_log_to_console(mut self, enabled: bool) -> Self {
        self.log_to_console = enabled;
        self
    }

    /// Gets the timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    /// Returns true if `code` is a supported language.
    #[must_use]
    pub fn supports_language(&self, code: &str) -> bool {
        self.supported_languages.iter().any(|l| l == code)
    }
}

/// Per-request overrides, applied on top of the session defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Per-attempt timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Attempt budget (0 = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Automatic error recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch_errors: Option<bool>,
    /// Transmission mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_mode: Option<SendMode>,
    /// Response language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl RequestConfig {
    /// Creates an empty override set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides used for media uploads: a longer attempt timeout.
    ///
    /// The attempt budget of uploads comes from
    /// [`SessionConfig::upload_max_attempts`].
    #[must_use]
    pub fn upload() -> Self {
        Self::new().with_timeout(Duration::from_secs(30))
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets automatic error recovery.
    #[must_use]
    pub fn with_catch_errors(mut self, catch_errors: bool) -> Self {
        self.catch_errors = Some(catch_errors);
        self
    }

    /// Sets the transmission mode.
    #[must_use]
    pub fn with_send_mode(mut self, mode: SendMode) -> Self {
        self.send_mode = Some(mode);
        self
    }

    /// Sets the language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.upload_max_attempts, 10);
        assert_eq!(config.send_mode, SendMode::Asynchronous);
        assert!(config.catch_errors);
        assert!(config.supports_language("en"));
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_with_language_ignores_unsupported() {
        let config = SessionConfig::new().with_language("en").with_language("xx");
        assert_eq!(config.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{"max_attempts": 0, "send_mode": "synchronous", "language": "ru"}"#,
        )
        .unwrap();

        assert_eq!(config.max_attempts, 0);
        assert_eq!(config.send_mode, SendMode::Synchronous);
        assert_eq!(config.language.as_deref(), Some("ru"));
        assert_eq!(config.api_version, "5.131");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            SessionConfig::from_json_str("{not json"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"api_version": "5.199", "timeout_seconds": 2.5}}"#).unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api_version, "5.199");
        assert_eq!(config.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_request_config_upload_preset() {
        let config = RequestConfig::upload();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.language, None);
    }
}
