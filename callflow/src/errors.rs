//! Error types for the callflow pipeline.
//!
//! Every terminal outcome of a request is a [`RequestError`]. The pipeline
//! classifies errors with [`RequestError::class`] to decide between retrying,
//! captcha recovery, token refresh and giving up.

use crate::captcha::CaptchaChallenge;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// API error code for "captcha needed".
pub const CAPTCHA_NEEDED: i64 = 14;
/// API error code for "user authorization failed".
pub const AUTHORIZATION_FAILED: i64 = 5;
/// API error codes worth a plain retry.
pub const TRANSIENT_CODES: [i64; 4] = [1, 6, 9, 10];

/// The main error type for request operations.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The transport could not complete an attempt.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The remote service answered with a declared error.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// A response body did not have the expected structure.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the mismatch.
        message: String,
    },

    /// The attempt budget was spent.
    #[error("Attempts exhausted after {attempts} attempt(s)")]
    AttemptsExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last retryable failure, if any.
        last_error: Option<Box<RequestError>>,
    },

    /// The request was cancelled by its owner.
    #[error("Request cancelled: {reason}")]
    Cancelled {
        /// Cancellation reason.
        reason: String,
    },

    /// Another request already holds the captcha slot.
    #[error("Captcha conflict: request {request_id} hit a captcha while request {pending_owner} is still waiting for one")]
    CaptchaConflict {
        /// The request whose challenge was refused.
        request_id: u64,
        /// The request that owns the pending challenge.
        pending_owner: u64,
    },

    /// The budget ran out while a captcha answer was still outstanding.
    #[error("Captcha {sid} was not resolved before request {request_id} ran out of attempts")]
    CaptchaUnresolved {
        /// The request that gave up.
        request_id: u64,
        /// The challenge id.
        sid: String,
    },
}

/// How the pipeline should treat an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try again within the attempt budget.
    Retryable,
    /// Needs an externally supplied captcha answer before retrying.
    Captcha(CaptchaChallenge),
    /// The access token was rejected.
    Auth,
    /// Stop and report.
    Terminal,
}

impl RequestError {
    /// Creates a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates an exhausted-budget error.
    #[must_use]
    pub fn attempts_exhausted(attempts: u32, last_error: Option<Self>) -> Self {
        Self::AttemptsExhausted {
            attempts,
            last_error: last_error.map(Box::new),
        }
    }

    /// Classifies the error for the retry loop.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) => ErrorClass::Retryable,
            Self::Api(api) => api.class(),
            _ => ErrorClass::Terminal,
        }
    }

    /// Returns true if the error may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Returns true if this is a cancellation outcome.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the declared API error, if this is one.
    #[must_use]
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        let kind = match self {
            Self::Transport(_) => "Transport",
            Self::Api(api) => {
                map.insert("code".to_string(), serde_json::json!(api.code));
                "Api"
            }
            Self::Parse { .. } => "Parse",
            Self::AttemptsExhausted { attempts, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                "AttemptsExhausted"
            }
            Self::Cancelled { .. } => "Cancelled",
            Self::CaptchaConflict {
                request_id,
                pending_owner,
            } => {
                map.insert("request_id".to_string(), serde_json::json!(request_id));
                map.insert("pending_owner".to_string(), serde_json::json!(pending_owner));
                "CaptchaConflict"
            }
            Self::CaptchaUnresolved { request_id, sid } => {
                map.insert("request_id".to_string(), serde_json::json!(request_id));
                map.insert("sid".to_string(), serde_json::json!(sid));
                "CaptchaUnresolved"
            }
        };

        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Failure of a single transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The attempt did not finish within its timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The connection could not be made or broke.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The worker running the attempt failed.
    #[error("worker failed: {0}")]
    Worker(String),
}

/// A structured failure declared by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("API error {code}: {message}")]
pub struct ApiError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Captcha challenge id (code 14 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_sid: Option<String>,
    /// Captcha image URL (code 14 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha_img: Option<String>,
}

impl ApiError {
    /// Creates a new API error.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            captcha_sid: None,
            captcha_img: None,
        }
    }

    /// Creates a captcha challenge error.
    #[must_use]
    pub fn captcha(sid: impl Into<String>, img: impl Into<String>) -> Self {
        Self {
            code: CAPTCHA_NEEDED,
            message: "Captcha needed".to_string(),
            captcha_sid: Some(sid.into()),
            captcha_img: Some(img.into()),
        }
    }

    /// Classifies the declared error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self.code {
            CAPTCHA_NEEDED => self.captcha_sid.as_ref().map_or(ErrorClass::Terminal, |sid| {
                ErrorClass::Captcha(CaptchaChallenge::new(sid.clone(), self.captcha_img.clone()))
            }),
            AUTHORIZATION_FAILED => ErrorClass::Auth,
            code if TRANSIENT_CODES.contains(&code) => ErrorClass::Retryable,
            _ => ErrorClass::Terminal,
        }
    }
}

/// Errors raised by the captcha coordinator when an answer is supplied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptchaError {
    /// No challenge is waiting for an answer.
    #[error("No captcha challenge is pending")]
    NoPendingChallenge,

    /// The answer is for a different challenge.
    #[error("Captcha answer for '{got}' does not match pending challenge '{expected}'")]
    SidMismatch {
        /// The pending challenge id.
        expected: String,
        /// The supplied challenge id.
        got: String,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be decoded.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}
