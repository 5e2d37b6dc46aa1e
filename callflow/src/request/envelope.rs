//! Unwrapping of the remote service's response envelope.
//!
//! API responses arrive as `{"response": ...}` or `{"error": {...}}`. Upload
//! servers answer with bare objects, sometimes carrying a string `error`.
//! Anything that is not a recognizable envelope passes through untouched so
//! the chain step that consumes it can decide.

use crate::errors::{ApiError, RequestError};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct DeclaredError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
    #[serde(default)]
    captcha_sid: Option<String>,
    #[serde(default)]
    captcha_img: Option<String>,
}

impl From<DeclaredError> for ApiError {
    fn from(e: DeclaredError) -> Self {
        Self {
            code: e.error_code,
            message: e.error_msg,
            captcha_sid: e.captcha_sid,
            captcha_img: e.captcha_img,
        }
    }
}

/// Turns a raw body into a payload or a declared error.
pub fn unwrap_envelope(body: Vec<u8>) -> Result<Vec<u8>, RequestError> {
    let Ok(Value::Object(mut object)) = serde_json::from_slice::<Value>(&body) else {
        return Ok(body);
    };

    if let Some(error) = object.remove("error") {
        return Err(match error {
            Value::String(message) => ApiError::new(0, message).into(),
            other => match serde_json::from_value::<DeclaredError>(other) {
                Ok(declared) => ApiError::from(declared).into(),
                Err(e) => RequestError::parse(format!("malformed error envelope: {e}")),
            },
        });
    }

    match object.remove("response") {
        Some(response) => serde_json::to_vec(&response)
            .map_err(|e| RequestError::parse(format!("cannot re-encode response: {e}"))),
        None => Ok(body),
    }
}
