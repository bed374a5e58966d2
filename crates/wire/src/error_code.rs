//! Server-reported error codes and their classification.
//!
//! A response whose payload carries an `"error"` string key at the root is a
//! failure; `localizedMessage` supplies the human text and `retryAfter` an
//! optional throttle hint in seconds. [`classify`] maps the machine code onto
//! the coarse class the engine acts on.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Failure payload embedded in a response frame.
///
/// Only the keys the engine acts on are modeled; anything else the server
/// includes is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable code, e.g. `login.token`.
    pub error: String,
    /// Human-readable text supplied by the server.
    #[serde(default)]
    pub localized_message: Option<String>,
    /// Throttle hint in seconds, present on some rate-limit responses.
    #[serde(default)]
    pub retry_after: Option<f64>,
}

impl ErrorPayload {
    /// Extracts the failure payload from a response, or `None` when the
    /// response is a success.
    ///
    /// The convention is an `"error"` string key at the payload root.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        payload.get("error")?.as_str()?;
        serde_json::from_value(payload.clone()).ok()
    }

    /// Classifies this failure per [`classify`].
    pub fn class(&self) -> ErrorClass {
        classify(&self.error)
    }

    /// Server-suggested wait before retrying, when present.
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_after.map(Duration::from_secs_f64)
    }

    /// Best human-readable description: the localized text when the server
    /// sent one, the raw code otherwise.
    pub fn message(&self) -> &str {
        self.localized_message.as_deref().unwrap_or(&self.error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Coarse class of a server error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credential or token failure. Fatal for the session; the engine never
    /// retries these on its own.
    Auth,
    /// Request throttled; retryable after the suggested delay.
    RateLimited,
    /// The request itself was rejected as malformed or invalid. Repeating
    /// it unchanged cannot succeed.
    InvalidInput,
    /// Transient server-side fault.
    ServerError,
    /// Unrecognized code, surfaced as a generic server error.
    Unknown,
}

impl ErrorClass {
    /// Whether another attempt at the same request can reasonably succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::RateLimited | ErrorClass::ServerError)
    }
}

/// Maps a machine-readable server code onto its [`ErrorClass`].
pub fn classify(code: &str) -> ErrorClass {
    if code.starts_with("login.") || code.starts_with("verify.") || code.starts_with("auth.") {
        ErrorClass::Auth
    } else if matches!(code, "rate.limit" | "too.many.requests" | "flood.wait") {
        ErrorClass::RateLimited
    } else if code.starts_with("invalid.") || code.starts_with("param.") || code == "payload.malformed"
    {
        ErrorClass::InvalidInput
    } else if matches!(code, "internal.error" | "service.unavailable") {
        ErrorClass::ServerError
    } else {
        ErrorClass::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_codes_are_fatal() {
        assert_eq!(classify("login.token"), ErrorClass::Auth);
        assert_eq!(classify("verify.code.wrong"), ErrorClass::Auth);
        assert_eq!(classify("auth.denied"), ErrorClass::Auth);
        assert!(!ErrorClass::Auth.is_retryable());
    }

    #[test]
    fn throttle_codes_are_retryable() {
        for code in ["rate.limit", "too.many.requests", "flood.wait"] {
            assert_eq!(classify(code), ErrorClass::RateLimited);
        }
        assert!(ErrorClass::RateLimited.is_retryable());
    }

    #[test]
    fn invalid_input_is_not_retryable() {
        assert_eq!(classify("invalid.phone"), ErrorClass::InvalidInput);
        assert_eq!(classify("param.missing"), ErrorClass::InvalidInput);
        assert_eq!(classify("payload.malformed"), ErrorClass::InvalidInput);
        assert!(!ErrorClass::InvalidInput.is_retryable());
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(classify("chat.not.found"), ErrorClass::Unknown);
        assert!(!ErrorClass::Unknown.is_retryable());
    }

    #[test]
    fn extracts_failure_payload() {
        let payload = json!({
            "error": "flood.wait",
            "localizedMessage": "Слишком много запросов",
            "retryAfter": 2.5,
        });
        let err = ErrorPayload::from_payload(&payload).unwrap();
        assert_eq!(err.class(), ErrorClass::RateLimited);
        assert_eq!(err.message(), "Слишком много запросов");
        assert_eq!(err.retry_delay(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn success_payload_is_not_a_failure() {
        assert!(ErrorPayload::from_payload(&json!({"profile": {}})).is_none());
        // A non-string "error" key is not the failure convention.
        assert!(ErrorPayload::from_payload(&json!({"error": 5})).is_none());
    }

    #[test]
    fn message_falls_back_to_the_code() {
        let err = ErrorPayload::from_payload(&json!({"error": "internal.error"})).unwrap();
        assert_eq!(err.message(), "internal.error");
        assert_eq!(err.retry_delay(), None);
    }
}
