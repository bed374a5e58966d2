//! Error taxonomy surfaced to callers.

use std::time::Duration;

use oneme_wire::{classify, ErrorPayload};

use crate::transport::TransportError;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// One failure per request, one kind per cause.
///
/// The enum is `Clone` (sources are string-rendered) so a single connection
/// loss can be delivered to every in-flight request at once.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The transport could not be established or broke down.
    #[error("connection: {0}")]
    Connection(String),

    /// Credential or token failure, including client-side phone validation.
    /// Fatal; the engine never retries these on its own.
    #[error("authentication: {0}")]
    Auth(String),

    /// A frame or payload that does not follow the protocol.
    #[error("protocol: {0}")]
    Protocol(String),

    /// No response arrived within the caller's window.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server throttled the request.
    #[error("rate limited by the server")]
    RateLimited {
        /// Server-suggested wait, when it sent one.
        retry_after: Option<Duration>,
    },

    /// A server-reported failure outside the dedicated kinds above.
    #[error("server error {code}: {message}")]
    Server { code: String, message: String },

    /// The connection went away with the request in flight, or the client
    /// is closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Whether resubmitting the same call can reasonably succeed.
    ///
    /// The engine itself never replays requests; this answer is for callers
    /// implementing their own retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection(_)
            | Error::Timeout(_)
            | Error::RateLimited { .. }
            | Error::ConnectionClosed => true,
            Error::Auth(_) | Error::Protocol(_) => false,
            Error::Server { code, .. } => classify(code).is_retryable(),
        }
    }

    /// Server-suggested wait before retrying a throttled request.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Typed error for a server failure payload.
    pub(crate) fn from_server(err: &ErrorPayload) -> Self {
        match err.class() {
            oneme_wire::ErrorClass::Auth => Error::Auth(err.message().to_string()),
            oneme_wire::ErrorClass::RateLimited => Error::RateLimited {
                retry_after: err.retry_delay(),
            },
            _ => Error::Server {
                code: err.error.clone(),
                message: err.message().to_string(),
            },
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retryability_follows_the_kind() {
        assert!(Error::Connection("refused".into()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(2)).is_retryable());
        assert!(Error::ConnectionClosed.is_retryable());
        assert!(!Error::Auth("bad code".into()).is_retryable());
        assert!(!Error::Protocol("bad frame".into()).is_retryable());
    }

    #[test]
    fn server_errors_consult_the_classifier() {
        let transient = Error::Server {
            code: "internal.error".into(),
            message: "oops".into(),
        };
        assert!(transient.is_retryable());

        let invalid = Error::Server {
            code: "invalid.phone".into(),
            message: "bad".into(),
        };
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn server_payload_maps_to_typed_kinds() {
        let auth = ErrorPayload::from_payload(&json!({"error": "login.token"})).unwrap();
        assert!(matches!(Error::from_server(&auth), Error::Auth(_)));

        let throttle = ErrorPayload::from_payload(
            &json!({"error": "flood.wait", "retryAfter": 1.0}),
        )
        .unwrap();
        let err = Error::from_server(&throttle);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
        assert!(err.is_retryable());

        let other = ErrorPayload::from_payload(&json!({"error": "chat.not.found"})).unwrap();
        assert!(matches!(Error::from_server(&other), Error::Server { .. }));
    }
}
