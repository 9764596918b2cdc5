//! Binding error types.
//!
//! Local data errors (`EncodingError`, `DecodingError`) are non-fatal: a bad
//! outbound request fails before touching the engine, and a bad inbound frame
//! is logged and dropped by the receive loop. Everything else reaches the
//! caller whose operation triggered it.

use crate::domain::config::ConfigError;
use crate::domain::types::ClientId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Well-known error codes the engine reports in its `error` objects.
pub mod codes {
    pub const BAD_REQUEST: i32 = 400;
    pub const UNAUTHORIZED: i32 = 401;
    pub const NOT_FOUND: i32 = 404;
    pub const TOO_MANY_REQUESTS: i32 = 429;
    pub const INTERNAL: i32 = 500;
}

/// An `error` object returned by the engine in answer to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFailure {
    pub code: i32,
    pub message: String,
}

impl EngineFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, codes::TOO_MANY_REQUESTS | codes::INTERNAL)
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A request could not be turned into a wire frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("method name is empty")]
    EmptyMethod,

    #[error("invalid method name: {0:?}")]
    InvalidMethod(String),

    #[error("payload key {0:?} is reserved by the wire format")]
    ReservedKey(String),

    #[error("payload must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

/// An inbound frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodingError {
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(String),

    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("frame root must be a JSON object")]
    NotAnObject,

    #[error("frame has no \"@type\" discriminator")]
    MissingType,

    #[error("\"@extra\" is not a correlation token: {0}")]
    ForeignExtra(String),

    #[error("payload of {kind} does not match the expected shape: {reason}")]
    Shape { kind: String, reason: String },
}

/// Failures reported by an engine adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine refused to create an instance.
    #[error("instance creation rejected: {0}")]
    CreateRejected(String),

    /// Submission failed but may succeed when attempted again.
    #[error("transient submission failure: {0}")]
    Transient(String),

    /// Submission failed and will keep failing.
    #[error("submission rejected: {0}")]
    Rejected(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

/// Errors surfaced to application code.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("decoding error: {0}")]
    Decoding(#[from] DecodingError),

    /// Instance creation failed; the caller may try `open` again.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The handle was already closed (or never belonged to this manager).
    #[error("invalid client handle {0}")]
    InvalidHandle(ClientId),

    #[error("{method} timed out after {}ms", after.as_millis())]
    Timeout { method: String, after: Duration },

    /// The pending call was invalidated by a close or by engine shutdown.
    #[error("client handle closed before a response arrived")]
    HandleClosed,

    #[error("engine error {0}")]
    Engine(EngineFailure),

    #[error("submission failed: {0}")]
    Submit(String),

    #[error("too many subscriptions for this handle (limit {limit})")]
    TooManySubscriptions { limit: usize },

    #[error("expected {expected} response, got {got}")]
    UnexpectedResponse { expected: String, got: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether the caller can reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::EngineUnavailable(_) | ClientError::Timeout { .. } => true,
            ClientError::Engine(failure) => failure.is_retryable(),
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_failure_display() {
        let failure = EngineFailure::new(codes::BAD_REQUEST, "Request aborted");
        assert_eq!(failure.to_string(), "[400] Request aborted");
    }

    #[test]
    fn test_engine_failure_round_trips_through_json() {
        let failure: EngineFailure =
            serde_json::from_str(r#"{"code":429,"message":"Too Many Requests: retry after 3"}"#)
                .unwrap();
        assert_eq!(failure.code, codes::TOO_MANY_REQUESTS);
        assert!(failure.is_retryable());
    }

    #[test]
    fn test_retry_classification() {
        assert!(ClientError::Timeout {
            method: "getMe".into(),
            after: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(ClientError::EngineUnavailable("busy".into()).is_retryable());
        assert!(!ClientError::HandleClosed.is_retryable());
        assert!(!ClientError::InvalidHandle(ClientId::new(3)).is_retryable());
        assert!(!ClientError::Engine(EngineFailure::new(codes::BAD_REQUEST, "bad")).is_retryable());
    }

    #[test]
    fn test_timeout_message_mentions_method() {
        let err = ClientError::Timeout {
            method: "testCallEmpty".into(),
            after: Duration::from_millis(250),
        };
        let msg = err.to_string();
        assert!(msg.contains("testCallEmpty"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_transient_engine_error() {
        assert!(EngineError::Transient("queue full".into()).is_transient());
        assert!(!EngineError::Rejected("gone".into()).is_transient());
    }
}
