use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured validation/build error returned by the SDK before any request is sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "{}: {}", field, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

/// A non-success HTTP response.
///
/// Carries the raw response body and the serialized request body so a failed
/// call can be diagnosed without re-running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailed {
    pub status: u16,
    pub message: String,
    /// `error.code` from the error envelope, when present.
    pub code: Option<String>,
    /// `error.type` from the error envelope, when present.
    pub error_type: Option<String>,
    pub param: Option<String>,
    pub request_id: Option<String>,
    /// Raw response body text.
    pub body: String,
    /// Serialized outbound request body, if the call had one.
    pub request_body: Option<String>,
}

impl RequestFailed {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            error_type: None,
            param: None,
            request_id: None,
            body: String::new(),
            request_body: None,
        }
    }
}

impl fmt::Display for RequestFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.error_type) {
            (Some(code), _) | (None, Some(code)) => {
                write!(f, "{} ({}): {}", code, self.status, self.message)
            }
            (None, None) => write!(f, "{}: {}", self.status, self.message),
        }
    }
}

impl std::error::Error for RequestFailed {}

/// Convenience alias for fallible SDK results.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Transport-level error (timeouts, DNS/TLS/connectivity, broken bodies).
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    #[source]
    pub source: Option<reqwest::Error>,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };
        Self {
            kind,
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// Broad transport error kinds for classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Other => "transport",
        };
        write!(f, "{label}")
    }
}

/// Unified error type surfaced by the SDK.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed API key or organization id. Raised at construction, never at call time.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    RequestFailed(RequestFailed),

    /// Permission denied on an ownership-gated operation.
    #[error("unauthorized: {0}")]
    Unauthorized(RequestFailed),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// HTTP status of a failed request, if this error came from one.
    pub fn status(&self) -> Option<u16> {
        self.request_failed().map(|failed| failed.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }

    /// The request failure details, for both generic and ownership-gated failures.
    pub fn request_failed(&self) -> Option<&RequestFailed> {
        match self {
            Error::RequestFailed(failed) | Error::Unauthorized(failed) => Some(failed),
            _ => None,
        }
    }

    /// Re-tags a 401/403 failure as [`Error::Unauthorized`]; other errors pass through.
    pub(crate) fn into_unauthorized(self) -> Self {
        match self {
            Error::RequestFailed(failed) if failed.status == 401 || failed.status == 403 => {
                Error::Unauthorized(failed)
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.into())
    }
}
