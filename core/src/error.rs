//! Error types for the SSO client.
//!
//! # Design
//! Three tiers are kept apart and never folded into one another:
//! - [`TransportError`]: no usable response (network, timeout, a body that
//!   is not the envelope, a payload of the wrong shape).
//! - [`Error::Auth`]: the HTTP status differs from the endpoint's success
//!   status. The body is not trusted in that case, even if it parses.
//! - [`ClassifiedError`]: a well-formed envelope with a non-zero
//!   `errorCode`.
//!
//! `InvalidParams` is raised locally before anything is sent.

use thiserror::Error;

use crate::envelope::ErrorCategory;

/// Failure to obtain or read a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connect, TLS, or I/O failure.
    #[error("network error: {0}")]
    Network(String),

    /// The per-call timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// The body is not a result envelope.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// `errorCode` was 0 but `data` does not have the expected shape.
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),

    /// The request payload could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(String),
}

/// A non-zero `errorCode` mapped to its category.
///
/// `debug_file` and `debug_line` are only populated when the client runs in
/// debug mode and the category allows it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category} (code {code}): {description}")]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub code: i64,
    pub description: String,
    /// `errorParam`, `item` or `credential`, depending on the category.
    pub detail: Option<String>,
    pub debug_file: Option<String>,
    pub debug_line: Option<i64>,
}

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a status other than the endpoint's success
    /// status.
    #[error("authorization failed: expected HTTP {expected}, got {actual}")]
    Auth { expected: u16, actual: u16 },

    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    /// Parameters or session state rejected before sending.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

impl Error {
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }

    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// The classified envelope error, if this is one.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Error::Classified(err) => Some(err),
            _ => None,
        }
    }

    /// Category of a classified error, if this is one.
    pub fn category(&self) -> Option<ErrorCategory> {
        self.classified().map(|err| err.category)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
