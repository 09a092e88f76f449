//! Result-envelope decoding and error classification.
//!
//! Every response body of the SSO service is the same JSON object:
//!
//! ```json
//! {"errorCode": 0, "data": {...}}
//! {"errorCode": 14, "errorDescription": "mismatch", "credential": "password"}
//! ```
//!
//! `errorCode == 0` means success and `data` holds the endpoint payload.
//! Any other code selects an [`ErrorCategory`], and the category decides
//! which of `errorParam` / `item` / `credential` is surfaced as the error
//! detail. `data` is never looked at when the code is non-zero.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::{ClassifiedError, Error, Result, TransportError};

/// Description reported for codes outside the known table.
const UNKNOWN_ERROR_DESCRIPTION: &str = "Unknown Error";

/// Wire form of a response body. Transient: parsed, classified, dropped.
#[derive(Debug, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "errorCode")]
    pub error_code: i64,
    #[serde(rename = "errorDescription", default)]
    pub error_description: Option<String>,
    #[serde(rename = "errorFile", default)]
    pub error_file: Option<String>,
    #[serde(rename = "errorLine", default)]
    pub error_line: Option<i64>,
    #[serde(rename = "errorParam", default)]
    pub error_param: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(
        rename = "user-defined-root-data",
        alias = "userDefinedRootData",
        default
    )]
    pub user_defined_root_data: Option<String>,
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

/// Error categories of the remote service. The numeric codes are fixed by
/// the service contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    UnknownInternal,
    StorageEngine,
    InvalidArgument,
    SenderService,
    ItemNotFound,
    ItemAlreadyExists,
    ItemExpiredOrUsed,
    PermissionDenied,
    CredentialMismatch,
    RequestParamFormat,
    /// Any code the table does not know.
    Unrecognized,
}

/// Which envelope field identifies the offending input for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailField {
    ErrorParam,
    Item,
    Credential,
    None,
}

impl ErrorCategory {
    /// Map a non-zero `errorCode` to its category.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ErrorCategory::UnknownInternal,
            2 => ErrorCategory::StorageEngine,
            3 => ErrorCategory::InvalidArgument,
            4 => ErrorCategory::SenderService,
            10 => ErrorCategory::ItemNotFound,
            11 => ErrorCategory::ItemAlreadyExists,
            12 => ErrorCategory::ItemExpiredOrUsed,
            13 => ErrorCategory::PermissionDenied,
            14 => ErrorCategory::CredentialMismatch,
            20 => ErrorCategory::RequestParamFormat,
            _ => ErrorCategory::Unrecognized,
        }
    }

    /// The wire code, or `None` for [`ErrorCategory::Unrecognized`].
    pub fn code(self) -> Option<i64> {
        match self {
            ErrorCategory::UnknownInternal => Some(1),
            ErrorCategory::StorageEngine => Some(2),
            ErrorCategory::InvalidArgument => Some(3),
            ErrorCategory::SenderService => Some(4),
            ErrorCategory::ItemNotFound => Some(10),
            ErrorCategory::ItemAlreadyExists => Some(11),
            ErrorCategory::ItemExpiredOrUsed => Some(12),
            ErrorCategory::PermissionDenied => Some(13),
            ErrorCategory::CredentialMismatch => Some(14),
            ErrorCategory::RequestParamFormat => Some(20),
            ErrorCategory::Unrecognized => None,
        }
    }

    pub fn detail_field(self) -> DetailField {
        match self {
            ErrorCategory::InvalidArgument | ErrorCategory::RequestParamFormat => {
                DetailField::ErrorParam
            }
            ErrorCategory::ItemNotFound
            | ErrorCategory::ItemAlreadyExists
            | ErrorCategory::ItemExpiredOrUsed => DetailField::Item,
            ErrorCategory::CredentialMismatch => DetailField::Credential,
            ErrorCategory::PermissionDenied
            | ErrorCategory::SenderService
            | ErrorCategory::StorageEngine
            | ErrorCategory::UnknownInternal
            | ErrorCategory::Unrecognized => DetailField::None,
        }
    }

    /// Whether `errorFile`/`errorLine` may be surfaced in debug mode.
    /// Server-side failures never expose them.
    pub fn exposes_debug_location(self) -> bool {
        !matches!(self.detail_field(), DetailField::None)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::UnknownInternal => "unknown internal error",
            ErrorCategory::StorageEngine => "storage engine error",
            ErrorCategory::InvalidArgument => "invalid argument",
            ErrorCategory::SenderService => "sender service error",
            ErrorCategory::ItemNotFound => "item not found",
            ErrorCategory::ItemAlreadyExists => "item already exists",
            ErrorCategory::ItemExpiredOrUsed => "item expired or already used",
            ErrorCategory::PermissionDenied => "permission denied",
            ErrorCategory::CredentialMismatch => "credential mismatch",
            ErrorCategory::RequestParamFormat => "malformed request parameters",
            ErrorCategory::Unrecognized => "unknown error",
        };
        f.write_str(name)
    }
}

/// Decodes response bodies into typed results or [`ClassifiedError`]s.
///
/// `debug` controls whether `errorFile`/`errorLine` are passed through.
/// It is fixed at construction and read on every decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeDecoder {
    debug: bool,
}

impl EnvelopeDecoder {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Decode `body` into `T`, or the classified error it carries.
    ///
    /// A body that is not an envelope and a `data` field that does not fit
    /// `T` are both transport errors, never classified ones.
    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T> {
        let envelope = parse_envelope(body)?;
        if envelope.error_code != 0 {
            return Err(Error::Classified(self.classify(&envelope)));
        }

        let data = envelope.data.as_deref().map_or("null", RawValue::get);
        serde_json::from_str(data)
            .map_err(|e| Error::Transport(TransportError::UnexpectedPayload(e.to_string())))
    }

    /// Classify `body` without touching `data`.
    ///
    /// Used for endpoints whose success carries no payload. `Ok(None)` means
    /// `errorCode` was 0; a body that is not an envelope, empty included, is
    /// `MalformedResponse`.
    pub fn classify_only(
        &self,
        body: &[u8],
    ) -> std::result::Result<Option<ClassifiedError>, TransportError> {
        let envelope = parse_envelope(body)?;
        if envelope.error_code == 0 {
            return Ok(None);
        }
        Ok(Some(self.classify(&envelope)))
    }

    fn classify(&self, envelope: &ResultEnvelope) -> ClassifiedError {
        let code = envelope.error_code;
        let category = ErrorCategory::from_code(code);
        tracing::debug!(code, %category, "response envelope carries an error");

        if category == ErrorCategory::Unrecognized {
            return ClassifiedError {
                category,
                code,
                description: UNKNOWN_ERROR_DESCRIPTION.to_string(),
                detail: None,
                debug_file: None,
                debug_line: None,
            };
        }

        let detail = match category.detail_field() {
            DetailField::ErrorParam => envelope.error_param.clone(),
            DetailField::Item => envelope.item.clone(),
            DetailField::Credential => envelope.credential.clone(),
            DetailField::None => None,
        };

        let (debug_file, debug_line) = if self.debug && category.exposes_debug_location() {
            (envelope.error_file.clone(), envelope.error_line)
        } else {
            (None, None)
        };

        ClassifiedError {
            category,
            code,
            description: envelope.error_description.clone().unwrap_or_default(),
            detail,
            debug_file,
            debug_line,
        }
    }
}

fn parse_envelope(body: &[u8]) -> std::result::Result<ResultEnvelope, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::MalformedResponse(e.to_string()))
}
