//! Client library for the InteractiveSSO identity service.
//!
//! # Overview
//! Wraps the service's REST endpoints (OAuth token flows, user lifecycle,
//! verification codes, masks) behind typed methods. Every response body is
//! the same JSON result envelope; [`EnvelopeDecoder`] turns it into either
//! the endpoint's payload or a [`ClassifiedError`].
//!
//! # Design
//! - Endpoint methods only assemble an [`Endpoint`]; one helper in
//!   [`SsoClient`] executes it, checks the status and decodes the body.
//! - I/O goes through the [`Transport`] trait. [`UreqTransport`] is the
//!   default; tests plug in scripted transports.
//! - Errors are split into transport failures, status mismatches and
//!   classified envelope errors (see [`Error`]).
//! - The debug flag lives in [`ClientConfig`], not in a global.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod masks;
pub mod oauth;
pub mod transport;
pub mod types;
pub mod user;

pub use client::SsoClient;
pub use config::{ClientConfig, ConfigBuilder};
pub use envelope::{DetailField, EnvelopeDecoder, ErrorCategory, ResultEnvelope};
pub use error::{ClassifiedError, Error, Result, TransportError};
pub use http::{Endpoint, HttpMethod, HttpRequest, HttpResponse, Params, Payload, Transport};
pub use masks::{CreateMaskParams, UpdateMaskParams};
pub use oauth::{
    IssueTokenParams, NotificationParams, OAuthApi, OAuthSession, RefreshTokenParams, TokenGrant,
    VerifyTokenParams,
};
pub use transport::UreqTransport;
pub use types::{
    MaskEntity, NotificationMethod, OAuthToken, OAuthUserInfo, SentMethod, UserEntity,
    UserSettings, UserToken,
};
pub use user::{
    AccountIdentity, ChangeEmailParams, ChangePasswordParams, ChangePhoneParams, LoginParams,
    RegisterParams, UserApi, UserSession,
};
