//! HTTP types and the transport seam.
//!
//! # Design
//! Requests and responses are plain data. Endpoint methods describe the call
//! they want as an [`Endpoint`]; the client turns it into an [`HttpRequest`]
//! and hands it to a [`Transport`], which is the only place that touches the
//! network. Tests substitute a scripted transport and never open a socket.

use std::time::Duration;

use serde::Serialize;
use url::form_urlencoded;

use crate::error::TransportError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Status the remote service answers with when a call of this verb
    /// succeeds.
    pub fn success_status(self) -> u16 {
        match self {
            HttpMethod::Get | HttpMethod::Patch => 200,
            HttpMethod::Post => 201,
            HttpMethod::Delete => 204,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// An HTTP request described as plain data. `url` is absolute and already
/// carries any query string.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// An HTTP response described as plain data. `body` is the raw bytes;
/// nothing is decoded before the status has been checked.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Executes requests against the network.
///
/// Implementations must not interpret the status code: every response that
/// arrives, 4xx and 5xx included, is returned as `Ok`. Only failures to get
/// a response at all (connect, timeout, read) are errors. `timeout` bounds
/// the whole exchange, connect and body read included.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest, timeout: Duration)
        -> Result<HttpResponse, TransportError>;
}

/// How an endpoint's parameters travel on the wire.
///
/// The legacy service is not consistent: some endpoints take form fields,
/// some a JSON body, reads take a query string.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Query(Vec<(String, String)>),
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

/// One remote call: verb, path relative to the API root, parameters and the
/// status that signals success.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: String,
    pub payload: Payload,
    pub expected_status: u16,
}

impl Endpoint {
    fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: Payload::Empty,
            expected_status: method.success_status(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn query(mut self, params: Params) -> Self {
        self.payload = Payload::Query(params.into_pairs());
        self
    }

    pub fn form(mut self, params: Params) -> Self {
        self.payload = Payload::Form(params.into_pairs());
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, TransportError> {
        let value =
            serde_json::to_value(body).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.payload = Payload::Json(value);
        Ok(self)
    }

    /// JSON body made of string fields.
    pub fn json_params(mut self, params: Params) -> Self {
        let object = params
            .into_pairs()
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect::<serde_json::Map<_, _>>();
        self.payload = Payload::Json(serde_json::Value::Object(object));
        self
    }

    /// Override the success status when an endpoint departs from its verb's
    /// convention.
    pub fn expect_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    /// Render this endpoint into a request against `base_url`.
    pub fn to_request(&self, base_url: &str, user_agent: &str) -> HttpRequest {
        let mut url = format!("{base_url}{}", self.path);
        let mut headers = vec![("user-agent".to_string(), user_agent.to_string())];
        let mut body = None;

        match &self.payload {
            Payload::Empty => {}
            Payload::Query(pairs) => {
                if !pairs.is_empty() {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str(&encode_pairs(pairs));
                }
            }
            Payload::Form(pairs) => {
                headers.push((
                    "content-type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ));
                body = Some(encode_pairs(pairs));
            }
            Payload::Json(value) => {
                headers.push(("content-type".to_string(), "application/json".to_string()));
                body = Some(value.to_string());
            }
        }

        HttpRequest {
            method: self.method,
            url,
            headers,
            body,
        }
    }
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Ordered parameter list with named optional entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.push((key.to_string(), value.into()));
        self
    }

    /// Add `key` only when `value` is present.
    pub fn add_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.add(key, v),
            None => self,
        }
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}
