//! The SSO client and its single endpoint-call helper.
//!
//! # Design
//! Endpoint methods only assemble an [`Endpoint`]. Everything after that is
//! shared: render the request, run it through the [`Transport`] with the
//! configured timeout, compare the status against the endpoint's success
//! status, and hand the body to the [`EnvelopeDecoder`]. No endpoint adds
//! logic of its own past parameter assembly, and nothing is retried.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::envelope::EnvelopeDecoder;
use crate::error::{Error, Result};
use crate::http::{Endpoint, HttpResponse, Transport};
use crate::oauth::OAuthApi;
use crate::transport::UreqTransport;
use crate::user::UserApi;

/// Client for the SSO service.
///
/// Cheap to share across threads. The OAuth and user sub-clients are built
/// on first access, at most once per client.
///
/// # Example
///
/// ```no_run
/// use sso_core::{ClientConfig, LoginParams, SsoClient};
///
/// # fn example() -> sso_core::Result<()> {
/// let config = ClientConfig::builder()
///     .base_url("https://sso.example.org")
///     .client_id("my-app")
///     .build()?;
/// let client = SsoClient::new(config);
///
/// let token = client.user().login(&LoginParams::username("alice", "hunter2"))?;
/// println!("logged in: {}", token.access_token);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SsoClient {
    inner: Arc<ClientInner>,
    oauth: OnceLock<OAuthApi>,
    user: OnceLock<UserApi>,
}

/// State shared by the client and its sub-clients.
pub(crate) struct ClientInner {
    config: ClientConfig,
    decoder: EnvelopeDecoder,
    transport: Arc<dyn Transport>,
    user_agent: String,
}

impl SsoClient {
    /// Create a client that talks HTTP through [`UreqTransport`].
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(UreqTransport::new()))
    }

    /// Create a client on top of a caller-supplied transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let user_agent = config.user_agent();
        let decoder = EnvelopeDecoder::new(config.debug);
        Self {
            inner: Arc::new(ClientInner {
                config,
                decoder,
                transport,
                user_agent,
            }),
            oauth: OnceLock::new(),
            user: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn decoder(&self) -> EnvelopeDecoder {
        self.inner.decoder
    }

    /// OAuth flows: token issue, verification, refresh, user info,
    /// notifications.
    pub fn oauth(&self) -> &OAuthApi {
        self.oauth
            .get_or_init(|| OAuthApi::new(Arc::clone(&self.inner)))
    }

    /// User lifecycle, verification codes, account changes and masks.
    pub fn user(&self) -> &UserApi {
        self.user
            .get_or_init(|| UserApi::new(Arc::clone(&self.inner)))
    }

    /// Run `endpoint` and decode its payload into `T`.
    pub fn call<T: DeserializeOwned>(&self, endpoint: &Endpoint) -> Result<T> {
        self.inner.call(endpoint)
    }

    /// Run `endpoint` whose success carries no payload.
    pub fn call_no_content(&self, endpoint: &Endpoint) -> Result<()> {
        self.inner.call_no_content(endpoint)
    }
}

impl ClientInner {
    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn call<T: DeserializeOwned>(&self, endpoint: &Endpoint) -> Result<T> {
        let response = self.send(endpoint)?;
        self.decoder.decode(&response.body)
    }

    /// Like [`call`](Self::call) for endpoints without a payload. A bodiless
    /// 204 is the only success that carries no envelope.
    pub(crate) fn call_no_content(&self, endpoint: &Endpoint) -> Result<()> {
        let response = self.send(endpoint)?;
        if response.status == 204 && response.body.is_empty() {
            return Ok(());
        }
        match self.decoder.classify_only(&response.body)? {
            Some(err) => Err(Error::Classified(err)),
            None => Ok(()),
        }
    }

    /// Execute and check the status. The body is only returned when the
    /// status is the endpoint's success status.
    fn send(&self, endpoint: &Endpoint) -> Result<HttpResponse> {
        let request = endpoint.to_request(&self.config.base_url, &self.user_agent);
        let timeout = self.timeout();
        tracing::debug!(
            method = endpoint.method.as_str(),
            path = %endpoint.path,
            expected = endpoint.expected_status,
            "sending request"
        );

        let response = self.transport.execute(&request, timeout).map_err(|err| {
            tracing::debug!(path = %endpoint.path, error = %err, "transport failed");
            Error::Transport(err)
        })?;

        if response.status != endpoint.expected_status {
            tracing::warn!(
                path = %endpoint.path,
                expected = endpoint.expected_status,
                actual = response.status,
                "unexpected status, discarding response body"
            );
            return Err(Error::Auth {
                expected: endpoint.expected_status,
                actual: response.status,
            });
        }

        tracing::debug!(path = %endpoint.path, status = response.status, "response received");
        Ok(response)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::error::TransportError;
    use crate::http::{HttpMethod, HttpRequest, Params};

    /// Replays canned responses and records what was sent.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<std::result::Result<HttpResponse, TransportError>>>,
        pub(crate) sent: Mutex<Vec<(HttpRequest, Duration)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn respond(&self, status: u16, body: &str) {
            self.respond_bytes(status, body.as_bytes());
        }

        pub(crate) fn respond_bytes(&self, status: u16, body: &[u8]) {
            self.responses.lock().unwrap().push_back(Ok(HttpResponse {
                status,
                body: body.to_vec(),
            }));
        }

        pub(crate) fn fail(&self, err: TransportError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }

        pub(crate) fn last_request(&self) -> HttpRequest {
            self.sent.lock().unwrap().last().unwrap().0.clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(
            &self,
            request: &HttpRequest,
            timeout: Duration,
        ) -> std::result::Result<HttpResponse, TransportError> {
            self.sent.lock().unwrap().push((request.clone(), timeout));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Network("no scripted response".to_string())))
        }
    }

    pub(crate) fn scripted_client(debug: bool) -> (SsoClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::default());
        let config = ClientConfig::builder()
            .base_url("http://sso.test")
            .client_id("app")
            .client_secret("secret")
            .timeout(Duration::from_secs(7))
            .debug(debug)
            .build()
            .unwrap();
        let client = SsoClient::with_transport(config, transport.clone());
        (client, transport)
    }

    #[derive(Debug, serde::Deserialize)]
    struct Token {
        access_token: String,
    }

    #[test]
    fn call_decodes_payload_on_expected_status() {
        let (client, transport) = scripted_client(false);
        transport.respond(201, r#"{"errorCode":0,"data":{"access_token":"abc"}}"#);

        let endpoint = Endpoint::post("/user/token").form(Params::new().add("username", "a"));
        let token: Token = client.call(&endpoint).unwrap();
        assert_eq!(token.access_token, "abc");

        let sent = transport.sent.lock().unwrap();
        let (request, timeout) = &sent[0];
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, "http://sso.test/user/token");
        assert_eq!(*timeout, Duration::from_secs(7));
    }

    #[test]
    fn status_mismatch_is_auth_error_even_with_valid_body() {
        let (client, transport) = scripted_client(false);
        transport.respond(200, r#"{"errorCode":0,"data":{"access_token":"abc"}}"#);

        let err = client
            .call::<Token>(&Endpoint::post("/user/token"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Auth {
                expected: 201,
                actual: 200
            }
        ));
    }

    #[test]
    fn status_mismatch_wins_over_malformed_body() {
        let (client, transport) = scripted_client(false);
        transport.respond(500, "<html>oops</html>");
        let err = client.call::<Token>(&Endpoint::get("/masks")).unwrap_err();
        assert!(err.is_auth_error());
    }

    #[test]
    fn transport_failure_propagates_unchanged() {
        let (client, transport) = scripted_client(false);
        transport.fail(TransportError::Timeout);
        let err = client.call::<Token>(&Endpoint::get("/masks")).unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Timeout)));
        assert_eq!(transport.sent.lock().unwrap().len(), 1, "no retry");
    }

    #[test]
    fn malformed_body_on_expected_status_is_transport_error() {
        let (client, transport) = scripted_client(false);
        transport.respond(200, "not json");
        let err = client.call::<Token>(&Endpoint::get("/masks")).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::MalformedResponse(_))
        ));
    }

    #[test]
    fn call_no_content_surfaces_classified_errors() {
        let (client, transport) = scripted_client(false);
        transport.respond(201, r#"{"errorCode":4,"errorDescription":"smtp down"}"#);
        let err = client
            .call_no_content(&Endpoint::post("/vericodes/verifyEmail"))
            .unwrap_err();
        let classified = err.classified().unwrap();
        assert_eq!(classified.description, "smtp down");
        assert_eq!(classified.detail, None);
    }

    #[test]
    fn call_no_content_rejects_empty_body_on_201() {
        let (client, transport) = scripted_client(false);
        transport.respond(201, "");
        let err = client
            .call_no_content(&Endpoint::post("/vericodes/verifyEmail"))
            .unwrap_err();
        assert!(
            matches!(err, Error::Transport(TransportError::MalformedResponse(_))),
            "got {err:?}"
        );
    }

    #[test]
    fn call_no_content_classifies_envelope_on_204() {
        let (client, transport) = scripted_client(false);
        transport.respond(204, r#"{"errorCode":13,"errorDescription":"denied"}"#);
        let err = client
            .call_no_content(&Endpoint::delete("/masks/m1"))
            .unwrap_err();
        assert_eq!(err.category(), Some(crate::envelope::ErrorCategory::PermissionDenied));
    }

    #[test]
    fn status_mismatch_ignores_non_utf8_body() {
        let (client, transport) = scripted_client(false);
        transport.respond_bytes(200, b"\xff\xfe{\"errorCode\":0}");
        let err = client.call::<Token>(&Endpoint::post("/user/token")).unwrap_err();
        assert!(matches!(
            err,
            Error::Auth {
                expected: 201,
                actual: 200
            }
        ));
    }

    #[test]
    fn non_utf8_body_on_expected_status_is_malformed() {
        let (client, transport) = scripted_client(false);
        transport.respond_bytes(201, b"\xff\xfe");
        let err = client.call::<Token>(&Endpoint::post("/user/token")).unwrap_err();
        assert!(
            matches!(err, Error::Transport(TransportError::MalformedResponse(_))),
            "got {err:?}"
        );
    }

    #[test]
    fn call_no_content_accepts_empty_204() {
        let (client, transport) = scripted_client(false);
        transport.respond(204, "");
        client
            .call_no_content(&Endpoint::delete("/masks/m1"))
            .unwrap();
    }

    #[test]
    fn sub_clients_are_built_once() {
        let (client, _) = scripted_client(false);
        assert!(std::ptr::eq(client.oauth(), client.oauth()));
        assert!(std::ptr::eq(client.user(), client.user()));
    }

    #[test]
    fn concurrent_first_access_installs_one_instance() {
        let (client, _) = scripted_client(false);
        let addresses: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| client.oauth() as *const OAuthApi as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn decoder_follows_config_debug_flag() {
        let (client, _) = scripted_client(true);
        assert!(client.decoder().debug());
        let (client, _) = scripted_client(false);
        assert!(!client.decoder().debug());
    }
}
