//! OAuth flows for client applications.
//!
//! Each operation comes as a `build_*` method that produces the
//! [`Endpoint`] without I/O, and a method of the operation's name that
//! builds, sends and decodes in one go.

use std::sync::Arc;

use crate::client::ClientInner;
use crate::error::{Error, Result};
use crate::http::{Endpoint, Params};
use crate::types::{NotificationMethod, OAuthToken, OAuthUserInfo, SentMethod};

/// Token state of one application session.
///
/// Owned by the caller. `issue_token` and `refresh_token` replace `token`
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthSession {
    pub client_id: String,
    pub auth_code: Option<String>,
    pub token: Option<OAuthToken>,
}

impl OAuthSession {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn with_auth_code(mut self, code: impl Into<String>) -> Self {
        self.auth_code = Some(code.into());
        self
    }

    pub fn with_token(mut self, token: OAuthToken) -> Self {
        self.token = Some(token);
        self
    }

    fn client_id(&self) -> Result<&str> {
        non_empty(&self.client_id, "client_id")
    }

    fn token(&self) -> Result<&OAuthToken> {
        self.token
            .as_ref()
            .ok_or_else(|| Error::InvalidParams("session has no OAuth token".to_string()))
    }

    fn access_token(&self) -> Result<&str> {
        non_empty(&self.token()?.access_token, "access_token")
    }
}

/// How the application proves itself when exchanging an auth code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    /// Confidential client. `None` uses the configured client secret.
    ClientSecret(Option<String>),
    /// Public client using PKCE.
    Pkce { code_verifier: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueTokenParams {
    pub grant: TokenGrant,
    pub redirect_uri: Option<String>,
}

impl IssueTokenParams {
    pub fn client_secret() -> Self {
        Self {
            grant: TokenGrant::ClientSecret(None),
            redirect_uri: None,
        }
    }

    pub fn pkce(code_verifier: impl Into<String>) -> Self {
        Self {
            grant: TokenGrant::Pkce {
                code_verifier: code_verifier.into(),
            },
            redirect_uri: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyTokenParams {
    pub client_secret: Option<String>,
    pub mask_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshTokenParams {
    /// Falls back to the configured client secret.
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationParams {
    pub title: String,
    pub content: String,
    pub is_sales: bool,
    pub preferred_method: NotificationMethod,
}

impl NotificationParams {
    pub fn validate(&self) -> Result<()> {
        non_empty(&self.title, "title")?;
        non_empty(&self.content, "content")?;
        Ok(())
    }
}

/// OAuth endpoints. Obtained from [`SsoClient::oauth`](crate::SsoClient::oauth).
#[derive(Clone)]
pub struct OAuthApi {
    inner: Arc<ClientInner>,
}

impl OAuthApi {
    pub(crate) fn new(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// A fresh session for the configured application.
    pub fn session(&self) -> OAuthSession {
        OAuthSession::new(self.inner.config().client_id.clone())
    }

    pub fn build_issue_token(
        &self,
        session: &OAuthSession,
        params: &IssueTokenParams,
    ) -> Result<Endpoint> {
        let code = session
            .auth_code
            .as_deref()
            .ok_or_else(|| Error::InvalidParams("session has no auth code".to_string()))?;
        let mut body = Params::new()
            .add("code", non_empty(code, "code")?)
            .add("client_id", session.client_id()?);

        body = match &params.grant {
            TokenGrant::ClientSecret(secret) => {
                let secret = secret
                    .as_deref()
                    .or(self.inner.config().client_secret.as_deref())
                    .ok_or_else(|| {
                        Error::InvalidParams("no client secret for token grant".to_string())
                    })?;
                body.add("client_secret", non_empty(secret, "client_secret")?)
            }
            TokenGrant::Pkce { code_verifier } => {
                body.add("code_verifier", non_empty(code_verifier, "code_verifier")?)
            }
        };
        body = body.add_opt("redirect_uri", params.redirect_uri.as_deref());

        Ok(Endpoint::post("/oauth_token").json_params(body))
    }

    /// Exchange the session's auth code for a token and store it in the
    /// session.
    pub fn issue_token(
        &self,
        session: &mut OAuthSession,
        params: &IssueTokenParams,
    ) -> Result<OAuthToken> {
        let endpoint = self.build_issue_token(session, params)?;
        let token: OAuthToken = self.inner.call(&endpoint)?;
        session.token = Some(token.clone());
        Ok(token)
    }

    pub fn build_verify_token(
        &self,
        session: &OAuthSession,
        params: &VerifyTokenParams,
    ) -> Result<Endpoint> {
        let query = Params::new()
            .add("access_token", session.access_token()?)
            .add("client_id", session.client_id()?)
            .add_opt("client_secret", params.client_secret.as_deref())
            .add_opt("mask_id", params.mask_id.as_deref());
        Ok(Endpoint::get("/oauth_token/verified_status").query(query))
    }

    /// Ask the service whether the session's token is still valid.
    pub fn verify_token(
        &self,
        session: &OAuthSession,
        params: &VerifyTokenParams,
    ) -> Result<OAuthToken> {
        let endpoint = self.build_verify_token(session, params)?;
        self.inner.call(&endpoint)
    }

    pub fn build_refresh_token(
        &self,
        session: &OAuthSession,
        params: &RefreshTokenParams,
    ) -> Result<Endpoint> {
        let token = session.token()?;
        let secret = params
            .client_secret
            .as_deref()
            .or(self.inner.config().client_secret.as_deref());
        let query = Params::new()
            .add("client_id", session.client_id()?)
            .add_opt(
                "refresh_token",
                token.refresh_token.as_deref().filter(|t| !t.is_empty()),
            )
            .add_opt("client_secret", secret);
        Ok(Endpoint::get("/oauth_token/refresh_result").query(query))
    }

    /// Refresh the session's token in place.
    pub fn refresh_token(
        &self,
        session: &mut OAuthSession,
        params: &RefreshTokenParams,
    ) -> Result<OAuthToken> {
        let endpoint = self.build_refresh_token(session, params)?;
        let token: OAuthToken = self.inner.call(&endpoint)?;
        session.token = Some(token.clone());
        Ok(token)
    }

    pub fn build_user_info(&self, session: &OAuthSession) -> Result<Endpoint> {
        let query = Params::new().add("access_token", session.access_token()?);
        Ok(Endpoint::get("/oauth_ability/user_info").query(query))
    }

    pub fn user_info(&self, session: &OAuthSession) -> Result<OAuthUserInfo> {
        let endpoint = self.build_user_info(session)?;
        self.inner.call(&endpoint)
    }

    pub fn build_send_notification(
        &self,
        session: &OAuthSession,
        params: &NotificationParams,
    ) -> Result<Endpoint> {
        params.validate()?;
        let body = Params::new()
            .add("access_token", session.access_token()?)
            .add("title", params.title.as_str())
            .add("content", params.content.as_str())
            .add("is_sales", if params.is_sales { "1" } else { "0" })
            .add(
                "preferred_send_methods",
                params.preferred_method.code().to_string(),
            );
        Ok(Endpoint::post("/oauth_ability/notification").json_params(body))
    }

    /// Send a notification to the user behind the session's token. Returns
    /// the channel the service actually used.
    pub fn send_notification(
        &self,
        session: &OAuthSession,
        params: &NotificationParams,
    ) -> Result<NotificationMethod> {
        let endpoint = self.build_send_notification(session, params)?;
        let sent: SentMethod = self.inner.call(&endpoint)?;
        Ok(sent.into())
    }
}

pub(crate) fn non_empty<'a>(value: &'a str, name: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(Error::InvalidParams(format!("{name} must not be empty")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::scripted_client;
    use crate::http::{HttpMethod, Payload};

    fn session_with_token() -> OAuthSession {
        OAuthSession::new("app").with_token(OAuthToken {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn issue_token_with_configured_secret() {
        let (client, _) = scripted_client(false);
        let session = client.oauth().session().with_auth_code("code-1");
        let endpoint = client
            .oauth()
            .build_issue_token(&session, &IssueTokenParams::client_secret())
            .unwrap();
        assert_eq!(endpoint.method, HttpMethod::Post);
        assert_eq!(endpoint.path, "/oauth_token");
        assert_eq!(endpoint.expected_status, 201);
        assert_eq!(
            endpoint.payload,
            Payload::Json(serde_json::json!({
                "code": "code-1",
                "client_id": "app",
                "client_secret": "secret",
            }))
        );
    }

    #[test]
    fn issue_token_pkce_sends_verifier_not_secret() {
        let (client, _) = scripted_client(false);
        let session = client.oauth().session().with_auth_code("code-1");
        let endpoint = client
            .oauth()
            .build_issue_token(&session, &IssueTokenParams::pkce("verifier"))
            .unwrap();
        let Payload::Json(body) = endpoint.payload else {
            panic!("expected JSON payload");
        };
        assert_eq!(body["code_verifier"], "verifier");
        assert!(body.get("client_secret").is_none());
    }

    #[test]
    fn issue_token_requires_auth_code() {
        let (client, transport) = scripted_client(false);
        let mut session = client.oauth().session();
        let err = client
            .oauth()
            .issue_token(&mut session, &IssueTokenParams::client_secret())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn issue_token_stores_token_in_session() {
        let (client, transport) = scripted_client(false);
        transport.respond(
            201,
            r#"{"errorCode":0,"data":{"access_token":"at","refresh_token":"rt","expires":3600,"client_id":"app"}}"#,
        );
        let mut session = client.oauth().session().with_auth_code("code-1");
        let token = client
            .oauth()
            .issue_token(&mut session, &IssueTokenParams::client_secret())
            .unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(session.token, Some(token));
    }

    #[test]
    fn verify_token_puts_optionals_in_query() {
        let (client, _) = scripted_client(false);
        let params = VerifyTokenParams {
            client_secret: None,
            mask_id: Some("m1".to_string()),
        };
        let endpoint = client
            .oauth()
            .build_verify_token(&session_with_token(), &params)
            .unwrap();
        let request = endpoint.to_request("http://sso.test", "ua");
        assert_eq!(
            request.url,
            "http://sso.test/oauth_token/verified_status?access_token=at&client_id=app&mask_id=m1"
        );
    }

    #[test]
    fn refresh_token_replaces_session_token() {
        let (client, transport) = scripted_client(false);
        transport.respond(
            200,
            r#"{"errorCode":0,"data":{"access_token":"at2","refresh_token":"rt2"}}"#,
        );
        let mut session = session_with_token();
        client
            .oauth()
            .refresh_token(&mut session, &RefreshTokenParams::default())
            .unwrap();
        assert_eq!(session.token.as_ref().unwrap().access_token, "at2");

        let request = transport.last_request();
        assert!(request.url.contains("refresh_token=rt"));
        assert!(request.url.contains("client_secret=secret"));
    }

    #[test]
    fn refresh_failure_keeps_old_token() {
        let (client, transport) = scripted_client(false);
        transport.respond(200, r#"{"errorCode":12,"item":"refresh_token"}"#);
        let mut session = session_with_token();
        let err = client
            .oauth()
            .refresh_token(&mut session, &RefreshTokenParams::default())
            .unwrap_err();
        assert_eq!(
            err.classified().unwrap().detail.as_deref(),
            Some("refresh_token")
        );
        assert_eq!(session.token.as_ref().unwrap().access_token, "at");
    }

    #[test]
    fn user_info_requires_token() {
        let (client, _) = scripted_client(false);
        let err = client
            .oauth()
            .build_user_info(&OAuthSession::new("app"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn notification_encodes_flags_and_decodes_channel() {
        let (client, transport) = scripted_client(false);
        transport.respond(201, r#"{"errorCode":0,"data":{"SENT_METHOD":1}}"#);
        let params = NotificationParams {
            title: "Hi".to_string(),
            content: "Hello there".to_string(),
            is_sales: false,
            preferred_method: NotificationMethod::Sms,
        };
        let method = client
            .oauth()
            .send_notification(&session_with_token(), &params)
            .unwrap();
        assert_eq!(method, NotificationMethod::Email);

        let body: serde_json::Value =
            serde_json::from_str(transport.last_request().body.as_deref().unwrap()).unwrap();
        assert_eq!(body["is_sales"], "0");
        assert_eq!(body["preferred_send_methods"], "2");
    }

    #[test]
    fn notification_rejects_empty_title() {
        let params = NotificationParams {
            title: " ".to_string(),
            content: "x".to_string(),
            is_sales: true,
            preferred_method: NotificationMethod::Email,
        };
        assert!(params.validate().is_err());
    }
}
