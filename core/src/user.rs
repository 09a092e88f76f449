//! User lifecycle: registration, login tokens, verification codes and
//! account changes. Mask management lives in [`crate::masks`].

use std::sync::Arc;

use url::form_urlencoded;

use crate::client::ClientInner;
use crate::error::{Error, Result};
use crate::http::{Endpoint, Params};
use crate::oauth::non_empty;
use crate::types::{UserEntity, UserToken};

/// A logged-in user. Owned by the caller; `refresh_login` and `logout`
/// update `token` in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSession {
    pub uid: i64,
    pub token: Option<UserToken>,
}

impl UserSession {
    pub fn new(uid: i64, token: UserToken) -> Self {
        Self {
            uid,
            token: Some(token),
        }
    }

    /// Session for the user a login token was issued to.
    pub fn from_token(token: UserToken) -> Self {
        Self::new(token.uid, token)
    }

    pub(crate) fn access_token(&self) -> Result<&str> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| Error::InvalidParams("user session is logged out".to_string()))?;
        non_empty(&token.access_token, "access_token")
    }

    pub(crate) fn auth_params(&self) -> Result<Params> {
        Ok(Params::new()
            .add("uid", self.uid.to_string())
            .add("access_token", self.access_token()?))
    }
}

/// Which account identifier a login or password reset refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountIdentity {
    Username(String),
    Email(String),
    PhoneNum(String),
}

impl AccountIdentity {
    fn add_to(&self, params: Params) -> Result<Params> {
        Ok(match self {
            AccountIdentity::Username(v) => params.add("username", non_empty(v, "username")?),
            AccountIdentity::Email(v) => params.add("email", non_empty(v, "email")?),
            AccountIdentity::PhoneNum(v) => params.add("phoneNum", non_empty(v, "phoneNum")?),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterParams {
    pub username: String,
    pub password: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub phone_num: Option<String>,
}

impl RegisterParams {
    pub fn validate(&self) -> Result<()> {
        non_empty(&self.username, "username")?;
        non_empty(&self.password, "password")?;
        let has_contact = [&self.email, &self.phone_num]
            .into_iter()
            .any(|c| c.as_deref().is_some_and(|v| !v.trim().is_empty()));
        if !has_contact {
            return Err(Error::InvalidParams(
                "an email address or phone number is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginParams {
    pub identity: AccountIdentity,
    pub password: String,
}

impl LoginParams {
    pub fn username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: AccountIdentity::Username(username.into()),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEmailParams {
    pub veri_code: String,
    pub new_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePhoneParams {
    pub veri_code: String,
    pub new_phone_num: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePasswordParams {
    pub veri_code: String,
    pub new_password: String,
}

/// User endpoints. Obtained from [`SsoClient::user`](crate::SsoClient::user).
#[derive(Clone)]
pub struct UserApi {
    pub(crate) inner: Arc<ClientInner>,
}

impl UserApi {
    pub(crate) fn new(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub fn build_register(&self, params: &RegisterParams) -> Result<Endpoint> {
        params.validate()?;
        let form = Params::new()
            .add("username", params.username.as_str())
            .add("password", params.password.as_str())
            .add_opt("nickname", params.nickname.as_deref())
            .add_opt("email", params.email.as_deref())
            .add_opt("phoneNum", params.phone_num.as_deref());
        Ok(Endpoint::post("/user").form(form))
    }

    pub fn register(&self, params: &RegisterParams) -> Result<UserEntity> {
        let endpoint = self.build_register(params)?;
        self.inner.call(&endpoint)
    }

    pub fn build_login(&self, params: &LoginParams) -> Result<Endpoint> {
        let form = params
            .identity
            .add_to(Params::new())?
            .add("password", non_empty(&params.password, "password")?)
            .add("client_id", self.inner.config().client_id.as_str());
        Ok(Endpoint::post("/user/token").form(form))
    }

    pub fn login(&self, params: &LoginParams) -> Result<UserToken> {
        let endpoint = self.build_login(params)?;
        self.inner.call(&endpoint)
    }

    pub fn build_check_token(&self, session: &UserSession) -> Result<Endpoint> {
        let token = session.access_token()?;
        Ok(Endpoint::get(format!(
            "/user/{}/token/{}/checkTokenResult",
            session.uid,
            path_segment(token)
        )))
    }

    /// Ask the service whether the session's login token is still valid.
    pub fn check_token(&self, session: &UserSession) -> Result<UserToken> {
        let endpoint = self.build_check_token(session)?;
        self.inner.call(&endpoint)
    }

    pub fn build_refresh_login(&self, session: &UserSession) -> Result<Endpoint> {
        let refresh = session
            .token
            .as_ref()
            .and_then(|t| t.refresh_token.as_deref())
            .ok_or_else(|| Error::InvalidParams("session has no refresh token".to_string()))?;
        let query = Params::new().add("refresh_token", non_empty(refresh, "refresh_token")?);
        Ok(Endpoint::get(format!("/user/{}/token/refreshResult", session.uid)).query(query))
    }

    /// Refresh the session's login token in place.
    pub fn refresh_login(&self, session: &mut UserSession) -> Result<UserToken> {
        let endpoint = self.build_refresh_login(session)?;
        let token: UserToken = self.inner.call(&endpoint)?;
        session.token = Some(token.clone());
        Ok(token)
    }

    pub fn build_logout(&self, session: &UserSession) -> Result<Endpoint> {
        let token = session.access_token()?;
        Ok(Endpoint::delete(format!(
            "/user/{}/token/{}",
            session.uid,
            path_segment(token)
        )))
    }

    /// Revoke the session's login token. The session is cleared only when
    /// the service confirms.
    pub fn logout(&self, session: &mut UserSession) -> Result<()> {
        let endpoint = self.build_logout(session)?;
        self.inner.call_no_content(&endpoint)?;
        session.token = None;
        Ok(())
    }

    pub fn build_request_email_verification(&self, username: &str) -> Result<Endpoint> {
        let form = Params::new().add("username", non_empty(username, "username")?);
        Ok(Endpoint::post("/vericodes/verifyEmail").form(form))
    }

    /// Ask the service to (re)send the email verification code.
    pub fn request_email_verification(&self, username: &str) -> Result<()> {
        let endpoint = self.build_request_email_verification(username)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_verify_email(&self, veri_code: &str) -> Result<Endpoint> {
        let code = non_empty(veri_code, "veriCode")?;
        Ok(Endpoint::get(format!(
            "/vericodes/verifyEmailResult/{}",
            path_segment(code)
        )))
    }

    pub fn verify_email(&self, veri_code: &str) -> Result<()> {
        let endpoint = self.build_verify_email(veri_code)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_request_phone_verification(&self, username: &str) -> Result<Endpoint> {
        let form = Params::new().add("username", non_empty(username, "username")?);
        Ok(Endpoint::post("/vericodes/verifyPhone").form(form))
    }

    /// Ask the service to (re)send the phone verification code.
    pub fn request_phone_verification(&self, username: &str) -> Result<()> {
        let endpoint = self.build_request_phone_verification(username)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_verify_phone(&self, veri_code: &str) -> Result<Endpoint> {
        let code = non_empty(veri_code, "veriCode")?;
        Ok(Endpoint::get(format!(
            "/vericodes/verifyPhoneResult/{}",
            path_segment(code)
        )))
    }

    pub fn verify_phone(&self, veri_code: &str) -> Result<()> {
        let endpoint = self.build_verify_phone(veri_code)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_request_email_change(&self, session: &UserSession) -> Result<Endpoint> {
        Ok(Endpoint::post("/vericodes/changeEmailAddressRequest").form(session.auth_params()?))
    }

    /// Send a code to the current address that authorizes an email change.
    pub fn request_email_change(&self, session: &UserSession) -> Result<()> {
        let endpoint = self.build_request_email_change(session)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_request_phone_change(&self, session: &UserSession) -> Result<Endpoint> {
        Ok(Endpoint::post("/vericodes/changePhoneNumberRequest").form(session.auth_params()?))
    }

    pub fn request_phone_change(&self, session: &UserSession) -> Result<()> {
        let endpoint = self.build_request_phone_change(session)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_request_password_reset(&self, identity: &AccountIdentity) -> Result<Endpoint> {
        let form = identity.add_to(Params::new())?;
        Ok(Endpoint::post("/vericodes/changePasswordRequest").form(form))
    }

    /// Send a password reset code to the account's verified contact.
    pub fn request_password_reset(&self, identity: &AccountIdentity) -> Result<()> {
        let endpoint = self.build_request_password_reset(identity)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_change_email(&self, params: &ChangeEmailParams) -> Result<Endpoint> {
        let body = Params::new()
            .add("veriCode", non_empty(&params.veri_code, "veriCode")?)
            .add("newEmail", non_empty(&params.new_email, "newEmail")?);
        Ok(Endpoint::patch("/user/email").json_params(body))
    }

    pub fn change_email(&self, params: &ChangeEmailParams) -> Result<()> {
        let endpoint = self.build_change_email(params)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_change_phone(&self, params: &ChangePhoneParams) -> Result<Endpoint> {
        let body = Params::new()
            .add("veriCode", non_empty(&params.veri_code, "veriCode")?)
            .add("newPhoneNum", non_empty(&params.new_phone_num, "newPhoneNum")?);
        Ok(Endpoint::patch("/user/phoneNum").json_params(body))
    }

    pub fn change_phone(&self, params: &ChangePhoneParams) -> Result<()> {
        let endpoint = self.build_change_phone(params)?;
        self.inner.call_no_content(&endpoint)
    }

    pub fn build_change_password(&self, params: &ChangePasswordParams) -> Result<Endpoint> {
        let body = Params::new()
            .add("veriCode", non_empty(&params.veri_code, "veriCode")?)
            .add("newPassword", non_empty(&params.new_password, "newPassword")?);
        Ok(Endpoint::patch("/user/password").json_params(body))
    }

    pub fn change_password(&self, params: &ChangePasswordParams) -> Result<()> {
        let endpoint = self.build_change_password(params)?;
        self.inner.call_no_content(&endpoint)
    }
}

/// Percent-encode one path segment.
pub(crate) fn path_segment(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
