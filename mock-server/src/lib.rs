//! In-memory stand-in for the InteractiveSSO service.
//!
//! Every response carries the service's result envelope. Failures are
//! reported with the endpoint's normal success status and a non-zero
//! `errorCode`, except on DELETE routes: a 204 cannot carry a body, so
//! failed deletions answer 200 with the envelope.

use std::{collections::HashMap, panic::Location, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Client application registered in every fresh state.
pub const DEMO_CLIENT_ID: &str = "demo-app";
pub const DEMO_CLIENT_SECRET: &str = "demo-secret";

const TOKEN_TTL_SECS: i64 = 3600;
const REFRESH_TTL_SECS: i64 = 30 * 24 * 3600;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub allow_email_notifications: bool,
    #[serde(default)]
    pub allow_sale_email: bool,
    #[serde(default, rename = "allowSMSNotifications")]
    pub allow_sms_notifications: bool,
    #[serde(default, rename = "allowSaleSMS")]
    pub allow_sale_sms: bool,
    #[serde(default)]
    pub allow_call_notifications: bool,
    #[serde(default)]
    pub allow_sale_call: bool,
}

impl Settings {
    fn allows(&self, method: i64, is_sales: bool) -> bool {
        match method {
            1 => self.allow_email_notifications && (!is_sales || self.allow_sale_email),
            2 => self.allow_sms_notifications && (!is_sales || self.allow_sale_sms),
            3 => self.allow_call_notifications && (!is_sales || self.allow_sale_call),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct User {
    pub uid: i64,
    pub username: String,
    pub nickname: String,
    pub email: Option<String>,
    #[serde(rename = "phoneNum")]
    pub phone_num: Option<String>,
    #[serde(rename = "emailVerified")]
    pub email_verified: bool,
    #[serde(rename = "phoneVerified")]
    pub phone_verified: bool,
    pub settings: Settings,
    #[serde(skip)]
    password: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoginToken {
    pub access_token: String,
    pub refresh_token: String,
    pub uid: i64,
    pub issued: i64,
    pub expires: i64,
    pub refresh_expires: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    pub obtained_method: i64,
    pub issued: i64,
    pub expires: i64,
    pub last_renewed: i64,
    pub refresh_expires: i64,
    pub mask_id: String,
    pub client_id: String,
    pub scope: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Mask {
    pub mask_id: String,
    pub client_id: String,
    pub uid: i64,
    pub display_name: String,
    pub create_time: i64,
    pub settings: Settings,
}

/// What a verification code authorizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodePurpose {
    VerifyEmail,
    VerifyPhone,
    ChangeEmail,
    ChangePhone,
    ChangePassword,
}

/// A verification code "delivered" to a user.
#[derive(Clone, Debug)]
pub struct SentCode {
    pub uid: i64,
    pub purpose: CodePurpose,
    pub code: String,
}

/// A notification delivered on behalf of a client application.
#[derive(Clone, Debug)]
pub struct Notification {
    pub mask_id: String,
    pub title: String,
    pub method: i64,
}

#[derive(Clone, Debug)]
struct VeriCode {
    uid: i64,
    purpose: CodePurpose,
    used: bool,
}

#[derive(Clone, Debug)]
struct AuthCode {
    mask_id: String,
    client_id: String,
    code_challenge: Option<String>,
    used: bool,
}

// ---------------------------------------------------------------------------
// Envelope errors
// ---------------------------------------------------------------------------

/// A non-zero `errorCode` reply, tagged with where it was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Fail {
    pub code: i64,
    pub description: String,
    pub field: Option<(&'static str, String)>,
    file: &'static str,
    line: u32,
}

impl Fail {
    #[track_caller]
    fn new(code: i64, description: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            code,
            description: description.into(),
            field: None,
            file: location.file(),
            line: location.line(),
        }
    }

    fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.field = Some((key, value.into()));
        self
    }

    #[track_caller]
    fn argument(param: &str, description: &str) -> Self {
        Self::new(3, description).with("errorParam", param)
    }

    #[track_caller]
    fn not_found(item: &str) -> Self {
        Self::new(10, format!("{item} not found")).with("item", item)
    }

    #[track_caller]
    fn exists(item: &str) -> Self {
        Self::new(11, format!("{item} already exists")).with("item", item)
    }

    #[track_caller]
    fn expired(item: &str) -> Self {
        Self::new(12, format!("{item} expired or already used")).with("item", item)
    }

    #[track_caller]
    fn denied() -> Self {
        Self::new(13, "permission denied")
    }

    #[track_caller]
    fn mismatch(credential: &str) -> Self {
        Self::new(14, format!("{credential} does not match")).with("credential", credential)
    }

    #[track_caller]
    fn param_format(param: &str) -> Self {
        Self::new(20, format!("{param} is missing or malformed")).with("errorParam", param)
    }

    pub fn body(&self) -> Value {
        let mut body = json!({
            "errorCode": self.code,
            "errorDescription": self.description,
            "errorFile": self.file,
            "errorLine": self.line,
        });
        if let Some((key, value)) = &self.field {
            body[*key] = Value::String(value.clone());
        }
        body
    }
}

fn reply<T: Serialize>(status: StatusCode, result: Result<T, Fail>) -> Response {
    match result {
        Ok(data) => (status, Json(json!({ "errorCode": 0, "data": data }))).into_response(),
        Err(fail) => (status, Json(fail.body())).into_response(),
    }
}

fn reply_empty(status: StatusCode, result: Result<(), Fail>) -> Response {
    match result {
        Ok(()) => (status, Json(json!({ "errorCode": 0 }))).into_response(),
        Err(fail) => (status, Json(fail.body())).into_response(),
    }
}

fn reply_deleted(result: Result<(), Fail>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(fail) => (StatusCode::OK, Json(fail.body())).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Request fields
// ---------------------------------------------------------------------------

/// Request parameters from a form, a query string or a JSON object.
pub struct Fields(Map<String, Value>);

impl Fields {
    pub fn from_pairs(pairs: HashMap<String, String>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        )
    }

    pub fn from_json(value: Value) -> Result<Self, Fail> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(Fail::param_format("body")),
        }
    }

    fn opt_str(&self, key: &str) -> Option<String> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    #[track_caller]
    fn str(&self, key: &str) -> Result<String, Fail> {
        self.opt_str(key).ok_or_else(|| Fail::param_format(key))
    }

    #[track_caller]
    fn i64(&self, key: &str) -> Result<i64, Fail> {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| Fail::param_format(key)),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| Fail::param_format(key)),
            _ => Err(Fail::param_format(key)),
        }
    }

    fn settings(&self) -> Result<Option<Settings>, Fail> {
        match self.0.get("settings") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|_| Fail::param_format("settings")),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SsoState {
    clients: HashMap<String, String>,
    users: HashMap<i64, User>,
    next_uid: i64,
    login_tokens: HashMap<String, LoginToken>,
    auth_codes: HashMap<String, AuthCode>,
    oauth_tokens: HashMap<String, OAuthToken>,
    masks: HashMap<String, Mask>,
    vericodes: HashMap<String, VeriCode>,
    outbox: Vec<SentCode>,
    notifications: Vec<Notification>,
}

pub type Db = Arc<RwLock<SsoState>>;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

impl SsoState {
    pub fn new() -> Self {
        let mut state = Self {
            next_uid: 1,
            ..Default::default()
        };
        state.register_client(DEMO_CLIENT_ID, DEMO_CLIENT_SECRET);
        state
    }

    pub fn register_client(&mut self, client_id: &str, secret: &str) {
        self.clients
            .insert(client_id.to_string(), secret.to_string());
    }

    /// Most recent code sent to `uid` for `purpose`.
    pub fn last_code(&self, uid: i64, purpose: CodePurpose) -> Option<String> {
        self.outbox
            .iter()
            .rev()
            .find(|sent| sent.uid == uid && sent.purpose == purpose)
            .map(|sent| sent.code.clone())
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Record the user's consent for `client_id` to act as `mask_id` and
    /// return the auth code the application will exchange. With
    /// `code_challenge` set the exchange must present it as a plain PKCE
    /// verifier.
    pub fn grant_auth_code(
        &mut self,
        mask_id: &str,
        client_id: &str,
        code_challenge: Option<&str>,
    ) -> String {
        let code = new_token();
        self.auth_codes.insert(
            code.clone(),
            AuthCode {
                mask_id: mask_id.to_string(),
                client_id: client_id.to_string(),
                code_challenge: code_challenge.map(str::to_string),
                used: false,
            },
        );
        code
    }

    fn send_code(&mut self, uid: i64, purpose: CodePurpose) {
        let code = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        tracing::info!(uid, ?purpose, %code, "verification code sent");
        self.vericodes.insert(
            code.clone(),
            VeriCode {
                uid,
                purpose,
                used: false,
            },
        );
        self.outbox.push(SentCode { uid, purpose, code });
    }

    #[track_caller]
    fn consume_code(&mut self, code: &str, purpose: CodePurpose) -> Result<i64, Fail> {
        let entry = self
            .vericodes
            .get_mut(code)
            .filter(|c| c.purpose == purpose)
            .ok_or_else(|| Fail::not_found("veriCode"))?;
        if entry.used {
            return Err(Fail::expired("veriCode"));
        }
        entry.used = true;
        Ok(entry.uid)
    }

    fn user_mut(&mut self, uid: i64) -> Result<&mut User, Fail> {
        self.users.get_mut(&uid).ok_or_else(|| Fail::not_found("user"))
    }

    fn find_user(&self, fields: &Fields) -> Result<&User, Fail> {
        let matches = |user: &&User| {
            if let Some(name) = fields.opt_str("username") {
                user.username == name
            } else if let Some(email) = fields.opt_str("email") {
                user.email.as_deref() == Some(email.as_str())
            } else if let Some(phone) = fields.opt_str("phoneNum") {
                user.phone_num.as_deref() == Some(phone.as_str())
            } else {
                false
            }
        };
        if ["username", "email", "phoneNum"]
            .iter()
            .all(|k| fields.opt_str(k).is_none())
        {
            return Err(Fail::param_format("username"));
        }
        self.users
            .values()
            .find(matches)
            .ok_or_else(|| Fail::not_found("user"))
    }

    fn authorize(&self, uid: i64, access_token: &str) -> Result<(), Fail> {
        match self.login_tokens.get(access_token) {
            Some(token) if token.uid == uid && token.expires > now() => Ok(()),
            _ => Err(Fail::denied()),
        }
    }

    fn authorize_fields(&self, fields: &Fields) -> Result<i64, Fail> {
        let uid = fields.i64("uid")?;
        self.authorize(uid, &fields.str("access_token")?)?;
        Ok(uid)
    }

    fn issue_login_token(&mut self, uid: i64) -> LoginToken {
        let issued = now();
        let token = LoginToken {
            access_token: new_token(),
            refresh_token: new_token(),
            uid,
            issued,
            expires: issued + TOKEN_TTL_SECS,
            refresh_expires: issued + REFRESH_TTL_SECS,
        };
        self.login_tokens
            .insert(token.access_token.clone(), token.clone());
        token
    }

    // --- users ---

    pub fn register(&mut self, fields: &Fields) -> Result<User, Fail> {
        let username = fields.str("username")?;
        let password = fields.str("password")?;
        let email = fields.opt_str("email");
        let phone_num = fields.opt_str("phoneNum");
        if email.is_none() && phone_num.is_none() {
            return Err(Fail::argument("email", "an email or phone number is required"));
        }
        if self.users.values().any(|u| u.username == username) {
            return Err(Fail::exists("username"));
        }
        if email.is_some() && self.users.values().any(|u| u.email == email) {
            return Err(Fail::exists("email"));
        }

        let uid = self.next_uid;
        self.next_uid += 1;
        let user = User {
            uid,
            nickname: fields.opt_str("nickname").unwrap_or_else(|| username.clone()),
            username,
            email: email.clone(),
            phone_num,
            email_verified: false,
            phone_verified: false,
            settings: Settings {
                allow_email_notifications: true,
                ..Default::default()
            },
            password,
        };
        self.users.insert(uid, user.clone());
        if email.is_some() {
            self.send_code(uid, CodePurpose::VerifyEmail);
        }
        Ok(user)
    }

    pub fn login(&mut self, fields: &Fields) -> Result<LoginToken, Fail> {
        let password = fields.str("password")?;
        let user = self.find_user(fields)?;
        if user.password != password {
            return Err(Fail::mismatch("password"));
        }
        let uid = user.uid;
        Ok(self.issue_login_token(uid))
    }

    pub fn check_token(&self, uid: i64, access_token: &str) -> Result<LoginToken, Fail> {
        match self.login_tokens.get(access_token) {
            Some(token) if token.uid == uid => {
                if token.expires <= now() {
                    Err(Fail::expired("token"))
                } else {
                    Ok(token.clone())
                }
            }
            _ => Err(Fail::not_found("token")),
        }
    }

    pub fn refresh_login(&mut self, uid: i64, fields: &Fields) -> Result<LoginToken, Fail> {
        let refresh = fields.str("refresh_token")?;
        let old = self
            .login_tokens
            .values()
            .find(|t| t.uid == uid && t.refresh_token == refresh)
            .map(|t| t.access_token.clone())
            .ok_or_else(|| Fail::expired("refresh_token"))?;
        self.login_tokens.remove(&old);
        Ok(self.issue_login_token(uid))
    }

    pub fn logout(&mut self, uid: i64, access_token: &str) -> Result<(), Fail> {
        self.check_token(uid, access_token)?;
        self.login_tokens.remove(access_token);
        Ok(())
    }

    // --- verification codes ---

    pub fn request_verification(
        &mut self,
        fields: &Fields,
        purpose: CodePurpose,
    ) -> Result<(), Fail> {
        let user = self.find_user(fields)?;
        let uid = user.uid;
        match purpose {
            CodePurpose::VerifyEmail if user.email.is_none() => {
                return Err(Fail::argument("email", "no email address on file"))
            }
            CodePurpose::VerifyEmail if user.email_verified => return Err(Fail::exists("email")),
            CodePurpose::VerifyPhone if user.phone_num.is_none() => {
                return Err(Fail::argument("phoneNum", "no phone number on file"))
            }
            CodePurpose::VerifyPhone if user.phone_verified => {
                return Err(Fail::exists("phoneNum"))
            }
            _ => {}
        }
        self.send_code(uid, purpose);
        Ok(())
    }

    pub fn verify(&mut self, code: &str, purpose: CodePurpose) -> Result<(), Fail> {
        let uid = self.consume_code(code, purpose)?;
        let user = self.user_mut(uid)?;
        match purpose {
            CodePurpose::VerifyPhone => user.phone_verified = true,
            _ => user.email_verified = true,
        }
        Ok(())
    }

    pub fn request_change(&mut self, fields: &Fields, purpose: CodePurpose) -> Result<(), Fail> {
        let uid = self.authorize_fields(fields)?;
        self.send_code(uid, purpose);
        Ok(())
    }

    pub fn request_password_reset(&mut self, fields: &Fields) -> Result<(), Fail> {
        let uid = self.find_user(fields)?.uid;
        self.send_code(uid, CodePurpose::ChangePassword);
        Ok(())
    }

    pub fn change_email(&mut self, fields: &Fields) -> Result<(), Fail> {
        let new_email = fields.str("newEmail")?;
        let code = fields.str("veriCode")?;
        if self
            .users
            .values()
            .any(|u| u.email.as_deref() == Some(new_email.as_str()))
        {
            return Err(Fail::exists("email"));
        }
        let uid = self.consume_code(&code, CodePurpose::ChangeEmail)?;
        let user = self.user_mut(uid)?;
        user.email = Some(new_email);
        user.email_verified = true;
        Ok(())
    }

    pub fn change_phone(&mut self, fields: &Fields) -> Result<(), Fail> {
        let new_phone = fields.str("newPhoneNum")?;
        let code = fields.str("veriCode")?;
        let uid = self.consume_code(&code, CodePurpose::ChangePhone)?;
        let user = self.user_mut(uid)?;
        user.phone_num = Some(new_phone);
        user.phone_verified = true;
        Ok(())
    }

    pub fn change_password(&mut self, fields: &Fields) -> Result<(), Fail> {
        let new_password = fields.str("newPassword")?;
        let code = fields.str("veriCode")?;
        let uid = self.consume_code(&code, CodePurpose::ChangePassword)?;
        self.user_mut(uid)?.password = new_password;
        self.login_tokens.retain(|_, t| t.uid != uid);
        Ok(())
    }

    // --- masks ---

    fn owned_mask(&self, uid: i64, mask_id: &str) -> Result<&Mask, Fail> {
        let mask = self
            .masks
            .get(mask_id)
            .ok_or_else(|| Fail::not_found("mask"))?;
        if mask.uid != uid {
            return Err(Fail::denied());
        }
        Ok(mask)
    }

    pub fn list_masks(&self, fields: &Fields) -> Result<Vec<Mask>, Fail> {
        let uid = self.authorize_fields(fields)?;
        let client_id = fields.opt_str("client_id");
        let mut masks: Vec<Mask> = self
            .masks
            .values()
            .filter(|m| m.uid == uid)
            .filter(|m| client_id.as_deref().map_or(true, |c| m.client_id == c))
            .cloned()
            .collect();
        masks.sort_by_key(|m| (m.create_time, m.mask_id.clone()));
        Ok(masks)
    }

    pub fn get_mask(&self, mask_id: &str, fields: &Fields) -> Result<Mask, Fail> {
        let uid = self.authorize_fields(fields)?;
        self.owned_mask(uid, mask_id).cloned()
    }

    pub fn create_mask(&mut self, fields: &Fields) -> Result<Mask, Fail> {
        let uid = self.authorize_fields(fields)?;
        let client_id = fields.str("client_id")?;
        if !self.clients.contains_key(&client_id) {
            return Err(Fail::not_found("client_id"));
        }
        let display_name = fields.str("display_name")?;
        if self
            .masks
            .values()
            .any(|m| m.uid == uid && m.client_id == client_id && m.display_name == display_name)
        {
            return Err(Fail::exists("display_name"));
        }
        let settings = match fields.settings()? {
            Some(settings) => settings,
            None => self.user_mut(uid)?.settings.clone(),
        };
        let mask = Mask {
            mask_id: new_token(),
            client_id,
            uid,
            display_name,
            create_time: now(),
            settings,
        };
        self.masks.insert(mask.mask_id.clone(), mask.clone());
        Ok(mask)
    }

    pub fn update_mask(&mut self, mask_id: &str, fields: &Fields) -> Result<Mask, Fail> {
        let uid = self.authorize_fields(fields)?;
        self.owned_mask(uid, mask_id)?;
        let display_name = fields.opt_str("display_name");
        let settings = fields.settings()?;
        if display_name.is_none() && settings.is_none() {
            return Err(Fail::param_format("display_name"));
        }
        let mask = self
            .masks
            .get_mut(mask_id)
            .ok_or_else(|| Fail::not_found("mask"))?;
        if let Some(name) = display_name {
            mask.display_name = name;
        }
        if let Some(settings) = settings {
            mask.settings = settings;
        }
        Ok(mask.clone())
    }

    pub fn delete_mask(&mut self, mask_id: &str, fields: &Fields) -> Result<(), Fail> {
        let uid = self.authorize_fields(fields)?;
        self.owned_mask(uid, mask_id)?;
        self.masks.remove(mask_id);
        self.oauth_tokens.retain(|_, t| t.mask_id != mask_id);
        Ok(())
    }

    // --- oauth ---

    fn check_client_secret(&self, client_id: &str, secret: Option<&str>) -> Result<(), Fail> {
        let expected = self
            .clients
            .get(client_id)
            .ok_or_else(|| Fail::not_found("client_id"))?;
        match secret {
            Some(s) if s == expected => Ok(()),
            Some(_) => Err(Fail::mismatch("client_secret")),
            None => Ok(()),
        }
    }

    fn issue_oauth_token(&mut self, mask_id: String, client_id: String, method: i64) -> OAuthToken {
        let issued = now();
        let token = OAuthToken {
            access_token: new_token(),
            refresh_token: new_token(),
            obtained_method: method,
            issued,
            expires: issued + TOKEN_TTL_SECS,
            last_renewed: issued,
            refresh_expires: issued + REFRESH_TTL_SECS,
            mask_id,
            client_id,
            scope: vec!["info".to_string(), "notifications".to_string()],
        };
        self.oauth_tokens
            .insert(token.access_token.clone(), token.clone());
        token
    }

    pub fn exchange_auth_code(&mut self, fields: &Fields) -> Result<OAuthToken, Fail> {
        let code = fields.str("code")?;
        let client_id = fields.str("client_id")?;
        let secret = fields.opt_str("client_secret");
        let verifier = fields.opt_str("code_verifier");

        let grant = self
            .auth_codes
            .get(&code)
            .cloned()
            .ok_or_else(|| Fail::not_found("code"))?;
        if grant.used {
            return Err(Fail::expired("code"));
        }
        if grant.client_id != client_id {
            return Err(Fail::mismatch("client_id"));
        }
        match (&grant.code_challenge, verifier, secret) {
            (Some(challenge), Some(verifier), _) => {
                if *challenge != verifier {
                    return Err(Fail::mismatch("code_verifier"));
                }
            }
            (_, _, Some(secret)) => self.check_client_secret(&client_id, Some(&secret))?,
            _ => return Err(Fail::param_format("client_secret")),
        }

        if let Some(entry) = self.auth_codes.get_mut(&code) {
            entry.used = true;
        }
        Ok(self.issue_oauth_token(grant.mask_id, client_id, 1))
    }

    pub fn verify_oauth_token(&self, fields: &Fields) -> Result<OAuthToken, Fail> {
        let access_token = fields.str("access_token")?;
        let client_id = fields.str("client_id")?;
        self.check_client_secret(&client_id, fields.opt_str("client_secret").as_deref())?;
        let token = self
            .oauth_tokens
            .get(&access_token)
            .ok_or_else(|| Fail::not_found("access_token"))?;
        if token.client_id != client_id {
            return Err(Fail::denied());
        }
        if let Some(mask_id) = fields.opt_str("mask_id") {
            if token.mask_id != mask_id {
                return Err(Fail::mismatch("mask_id"));
            }
        }
        if token.expires <= now() {
            return Err(Fail::expired("access_token"));
        }
        Ok(token.clone())
    }

    pub fn refresh_oauth_token(&mut self, fields: &Fields) -> Result<OAuthToken, Fail> {
        let client_id = fields.str("client_id")?;
        let refresh = fields.str("refresh_token")?;
        self.check_client_secret(&client_id, fields.opt_str("client_secret").as_deref())?;
        let old = self
            .oauth_tokens
            .values()
            .find(|t| t.refresh_token == refresh && t.client_id == client_id)
            .cloned()
            .ok_or_else(|| Fail::expired("refresh_token"))?;
        self.oauth_tokens.remove(&old.access_token);
        Ok(self.issue_oauth_token(old.mask_id, client_id, old.obtained_method))
    }

    fn oauth_mask(&self, fields: &Fields) -> Result<&Mask, Fail> {
        let access_token = fields.str("access_token")?;
        let token = self
            .oauth_tokens
            .get(&access_token)
            .filter(|t| t.expires > now())
            .ok_or_else(Fail::denied)?;
        self.masks
            .get(&token.mask_id)
            .ok_or_else(|| Fail::not_found("mask"))
    }

    pub fn user_info(&self, fields: &Fields) -> Result<Value, Fail> {
        let mask = self.oauth_mask(fields)?;
        Ok(json!({
            "mask_id": mask.mask_id,
            "display_name": mask.display_name,
            "settings": mask.settings,
        }))
    }

    pub fn notify(&mut self, fields: &Fields) -> Result<Value, Fail> {
        let title = fields.str("title")?;
        fields.str("content")?;
        let is_sales = fields.opt_str("is_sales").as_deref() == Some("1");
        let preferred = fields.i64("preferred_send_methods")?;
        let mask = self.oauth_mask(fields)?;

        let method = std::iter::once(preferred)
            .chain([1, 2, 3])
            .find(|m| mask.settings.allows(*m, is_sales));
        let method = match method {
            Some(m) => m,
            None if is_sales => return Err(Fail::denied()),
            None => 0,
        };
        let mask_id = mask.mask_id.clone();
        if method != 0 {
            self.notifications.push(Notification {
                mask_id,
                title,
                method,
            });
        }
        Ok(json!({ "SENT_METHOD": method }))
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn new_db() -> Db {
    Arc::new(RwLock::new(SsoState::new()))
}

pub fn app() -> Router {
    app_with_state(new_db())
}

pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route("/user", post(register))
        .route("/user/token", post(login))
        .route("/user/email", patch(change_email))
        .route("/user/phoneNum", patch(change_phone))
        .route("/user/password", patch(change_password))
        .route("/user/{uid}/token/refreshResult", get(refresh_login))
        .route(
            "/user/{uid}/token/{token}/checkTokenResult",
            get(check_token),
        )
        .route("/user/{uid}/token/{token}", delete(logout))
        .route("/vericodes/verifyEmail", post(request_email_verification))
        .route("/vericodes/verifyEmailResult/{code}", get(verify_email))
        .route("/vericodes/verifyPhone", post(request_phone_verification))
        .route("/vericodes/verifyPhoneResult/{code}", get(verify_phone))
        .route(
            "/vericodes/changeEmailAddressRequest",
            post(request_email_change),
        )
        .route(
            "/vericodes/changePhoneNumberRequest",
            post(request_phone_change),
        )
        .route(
            "/vericodes/changePasswordRequest",
            post(request_password_reset),
        )
        .route("/masks", get(list_masks).post(create_mask))
        .route(
            "/masks/{mask_id}",
            get(get_mask).patch(update_mask).delete(delete_mask),
        )
        .route("/oauth_token", post(issue_oauth_token))
        .route("/oauth_token/verified_status", get(verify_oauth_token))
        .route("/oauth_token/refresh_result", get(refresh_oauth_token))
        .route("/oauth_ability/user_info", get(user_info))
        .route("/oauth_ability/notification", post(notify))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, new_db()).await
}

pub async fn run_with_state(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(db)).await
}

type Pairs = HashMap<String, String>;

async fn register(State(db): State<Db>, Form(form): Form<Pairs>) -> Response {
    let fields = Fields::from_pairs(form);
    reply(StatusCode::CREATED, db.write().await.register(&fields))
}

async fn login(State(db): State<Db>, Form(form): Form<Pairs>) -> Response {
    let fields = Fields::from_pairs(form);
    reply(StatusCode::CREATED, db.write().await.login(&fields))
}

async fn check_token(State(db): State<Db>, Path((uid, token)): Path<(i64, String)>) -> Response {
    reply(StatusCode::OK, db.read().await.check_token(uid, &token))
}

async fn refresh_login(
    State(db): State<Db>,
    Path(uid): Path<i64>,
    Query(query): Query<Pairs>,
) -> Response {
    let fields = Fields::from_pairs(query);
    reply(StatusCode::OK, db.write().await.refresh_login(uid, &fields))
}

async fn logout(State(db): State<Db>, Path((uid, token)): Path<(i64, String)>) -> Response {
    reply_deleted(db.write().await.logout(uid, &token))
}

async fn request_email_verification(State(db): State<Db>, Form(form): Form<Pairs>) -> Response {
    let fields = Fields::from_pairs(form);
    let result = db
        .write()
        .await
        .request_verification(&fields, CodePurpose::VerifyEmail);
    reply_empty(StatusCode::CREATED, result)
}

async fn verify_email(State(db): State<Db>, Path(code): Path<String>) -> Response {
    let result = db.write().await.verify(&code, CodePurpose::VerifyEmail);
    reply_empty(StatusCode::OK, result)
}

async fn request_phone_verification(State(db): State<Db>, Form(form): Form<Pairs>) -> Response {
    let fields = Fields::from_pairs(form);
    let result = db
        .write()
        .await
        .request_verification(&fields, CodePurpose::VerifyPhone);
    reply_empty(StatusCode::CREATED, result)
}

async fn verify_phone(State(db): State<Db>, Path(code): Path<String>) -> Response {
    let result = db.write().await.verify(&code, CodePurpose::VerifyPhone);
    reply_empty(StatusCode::OK, result)
}

async fn request_email_change(State(db): State<Db>, Form(form): Form<Pairs>) -> Response {
    let fields = Fields::from_pairs(form);
    let result = db
        .write()
        .await
        .request_change(&fields, CodePurpose::ChangeEmail);
    reply_empty(StatusCode::CREATED, result)
}

async fn request_phone_change(State(db): State<Db>, Form(form): Form<Pairs>) -> Response {
    let fields = Fields::from_pairs(form);
    let result = db
        .write()
        .await
        .request_change(&fields, CodePurpose::ChangePhone);
    reply_empty(StatusCode::CREATED, result)
}

async fn request_password_reset(State(db): State<Db>, Form(form): Form<Pairs>) -> Response {
    let fields = Fields::from_pairs(form);
    let result = db.write().await.request_password_reset(&fields);
    reply_empty(StatusCode::CREATED, result)
}

async fn change_email(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let result = match Fields::from_json(body) {
        Ok(fields) => db.write().await.change_email(&fields),
        Err(fail) => Err(fail),
    };
    reply_empty(StatusCode::OK, result)
}

async fn change_phone(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let result = match Fields::from_json(body) {
        Ok(fields) => db.write().await.change_phone(&fields),
        Err(fail) => Err(fail),
    };
    reply_empty(StatusCode::OK, result)
}

async fn change_password(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let result = match Fields::from_json(body) {
        Ok(fields) => db.write().await.change_password(&fields),
        Err(fail) => Err(fail),
    };
    reply_empty(StatusCode::OK, result)
}

async fn list_masks(State(db): State<Db>, Query(query): Query<Pairs>) -> Response {
    let fields = Fields::from_pairs(query);
    reply(StatusCode::OK, db.read().await.list_masks(&fields))
}

async fn get_mask(
    State(db): State<Db>,
    Path(mask_id): Path<String>,
    Query(query): Query<Pairs>,
) -> Response {
    let fields = Fields::from_pairs(query);
    reply(StatusCode::OK, db.read().await.get_mask(&mask_id, &fields))
}

async fn create_mask(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let result = match Fields::from_json(body) {
        Ok(fields) => db.write().await.create_mask(&fields),
        Err(fail) => Err(fail),
    };
    reply(StatusCode::CREATED, result)
}

async fn update_mask(
    State(db): State<Db>,
    Path(mask_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let result = match Fields::from_json(body) {
        Ok(fields) => db.write().await.update_mask(&mask_id, &fields),
        Err(fail) => Err(fail),
    };
    reply(StatusCode::OK, result)
}

async fn delete_mask(
    State(db): State<Db>,
    Path(mask_id): Path<String>,
    Query(query): Query<Pairs>,
) -> Response {
    let fields = Fields::from_pairs(query);
    reply_deleted(db.write().await.delete_mask(&mask_id, &fields))
}

async fn issue_oauth_token(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let result = match Fields::from_json(body) {
        Ok(fields) => db.write().await.exchange_auth_code(&fields),
        Err(fail) => Err(fail),
    };
    reply(StatusCode::CREATED, result)
}

async fn verify_oauth_token(State(db): State<Db>, Query(query): Query<Pairs>) -> Response {
    let fields = Fields::from_pairs(query);
    reply(StatusCode::OK, db.read().await.verify_oauth_token(&fields))
}

async fn refresh_oauth_token(State(db): State<Db>, Query(query): Query<Pairs>) -> Response {
    let fields = Fields::from_pairs(query);
    reply(StatusCode::OK, db.write().await.refresh_oauth_token(&fields))
}

async fn user_info(State(db): State<Db>, Query(query): Query<Pairs>) -> Response {
    let fields = Fields::from_pairs(query);
    reply(StatusCode::OK, db.read().await.user_info(&fields))
}

async fn notify(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let result = match Fields::from_json(body) {
        Ok(fields) => db.write().await.notify(&fields),
        Err(fail) => Err(fail),
    };
    reply(StatusCode::CREATED, result)
}
