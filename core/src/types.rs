//! Payload types carried in the `data` field of successful envelopes.
//!
//! # Design
//! Field names follow the service's wire contract, which mixes snake_case
//! and camelCase. Everything except the primary identifier defaults when
//! absent, since different endpoints return different subsets of a record.
//! The mock-server defines its own copies; integration tests catch drift.

use serde::{Deserialize, Serialize};

/// OAuth access token issued to a client application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub obtained_method: i64,
    #[serde(default)]
    pub issued: i64,
    #[serde(default)]
    pub expires: i64,
    #[serde(default)]
    pub last_renewed: i64,
    #[serde(default)]
    pub refresh_expires: i64,
    #[serde(default)]
    pub mask_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub scope: Vec<String>,
}

/// Notification preferences of a user or mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
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

/// What an OAuth token may see about the user behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthUserInfo {
    pub mask_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub settings: UserSettings,
}

/// A per-application pseudonymous profile over one user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskEntity {
    pub mask_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub uid: i64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<UserSettings>,
}

/// A registered account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntity {
    pub uid: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "phoneNum")]
    pub phone_num: Option<String>,
    #[serde(default, rename = "emailVerified")]
    pub email_verified: bool,
    #[serde(default, rename = "phoneVerified")]
    pub phone_verified: bool,
    #[serde(default)]
    pub settings: UserSettings,
}

/// Login token of a user session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub uid: i64,
    #[serde(default)]
    pub issued: i64,
    #[serde(default)]
    pub expires: i64,
    #[serde(default)]
    pub refresh_expires: i64,
}

/// Channel the service used to deliver a notification (`SENT_METHOD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMethod {
    NotSent,
    Email,
    Sms,
    PhoneCall,
    Other(i64),
}

impl NotificationMethod {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => NotificationMethod::NotSent,
            1 => NotificationMethod::Email,
            2 => NotificationMethod::Sms,
            3 => NotificationMethod::PhoneCall,
            other => NotificationMethod::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            NotificationMethod::NotSent => 0,
            NotificationMethod::Email => 1,
            NotificationMethod::Sms => 2,
            NotificationMethod::PhoneCall => 3,
            NotificationMethod::Other(code) => code,
        }
    }
}

/// Wire wrapper around [`NotificationMethod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SentMethod {
    #[serde(rename = "SENT_METHOD")]
    pub code: i64,
}

impl From<SentMethod> for NotificationMethod {
    fn from(sent: SentMethod) -> Self {
        NotificationMethod::from_code(sent.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_needs_only_access_token() {
        let token: UserToken =
            serde_json::from_str(r#"{"access_token":"abc","expires":3600}"#).unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires, 3600);
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn settings_use_service_casing() {
        let settings: UserSettings = serde_json::from_str(
            r#"{"allowEmailNotifications":true,"allowSMSNotifications":true,"allowSaleSMS":false}"#,
        )
        .unwrap();
        assert!(settings.allow_email_notifications);
        assert!(settings.allow_sms_notifications);
        assert!(!settings.allow_sale_call);

        let json = serde_json::to_value(settings).unwrap();
        assert_eq!(json["allowSaleSMS"], false);
        assert_eq!(json["allowCallNotifications"], false);
    }

    #[test]
    fn oauth_token_scope_defaults_empty() {
        let token: OAuthToken = serde_json::from_str(
            r#"{"access_token":"t","refresh_token":"r","mask_id":"m","client_id":"c"}"#,
        )
        .unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("r"));
        assert!(token.scope.is_empty());
    }

    #[test]
    fn sent_method_maps_to_channel() {
        let sent: SentMethod = serde_json::from_str(r#"{"SENT_METHOD":2}"#).unwrap();
        assert_eq!(NotificationMethod::from(sent), NotificationMethod::Sms);
        assert_eq!(NotificationMethod::from_code(7), NotificationMethod::Other(7));
        assert_eq!(NotificationMethod::PhoneCall.code(), 3);
    }

    #[test]
    fn mask_without_settings_omits_them() {
        let mask = MaskEntity {
            mask_id: "m1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&mask).unwrap();
        assert!(json.get("settings").is_none());
    }
}
