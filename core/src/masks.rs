//! Mask management: per-application display profiles of a user.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::http::Endpoint;
use crate::oauth::non_empty;
use crate::types::{MaskEntity, UserSettings};
use crate::user::{path_segment, UserApi, UserSession};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateMaskParams {
    pub display_name: String,
    pub settings: Option<UserSettings>,
}

/// Fields to change on a mask. At least one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateMaskParams {
    pub display_name: Option<String>,
    pub settings: Option<UserSettings>,
}

impl UpdateMaskParams {
    pub fn validate(&self) -> Result<()> {
        if self.display_name.is_none() && self.settings.is_none() {
            return Err(Error::InvalidParams("nothing to update on mask".to_string()));
        }
        if let Some(name) = &self.display_name {
            non_empty(name, "display_name")?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct MaskBody<'a> {
    uid: i64,
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<&'a UserSettings>,
}

fn mask_path(mask_id: &str) -> Result<String> {
    Ok(format!("/masks/{}", path_segment(non_empty(mask_id, "mask_id")?)))
}

impl UserApi {
    pub fn build_list_masks(&self, session: &UserSession) -> Result<Endpoint> {
        let query = session
            .auth_params()?
            .add("client_id", self.inner.config().client_id.as_str());
        Ok(Endpoint::get("/masks").query(query))
    }

    /// Masks the user holds for the configured application.
    pub fn list_masks(&self, session: &UserSession) -> Result<Vec<MaskEntity>> {
        let endpoint = self.build_list_masks(session)?;
        self.inner.call(&endpoint)
    }

    pub fn build_get_mask(&self, session: &UserSession, mask_id: &str) -> Result<Endpoint> {
        Ok(Endpoint::get(mask_path(mask_id)?).query(session.auth_params()?))
    }

    pub fn get_mask(&self, session: &UserSession, mask_id: &str) -> Result<MaskEntity> {
        let endpoint = self.build_get_mask(session, mask_id)?;
        self.inner.call(&endpoint)
    }

    pub fn build_create_mask(
        &self,
        session: &UserSession,
        params: &CreateMaskParams,
    ) -> Result<Endpoint> {
        let body = MaskBody {
            uid: session.uid,
            access_token: session.access_token()?,
            client_id: Some(self.inner.config().client_id.as_str()),
            display_name: Some(non_empty(&params.display_name, "display_name")?),
            settings: params.settings.as_ref(),
        };
        Endpoint::post("/masks").json(&body).map_err(Error::from)
    }

    pub fn create_mask(
        &self,
        session: &UserSession,
        params: &CreateMaskParams,
    ) -> Result<MaskEntity> {
        let endpoint = self.build_create_mask(session, params)?;
        self.inner.call(&endpoint)
    }

    pub fn build_update_mask(
        &self,
        session: &UserSession,
        mask_id: &str,
        params: &UpdateMaskParams,
    ) -> Result<Endpoint> {
        params.validate()?;
        let body = MaskBody {
            uid: session.uid,
            access_token: session.access_token()?,
            client_id: None,
            display_name: params.display_name.as_deref(),
            settings: params.settings.as_ref(),
        };
        Endpoint::patch(mask_path(mask_id)?)
            .json(&body)
            .map_err(Error::from)
    }

    pub fn update_mask(
        &self,
        session: &UserSession,
        mask_id: &str,
        params: &UpdateMaskParams,
    ) -> Result<MaskEntity> {
        let endpoint = self.build_update_mask(session, mask_id, params)?;
        self.inner.call(&endpoint)
    }

    pub fn build_delete_mask(&self, session: &UserSession, mask_id: &str) -> Result<Endpoint> {
        Ok(Endpoint::delete(mask_path(mask_id)?).query(session.auth_params()?))
    }

    pub fn delete_mask(&self, session: &UserSession, mask_id: &str) -> Result<()> {
        let endpoint = self.build_delete_mask(session, mask_id)?;
        self.inner.call_no_content(&endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::scripted_client;
    use crate::envelope::ErrorCategory;
    use crate::http::{HttpMethod, Payload};
    use crate::types::UserToken;

    fn session() -> UserSession {
        UserSession::new(
            3,
            UserToken {
                access_token: "tok".to_string(),
                uid: 3,
                ..Default::default()
            },
        )
    }

    #[test]
    fn list_masks_scopes_to_configured_client() {
        let (client, _) = scripted_client(false);
        let request = client
            .user()
            .build_list_masks(&session())
            .unwrap()
            .to_request("http://sso.test", "ua");
        assert_eq!(
            request.url,
            "http://sso.test/masks?uid=3&access_token=tok&client_id=app"
        );
    }

    #[test]
    fn list_masks_decodes_array() {
        let (client, transport) = scripted_client(false);
        transport.respond(
            200,
            r#"{"errorCode":0,"data":[{"mask_id":"m1","display_name":"One"},{"mask_id":"m2"}]}"#,
        );
        let masks = client.user().list_masks(&session()).unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].display_name, "One");
    }

    #[test]
    fn create_mask_posts_json_with_settings() {
        let (client, _) = scripted_client(false);
        let params = CreateMaskParams {
            display_name: "Gamer".to_string(),
            settings: Some(UserSettings {
                allow_email_notifications: true,
                ..Default::default()
            }),
        };
        let endpoint = client.user().build_create_mask(&session(), &params).unwrap();
        assert_eq!(endpoint.method, HttpMethod::Post);
        assert_eq!(endpoint.expected_status, 201);
        let Payload::Json(body) = endpoint.payload else {
            panic!("expected JSON payload");
        };
        assert_eq!(body["uid"], 3);
        assert_eq!(body["client_id"], "app");
        assert_eq!(body["settings"]["allowEmailNotifications"], true);
    }

    #[test]
    fn update_mask_requires_a_change() {
        let (client, _) = scripted_client(false);
        let err = client
            .user()
            .build_update_mask(&session(), "m1", &UpdateMaskParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn update_mask_omits_unset_fields() {
        let (client, _) = scripted_client(false);
        let params = UpdateMaskParams {
            display_name: Some("Renamed".to_string()),
            settings: None,
        };
        let endpoint = client
            .user()
            .build_update_mask(&session(), "m1", &params)
            .unwrap();
        assert_eq!(endpoint.path, "/masks/m1");
        assert_eq!(endpoint.method, HttpMethod::Patch);
        let Payload::Json(body) = endpoint.payload else {
            panic!("expected JSON payload");
        };
        assert!(body.get("settings").is_none());
        assert!(body.get("client_id").is_none());
    }

    #[test]
    fn get_unknown_mask_is_item_not_found() {
        let (client, transport) = scripted_client(false);
        transport.respond(
            200,
            r#"{"errorCode":10,"errorDescription":"no such mask","item":"mask"}"#,
        );
        let err = client.user().get_mask(&session(), "nope").unwrap_err();
        assert_eq!(err.category(), Some(ErrorCategory::ItemNotFound));
        assert_eq!(err.classified().unwrap().detail.as_deref(), Some("mask"));
    }

    #[test]
    fn delete_mask_expects_204() {
        let (client, transport) = scripted_client(false);
        transport.respond(204, "");
        client.user().delete_mask(&session(), "m1").unwrap();
        let request = transport.last_request();
        assert_eq!(request.method, HttpMethod::Delete);
        assert_eq!(request.url, "http://sso.test/masks/m1?uid=3&access_token=tok");
    }
}
