//! Client configuration.
//!
//! A [`ClientConfig`] is fixed for the lifetime of an [`SsoClient`]: base
//! URL, application credentials, the per-call timeout and the debug flag
//! that lets diagnostic file/line fields through the envelope decoder.
//!
//! [`SsoClient`]: crate::SsoClient

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default per-call timeout, covering connect and response read.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Validated client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ClientConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from `SSO_BASE_URL`, `SSO_CLIENT_ID`, `SSO_CLIENT_SECRET`,
    /// `SSO_TIMEOUT_SECS` and `SSO_DEBUG`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = ConfigBuilder::default();
        if let Some(url) = lookup("SSO_BASE_URL") {
            builder = builder.base_url(url);
        }
        if let Some(id) = lookup("SSO_CLIENT_ID") {
            builder = builder.client_id(id);
        }
        if let Some(secret) = lookup("SSO_CLIENT_SECRET").filter(|s| !s.is_empty()) {
            builder = builder.client_secret(secret);
        }
        if let Some(raw) = lookup("SSO_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                Error::InvalidParams(format!("SSO_TIMEOUT_SECS is not a number: {raw}"))
            })?;
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("SSO_DEBUG") {
            builder = builder.debug(matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ));
        }
        builder.build()
    }

    /// Check invariants and normalize the base URL. Configs deserialized
    /// from a file should go through this before use.
    pub fn validated(mut self) -> Result<Self> {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if self.base_url.is_empty() {
            return Err(Error::InvalidParams("base_url is required".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::InvalidParams(format!(
                "base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidParams("client_id is required".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::InvalidParams(
                "timeout must be at least one second".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("sso-core/{}", env!("CARGO_PKG_VERSION")))
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    base_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    timeout: Option<Duration>,
    debug: bool,
    user_agent: Option<String>,
}

impl ConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Per-call timeout. Sub-second precision is rounded up to whole seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let timeout_secs = match self.timeout {
            Some(t) if t.subsec_nanos() > 0 => t.as_secs() + 1,
            Some(t) => t.as_secs(),
            None => DEFAULT_TIMEOUT_SECS,
        };
        ClientConfig {
            base_url: self.base_url.unwrap_or_default(),
            client_id: self.client_id.unwrap_or_default(),
            client_secret: self.client_secret,
            timeout_secs,
            debug: self.debug,
            user_agent: self.user_agent,
        }
        .validated()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn builder_requires_base_url() {
        let err = ClientConfig::builder().client_id("app").build().unwrap_err();
        assert!(matches!(err, Error::InvalidParams(msg) if msg.contains("base_url")));
    }

    #[test]
    fn builder_requires_client_id() {
        let err = ClientConfig::builder()
            .base_url("http://localhost:3000")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(msg) if msg.contains("client_id")));
    }

    #[test]
    fn builder_rejects_non_http_url() {
        let err = ClientConfig::builder()
            .base_url("ftp://example.org")
            .client_id("app")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn builder_defaults_and_trailing_slash() {
        let config = ClientConfig::builder()
            .base_url("http://localhost:3000/")
            .client_id("app")
            .build()
            .unwrap();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(!config.debug);
        assert!(config.user_agent().starts_with("sso-core/"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ClientConfig::builder()
            .base_url("http://localhost:3000")
            .client_id("app")
            .timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn subsecond_timeout_rounds_up() {
        let config = ClientConfig::builder()
            .base_url("http://localhost:3000")
            .client_id("app")
            .timeout(Duration::from_millis(1500))
            .build()
            .unwrap();
        assert_eq!(config.timeout_secs, 2);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url":"https://sso.example.org/","client_id":"app","debug":true}"#,
        )
        .unwrap();
        let config = config.validated().unwrap();
        assert_eq!(config.base_url, "https://sso.example.org");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(config.debug);
        assert!(config.client_secret.is_none());
    }

    #[test]
    fn loads_from_environment_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SSO_BASE_URL", "http://127.0.0.1:9000"),
            ("SSO_CLIENT_ID", "app"),
            ("SSO_CLIENT_SECRET", "s3cret"),
            ("SSO_TIMEOUT_SECS", "5"),
            ("SSO_DEBUG", "true"),
        ]);
        let config =
            ClientConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.timeout_secs, 5);
        assert!(config.debug);
    }

    #[test]
    fn bad_timeout_in_environment_is_rejected() {
        let err = ClientConfig::from_lookup(|key| match key {
            "SSO_BASE_URL" => Some("http://localhost".to_string()),
            "SSO_CLIENT_ID" => Some("app".to_string()),
            "SSO_TIMEOUT_SECS" => Some("soon".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }
}
