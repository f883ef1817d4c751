//! Configuration for the conformance harness HTTP layer.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use url::Url;

/// Transport configuration constants.
pub mod defaults {
    use std::time::Duration;

    /// User agent sent with every request.
    pub const AGENT: &str = concat!("pod-harness/", env!("CARGO_PKG_VERSION"));

    /// Request timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Maximum transient retries per request.
    pub const MAX_RETRIES: u32 = 3;

    /// Maximum redirect hops followed during the authorization step.
    pub const MAX_REDIRECT_HOPS: u32 = 16;

    /// Maximum concurrent deletions per container.
    pub const MAX_DELETE_CONCURRENCY: usize = 16;
}

/// Harness configuration: the identity provider under test, the app origin
/// registered as a redirect target, and per-identity login material.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity provider root URL (the OIDC issuer).
    pub identity_provider: Url,

    /// Origin registered as the redirect URI for the authorization-code flow.
    pub origin: String,

    /// Login endpoint used to establish a session before the authorization
    /// flow. Optional: some providers only offer an interactive form.
    pub login_endpoint: Option<Url>,

    /// Endpoint for provisioning test accounts, where supported.
    pub user_registration_endpoint: Option<Url>,

    /// User agent string.
    pub agent: String,

    /// Request timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Login material per identity label.
    credentials: HashMap<String, UserCredentials>,
}

impl Config {
    /// Create a configuration for the given identity provider and origin.
    #[must_use]
    pub fn new(identity_provider: Url, origin: impl Into<String>) -> Self {
        Self {
            identity_provider,
            origin: origin.into(),
            login_endpoint: None,
            user_registration_endpoint: None,
            agent: defaults::AGENT.to_string(),
            request_timeout: defaults::REQUEST_TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            credentials: HashMap::new(),
        }
    }

    /// Create a test configuration pointing at a mock server.
    ///
    /// # Panics
    ///
    /// Panics if `base_url` is not a valid URL (test-only constructor).
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        let mut config =
            Self::new(Url::parse(base_url).expect("valid mock server URL"), "https://tester");
        config.request_timeout = Duration::from_secs(5);
        config.connect_timeout = Duration::from_secs(2);
        config
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `POD_IDENTITY_PROVIDER` is unset or not a URL.
    pub fn from_env() -> anyhow::Result<Self> {
        let identity_provider = std::env::var("POD_IDENTITY_PROVIDER")?;
        let origin =
            std::env::var("POD_ORIGIN").unwrap_or_else(|_| "https://tester".to_string());
        let mut config = Self::new(Url::parse(&identity_provider)?, origin);
        if let Ok(login) = std::env::var("POD_LOGIN_ENDPOINT") {
            config.login_endpoint = Some(Url::parse(&login)?);
        }
        Ok(config)
    }

    /// Register login material for an identity label.
    pub fn add_credentials(&mut self, user: impl Into<String>, credentials: UserCredentials) {
        self.credentials.insert(user.into(), credentials);
    }

    /// Look up login material for an identity label.
    #[must_use]
    pub fn credentials(&self, user: &str) -> Option<&UserCredentials> {
        self.credentials.get(user)
    }
}

/// Configured login material for one identity.
///
/// Exactly one credential mode should be populated: username + password,
/// refresh token + client id/secret, or client id + secret alone.
#[derive(Debug, Clone, Default)]
pub struct UserCredentials {
    /// Username for the authorization-code flow.
    pub username: Option<String>,

    /// Password for the authorization-code flow.
    pub password: Option<String>,

    /// Refresh token for the refresh-token grant.
    pub refresh_token: Option<String>,

    /// OAuth client id.
    pub client_id: Option<String>,

    /// OAuth client secret.
    pub client_secret: Option<String>,
}

impl UserCredentials {
    /// True when username and password are both present.
    #[must_use]
    pub fn is_using_username_password(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// True when a refresh token and its client id/secret are all present.
    #[must_use]
    pub fn is_using_refresh_token(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }

    /// True when only a client id and secret are present.
    #[must_use]
    pub fn is_using_client_credentials(&self) -> bool {
        self.refresh_token.is_none() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl fmt::Display for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UserCredentials: username={}, password={}, refreshToken={}, clientId={}, clientSecret={}",
            mask(self.username.as_deref()),
            mask(self.password.as_deref()),
            mask(self.refresh_token.as_deref()),
            mask(self.client_id.as_deref()),
            mask(self.client_secret.as_deref()),
        )
    }
}

fn mask(value: Option<&str>) -> &'static str {
    if value.is_some() { "***" } else { "null" }
}

/// Per-server test configuration supplied by the harness.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TargetServer {
    /// Whether the server requires authenticated access at all.
    #[serde(default = "enabled")]
    pub authentication: bool,

    /// Whether DPoP-bound tokens are supported. When false, clients fall
    /// back to plain bearer tokens.
    #[serde(default = "enabled", rename = "dpop")]
    pub dpop_supported: bool,
}

fn enabled() -> bool {
    true
}

impl Default for TargetServer {
    fn default() -> Self {
        Self { authentication: true, dpop_supported: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_modes_are_exclusive() {
        let password = UserCredentials {
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
            ..UserCredentials::default()
        };
        assert!(password.is_using_username_password());
        assert!(!password.is_using_refresh_token());
        assert!(!password.is_using_client_credentials());

        let refresh = UserCredentials {
            refresh_token: Some("R".to_string()),
            client_id: Some("C".to_string()),
            client_secret: Some("S".to_string()),
            ..UserCredentials::default()
        };
        assert!(refresh.is_using_refresh_token());
        assert!(!refresh.is_using_client_credentials());

        let machine = UserCredentials {
            client_id: Some("C".to_string()),
            client_secret: Some("S".to_string()),
            ..UserCredentials::default()
        };
        assert!(machine.is_using_client_credentials());
        assert!(!machine.is_using_refresh_token());
    }

    #[test]
    fn credentials_display_never_reveals_values() {
        let creds = UserCredentials {
            username: Some("alice".to_string()),
            password: Some("hunter2".to_string()),
            ..UserCredentials::default()
        };
        let shown = creds.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn target_server_defaults_to_full_support() {
        let target = TargetServer::default();
        assert!(target.authentication);
        assert!(target.dpop_supported);

        let parsed: TargetServer = serde_json::from_str(r#"{"dpop": false}"#).unwrap();
        assert!(parsed.authentication);
        assert!(!parsed.dpop_supported);
    }

    #[test]
    fn config_for_testing_uses_short_timeouts() {
        let config = Config::for_testing("http://127.0.0.1:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.origin, "https://tester");
        assert!(config.credentials("alice").is_none());
    }
}
