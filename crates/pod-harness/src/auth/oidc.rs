//! Wire types for OIDC discovery, dynamic client registration and token
//! exchange. Plain structs with explicit serde field tags; unknown fields are
//! ignored.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::mask_token;
use crate::error::{AuthError, AuthResult};

/// A fetched OIDC discovery document.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfiguration {
    issuer: Option<String>,
    authorization_endpoint: Option<Url>,
    token_endpoint: Option<Url>,
    registration_endpoint: Option<Url>,
    #[serde(default)]
    grant_types_supported: Vec<String>,
}

impl OidcConfiguration {
    /// The advertised issuer, slash-terminated so trailing-slash differences
    /// cannot defeat the equality check against the configured provider.
    #[must_use]
    pub fn issuer(&self) -> Option<String> {
        self.issuer.as_deref().map(ensure_slash)
    }

    /// Whether the provider advertises the given grant type.
    #[must_use]
    pub fn supports_grant(&self, grant_type: &str) -> bool {
        self.grant_types_supported.iter().any(|g| g == grant_type)
    }

    /// The authorization endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadDiscoveryDocument`] if the document omits it.
    pub fn authorization_endpoint(&self) -> AuthResult<&Url> {
        self.authorization_endpoint
            .as_ref()
            .ok_or_else(|| missing("authorization_endpoint"))
    }

    /// The token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadDiscoveryDocument`] if the document omits it.
    pub fn token_endpoint(&self) -> AuthResult<&Url> {
        self.token_endpoint.as_ref().ok_or_else(|| missing("token_endpoint"))
    }

    /// The dynamic registration endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BadDiscoveryDocument`] if the document omits it.
    pub fn registration_endpoint(&self) -> AuthResult<&Url> {
        self.registration_endpoint.as_ref().ok_or_else(|| missing("registration_endpoint"))
    }
}

fn missing(field: &str) -> AuthError {
    AuthError::BadDiscoveryDocument { detail: format!("missing {field}") }
}

/// Slash-terminate a URL string.
pub(crate) fn ensure_slash(value: &str) -> String {
    if value.ends_with('/') { value.to_string() } else { format!("{value}/") }
}

/// Body of a dynamic client registration request.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    application_type: &'static str,
    redirect_uris: Vec<String>,
    token_endpoint_auth_method: &'static str,
}

impl RegistrationRequest {
    /// A web-application registration redirecting to the given origin,
    /// authenticating at the token endpoint with HTTP Basic.
    #[must_use]
    pub fn web(origin: &str) -> Self {
        Self {
            application_type: "web",
            redirect_uris: vec![origin.to_string()],
            token_endpoint_auth_method: "client_secret_basic",
        }
    }
}

/// A dynamically registered OAuth client.
#[derive(Clone, Deserialize)]
pub struct Registration {
    /// Issued client id.
    pub client_id: String,
    /// Issued client secret.
    pub client_secret: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_token(&self.client_secret))
            .finish()
    }
}

/// Result of a token exchange.
#[derive(Clone, Deserialize)]
pub struct Tokens {
    /// The issued access token.
    pub access_token: String,
    /// Refresh token, when the grant returns one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Identity token, when the grant returns one.
    #[serde(default)]
    pub id_token: Option<String>,
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &mask_token(&self.access_token))
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISCOVERY: &str = r#"{
        "issuer": "https://idp.example",
        "authorization_endpoint": "https://idp.example/authorization",
        "token_endpoint": "https://idp.example/token",
        "registration_endpoint": "https://idp.example/register",
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "claims_supported": ["sub", "webid"]
    }"#;

    #[test]
    fn discovery_document_round_trip() {
        let oidc: OidcConfiguration = serde_json::from_str(DISCOVERY).unwrap();
        assert_eq!(oidc.issuer().as_deref(), Some("https://idp.example/"));
        assert_eq!(
            oidc.token_endpoint().unwrap().as_str(),
            "https://idp.example/token"
        );
        assert!(oidc.supports_grant("refresh_token"));
        assert!(!oidc.supports_grant("client_credentials"));
    }

    #[test]
    fn issuer_already_slashed_is_unchanged() {
        let oidc: OidcConfiguration =
            serde_json::from_str(r#"{"issuer": "https://idp.example/"}"#).unwrap();
        assert_eq!(oidc.issuer().as_deref(), Some("https://idp.example/"));
    }

    #[test]
    fn missing_endpoint_is_a_bad_document() {
        let oidc: OidcConfiguration = serde_json::from_str(r#"{"issuer": "x"}"#).unwrap();
        assert!(matches!(
            oidc.registration_endpoint(),
            Err(AuthError::BadDiscoveryDocument { .. })
        ));
    }

    #[test]
    fn registration_request_shape() {
        let body = serde_json::to_value(RegistrationRequest::web("https://tester")).unwrap();
        assert_eq!(body["application_type"], "web");
        assert_eq!(body["redirect_uris"], serde_json::json!(["https://tester"]));
        assert_eq!(body["token_endpoint_auth_method"], "client_secret_basic");
    }

    #[test]
    fn tokens_debug_masks_access_token() {
        let tokens: Tokens =
            serde_json::from_str(r#"{"access_token": "very-secret-value"}"#).unwrap();
        let shown = format!("{tokens:?}");
        assert!(!shown.contains("very-secret-value"));
        assert!(shown.contains("***"));
    }
}
