//! The authentication manager.
//!
//! Orchestrates OIDC discovery, dynamic client registration and the three
//! supported grant flows, producing an authenticated [`Client`] per test
//! identity. One identity's flow is strictly sequential: every request
//! depends on values from the previous response. Distinct identities may
//! authenticate concurrently; the registry serializes the only shared state.

mod oidc;

pub use oidc::{OidcConfiguration, Registration, RegistrationRequest, Tokens};

use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::Method;
use url::Url;

use crate::client::{Client, ClientConfig};
use crate::config::{defaults, Config, TargetServer, UserCredentials};
use crate::error::{AuthError, AuthResult, ClientError};
use crate::registry::{ClientRegistry, SESSION};
use crate::resource::ResourceClient;

use oidc::ensure_slash;

/// The refresh-token grant type.
pub const REFRESH_TOKEN: &str = "refresh_token";

/// The client-credentials grant type.
pub const CLIENT_CREDENTIALS: &str = "client_credentials";

/// The authorization-code grant type.
pub const AUTHORIZATION_CODE: &str = "authorization_code";

const WELL_KNOWN_OPENID: &str = ".well-known/openid-configuration";

static LOGIN_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<form\s[^>]*method\s*=\s*['"]?post"#).expect("valid form regex")
});

// Some providers return the post-login redirect in a JSON body instead of a
// Location header.
static JSON_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""location"\s*:\s*"([^"]+)""#).expect("valid location regex"));

/// Produces authenticated clients for test identities.
#[derive(Debug)]
pub struct AuthManager {
    config: Arc<Config>,
    registry: Arc<ClientRegistry>,
}

impl AuthManager {
    /// Create a manager over the harness configuration and client registry.
    #[must_use]
    pub fn new(config: Arc<Config>, registry: Arc<ClientRegistry>) -> Self {
        Self { config, registry }
    }

    /// Authenticate an identity and return a resource client for it.
    ///
    /// Idempotent per label: once a client is registered, subsequent calls
    /// return it without repeating any discovery or token work. A new client
    /// is registered *before* the network flow starts so a partially
    /// authenticated client remains discoverable when the flow fails.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] identifying the failing flow step.
    pub async fn authenticate(
        &self,
        user: &str,
        target: &TargetServer,
    ) -> AuthResult<ResourceClient> {
        if let Some(existing) = self.registry.get(Some(user)) {
            return Ok(ResourceClient::new(existing));
        }

        if !target.authentication {
            let client = Arc::new(Client::with_config(user, &self.base_client_config())?);
            self.registry.register(user, Arc::clone(&client));
            return Ok(ResourceClient::new(client));
        }

        tracing::debug!(%user, "building new client");
        let credentials = self
            .config
            .credentials(user)
            .ok_or_else(|| AuthError::NoCredentials { user: user.to_string() })?
            .clone();
        let issuer = self.config.identity_provider.clone();

        let mut client_config = self.base_client_config();
        client_config.dpop_support = target.dpop_supported;
        client_config.localhost_support = is_localhost(&issuer);
        let auth_client = Arc::new(Client::with_config(user, &client_config)?);
        self.registry.register(user, Arc::clone(&auth_client));

        let oidc = self.request_oidc_configuration(&auth_client, &issuer).await?;

        let tokens = if credentials.is_using_refresh_token() {
            self.exchange_refresh_token(&auth_client, &credentials, &oidc).await?
        } else if credentials.is_using_client_credentials() {
            self.client_credentials_access_token(&auth_client, &credentials, &oidc).await?
        } else if credentials.is_using_username_password() {
            let session =
                self.registry.get(Some(SESSION)).expect("session client is always registered");
            self.login_and_get_access_token(&auth_client, &credentials, &oidc, &session).await?
        } else {
            tracing::warn!(%user, %credentials, "unusable credentials");
            return Err(AuthError::NoCredentials { user: user.to_string() });
        };

        auth_client.set_access_token(tokens.access_token.clone());
        tracing::info!(%user, "authentication complete");
        Ok(ResourceClient::new(auth_client))
    }

    /// Provision a test account on a server that supports self-registration.
    ///
    /// # Errors
    ///
    /// Returns an error if no registration endpoint or credentials are
    /// configured, or the server rejects the signup.
    pub async fn register_user(&self, user: &str) -> AuthResult<()> {
        let endpoint = self
            .config
            .user_registration_endpoint
            .as_ref()
            .ok_or(AuthError::MissingEndpoint { name: "user registration" })?;
        tracing::info!(%user, %endpoint, "registering user");

        let credentials = self
            .config
            .credentials(user)
            .ok_or_else(|| AuthError::NoCredentials { user: user.to_string() })?;
        let (username, password) = username_password(credentials, user)?;

        let mut client_config = self.base_client_config();
        client_config.localhost_support = is_localhost(endpoint);
        let client = Client::with_config(user, &client_config)?;

        let request = client
            .request(Method::POST, endpoint)
            .form(&[
                ("email", username),
                ("password", password),
                ("confirmPassword", password),
                ("podName", user),
                ("register", "ok"),
                ("createWebId", "ok"),
                ("createPod", "ok"),
            ])
            .build()
            .map_err(ClientError::from)?;
        let response = client.send(request).await?;
        let status = response.status().as_u16();
        if !is_successful_or_redirect(status) {
            return Err(AuthError::UserRegistration { status });
        }
        Ok(())
    }

    async fn request_oidc_configuration(
        &self,
        client: &Client,
        issuer: &Url,
    ) -> AuthResult<OidcConfiguration> {
        let well_known =
            Url::parse(&format!("{}{WELL_KNOWN_OPENID}", ensure_slash(issuer.as_str())))?;
        tracing::debug!(%well_known, "fetching OIDC configuration");

        let request = client
            .request(Method::GET, &well_known)
            .header(ACCEPT, "application/json")
            .build()
            .map_err(ClientError::from)?;
        let response = client.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Discovery { status: status.as_u16() });
        }
        let oidc: OidcConfiguration = response
            .json()
            .await
            .map_err(|e| AuthError::BadDiscoveryDocument { detail: e.to_string() })?;

        // Exact match guards against discovery-document spoofing; both sides
        // are slash-terminated first.
        let expected = ensure_slash(issuer.as_str());
        let actual = oidc
            .issuer()
            .ok_or_else(|| AuthError::BadDiscoveryDocument { detail: "missing issuer".into() })?;
        if actual != expected {
            return Err(AuthError::IssuerMismatch { expected, actual });
        }
        Ok(oidc)
    }

    async fn exchange_refresh_token(
        &self,
        auth_client: &Client,
        credentials: &UserCredentials,
        oidc: &OidcConfiguration,
    ) -> AuthResult<Tokens> {
        tracing::info!(user = auth_client.user(), "exchanging refresh token");
        if !oidc.supports_grant(REFRESH_TOKEN) {
            return Err(AuthError::UnsupportedGrant { grant_type: REFRESH_TOKEN.to_string() });
        }
        let refresh_token = required(credentials.refresh_token.as_deref(), auth_client.user())?;
        let client_id = required(credentials.client_id.as_deref(), auth_client.user())?;
        let client_secret = required(credentials.client_secret.as_deref(), auth_client.user())?;
        self.request_token(
            auth_client,
            oidc,
            client_id,
            client_secret,
            &[("grant_type", REFRESH_TOKEN), ("refresh_token", refresh_token)],
            REFRESH_TOKEN,
        )
        .await
    }

    async fn client_credentials_access_token(
        &self,
        auth_client: &Client,
        credentials: &UserCredentials,
        oidc: &OidcConfiguration,
    ) -> AuthResult<Tokens> {
        tracing::info!(user = auth_client.user(), "using client credentials");
        if !oidc.supports_grant(CLIENT_CREDENTIALS) {
            return Err(AuthError::UnsupportedGrant { grant_type: CLIENT_CREDENTIALS.to_string() });
        }
        let client_id = required(credentials.client_id.as_deref(), auth_client.user())?;
        let client_secret = required(credentials.client_secret.as_deref(), auth_client.user())?;
        self.request_token(
            auth_client,
            oidc,
            client_id,
            client_secret,
            &[("grant_type", CLIENT_CREDENTIALS)],
            CLIENT_CREDENTIALS,
        )
        .await
    }

    async fn login_and_get_access_token(
        &self,
        auth_client: &Client,
        credentials: &UserCredentials,
        oidc: &OidcConfiguration,
        session: &Client,
    ) -> AuthResult<Tokens> {
        tracing::info!(user = auth_client.user(), "login and get access token");
        if !oidc.supports_grant(AUTHORIZATION_CODE) {
            return Err(AuthError::UnsupportedGrant { grant_type: AUTHORIZATION_CODE.to_string() });
        }
        let login = username_password(credentials, auth_client.user())?;

        // When the server provisions accounts itself, login happens inside
        // the authorization flow instead of up front.
        if self.config.user_registration_endpoint.is_none() {
            if let Some(login_endpoint) = &self.config.login_endpoint {
                self.start_login_session(session, login, login_endpoint).await?;
            }
        }

        let registration = self.register_client(session, oidc).await?;
        let auth_code =
            self.request_authorization_code(session, oidc, &registration.client_id, login).await?;

        self.request_token(
            auth_client,
            oidc,
            &registration.client_id,
            &registration.client_secret,
            &[
                ("grant_type", AUTHORIZATION_CODE),
                ("code", &auth_code),
                ("redirect_uri", &self.config.origin),
                ("client_id", &registration.client_id),
            ],
            AUTHORIZATION_CODE,
        )
        .await
    }

    async fn start_login_session(
        &self,
        session: &Client,
        (username, password): (&str, &str),
        login_endpoint: &Url,
    ) -> AuthResult<()> {
        tracing::debug!(%login_endpoint, "starting login session");
        let request = session
            .request(Method::POST, login_endpoint)
            .form(&[("username", username), ("password", password)])
            .build()
            .map_err(ClientError::from)?;
        let response = session.send(request).await?;
        let status = response.status().as_u16();
        if !is_successful_or_redirect(status) {
            return Err(AuthError::Login { status });
        }
        Ok(())
    }

    async fn register_client(
        &self,
        session: &Client,
        oidc: &OidcConfiguration,
    ) -> AuthResult<Registration> {
        let endpoint = oidc.registration_endpoint()?;
        tracing::debug!(%endpoint, "registering client");
        let request = session
            .request(Method::POST, endpoint)
            .json(&RegistrationRequest::web(&self.config.origin))
            .build()
            .map_err(ClientError::from)?;
        let response = session.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Registration { status: status.as_u16() });
        }
        response.json().await.map_err(|e| AuthError::BadRegistration { detail: e.to_string() })
    }

    async fn request_authorization_code(
        &self,
        session: &Client,
        oidc: &OidcConfiguration,
        client_id: &str,
        login: (&str, &str),
    ) -> AuthResult<String> {
        let authorize_endpoint = oidc.authorization_endpoint()?.clone();
        let origin = self.config.origin.as_str();
        let mut redirect_url = Url::parse_with_params(
            authorize_endpoint.as_str(),
            [
                ("response_type", "code"),
                ("redirect_uri", origin),
                ("scope", "openid"),
                ("client_id", client_id),
            ],
        )?;

        for _ in 0..defaults::MAX_REDIRECT_HOPS {
            tracing::debug!(%redirect_url, "authorize request");
            let request = session
                .request(Method::GET, &redirect_url)
                .header(ACCEPT, "text/html")
                .build()
                .map_err(ClientError::from)?;
            let response = session.send(request).await?;

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let next = match location {
                // Relative redirects resolve against the authorize endpoint.
                Some(location) => authorize_endpoint.join(&location)?,
                None => {
                    let page_url = response.url().clone();
                    let body = response.text().await.map_err(ClientError::from)?;
                    if !LOGIN_FORM.is_match(&body) {
                        return Err(AuthError::NoRedirect);
                    }
                    // Login occurs during the authorization flow.
                    match self.idp_login(session, &page_url, login, &authorize_endpoint).await? {
                        Some(next) => next,
                        None => return Err(AuthError::NoRedirect),
                    }
                }
            };

            if next.as_str().starts_with(origin) {
                return next
                    .query_pairs()
                    .find(|(key, _)| key == "code")
                    .map(|(_, value)| value.into_owned())
                    .ok_or(AuthError::AuthorizationCode);
            }
            redirect_url = next;
        }
        Err(AuthError::NoRedirect)
    }

    async fn idp_login(
        &self,
        session: &Client,
        login_url: &Url,
        (username, password): (&str, &str),
        authorize_endpoint: &Url,
    ) -> AuthResult<Option<Url>> {
        tracing::debug!(%login_url, "interactive login form detected");
        let request = session
            .request(Method::POST, login_url)
            .form(&[("email", username), ("password", password)])
            .build()
            .map_err(ClientError::from)?;
        let response = session.send(request).await?;

        if let Some(location) = response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
            return Ok(Some(authorize_endpoint.join(location)?));
        }
        let body = response.text().await.map_err(ClientError::from)?;
        if let Some(capture) = JSON_LOCATION.captures(&body) {
            return Ok(Some(authorize_endpoint.join(&capture[1])?));
        }
        Ok(None)
    }

    async fn request_token(
        &self,
        auth_client: &Client,
        oidc: &OidcConfiguration,
        client_id: &str,
        client_secret: &str,
        form: &[(&str, &str)],
        grant_type: &str,
    ) -> AuthResult<Tokens> {
        let endpoint = oidc.token_endpoint()?;
        tracing::debug!(grant_type, %endpoint, "token exchange");

        let mut request = auth_client
            .request(Method::POST, endpoint)
            .basic_auth(client_id, Some(client_secret))
            .header(ACCEPT, "application/json")
            .form(&form)
            .build()
            .map_err(ClientError::from)?;
        // Token requests are proof-of-possession-bound from the first token.
        auth_client.sign_request(&mut request)?;

        let response = auth_client.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(grant_type, status = status.as_u16(), "token exchange failed");
            return Err(AuthError::TokenExchange {
                grant_type: grant_type.to_string(),
                status: status.as_u16(),
            });
        }

        let tokens: Tokens = response
            .json()
            .await
            .map_err(|_| AuthError::BadTokenResponse { grant_type: grant_type.to_string() })?;
        if tokens.access_token.is_empty() {
            return Err(AuthError::BadTokenResponse { grant_type: grant_type.to_string() });
        }
        Ok(tokens)
    }

    fn base_client_config(&self) -> ClientConfig {
        ClientConfig {
            agent: self.config.agent.clone(),
            request_timeout: self.config.request_timeout,
            connect_timeout: self.config.connect_timeout,
            ..ClientConfig::default()
        }
    }
}

fn username_password<'a>(
    credentials: &'a UserCredentials,
    user: &str,
) -> AuthResult<(&'a str, &'a str)> {
    match (credentials.username.as_deref(), credentials.password.as_deref()) {
        (Some(username), Some(password)) => Ok((username, password)),
        _ => Err(AuthError::NoCredentials { user: user.to_string() }),
    }
}

fn required<'a>(value: Option<&'a str>, user: &str) -> AuthResult<&'a str> {
    value.ok_or_else(|| AuthError::NoCredentials { user: user.to_string() })
}

fn is_localhost(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost"))
}

fn is_successful_or_redirect(status: u16) -> bool {
    (200..400).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuer_slash_normalization() {
        assert_eq!(ensure_slash("https://idp.example"), "https://idp.example/");
        assert_eq!(ensure_slash("https://idp.example/"), "https://idp.example/");
    }

    #[test]
    fn localhost_detection_is_host_based() {
        assert!(is_localhost(&Url::parse("https://localhost:8443/idp/").unwrap()));
        assert!(!is_localhost(&Url::parse("https://idp.example/").unwrap()));
        assert!(!is_localhost(&Url::parse("https://localhost.example/").unwrap()));
    }

    #[test]
    fn login_form_detection() {
        assert!(LOGIN_FORM.is_match(r#"<html><form id="login" method="post" action="/login">"#));
        assert!(LOGIN_FORM.is_match("<FORM METHOD=POST action=/login>"));
        assert!(!LOGIN_FORM.is_match("<html><p>No form here</p></html>"));
    }

    #[test]
    fn json_location_detection() {
        let body = r#"{"location": "/authorize?step=2", "other": 1}"#;
        assert_eq!(&JSON_LOCATION.captures(body).unwrap()[1], "/authorize?step=2");
        assert!(JSON_LOCATION.captures("{}").is_none());
    }

    #[test]
    fn successful_or_redirect_range() {
        assert!(is_successful_or_redirect(200));
        assert!(is_successful_or_redirect(302));
        assert!(!is_successful_or_redirect(400));
        assert!(!is_successful_or_redirect(500));
    }
}
