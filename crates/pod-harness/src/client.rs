//! Per-identity HTTP client.
//!
//! A [`Client`] owns one HTTP identity: the underlying transport, an optional
//! access token and an optional DPoP signing key. All protocol requests for a
//! test identity go through its `Client` so TLS and cookie state are reused.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{redirect, Method, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use url::Url;

use crate::config::defaults;
use crate::dpop::DpopKey;
use crate::error::ClientResult;

const DPOP_HEADER: &str = "dpop";
const MEDIA_TYPE_TEXT_TURTLE: &str = "text/turtle";

/// Options consumed when constructing a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Attach a cookie jar, for browser-style login flows.
    pub session_support: bool,

    /// Disable TLS certificate and hostname verification. Opt-in only, for
    /// servers running on localhost with self-signed certificates.
    pub localhost_support: bool,

    /// Generate a DPoP signing key for this identity.
    pub dpop_support: bool,

    /// User agent string.
    pub agent: String,

    /// Request timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Maximum transient retries per request.
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_support: false,
            localhost_support: false,
            dpop_support: false,
            agent: defaults::AGENT.to_string(),
            request_timeout: defaults::REQUEST_TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
            max_retries: defaults::MAX_RETRIES,
        }
    }
}

/// One HTTP identity and its request-signing policy.
pub struct Client {
    user: String,
    http: ClientWithMiddleware,
    access_token: RwLock<Option<String>>,
    dpop_key: Option<DpopKey>,
    session_support: bool,
    localhost_support: bool,
    agent: String,
}

impl Client {
    /// Build a client for the given identity label.
    ///
    /// Redirects are never followed automatically: the authorization flow
    /// must observe each hop itself.
    ///
    /// # Errors
    ///
    /// Returns an error if transport construction or key generation fails.
    pub fn with_config(user: impl Into<String>, config: &ClientConfig) -> ClientResult<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.agent.as_str())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(redirect::Policy::none())
            .gzip(true);

        if config.session_support {
            builder = builder.cookie_store(true);
        }
        if config.localhost_support {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(500), Duration::from_secs(10))
            .build_with_max_retries(config.max_retries);

        let http = ClientBuilder::new(builder.build()?)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let dpop_key = if config.dpop_support { Some(DpopKey::generate()?) } else { None };

        Ok(Self {
            user: user.into(),
            http,
            access_token: RwLock::new(None),
            dpop_key,
            session_support: config.session_support,
            localhost_support: config.localhost_support,
            agent: config.agent.clone(),
        })
    }

    /// The identity label this client was built for.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether requests are signed with a DPoP proof.
    #[must_use]
    pub fn has_dpop_support(&self) -> bool {
        self.dpop_key.is_some()
    }

    /// The current access token, if authenticated.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().expect("token lock poisoned").clone()
    }

    /// Store the access token issued for this identity. Written once, at the
    /// end of a login flow.
    pub fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().expect("token lock poisoned") = Some(token.into());
    }

    /// Start building a request on this client's transport.
    #[must_use]
    pub fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        self.http.request(method, url.clone())
    }

    /// Execute a request as-is. The caller decides all headers.
    ///
    /// # Errors
    ///
    /// Transport and timeout failures propagate as [`crate::ClientError`].
    pub async fn send(&self, request: Request) -> ClientResult<Response> {
        Ok(self.http.execute(request).await?)
    }

    /// Attach authentication headers, then execute.
    ///
    /// # Errors
    ///
    /// Returns an error on proof generation or transport failure.
    pub async fn send_authorized(&self, builder: RequestBuilder) -> ClientResult<Response> {
        let mut request = builder.build()?;
        self.authorize(&mut request)?;
        self.send(request).await
    }

    /// Add a DPoP proof over the request's final method and URL. A no-op for
    /// clients without DPoP support.
    ///
    /// Must be applied after all other request mutations: the proof covers
    /// method and URI only, so a later change to either would invalidate it.
    ///
    /// # Errors
    ///
    /// Returns an error if proof generation fails.
    pub fn sign_request(&self, request: &mut Request) -> ClientResult<()> {
        if let Some(key) = &self.dpop_key {
            let proof = key.proof(request.method(), request.url())?;
            request
                .headers_mut()
                .insert(HeaderName::from_static(DPOP_HEADER), HeaderValue::from_str(&proof)?);
        }
        Ok(())
    }

    /// The authentication header set for a request, as used by test features
    /// that build their own requests.
    ///
    /// Returns an empty map when no access token is set: an unauthenticated
    /// client is a valid state, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if proof generation fails.
    pub fn auth_headers(&self, method: &Method, url: &Url) -> ClientResult<HashMap<String, String>> {
        let mut headers = HashMap::new();
        let Some(token) = self.access_token() else {
            return Ok(headers);
        };
        if let Some(key) = &self.dpop_key {
            headers.insert(AUTHORIZATION.as_str().to_string(), format!("DPoP {token}"));
            headers.insert(DPOP_HEADER.to_string(), key.proof(method, url)?);
        } else {
            headers.insert(AUTHORIZATION.as_str().to_string(), format!("Bearer {token}"));
        }
        headers.insert(USER_AGENT.as_str().to_string(), self.agent.clone());
        Ok(headers)
    }

    /// PUT a resource representation.
    ///
    /// # Errors
    ///
    /// Returns an error on proof generation or transport failure.
    pub async fn put(&self, url: &Url, body: String, content_type: &str) -> ClientResult<Response> {
        self.send_authorized(
            self.request(Method::PUT, url).header(CONTENT_TYPE, content_type).body(body),
        )
        .await
    }

    /// HEAD a resource.
    ///
    /// # Errors
    ///
    /// Returns an error on proof generation or transport failure.
    pub async fn head(&self, url: &Url) -> ClientResult<Response> {
        self.send_authorized(self.request(Method::HEAD, url)).await
    }

    /// GET a resource in the protocol's native RDF format.
    ///
    /// # Errors
    ///
    /// Returns an error on proof generation or transport failure.
    pub async fn get_turtle(&self, url: &Url) -> ClientResult<Response> {
        self.send_authorized(self.request(Method::GET, url).header(ACCEPT, MEDIA_TYPE_TEXT_TURTLE))
            .await
    }

    /// DELETE a resource.
    ///
    /// # Errors
    ///
    /// Returns an error on proof generation or transport failure.
    pub async fn delete(&self, url: &Url) -> ClientResult<Response> {
        tracing::debug!(user = %self.user, %url, "deleting resource");
        self.send_authorized(self.request(Method::DELETE, url)).await
    }

    fn authorize(&self, request: &mut Request) -> ClientResult<()> {
        let Some(token) = self.access_token() else {
            return Ok(());
        };
        let scheme = if self.dpop_key.is_some() { "DPoP" } else { "Bearer" };
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&format!("{scheme} {token}"))?);
        if self.dpop_key.is_some() {
            self.sign_request(request)?;
        }
        Ok(())
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Client: user={}, dpop={}, session={}, local={}",
            self.user,
            self.dpop_key.is_some(),
            self.session_support,
            self.localhost_support,
        )
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("user", &self.user)
            .field("access_token", &self.access_token().as_deref().map(mask_token))
            .field("dpop", &self.dpop_key.is_some())
            .field("session", &self.session_support)
            .finish()
    }
}

/// Masked form of a token for logs: at most the last six characters.
pub(crate) fn mask_token(token: &str) -> String {
    let tail: String =
        token.chars().rev().take(6).collect::<Vec<_>>().into_iter().rev().collect();
    format!("***{tail}")
}
