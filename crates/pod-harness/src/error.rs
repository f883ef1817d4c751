//! Error types for the harness HTTP and authentication layers.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

/// Errors from the HTTP client layer.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// A header value could not be encoded
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// Asymmetric key generation failed
    #[error("Failed to generate a signing key: {0}")]
    KeyGeneration(String),

    /// DPoP proof generation failed
    #[error("Failed to generate a proof token: {0}")]
    ProofGeneration(String),

    /// A request that must succeed returned a non-success status
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
    },

    /// A container listing could not be interpreted
    #[error("Bad container listing for {url}: {detail}")]
    BadContainerListing {
        /// Container URL
        url: String,
        /// What went wrong
        detail: String,
    },
}

impl ClientError {
    /// Create an unexpected-status error.
    #[must_use]
    pub fn unexpected_status(status: u16, url: impl Into<String>) -> Self {
        Self::UnexpectedStatus { status, url: url.into() }
    }
}

/// Errors from the authentication flow.
///
/// Each variant marks the failure of one flow step. None of these are
/// retried: server-side state such as issued authorization codes is
/// single-use, so a blind retry is unsafe.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// No credentials configured for the requested identity
    #[error("No user credentials were provided for {user}")]
    NoCredentials {
        /// Identity label
        user: String,
    },

    /// OIDC discovery request failed
    #[error("OIDC discovery failed with status {status}")]
    Discovery {
        /// HTTP status code
        status: u16,
    },

    /// The discovery document was missing or malformed
    #[error("Bad OIDC discovery document: {detail}")]
    BadDiscoveryDocument {
        /// What was missing or malformed
        detail: String,
    },

    /// The discovered issuer does not match the configured identity provider
    #[error("The discovered issuer {actual} does not match the configured identity provider {expected}")]
    IssuerMismatch {
        /// Configured identity provider
        expected: String,
        /// Issuer from the discovery document
        actual: String,
    },

    /// The provider does not advertise the grant type the credentials require
    #[error("Identity provider does not support grant type: {grant_type}")]
    UnsupportedGrant {
        /// The required grant type
        grant_type: String,
    },

    /// Dynamic client registration failed
    #[error("Client registration failed with status {status}")]
    Registration {
        /// HTTP status code
        status: u16,
    },

    /// The registration response was malformed
    #[error("Bad client registration response: {detail}")]
    BadRegistration {
        /// What was missing or malformed
        detail: String,
    },

    /// The login request was rejected
    #[error("Login failed with status {status}")]
    Login {
        /// HTTP status code
        status: u16,
    },

    /// User self-registration failed
    #[error("User registration failed with status {status}")]
    UserRegistration {
        /// HTTP status code
        status: u16,
    },

    /// A required endpoint is absent from the harness configuration
    #[error("No {name} endpoint is configured")]
    MissingEndpoint {
        /// Which endpoint was needed
        name: &'static str,
    },

    /// The authorization step never redirected back to the origin
    #[error("Failed to follow authentication redirects")]
    NoRedirect,

    /// The final redirect carried no authorization code
    #[error("Failed to get authorization code")]
    AuthorizationCode,

    /// The token endpoint rejected the exchange
    #[error("Token exchange failed for grant type: {grant_type} (status {status})")]
    TokenExchange {
        /// Grant type being exchanged
        grant_type: String,
        /// HTTP status code
        status: u16,
    },

    /// The token response was malformed or carried no access token
    #[error("Bad token response for grant type: {grant_type}")]
    BadTokenResponse {
        /// Grant type being exchanged
        grant_type: String,
    },

    /// Error from the HTTP client layer
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A URL could not be constructed or resolved
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;
