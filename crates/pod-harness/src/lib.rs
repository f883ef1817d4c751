//! Pod Conformance Harness — HTTP layer
//!
//! The authentication subsystem and protocol-level resource client of a
//! conformance-test harness for a decentralized-storage web protocol. Logs
//! test identities into a target server via OIDC (authorization-code,
//! refresh-token and client-credentials grants, with dynamic client
//! registration and DPoP proof-of-possession), then performs protocol
//! resource operations on their behalf, including concurrent recursive
//! deletion of resource trees.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pod_harness::{AuthManager, ClientRegistry, Config, TargetServer, UserCredentials};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::from_env()?;
//!     config.add_credentials(
//!         "alice",
//!         UserCredentials {
//!             refresh_token: Some("...".to_string()),
//!             client_id: Some("...".to_string()),
//!             client_secret: Some("...".to_string()),
//!             ..UserCredentials::default()
//!         },
//!     );
//!
//!     let registry = Arc::new(ClientRegistry::new()?);
//!     let auth = AuthManager::new(Arc::new(config), registry);
//!     let alice = auth.authenticate("alice", &TargetServer::default()).await?;
//!
//!     let root = url::Url::parse("https://server.test/alice/")?;
//!     let outcome = alice.delete_contents_recursively(&root).await;
//!     println!("deleted {} resources", outcome.attempted.len());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod dpop;
pub mod error;
pub mod headers;
pub mod registry;
pub mod resource;

pub use auth::AuthManager;
pub use client::{Client, ClientConfig};
pub use config::{Config, TargetServer, UserCredentials};
pub use dpop::DpopKey;
pub use error::{AuthError, ClientError};
pub use registry::ClientRegistry;
pub use resource::{DeleteOutcome, ResourceClient};
