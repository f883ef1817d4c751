//! Registry of authenticated HTTP clients.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::client::{Client, ClientConfig};
use crate::error::ClientResult;

/// Label of the built-in stateless client.
pub const DEFAULT: &str = "default";

/// Label of the built-in cookie-jar client used for browser-redirect flows.
pub const SESSION: &str = "session";

/// Single source of truth mapping an identity label to its [`Client`].
///
/// Repeated authentication calls for the same label are idempotent and reuse
/// transport state. Registration is rare relative to reads, so a plain
/// mutex-guarded map is sufficient.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl ClientRegistry {
    /// Create a registry seeded with the [`DEFAULT`] and [`SESSION`] clients.
    ///
    /// # Errors
    ///
    /// Returns an error if either built-in client cannot be constructed.
    pub fn new() -> ClientResult<Self> {
        let registry = Self { clients: Mutex::new(HashMap::new()) };
        registry.register(DEFAULT, Arc::new(Client::with_config(DEFAULT, &ClientConfig::default())?));
        let session_config = ClientConfig { session_support: true, ..ClientConfig::default() };
        registry.register(SESSION, Arc::new(Client::with_config(SESSION, &session_config)?));
        Ok(registry)
    }

    /// Register a client under a label, replacing any previous entry.
    pub fn register(&self, label: impl Into<String>, client: Arc<Client>) {
        self.clients.lock().expect("registry lock poisoned").insert(label.into(), client);
    }

    /// Remove a client.
    pub fn unregister(&self, label: &str) {
        self.clients.lock().expect("registry lock poisoned").remove(label);
    }

    /// Whether a client is registered under the label.
    #[must_use]
    pub fn has_client(&self, label: &str) -> bool {
        self.clients.lock().expect("registry lock poisoned").contains_key(label)
    }

    /// Look up a client; `None` as a label means the [`DEFAULT`] client.
    #[must_use]
    pub fn get(&self, label: Option<&str>) -> Option<Arc<Client>> {
        self.clients
            .lock()
            .expect("registry lock poisoned")
            .get(label.unwrap_or(DEFAULT))
            .cloned()
    }
}
