//! Notification clients.
//!
//! A client is built by name from a parameter map. Parameters not given in
//! the configuration are filled from environment variables named
//! `{CLIENT}_{KEY}`, e.g. `WEBHOOKCLIENT_URL`.

mod clients;

pub use clients::LoggingNotifier;
#[cfg(feature = "webhook")]
pub use clients::WebhookNotifier;

use crate::errors::{ExecutionError, RegistryError};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Keys that describe the node rather than the client.
pub const EXCLUDED_PARAMS: [&str; 4] = ["class", "client", "message", "destinations"];

/// An outbound message sink.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Posts a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be delivered.
    fn post_message(&self, message: &str) -> anyhow::Result<()>;
}

/// Builds a notifier from its parameters.
pub type NotifierConstructor =
    Arc<dyn Fn(&Map<String, Value>) -> anyhow::Result<Box<dyn Notifier>> + Send + Sync>;

/// Registry of notification clients by name.
#[derive(Default)]
pub struct NotifierRegistry {
    constructors: RwLock<HashMap<String, NotifierConstructor>>,
}

impl std::fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierRegistry")
            .field("clients", &self.client_names())
            .finish()
    }
}

impl NotifierRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in clients.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.insert(
            LoggingNotifier::CLIENT_NAME,
            Arc::new(|params: &Map<String, Value>| Ok(Box::new(LoggingNotifier::from_params(params)) as Box<dyn Notifier>)),
        );
        #[cfg(feature = "webhook")]
        registry.insert(
            WebhookNotifier::CLIENT_NAME,
            Arc::new(|params: &Map<String, Value>| Ok(Box::new(WebhookNotifier::from_params(params)?) as Box<dyn Notifier>)),
        );
        registry
    }

    fn insert(&self, name: &str, constructor: NotifierConstructor) {
        self.constructors.write().insert(name.to_string(), constructor);
    }

    /// Registers a client.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRegistration` if the name is taken and
    /// `allow_overwrite` is false.
    pub fn register(
        &self,
        name: impl Into<String>,
        constructor: NotifierConstructor,
        allow_overwrite: bool,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut constructors = self.constructors.write();
        if !allow_overwrite && constructors.contains_key(&name) {
            return Err(RegistryError::DuplicateRegistration { key: name });
        }
        constructors.insert(name, constructor);
        Ok(())
    }

    /// Returns true if a client is registered under `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.read().contains_key(name)
    }

    /// Registered client names, sorted.
    #[must_use]
    pub fn client_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds the named client, merging environment parameters into `params`.
    ///
    /// # Errors
    ///
    /// Returns `NotifierUnavailable` if the client is unknown or its
    /// constructor fails.
    pub fn build(
        &self,
        client: &str,
        params: &Map<String, Value>,
    ) -> Result<Box<dyn Notifier>, ExecutionError> {
        let constructor = self
            .constructors
            .read()
            .get(client)
            .cloned()
            .ok_or_else(|| ExecutionError::NotifierUnavailable {
                client: client.to_string(),
                message: format!("no client registered under '{client}'"),
            })?;

        let merged = client_params(client, params, std::env::vars());
        constructor(&merged).map_err(|e| ExecutionError::NotifierUnavailable {
            client: client.to_string(),
            message: e.to_string(),
        })
    }
}

/// Merges client parameters from the configuration and the environment.
///
/// Node-level keys (`class`, `client`, `message`, `destinations`) are
/// dropped. An environment variable `{CLIENT}_{KEY}` supplies `key` unless the
/// configuration already sets it.
#[must_use]
pub fn client_params(
    client: &str,
    params: &Map<String, Value>,
    env: impl IntoIterator<Item = (String, String)>,
) -> Map<String, Value> {
    let mut merged: Map<String, Value> = params
        .iter()
        .filter(|(k, _)| !EXCLUDED_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let prefix = format!("{}_", client.to_uppercase());
    for (name, value) in env {
        let Some(key) = name.strip_prefix(&prefix) else {
            continue;
        };
        let key = key.to_lowercase();
        if key.is_empty() || EXCLUDED_PARAMS.contains(&key.as_str()) || params.contains_key(&key) {
            continue;
        }
        merged.insert(key, Value::String(value));
    }
    merged
}
