//! Credential resolution for nodes.
//!
//! The engine only needs `get_credential(ref)`; how secrets are stored is up
//! to the provider. Two providers ship with weft: an in-memory map and a JSON
//! file mapping credential refs to field maps:
//!
//! ```json
//! { "mailer": { "provider": "resend", "api_key": "re_..." } }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::CredentialsConfig;
use crate::error::{Error, Result};
use crate::nodes::Credentials;

/// Resolves a node's credential reference to its fields.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credential(&self, credential_ref: &str) -> Result<Credentials>;
}

/// In-memory credentials.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    credentials: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential_ref: &str, fields: Credentials) -> Self {
        self.credentials.insert(credential_ref.to_string(), fields);
        self
    }

    pub fn insert(&mut self, credential_ref: &str, fields: Credentials) {
        self.credentials.insert(credential_ref.to_string(), fields);
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_credential(&self, credential_ref: &str) -> Result<Credentials> {
        self.credentials
            .get(credential_ref)
            .cloned()
            .ok_or_else(|| {
                Error::CredentialResolution(format!("Credential '{}' not found", credential_ref))
            })
    }
}

/// Credentials read from a JSON file on every lookup, so edits apply
/// without a restart.
#[derive(Debug, Clone)]
pub struct JsonFileCredentials {
    path: PathBuf,
}

impl JsonFileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for JsonFileCredentials {
    async fn get_credential(&self, credential_ref: &str) -> Result<Credentials> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::CredentialResolution(format!(
                "Failed to read credentials file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let mut all: HashMap<String, Value> = serde_json::from_str(&content).map_err(|e| {
            Error::CredentialResolution(format!("Failed to parse credentials file: {}", e))
        })?;

        match all.remove(credential_ref) {
            Some(Value::Object(fields)) => Ok(fields),
            Some(_) => Err(Error::CredentialResolution(format!(
                "Credential '{}' must be an object",
                credential_ref
            ))),
            None => Err(Error::CredentialResolution(format!(
                "Credential '{}' not found",
                credential_ref
            ))),
        }
    }
}

/// Build the configured provider. Without a file, every lookup fails.
pub fn provider_from_config(config: &CredentialsConfig) -> Arc<dyn CredentialProvider> {
    match &config.path {
        Some(path) => Arc::new(JsonFileCredentials::new(path)),
        None => Arc::new(StaticCredentials::new()),
    }
}
