use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::{
    config::ControllerConfig,
    error::{Error, Result},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub path: String,
    pub version: Option<u64>,
}

impl ReadRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: None,
        }
    }
}

#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Fetch the raw JSON document stored at `request.path`.
    async fn read(&self, request: &ReadRequest) -> Result<Value>;
}

pub struct VaultClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
}

impl VaultClient {
    pub fn new(config: &ControllerConfig) -> anyhow::Result<Self> {
        let http_client = Client::builder().timeout(config.fetch_timeout()).build()?;
        Ok(Self {
            http_client,
            base_url: config.vault_addr.trim_end_matches('/').to_owned(),
            token: config.vault_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl SecretBackend for VaultClient {
    async fn read(&self, request: &ReadRequest) -> Result<Value> {
        let path = request.path.as_str();
        let mut builder = self.http_client.get(self.url(path));
        if let Some(token) = &self.token {
            builder = builder.header("X-Vault-Token", token);
        }
        if let Some(version) = request.version {
            builder = builder.query(&[("version", version)]);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::not_accessible(path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::not_accessible(
                path,
                format!("backend answered with status {status}"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::not_accessible(path, e))?;
        debug!(path, bytes = body.len(), "read secret from backend");

        serde_json::from_slice(&body).map_err(|e| Error::malformed(path, e))
    }
}

/// Backend answering from an in-process table of documents keyed by path.
#[derive(Default)]
pub struct MemoryBackend {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: &str, document: Value) {
        self.lock().insert(path.to_owned(), document);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SecretBackend for MemoryBackend {
    async fn read(&self, request: &ReadRequest) -> Result<Value> {
        self.lock()
            .get(&request.path)
            .cloned()
            .ok_or_else(|| Error::not_accessible(&request.path, "no document at path"))
    }
}
