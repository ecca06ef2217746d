use std::{
    collections::BTreeMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt, api::PostParams};

use crate::error::{Error, Result};

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create(&self, secret: &Secret) -> Result<Secret>;

    /// Replace a Secret. The `resourceVersion` carried by `secret` must be current, otherwise
    /// the write fails with [`Error::WriteConflict`].
    async fn replace(&self, secret: &Secret) -> Result<Secret>;
}

fn identity(secret: &Secret) -> Result<(String, String)> {
    let namespace = secret
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = secret
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    Ok((namespace, name))
}

pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_write_error(e: kube::Error, namespace: &str, name: &str) -> Error {
    match e {
        kube::Error::Api(ref ae) if ae.code == 409 => {
            Error::WriteConflict(format!("{namespace}/{name}"))
        }
        e => Error::Kube(e),
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.api(namespace).get_opt(name).await.map_err(Error::Kube)
    }

    async fn create(&self, secret: &Secret) -> Result<Secret> {
        let (namespace, name) = identity(secret)?;
        self.api(&namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| map_write_error(e, &namespace, &name))
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret> {
        let (namespace, name) = identity(secret)?;
        self.api(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| map_write_error(e, &namespace, &name))
    }
}

/// In-process store with resource versions and optimistic concurrency.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    next_version: AtomicUsize,
    writes: AtomicUsize,
    injected_conflicts: AtomicUsize,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful creates and replaces so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` writes fail as if another writer got there first.
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Insert a Secret directly, bypassing the write counter.
    pub fn seed(&self, secret: Secret) -> Result<()> {
        let key = identity(&secret)?;
        let stored = self.stamp(secret);
        self.lock().insert(key, stored);
        Ok(())
    }

    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), Secret>> {
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stamp(&self, mut secret: Secret) -> Secret {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        secret.metadata.resource_version = Some(version.to_string());
        secret
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.snapshot(namespace, name))
    }

    async fn create(&self, secret: &Secret) -> Result<Secret> {
        let key = identity(secret)?;
        if self.take_injected_conflict() {
            return Err(Error::WriteConflict(format!("{}/{}", key.0, key.1)));
        }

        let mut secrets = self.lock();
        if secrets.contains_key(&key) {
            return Err(Error::WriteConflict(format!("{}/{}", key.0, key.1)));
        }
        let stored = self.stamp(secret.clone());
        secrets.insert(key, stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret> {
        let key = identity(secret)?;
        let conflict = || Error::WriteConflict(format!("{}/{}", key.0, key.1));
        if self.take_injected_conflict() {
            return Err(conflict());
        }

        let mut secrets = self.lock();
        let current = secrets.get(&key).ok_or_else(conflict)?;
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(conflict());
        }
        let stored = self.stamp(secret.clone());
        secrets.insert(key.clone(), stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }
}
