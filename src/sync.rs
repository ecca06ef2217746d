use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::{ResourceExt, runtime::reflector::ObjectRef};
use tokio_retry2::{Retry, RetryError, strategy::ExponentialBackoff};
use tracing::{debug, info, warn};

use crate::{
    backend::SecretBackend,
    config::ControllerConfig,
    crds::Vault,
    engine::{self, EngineAdapter, EngineRegistry, RawSecretPayload},
    error::{Error, Result},
    fingerprint::refresh_is_needed,
    projector::{AnnotationKeys, project},
    store::SecretStore,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Unchanged,
    Updated,
}

#[derive(Default)]
struct ResourceLocks {
    locks: Mutex<HashMap<ObjectRef<Vault>, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResourceLocks {
    fn for_resource(&self, key: &ObjectRef<Vault>) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Drop the entry unless a sequence still holds it; a re-created resource then reuses it.
    fn remove(&self, key: &ObjectRef<Vault>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct Synchronizer {
    backend: Arc<dyn SecretBackend>,
    store: Arc<dyn SecretStore>,
    engines: EngineRegistry,
    keys: AnnotationKeys,
    write_retry_attempts: usize,
    locks: ResourceLocks,
}

impl Synchronizer {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        store: Arc<dyn SecretStore>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            backend,
            store,
            engines: EngineRegistry::default(),
            keys: AnnotationKeys::new(&config.annotation_domain),
            write_retry_attempts: config.write_retry_attempts,
            locks: ResourceLocks::default(),
        }
    }

    /// Swap the engine set, e.g. to add a custom adapter.
    pub fn with_engines(mut self, engines: EngineRegistry) -> Self {
        self.engines = engines;
        self
    }

    pub fn annotation_keys(&self) -> &AnnotationKeys {
        &self.keys
    }

    /// Handle a create/update event: fetch and write unconditionally.
    pub async fn add_handler(&self, vault: &Vault) -> Result<Secret> {
        let key = ObjectRef::from_obj(vault);
        let lock = self.locks.for_resource(&key);
        let _guard = lock.lock().await;

        let adapter = self.engines.resolve(&vault.spec.engine_type)?;
        let payload = engine::fetch(adapter, self.backend.as_ref(), &vault.spec).await?;
        let secret = self.write(vault, adapter, &payload).await?;

        info!(
            vault = %key,
            keys = payload.data.len(),
            "Secret '{}' synchronized from '{}'",
            vault.name_any(),
            vault.spec.path
        );
        Ok(secret)
    }

    /// Compare the stored fingerprint with a fresh read, without writing.
    pub async fn refresh_is_needed(&self, vault: &Vault) -> Result<bool> {
        let key = ObjectRef::from_obj(vault);
        let lock = self.locks.for_resource(&key);
        let _guard = lock.lock().await;

        let adapter = self.engines.resolve(&vault.spec.engine_type)?;
        let (_, needed) = self.check(vault, adapter).await?;
        Ok(needed)
    }

    /// One scheduled check: write only when the backend content drifted.
    pub async fn refresh(&self, vault: &Vault) -> Result<RefreshOutcome> {
        let key = ObjectRef::from_obj(vault);
        let lock = self.locks.for_resource(&key);
        let _guard = lock.lock().await;

        let adapter = self.engines.resolve(&vault.spec.engine_type)?;
        let (payload, needed) = self.check(vault, adapter).await?;
        if !needed {
            debug!(vault = %key, "Secret up to date");
            return Ok(RefreshOutcome::Unchanged);
        }

        self.write(vault, adapter, &payload).await?;
        info!(vault = %key, "Secret '{}' refreshed after backend change", vault.name_any());
        Ok(RefreshOutcome::Updated)
    }

    /// Drop per-resource state once a Vault is gone.
    pub fn forget(&self, vault: &Vault) {
        self.locks.remove(&ObjectRef::from_obj(vault));
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    async fn check(
        &self,
        vault: &Vault,
        adapter: &dyn EngineAdapter,
    ) -> Result<(RawSecretPayload, bool)> {
        let namespace = vault
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let current = self.store.get(&namespace, &vault.name_any()).await?;
        let stored = current
            .as_ref()
            .and_then(|secret| self.keys.stored_fingerprint(secret));

        let payload = engine::fetch(adapter, self.backend.as_ref(), &vault.spec).await?;
        let needed = refresh_is_needed(stored, &payload);
        Ok((payload, needed))
    }

    async fn write(
        &self,
        vault: &Vault,
        adapter: &dyn EngineAdapter,
        payload: &RawSecretPayload,
    ) -> Result<Secret> {
        let desired = project(vault, adapter.secret_type(), payload, &self.keys, Utc::now())?;
        let desired = &desired;
        let store = self.store.as_ref();

        let retry_strategy = ExponentialBackoff::from_millis(10)
            .map(tokio_retry2::strategy::jitter)
            .take(self.write_retry_attempts);

        Retry::spawn(retry_strategy, || async move {
            match write_once(store, desired).await {
                Ok(secret) => Ok(secret),
                Err(e @ Error::WriteConflict(_)) => {
                    warn!("Conflict writing secret, retrying: {}", e);
                    Err(RetryError::transient(e))
                }
                Err(e) => Err(RetryError::permanent(e)),
            }
        })
        .await
    }
}

/// Create if absent, otherwise replace data and annotations at the current resource version.
/// Labels, finalizers and annotations owned by others are kept.
async fn write_once(store: &dyn SecretStore, desired: &Secret) -> Result<Secret> {
    let namespace = desired
        .metadata
        .namespace
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = desired
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;

    match store.get(namespace, name).await? {
        None => store.create(desired).await,
        Some(current) => store.replace(&overlay(current, desired)).await,
    }
}

fn overlay(mut current: Secret, desired: &Secret) -> Secret {
    current.data = desired.data.clone();
    current.string_data = None;
    current.type_ = desired.type_.clone();

    let annotations = current.metadata.annotations.get_or_insert_with(BTreeMap::new);
    if let Some(ours) = &desired.metadata.annotations {
        annotations.extend(ours.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    if let Some(ours) = &desired.metadata.owner_references {
        let owners = current.metadata.owner_references.get_or_insert_with(Vec::new);
        owners.retain(|o| ours.iter().all(|mine| mine.uid != o.uid));
        owners.extend(ours.iter().cloned());
    }
    current
}
