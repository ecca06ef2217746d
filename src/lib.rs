use std::sync::Arc;

use futures::StreamExt;
use kube::{
    Api, Client, ResourceExt,
    config::KubeConfigOptions,
    runtime::{
        WatchStreamExt,
        reflector::{self, store::Writer},
        watcher,
        watcher::Event,
    },
};
use tracing::{error, info, warn};

pub mod backend;
pub mod config;
pub mod crds;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod projector;
pub mod scheduler;
pub mod store;
pub mod sync;

use backend::VaultClient;
use config::ControllerConfig;
use crds::*;
pub use error::{Error, Result};
use scheduler::RefreshScheduler;
use store::KubeSecretStore;
use sync::Synchronizer;

pub async fn run() -> anyhow::Result<()> {
    run_with(ControllerConfig::from_env()).await
}

pub async fn run_with(config: ControllerConfig) -> anyhow::Result<()> {
    let options = KubeConfigOptions::default();

    // Load kubeconfig if it's present otherwise fall back to cluster config
    let kube_config = kube::Config::from_kubeconfig(&options)
        .await
        .or_else(|_| kube::Config::incluster())?;
    let client = Client::try_from(kube_config)?;

    info!(
        vault = %config.vault_addr,
        interval_secs = config.refresh_interval_secs,
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        "Starting vault-sync"
    );

    let backend = Arc::new(VaultClient::new(&config)?);
    let store = Arc::new(KubeSecretStore::new(client.clone()));
    let sync = Arc::new(Synchronizer::new(backend, store, &config));

    let (reader, writer) = reflector::store::<Vault>();

    let scheduler = RefreshScheduler::new(sync.clone(), config.refresh_interval());
    tokio::spawn(scheduler.run(reader));

    watch_vaults(&client, &config, writer, sync).await;

    Ok(())
}

async fn watch_vaults(
    client: &Client,
    config: &ControllerConfig,
    writer: Writer<Vault>,
    sync: Arc<Synchronizer>,
) {
    let vault_api = match &config.watch_namespace {
        Some(namespace) => Api::<Vault>::namespaced(client.clone(), namespace),
        None => Api::<Vault>::all(client.clone()),
    };

    watcher(vault_api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .for_each_concurrent(None, |event| {
            let sync = sync.clone();
            async move { on_event(&sync, event).await }
        })
        .await;
}

async fn on_event(sync: &Synchronizer, event: Result<Event<Vault>, watcher::Error>) {
    match event {
        Ok(Event::Apply(vault) | Event::InitApply(vault)) => {
            info!("Vault '{}' created or updated", vault.name_any());
            handle(sync, &vault).await;
        }
        Ok(Event::Delete(vault)) => {
            info!("Vault '{}' deleted", vault.name_any());
            sync.forget(&vault);
        }
        Ok(Event::Init | Event::InitDone) => {}
        Err(e) => error!("Vault watcher error: {}", e),
    }
}

async fn handle(sync: &Synchronizer, vault: &Vault) {
    let namespace = vault.namespace().unwrap_or_default();
    match sync.add_handler(vault).await {
        Ok(_) => {}
        Err(e) if e.is_fetch_failure() => warn!(
            "Secret for Vault '{}/{}' left untouched: {}",
            namespace,
            vault.name_any(),
            e
        ),
        Err(e) => error!(
            "Synchronizing Vault '{}/{}' failed: {}",
            namespace,
            vault.name_any(),
            e
        ),
    }
}
