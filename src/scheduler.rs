use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use kube::{ResourceExt, runtime::reflector::Store};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::{
    crds::Vault,
    error::Error,
    sync::{RefreshOutcome, Synchronizer},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Check every resource once, all at the same time. Failures are logged and counted; they never
/// stop the cycle.
pub async fn run_refresh_cycle(sync: &Synchronizer, resources: &[Arc<Vault>]) -> CycleReport {
    let outcomes = join_all(
        resources
            .iter()
            .map(|vault| async move { (vault, sync.refresh(vault).await) }),
    )
    .await;

    let mut report = CycleReport::default();
    for (vault, outcome) in outcomes {
        match outcome {
            Ok(RefreshOutcome::Updated) => report.updated += 1,
            Ok(RefreshOutcome::Unchanged) => report.unchanged += 1,
            Err(e) => {
                report.failed += 1;
                log_failure(vault, &e);
            }
        }
    }
    report
}

fn log_failure(vault: &Vault, e: &Error) {
    let namespace = vault.namespace().unwrap_or_default();
    match e {
        Error::UnrecognizedEngineType(_) => error!(
            "Vault '{}/{}' skipped, configuration error: {}",
            namespace,
            vault.name_any(),
            e
        ),
        e if e.is_fetch_failure() => warn!(
            "Vault '{}/{}' not refreshed, will retry next cycle: {}",
            namespace,
            vault.name_any(),
            e
        ),
        e => error!("Refreshing Vault '{}/{}' failed: {}", namespace, vault.name_any(), e),
    }
}

pub struct RefreshScheduler {
    sync: Arc<Synchronizer>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(sync: Arc<Synchronizer>, interval: Duration) -> Self {
        Self { sync, interval }
    }

    /// Tick forever over the resources currently held by `registry`.
    pub async fn run(self, registry: Store<Vault>) {
        if registry.wait_until_ready().await.is_err() {
            error!("Vault registry writer dropped before ready, refresh scheduler not started");
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the watcher already synced everything at startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let resources = registry.state();
            let report = run_refresh_cycle(&self.sync, &resources).await;
            info!(
                tracked = resources.len(),
                updated = report.updated,
                unchanged = report.unchanged,
                failed = report.failed,
                "Refresh cycle finished"
            );
        }
    }
}
