use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use vault_sync::{
    backend::VaultClient,
    config::ControllerConfig,
    crds::Vault,
    engine::RawSecretPayload,
    fingerprint::fingerprint,
    scheduler::{CycleReport, run_refresh_cycle},
    store::MemorySecretStore,
    sync::{RefreshOutcome, Synchronizer},
};
use tokio::time::Instant;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HASH: &str = "vault.homerow.ca/hash";
const LAST_UPDATE: &str = "vault.homerow.ca/last-update";

fn kv2_body(data: Value) -> Value {
    json!({
        "request_id": "1cfee2a6-318a-ea12-f5b5-6fd52d74d2c6",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 0,
        "data": {
            "data": data,
            "metadata": {
                "created_time": "2018-12-10T18:59:53.337997525Z",
                "deletion_time": "",
                "destroyed": false,
                "version": 1
            }
        },
        "wrap_info": null,
        "warnings": null,
        "auth": null
    })
}

async fn stub_kv2(server: &MockServer, secret_path: &str, data: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/{secret_path}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(kv2_body(data)))
        .mount(server)
        .await;
}

struct Harness {
    server: MockServer,
    store: Arc<MemorySecretStore>,
    sync: Synchronizer,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let config = ControllerConfig {
        vault_addr: server.uri(),
        vault_token: Some("root".to_owned()),
        fetch_timeout_secs: 2,
        ..ControllerConfig::default()
    };
    let store = Arc::new(MemorySecretStore::new());
    let sync = Synchronizer::new(
        Arc::new(VaultClient::new(&config).expect("client")),
        store.clone(),
        &config,
    );
    Harness { server, store, sync }
}

fn simple() -> Vault {
    Vault::with_spec("simple", "default", "KEYVALUEV2", "secret/simple")
}

fn encoded_data(store: &MemorySecretStore, name: &str) -> Value {
    let secret = store.snapshot("default", name).expect("secret exists");
    serde_json::to_value(&secret).unwrap()["data"].clone()
}

#[tokio::test]
async fn generates_simple_secret_from_vault_resource() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value"})).await;

    h.sync.add_handler(&simple()).await.unwrap();

    let secret = h.store.snapshot("default", "simple").unwrap();
    assert_eq!(secret.metadata.name.as_deref(), Some("simple"));
    assert_eq!(secret.metadata.namespace.as_deref(), Some("default"));
    assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    assert_eq!(encoded_data(&h.store, "simple"), json!({"key": "dmFsdWU="}));

    let annotations = secret.metadata.annotations.unwrap();
    assert!(annotations.contains_key(LAST_UPDATE));
    assert_eq!(
        annotations[HASH],
        fingerprint(&RawSecretPayload::from_pairs([("key", "value")]))
    );
}

#[tokio::test]
async fn refresh_is_needed_after_backend_change() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value"})).await;
    h.sync.add_handler(&simple()).await.unwrap();

    h.server.reset().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value1"})).await;

    assert!(h.sync.refresh_is_needed(&simple()).await.unwrap());
    assert_eq!(h.sync.refresh(&simple()).await.unwrap(), RefreshOutcome::Updated);
    assert_eq!(encoded_data(&h.store, "simple"), json!({"key": "dmFsdWUx"}));

    let secret = h.store.snapshot("default", "simple").unwrap();
    assert_eq!(
        secret.metadata.annotations.unwrap()[HASH],
        fingerprint(&RawSecretPayload::from_pairs([("key", "value1")]))
    );
}

#[tokio::test]
async fn refresh_not_needed_when_backend_unchanged() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value"})).await;
    h.sync.add_handler(&simple()).await.unwrap();

    assert!(!h.sync.refresh_is_needed(&simple()).await.unwrap());
}

#[tokio::test]
async fn metadata_only_change_does_not_trigger_refresh() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value"})).await;
    h.sync.add_handler(&simple()).await.unwrap();

    let mut bumped = kv2_body(json!({"key": "value"}));
    bumped["data"]["metadata"]["version"] = json!(2);
    bumped["data"]["metadata"]["created_time"] = json!("2019-01-01T00:00:00Z");
    h.server.reset().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/simple"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bumped))
        .mount(&h.server)
        .await;

    assert!(!h.sync.refresh_is_needed(&simple()).await.unwrap());
}

#[tokio::test]
async fn repeated_events_only_move_the_timestamp() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value"})).await;

    let first = h.sync.add_handler(&simple()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = h.sync.add_handler(&simple()).await.unwrap();

    assert_eq!(h.store.writes(), 2);
    assert_eq!(first.data, second.data);
    let (a, b) = (
        first.metadata.annotations.unwrap(),
        second.metadata.annotations.unwrap(),
    );
    assert_eq!(a[HASH], b[HASH]);
    assert_ne!(a[LAST_UPDATE], b[LAST_UPDATE]);
}

#[tokio::test]
async fn cycle_without_drift_writes_nothing() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value"})).await;
    h.sync.add_handler(&simple()).await.unwrap();
    let writes = h.store.writes();

    let resources = vec![Arc::new(simple())];
    for _ in 0..2 {
        let report = run_refresh_cycle(&h.sync, &resources).await;
        assert_eq!(
            report,
            CycleReport {
                updated: 0,
                unchanged: 1,
                failed: 0
            }
        );
    }
    assert_eq!(h.store.writes(), writes);
}

#[tokio::test]
async fn failing_resource_does_not_block_others() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/healthy", json!({"user": "admin"})).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.server)
        .await;

    let resources = vec![
        Arc::new(Vault::with_spec("broken", "default", "KEYVALUEV2", "secret/broken")),
        Arc::new(Vault::with_spec("typo", "default", "KEYVALUE3", "secret/typo")),
        Arc::new(Vault::with_spec("healthy", "default", "KEYVALUEV2", "secret/healthy")),
    ];
    let report = run_refresh_cycle(&h.sync, &resources).await;

    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(encoded_data(&h.store, "healthy"), json!({"user": "YWRtaW4="}));
    assert!(h.store.snapshot("default", "broken").is_none());
}

#[tokio::test]
async fn slow_resources_do_not_delay_healthy_one() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/healthy", json!({"user": "admin"})).await;
    Mock::given(method("GET"))
        .and(path_regex("^/v1/secret/data/slow-"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(kv2_body(json!({"key": "late"})))
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&h.server)
        .await;

    let mut resources: Vec<_> = (0..12)
        .map(|i| {
            let name = format!("slow-{i}");
            Arc::new(Vault::with_spec(&name, "default", "KEYVALUEV2", &format!("secret/{name}")))
        })
        .collect();
    resources.push(Arc::new(Vault::with_spec(
        "healthy",
        "default",
        "KEYVALUEV2",
        "secret/healthy",
    )));

    let started = Instant::now();
    let healthy_written = async {
        while h.store.snapshot("default", "healthy").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        started.elapsed()
    };
    let (report, waited) = tokio::join!(run_refresh_cycle(&h.sync, &resources), healthy_written);

    assert!(waited < Duration::from_secs(1), "healthy resource waited {waited:?}");
    assert_eq!(
        report,
        CycleReport {
            updated: 1,
            unchanged: 0,
            failed: 12
        }
    );
}

#[tokio::test]
async fn backend_outage_keeps_previous_secret() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value"})).await;
    h.sync.add_handler(&simple()).await.unwrap();
    let before = h.store.snapshot("default", "simple").unwrap();

    h.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;

    let report = run_refresh_cycle(&h.sync, &[Arc::new(simple())]).await;
    assert_eq!(report.failed, 1);
    assert!(h.sync.add_handler(&simple()).await.is_err());
    assert_eq!(h.store.snapshot("default", "simple").unwrap(), before);
}

#[tokio::test]
async fn concurrent_event_and_refresh_keep_hash_consistent() {
    let h = harness().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value"})).await;
    h.sync.add_handler(&simple()).await.unwrap();

    h.server.reset().await;
    stub_kv2(&h.server, "secret/data/simple", json!({"key": "value1"})).await;

    let vault = simple();
    let (event, refresh) = tokio::join!(h.sync.add_handler(&vault), h.sync.refresh(&vault));
    event.unwrap();
    refresh.unwrap();

    let secret = h.store.snapshot("default", "simple").unwrap();
    let expected = RawSecretPayload::from_pairs([("key", "value1")]);
    assert_eq!(secret.metadata.annotations.unwrap()[HASH], fingerprint(&expected));
    assert_eq!(encoded_data(&h.store, "simple"), json!({"key": "dmFsdWUx"}));
}

#[tokio::test]
async fn certificate_engine_produces_tls_secret() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/ingress-tls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lease_duration": 2764800,
            "data": {"certificate": "crt", "private_key": "key"}
        })))
        .mount(&h.server)
        .await;

    let vault = Vault::with_spec("ingress-tls", "default", "CERT", "secret/ingress-tls");
    h.sync.add_handler(&vault).await.unwrap();

    let secret = h.store.snapshot("default", "ingress-tls").unwrap();
    assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/tls"));
    assert_eq!(
        encoded_data(&h.store, "ingress-tls"),
        json!({"tls.crt": "Y3J0", "tls.key": "a2V5"})
    );
}
