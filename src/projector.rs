//! Builds the Kubernetes Secret for a Vault resource. Pure: the caller performs the write.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{Resource, ResourceExt, api::ObjectMeta};

use crate::{
    crds::Vault,
    engine::RawSecretPayload,
    error::{Error, Result},
    fingerprint::fingerprint,
};

/// Annotation names under a configurable domain, e.g. `vault.homerow.ca/hash`.
#[derive(Clone, Debug)]
pub struct AnnotationKeys {
    pub hash: String,
    pub last_update: String,
}

impl AnnotationKeys {
    pub fn new(domain: &str) -> Self {
        Self {
            hash: format!("{domain}/hash"),
            last_update: format!("{domain}/last-update"),
        }
    }

    pub fn stored_fingerprint<'a>(&self, secret: &'a Secret) -> Option<&'a str> {
        secret
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(&self.hash))
            .map(String::as_str)
    }
}

pub fn project(
    vault: &Vault,
    secret_type: &str,
    payload: &RawSecretPayload,
    keys: &AnnotationKeys,
    now: DateTime<Utc>,
) -> Result<Secret> {
    let namespace = vault
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    let data = payload
        .data
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
        .collect();

    let annotations = BTreeMap::from([
        (keys.hash.clone(), fingerprint(payload)),
        (
            keys.last_update.clone(),
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    ]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(vault.name_any()),
            namespace: Some(namespace),
            annotations: Some(annotations),
            owner_references: vault.controller_owner_ref(&()).map(|o| vec![o]),
            ..ObjectMeta::default()
        },
        data: Some(data),
        type_: Some(secret_type.to_owned()),
        ..Secret::default()
    })
}
