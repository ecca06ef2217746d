//! Key-value engines, unversioned (v1) and versioned (v2).

use serde_json::Value;
use tracing::debug;

use super::{EngineAdapter, PayloadMetadata, RawSecretPayload, flatten, object_at};
use crate::{backend::ReadRequest, crds::VaultSpec, error::Result};

/// Flat `data` object at the path as given.
#[derive(Debug, Clone, Copy)]
pub struct KeyValueV1;

impl EngineAdapter for KeyValueV1 {
    fn tag(&self) -> &'static str {
        "KEYVALUE"
    }

    fn request(&self, spec: &VaultSpec) -> ReadRequest {
        ReadRequest::new(spec.path.trim_start_matches('/'))
    }

    fn extract(&self, path: &str, response: Value) -> Result<RawSecretPayload> {
        let data = object_at(path, &response, "/data")?;
        Ok(RawSecretPayload {
            data: flatten(data),
            metadata: PayloadMetadata::default(),
        })
    }
}

/// Versioned store: reads go to `<mount>/data/<rest>` and the secret sits under `data.data`.
#[derive(Debug, Clone, Copy)]
pub struct KeyValueV2;

impl KeyValueV2 {
    /// `secret/simple` becomes `secret/data/simple`.
    pub fn versioned_path(path: &str) -> String {
        let path = path.trim_start_matches('/');
        match path.split_once('/') {
            Some((mount, rest)) => format!("{mount}/data/{rest}"),
            None => format!("{path}/data"),
        }
    }
}

impl EngineAdapter for KeyValueV2 {
    fn tag(&self) -> &'static str {
        "KEYVALUEV2"
    }

    fn request(&self, spec: &VaultSpec) -> ReadRequest {
        ReadRequest {
            path: Self::versioned_path(&spec.path),
            version: spec.version_configuration.as_ref().map(|v| v.version),
        }
    }

    fn extract(&self, path: &str, response: Value) -> Result<RawSecretPayload> {
        let data = object_at(path, &response, "/data/data")?;
        let metadata = PayloadMetadata {
            version: response.pointer("/data/metadata/version").and_then(Value::as_u64),
            created_time: response
                .pointer("/data/metadata/created_time")
                .and_then(Value::as_str)
                .map(str::to_owned),
        };
        debug!(path, version = ?metadata.version, "unwrapped versioned secret");

        Ok(RawSecretPayload {
            data: flatten(data),
            metadata,
        })
    }
}
