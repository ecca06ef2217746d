use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pins a versioned key-value read to one secret version.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct VersionConfiguration {
    pub version: u64,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(group = "homerow.ca", version = "v1", kind = "Vault", namespaced)]
pub struct VaultSpec {
    /// Engine tag, e.g. `KEYVALUEV2`. Kept as a string so unknown tags are reported, not dropped.
    #[serde(rename = "type")]
    pub engine_type: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_configuration: Option<VersionConfiguration>,
}

impl Vault {
    /// Convenience constructor, mostly for tests and tooling.
    pub fn with_spec(name: &str, namespace: &str, engine_type: &str, path: &str) -> Self {
        let mut vault = Vault::new(
            name,
            VaultSpec {
                engine_type: engine_type.to_owned(),
                path: path.to_owned(),
                version_configuration: None,
            },
        );
        vault.metadata.namespace = Some(namespace.to_owned());
        vault
    }
}
