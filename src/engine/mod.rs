use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::{
    backend::{ReadRequest, SecretBackend},
    crds::VaultSpec,
    error::{Error, Result},
};

pub mod cert;
pub mod dockercfg;
pub mod kv;

pub use cert::Certificate;
pub use dockercfg::DockerConfig;
pub use kv::{KeyValueV1, KeyValueV2};

pub const OPAQUE: &str = "Opaque";

/// Seen in a response but never hashed nor written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PayloadMetadata {
    pub version: Option<u64>,
    pub created_time: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSecretPayload {
    pub data: BTreeMap<String, String>,
    pub metadata: PayloadMetadata,
}

impl RawSecretPayload {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            data: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            metadata: PayloadMetadata::default(),
        }
    }
}

pub trait EngineAdapter: Send + Sync {
    /// The `spec.type` value this adapter serves.
    fn tag(&self) -> &'static str;

    fn request(&self, spec: &VaultSpec) -> ReadRequest;

    fn extract(&self, path: &str, response: Value) -> Result<RawSecretPayload>;

    fn secret_type(&self) -> &'static str {
        OPAQUE
    }
}

/// Read and unwrap the secret a Vault resource points at.
pub async fn fetch(
    adapter: &dyn EngineAdapter,
    backend: &dyn SecretBackend,
    spec: &VaultSpec,
) -> Result<RawSecretPayload> {
    let request = adapter.request(spec);
    let response = backend.read(&request).await?;
    adapter.extract(&request.path, response)
}

pub struct EngineRegistry {
    adapters: HashMap<&'static str, Box<dyn EngineAdapter>>,
}

impl EngineRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Box<dyn EngineAdapter>) {
        self.adapters.insert(adapter.tag(), adapter);
    }

    pub fn resolve(&self, tag: &str) -> Result<&dyn EngineAdapter> {
        self.adapters
            .get(tag)
            .map(|adapter| adapter.as_ref())
            .ok_or_else(|| Error::UnrecognizedEngineType(tag.to_owned()))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(KeyValueV1));
        registry.register(Box::new(KeyValueV2));
        registry.register(Box::new(Certificate));
        registry.register(Box::new(DockerConfig));
        registry
    }
}

/// Follow a JSON pointer to an object, e.g. `/data/data`.
pub(crate) fn object_at<'a>(
    path: &str,
    response: &'a Value,
    pointer: &str,
) -> Result<&'a Map<String, Value>> {
    match response.pointer(pointer) {
        Some(Value::Object(map)) => Ok(map),
        Some(Value::Null) | None => {
            Err(Error::malformed(path, format!("missing '{pointer}' object")))
        }
        Some(_) => Err(Error::malformed(path, format!("'{pointer}' is not an object"))),
    }
}

/// Strings are taken verbatim, anything else as its JSON text.
pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn flatten(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), render(v))).collect()
}

pub(crate) fn required(path: &str, map: &Map<String, Value>, field: &str) -> Result<String> {
    map.get(field)
        .filter(|v| !v.is_null())
        .map(render)
        .ok_or_else(|| Error::malformed(path, format!("missing field '{field}'")))
}
