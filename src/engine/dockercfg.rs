//! Registry credentials rendered as a `.dockerconfigjson` pull secret.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};

use super::{EngineAdapter, RawSecretPayload, object_at, required};
use crate::{
    backend::ReadRequest,
    crds::VaultSpec,
    error::{Error, Result},
};

pub const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Clone, Copy)]
pub struct DockerConfig;

impl EngineAdapter for DockerConfig {
    fn tag(&self) -> &'static str {
        "DOCKERCFG"
    }

    fn request(&self, spec: &VaultSpec) -> ReadRequest {
        ReadRequest::new(spec.path.trim_start_matches('/'))
    }

    fn extract(&self, path: &str, response: Value) -> Result<RawSecretPayload> {
        let data = object_at(path, &response, "/data")?;
        let url = required(path, data, "url")?;
        let username = required(path, data, "username")?;
        let password = required(path, data, "password")?;
        let email = required(path, data, "email").unwrap_or_default();

        let auth = STANDARD.encode(format!("{username}:{password}"));
        // serde_json maps are key-ordered, so the rendered document is stable across reads.
        let config = json!({
            "auths": {
                url: {
                    "username": username,
                    "password": password,
                    "email": email,
                    "auth": auth,
                }
            }
        });
        let rendered = serde_json::to_string(&config).map_err(|e| Error::malformed(path, e))?;

        Ok(RawSecretPayload::from_pairs([(DOCKER_CONFIG_KEY, rendered)]))
    }

    fn secret_type(&self) -> &'static str {
        DOCKER_CONFIG_SECRET_TYPE
    }
}
