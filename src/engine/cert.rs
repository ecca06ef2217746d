use serde_json::Value;

use super::{EngineAdapter, RawSecretPayload, object_at, required};
use crate::{backend::ReadRequest, crds::VaultSpec, error::Result};

pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

#[derive(Debug, Clone, Copy)]
pub struct Certificate;

impl EngineAdapter for Certificate {
    fn tag(&self) -> &'static str {
        "CERT"
    }

    fn request(&self, spec: &VaultSpec) -> ReadRequest {
        ReadRequest::new(spec.path.trim_start_matches('/'))
    }

    fn extract(&self, path: &str, response: Value) -> Result<RawSecretPayload> {
        let data = object_at(path, &response, "/data")?;

        let mut payload = RawSecretPayload::from_pairs([
            ("tls.crt", required(path, data, "certificate")?),
            ("tls.key", required(path, data, "private_key")?),
        ]);
        if let Ok(ca) = required(path, data, "issuing_ca") {
            payload.data.insert("ca.crt".to_owned(), ca);
        }
        Ok(payload)
    }

    fn secret_type(&self) -> &'static str {
        TLS_SECRET_TYPE
    }
}
