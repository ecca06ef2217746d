//! Content fingerprints used to detect drift between the backend and a materialized Secret.
//!
//! Only the key/value content of a payload is hashed. Entries are visited in key order and each
//! key and value is framed as a netstring (`<len>:<bytes>,`) so that no two distinct maps share an
//! input, e.g. `{"ab": "c"}` and `{"a": "bc"}`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

use crate::engine::RawSecretPayload;

pub fn fingerprint(payload: &RawSecretPayload) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in &payload.data {
        frame(&mut hasher, key.as_bytes());
        frame(&mut hasher, value.as_bytes());
    }
    STANDARD.encode(hasher.finalize())
}

fn frame(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update(bytes.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(bytes);
    hasher.update(b",");
}

/// A missing stored fingerprint means the secret was never synced.
pub fn refresh_is_needed(stored: Option<&str>, fresh: &RawSecretPayload) -> bool {
    match stored {
        Some(stored) => stored != fingerprint(fresh),
        None => true,
    }
}
