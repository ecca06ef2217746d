use std::time::Duration;

pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";
pub const DEFAULT_ANNOTATION_DOMAIN: &str = "vault.homerow.ca";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_WRITE_RETRY_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Backend base address, without the `/v1` prefix
    pub vault_addr: String,
    pub vault_token: Option<String>,
    /// Seconds between two refresh cycles
    pub refresh_interval_secs: u64,
    /// Upper bound for a single backend read
    pub fetch_timeout_secs: u64,
    /// Prefix of the `hash` and `last-update` annotations
    pub annotation_domain: String,
    /// Attempts made when a Secret write hits a stale resource version
    pub write_retry_attempts: usize,
    /// Restrict the watch to one namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            vault_addr: DEFAULT_VAULT_ADDR.to_owned(),
            vault_token: None,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            annotation_domain: DEFAULT_ANNOTATION_DOMAIN.to_owned(),
            write_retry_attempts: DEFAULT_WRITE_RETRY_ATTEMPTS,
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Unparsable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str, default| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            vault_addr: non_empty("VAULT_ADDR").unwrap_or_else(|| DEFAULT_VAULT_ADDR.to_owned()),
            vault_token: non_empty("VAULT_TOKEN"),
            refresh_interval_secs: parsed("REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL_SECS),
            fetch_timeout_secs: parsed("VAULT_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS),
            annotation_domain: non_empty("ANNOTATION_DOMAIN")
                .unwrap_or_else(|| DEFAULT_ANNOTATION_DOMAIN.to_owned()),
            write_retry_attempts: lookup("WRITE_RETRY_ATTEMPTS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_WRITE_RETRY_ATTEMPTS),
            watch_namespace: non_empty("WATCH_NAMESPACE"),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
