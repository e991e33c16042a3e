use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persisted back to
/// the DB row so a restart without CLI flags keeps the previous settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Root of the credential tree: `<creds_root>/gemini`, `<creds_root>/vertex`.
    pub creds_root: String,
    pub gemini_base_url: String,
    pub vertex_base_url: String,
    pub max_retries: u32,
    pub store_request_bodies: bool,
    /// `["*"]` disables the check.
    pub allowed_client_ips: Vec<String>,
    pub trust_proxy_headers: bool,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Optional outbound proxy for upstream egress.
    pub proxy: Option<String>,
    /// File holding the Fernet master key for the encrypted Gemini-key envelope.
    pub master_key_file: String,
}

/// Optional layer used for merging global config (CLI/ENV/DB each produce one).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub creds_root: Option<String>,
    pub gemini_base_url: Option<String>,
    pub vertex_base_url: Option<String>,
    pub max_retries: Option<u32>,
    pub store_request_bodies: Option<bool>,
    pub allowed_client_ips: Option<Vec<String>>,
    pub trust_proxy_headers: Option<bool>,
    pub dsn: Option<String>,
    pub proxy: Option<String>,
    pub master_key_file: Option<String>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.creds_root.is_some() {
            self.creds_root = other.creds_root;
        }
        if other.gemini_base_url.is_some() {
            self.gemini_base_url = other.gemini_base_url;
        }
        if other.vertex_base_url.is_some() {
            self.vertex_base_url = other.vertex_base_url;
        }
        if other.max_retries.is_some() {
            self.max_retries = other.max_retries;
        }
        if other.store_request_bodies.is_some() {
            self.store_request_bodies = other.store_request_bodies;
        }
        if other.allowed_client_ips.is_some() {
            self.allowed_client_ips = other.allowed_client_ips;
        }
        if other.trust_proxy_headers.is_some() {
            self.trust_proxy_headers = other.trust_proxy_headers;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.master_key_file.is_some() {
            self.master_key_file = other.master_key_file;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let creds_root = self.creds_root.unwrap_or_else(|| "./credentials".to_string());
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            gemini_base_url: self
                .gemini_base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            vertex_base_url: self
                .vertex_base_url
                .unwrap_or_else(|| "https://us-central1-aiplatform.googleapis.com".to_string()),
            max_retries: self.max_retries.unwrap_or(10),
            store_request_bodies: self.store_request_bodies.unwrap_or(false),
            allowed_client_ips: self.allowed_client_ips.unwrap_or_else(|| vec!["*".to_string()]),
            trust_proxy_headers: self.trust_proxy_headers.unwrap_or(false),
            master_key_file: self
                .master_key_file
                .unwrap_or_else(|| format!("{creds_root}/../secrets/master.key")),
            creds_root,
            proxy: self.proxy,
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            creds_root: Some(value.creds_root),
            gemini_base_url: Some(value.gemini_base_url),
            vertex_base_url: Some(value.vertex_base_url),
            max_retries: Some(value.max_retries),
            store_request_bodies: Some(value.store_request_bodies),
            allowed_client_ips: Some(value.allowed_client_ips),
            trust_proxy_headers: Some(value.trust_proxy_headers),
            dsn: Some(value.dsn),
            proxy: value.proxy,
            master_key_file: Some(value.master_key_file),
        }
    }
}

impl GlobalConfig {
    /// `["*"]` is the documented pass-through; anything else is a real allow-list.
    pub fn ip_allowed(&self, client_ip: &str) -> bool {
        self.allowed_client_ips.iter().any(|ip| ip == "*")
            || self.allowed_client_ips.iter().any(|ip| ip == client_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_allows_every_ip() {
        let cfg = GlobalConfigPatch {
            dsn: Some("sqlite::memory:".to_string()),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        assert!(cfg.ip_allowed("203.0.113.9"));
    }

    #[test]
    fn explicit_list_rejects_unknown_ip() {
        let mut patch = GlobalConfigPatch {
            dsn: Some("sqlite::memory:".to_string()),
            ..Default::default()
        };
        patch.allowed_client_ips = Some(vec!["10.0.0.1".to_string()]);
        let cfg = patch.into_config().unwrap();
        assert!(cfg.ip_allowed("10.0.0.1"));
        assert!(!cfg.ip_allowed("10.0.0.2"));
    }
}
