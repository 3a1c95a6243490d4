//! Configuration types for the legacy SOAP gateway.

use crate::auth::{ClientKeyMap, LegacyCertificate};
use crate::error::GatewayError;
use crate::registry::OperationOverrides;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix marking a client key value as a path to a PEM file.
pub const KEY_FILE_PREFIX: &str = "file:";

/// Main configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Config version
    pub version: String,

    /// HTTP listener settings
    pub server: ServerConfig,

    /// Legacy service settings
    pub legacy: LegacyConfig,

    /// Internal responder settings
    pub internal: InternalConfig,

    /// Per-surface operation overrides, applied on top of the built-in registry
    pub operations: OperationOverrides,

    /// Legacy certificate records, matched by serial number
    pub certificates: Vec<LegacyCertificate>,

    /// Private keys by legacy certificate id: inline PEM or `file:<path>`
    pub client_keys: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            server: ServerConfig::default(),
            legacy: LegacyConfig::default(),
            internal: InternalConfig::default(),
            operations: OperationOverrides::default(),
            certificates: Vec::new(),
            client_keys: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, GatewayError> {
        serde_yaml::from_str(yaml).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Resolve `client_keys`, reading any `file:` entries from disk.
    pub fn load_client_keys(&self) -> Result<ClientKeyMap, GatewayError> {
        let mut keys = ClientKeyMap::with_capacity(self.client_keys.len());
        for (id, value) in &self.client_keys {
            let pem = match value.strip_prefix(KEY_FILE_PREFIX) {
                Some(path) => std::fs::read_to_string(path.trim()).map_err(|e| {
                    GatewayError::Config(format!("client key {}: {}: {}", id, path.trim(), e))
                })?,
                None => value.clone(),
            };
            keys.insert(id.clone(), pem);
        }
        Ok(keys)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Legacy service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyConfig {
    /// Base URL requests are forwarded to
    pub base_url: String,

    /// Request header that overrides `base_url` per call
    pub proxy_header: String,

    /// Request header carrying the URL-encoded client certificate
    pub mtls_header: String,

    /// Upstream timeout (seconds)
    pub timeout_secs: u64,

    /// Wrap legacy bodies in multipart framing (for local mocks that return bare XML)
    pub local_mock_framing: bool,

    /// Directory for short-lived credential files (system temp dir if unset)
    pub credential_dir: Option<PathBuf>,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            base_url: "https://trainingws.grants.gov".to_string(),
            proxy_header: "X-Gg-S2S-Uri".to_string(),
            mtls_header: "X-Amzn-Mtls-Clientcert".to_string(),
            timeout_secs: 3600,
            local_mock_framing: false,
            credential_dir: None,
        }
    }
}

impl LegacyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Internal responder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalConfig {
    /// Serve internal responses when available
    pub use_internal: bool,

    /// Hide values in shadow-mode diff logs
    pub diff_keys_only: bool,

    /// List keys whose entries are matched by an index key in diffs
    pub diff_key_indexes: HashMap<String, String>,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            use_internal: true,
            diff_keys_only: true,
            diff_key_indexes: HashMap::from([(
                "SubmissionInfo".to_string(),
                "GrantsGovTrackingNumber".to_string(),
            )]),
        }
    }
}
