//! Configuration schema definitions.
//!
//! Type-safe configuration structures with defaults, validation and
//! environment overrides.

use std::net::SocketAddr;
use std::path::PathBuf;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::signing::DEFAULT_TTL_SECS;

/// Environment variable holding the signing key.
pub const ENV_PRIVATE_KEY: &str = "GATEWAY_PRIVATE_KEY";
/// Environment variable overriding the listen address.
pub const ENV_LISTEN: &str = "GATEWAY_LISTEN";
/// Environment variable overriding the ownership RPC endpoint.
pub const ENV_RPC_URL: &str = "GATEWAY_RPC_URL";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Response signing settings.
    #[serde(default)]
    pub signing: SigningConfig,

    /// EIP-712 domain for write authorizations.
    #[serde(default)]
    pub domain: DomainConfig,

    /// Record storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Ownership validation.
    #[serde(default)]
    pub ownership: OwnershipConfig,

    /// Resolver policy.
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Path prefix for the gateway routes (empty = root).
    #[serde(default)]
    pub prefix: String,
    /// Overall request deadline in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Maximum accepted request body size.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_owned()
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            prefix: String::new(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Response signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Hex private key. Prefer the `GATEWAY_PRIVATE_KEY` env var.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Response lifetime when a handler does not set one.
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,
}

const fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            private_key: None,
            default_ttl_secs: default_ttl(),
        }
    }
}

/// EIP-712 domain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain name.
    #[serde(default = "default_domain_name")]
    pub name: String,
    /// Domain version.
    #[serde(default = "default_domain_version")]
    pub version: String,
    /// Chain id.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Address of the contract deferring writes to this gateway.
    #[serde(default)]
    pub verifying_contract: Option<String>,
}

fn default_domain_name() -> String {
    "ENS Gateway".to_owned()
}

fn default_domain_version() -> String {
    "1".to_owned()
}

const fn default_chain_id() -> u64 {
    1
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: default_domain_name(),
            version: default_domain_version(),
            chain_id: default_chain_id(),
            verifying_contract: None,
        }
    }
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database path for the SQLite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Where ownership is looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipMode {
    /// Owner stored with the record.
    #[default]
    Repository,
    /// `owner(bytes32)` on an ENS registry.
    Registry,
}

/// Ownership validation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnershipConfig {
    /// Validation mode.
    #[serde(default)]
    pub mode: OwnershipMode,
    /// JSON-RPC endpoint for registry mode.
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Registry contract address for registry mode.
    #[serde(default)]
    pub registry: Option<String>,
}

/// Resolver policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Text keys that `setText` refuses to write.
    #[serde(default)]
    pub reserved_text_keys: Vec<String>,
}

impl GatewayConfig {
    /// Validate the configuration and return any issues found.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.listen.parse::<SocketAddr>().is_err() {
            issues.push(ConfigIssue::error(
                "server.listen",
                format!("'{}' is not a socket address", self.server.listen),
            ));
        }
        if !self.server.prefix.is_empty()
            && (!self.server.prefix.starts_with('/') || self.server.prefix.ends_with('/'))
        {
            issues.push(ConfigIssue::error(
                "server.prefix",
                "Prefix must start with '/' and must not end with '/'",
            ));
        }
        if self.server.request_timeout_secs == 0 {
            issues.push(ConfigIssue::error(
                "server.request_timeout_secs",
                "Request timeout must be at least 1 second",
            ));
        }
        if self.server.max_body_bytes == 0 {
            issues.push(ConfigIssue::error(
                "server.max_body_bytes",
                "Body limit must be at least 1 byte",
            ));
        }

        match &self.signing.private_key {
            None => issues.push(ConfigIssue::error(
                "signing.private_key",
                format!("No signing key is set. Set {ENV_PRIVATE_KEY} env var."),
            )),
            Some(key) => {
                let key = key.strip_prefix("0x").unwrap_or(key);
                if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
                    issues.push(ConfigIssue::error(
                        "signing.private_key",
                        "Signing key must be 32 hex-encoded bytes",
                    ));
                }
            }
        }
        if self.signing.default_ttl_secs == 0 {
            issues.push(ConfigIssue::warning(
                "signing.default_ttl_secs",
                "Default ttl is 0, responses without a handler ttl expire immediately",
            ));
        }

        match &self.domain.verifying_contract {
            None => issues.push(ConfigIssue::warning(
                "domain.verifying_contract",
                "No verifying contract set; write authorizations bind to the zero address",
            )),
            Some(raw) if raw.parse::<Address>().is_err() => issues.push(ConfigIssue::error(
                "domain.verifying_contract",
                format!("'{raw}' is not an address"),
            )),
            Some(_) => {}
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            issues.push(ConfigIssue::error(
                "storage.path",
                "The sqlite backend needs a database path",
            ));
        }

        if self.ownership.mode == OwnershipMode::Registry {
            if self.ownership.rpc_url.is_none() {
                issues.push(ConfigIssue::error(
                    "ownership.rpc_url",
                    format!("Registry mode needs an RPC endpoint. Set {ENV_RPC_URL} env var."),
                ));
            }
            match &self.ownership.registry {
                None => issues.push(ConfigIssue::error(
                    "ownership.registry",
                    "Registry mode needs a registry address",
                )),
                Some(raw) if raw.parse::<Address>().is_err() => issues.push(ConfigIssue::error(
                    "ownership.registry",
                    format!("'{raw}' is not an address"),
                )),
                Some(_) => {}
            }
        }

        if self.resolver.reserved_text_keys.iter().any(String::is_empty) {
            issues.push(ConfigIssue::warning(
                "resolver.reserved_text_keys",
                "An empty reserved key has no effect",
            ));
        }

        issues
    }

    /// Check if the configuration is valid (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|issue| issue.level != IssueLevel::Error)
    }

    /// Merge environment variables into the configuration.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Ok(key) = std::env::var(ENV_PRIVATE_KEY) {
            self.signing.private_key = Some(key);
        }

        if let Ok(listen) = std::env::var(ENV_LISTEN) {
            self.server.listen = listen;
        }

        if self.ownership.rpc_url.is_none()
            && let Ok(url) = std::env::var(ENV_RPC_URL)
        {
            self.ownership.rpc_url = Some(url);
        }

        self
    }

    /// Copy with secrets masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.signing.private_key.is_some() {
            config.signing.private_key = Some("<redacted>".to_owned());
        }
        config
    }
}

/// Configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    /// Issue severity level.
    pub level: IssueLevel,
    /// Configuration path (e.g., "signing.private_key").
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

impl ConfigIssue {
    /// Create an error-level issue.
    #[must_use]
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a warning-level issue.
    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            IssueLevel::Error => "ERROR",
            IssueLevel::Warning => "WARN",
        };
        write!(f, "[{}] {}: {}", prefix, self.path, self.message)
    }
}

/// Severity level for configuration issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// Error that prevents the gateway from running correctly.
    Error,
    /// Warning about potential issues.
    Warning,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn valid() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.signing.private_key = Some(KEY.to_owned());
        config.domain.verifying_contract =
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".to_owned());
        config
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:3000");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.signing.default_ttl_secs, 8_640_000);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.ownership.mode, OwnershipMode::Repository);
    }

    #[test]
    fn test_config_serialization() {
        let config = valid();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.signing.private_key, config.signing.private_key);
        assert_eq!(parsed.server.listen, config.server.listen);
    }

    #[test]
    fn test_parse_sample_config() {
        let toml_str = r#"
[server]
listen = "0.0.0.0:8080"
prefix = "/gateway"

[domain]
chain_id = 11155111
verifying_contract = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[storage]
backend = "sqlite"
path = "gateway.db"

[ownership]
mode = "registry"
rpc_url = "http://localhost:8545"
registry = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e"

[resolver]
reserved_text_keys = ["com.twitter"]
"#;

        let config: GatewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.prefix, "/gateway");
        assert_eq!(config.domain.chain_id, 11_155_111);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.ownership.mode, OwnershipMode::Registry);
        assert_eq!(config.resolver.reserved_text_keys, ["com.twitter"]);
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        assert!(toml::from_str::<GatewayConfig>("[bogus]\nx = 1").is_err());
    }

    #[test]
    fn test_validation() {
        let config = valid();
        let issues = config.validate();
        assert!(issues.is_empty(), "{issues:?}");
        assert!(config.is_valid());
    }

    #[test]
    fn test_validation_missing_key() {
        let config = GatewayConfig::default();
        assert!(!config.is_valid());
        assert!(config
            .validate()
            .iter()
            .any(|i| i.path == "signing.private_key" && i.level == IssueLevel::Error));
    }

    #[test]
    fn test_validation_registry_needs_endpoint() {
        let mut config = valid();
        config.ownership.mode = OwnershipMode::Registry;
        let issues = config.validate();
        assert_eq!(issues.len(), 2);
        assert!(!config.is_valid());
    }

    #[test]
    fn test_validation_bad_prefix() {
        let mut config = valid();
        config.server.prefix = "gateway/".to_owned();
        assert!(!config.is_valid());
    }

    #[test]
    fn test_validation_zero_ttl_is_warning() {
        let mut config = valid();
        config.signing.default_ttl_secs = 0;
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, IssueLevel::Warning);
        assert!(config.is_valid());
    }

    #[test]
    fn test_redacted_hides_key() {
        let shown = valid().redacted();
        assert_eq!(shown.signing.private_key.as_deref(), Some("<redacted>"));
    }
}
