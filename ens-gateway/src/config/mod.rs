//! Gateway configuration.
//!
//! Settings come from, in increasing priority:
//! 1. Default values
//! 2. A TOML config file
//! 3. Environment variables (`GATEWAY_PRIVATE_KEY`, `GATEWAY_LISTEN`,
//!    `GATEWAY_RPC_URL`)
//!
//! The resulting [`GatewayConfig`] is built once at startup and turned into
//! components by the `build_*` methods below.

mod schema;

pub use schema::{
    ConfigIssue, DomainConfig, ENV_LISTEN, ENV_PRIVATE_KEY, ENV_RPC_URL, GatewayConfig,
    IssueLevel, OwnershipConfig, OwnershipMode, ResolverConfig, ServerConfig, SigningConfig,
    StorageBackend, StorageConfig,
};

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{debug, info};

use crate::auth::{OwnershipValidator, RegistryOwnership, RepositoryOwnership, SigningDomain};
use crate::repository::{InMemoryRepository, Repository};
use crate::signing::SigningEnvelope;

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// TOML serialization error.
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// Missing required field.
    #[error("missing required config: {0}")]
    MissingField(String),
    /// Invalid value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
    /// A component could not be constructed from valid settings.
    #[error("failed to build {component}: {source}")]
    Build {
        /// Which component.
        component: &'static str,
        /// Underlying gateway error.
        source: crate::error::Error,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load configuration from a specific path; defaults when absent.
pub async fn load_config_from(path: impl AsRef<Path>) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        return Ok(GatewayConfig::default());
    }

    let content = tokio::fs::read_to_string(path).await?;
    let config: GatewayConfig = toml::from_str(&content)?;
    debug!(path = %path.display(), "loaded config file");

    Ok(config)
}

/// Save configuration to a specific path.
pub async fn save_config_to(config: &GatewayConfig, path: impl AsRef<Path>) -> ConfigResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = toml::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    info!(path = %path.display(), "saved config file");

    Ok(())
}

fn parse_address(field: &str, raw: &str) -> ConfigResult<Address> {
    raw.parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{field}: '{raw}' is not an address: {e}")))
}

impl GatewayConfig {
    /// Parsed listen address.
    pub fn listen_addr(&self) -> ConfigResult<SocketAddr> {
        self.server.listen.parse().map_err(|e| {
            ConfigError::InvalidValue(format!("server.listen '{}': {e}", self.server.listen))
        })
    }

    /// EIP-712 domain for write authorizations.
    pub fn build_signing_domain(&self) -> ConfigResult<SigningDomain> {
        let verifying_contract = match &self.domain.verifying_contract {
            Some(raw) => parse_address("domain.verifying_contract", raw)?,
            None => Address::ZERO,
        };
        Ok(SigningDomain::new(
            self.domain.name.clone(),
            self.domain.version.clone(),
            self.domain.chain_id,
            verifying_contract,
        ))
    }

    /// Response signer.
    pub fn build_signing_envelope(&self) -> ConfigResult<SigningEnvelope> {
        let key = self
            .signing
            .private_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("signing.private_key".to_owned()))?;
        SigningEnvelope::from_hex(key, self.signing.default_ttl_secs).map_err(|source| {
            ConfigError::Build {
                component: "signing envelope",
                source,
            }
        })
    }

    /// Record storage.
    pub fn build_repository(&self) -> ConfigResult<Arc<dyn Repository>> {
        match self.storage.backend {
            StorageBackend::Memory => Ok(Arc::new(InMemoryRepository::new())),
            #[cfg(feature = "sqlite")]
            StorageBackend::Sqlite => {
                let path = self
                    .storage
                    .path
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingField("storage.path".to_owned()))?;
                let repo = crate::repository::SqliteRepository::open(path).map_err(|source| {
                    ConfigError::Build {
                        component: "sqlite repository",
                        source,
                    }
                })?;
                info!(path = %path.display(), "opened sqlite repository");
                Ok(Arc::new(repo))
            }
            #[cfg(not(feature = "sqlite"))]
            StorageBackend::Sqlite => Err(ConfigError::InvalidValue(
                "storage.backend: built without the sqlite feature".to_owned(),
            )),
        }
    }

    /// Ownership validator; registry mode connects to the RPC endpoint.
    pub async fn build_ownership(
        &self,
        repository: Arc<dyn Repository>,
    ) -> ConfigResult<Arc<dyn OwnershipValidator>> {
        match self.ownership.mode {
            OwnershipMode::Repository => Ok(Arc::new(RepositoryOwnership::new(repository))),
            OwnershipMode::Registry => {
                let rpc_url = self
                    .ownership
                    .rpc_url
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingField("ownership.rpc_url".to_owned()))?;
                let raw = self
                    .ownership
                    .registry
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingField("ownership.registry".to_owned()))?;
                let registry = parse_address("ownership.registry", raw)?;
                let validator = RegistryOwnership::connect(rpc_url, registry)
                    .await
                    .map_err(|source| ConfigError::Build {
                        component: "registry ownership",
                        source,
                    })?;
                info!(%registry, "using on-chain registry ownership");
                Ok(Arc::new(validator))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join("ens_gateway_test_config")
            .join(format!("{name}-{}.toml", std::process::id()))
    }

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let config = load_config_from(temp_path("absent")).await.unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:3000");
    }

    #[tokio::test]
    async fn save_then_load() {
        let path = temp_path("roundtrip");
        let mut config = GatewayConfig::default();
        config.server.prefix = "/ens".to_owned();
        save_config_to(&config, &path).await.unwrap();
        let loaded = load_config_from(&path).await.unwrap();
        assert_eq!(loaded.server.prefix, "/ens");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn builders() {
        let mut config = GatewayConfig::default();
        assert!(matches!(
            config.build_signing_envelope(),
            Err(ConfigError::MissingField(_))
        ));
        config.signing.private_key =
            Some("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_owned());
        let envelope = config.build_signing_envelope().unwrap();
        assert_eq!(
            envelope.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
        assert_eq!(config.build_signing_domain().unwrap().verifying_contract, Address::ZERO);
        assert_eq!(config.listen_addr().unwrap().port(), 3000);

        config.domain.verifying_contract = Some("nope".to_owned());
        assert!(matches!(
            config.build_signing_domain(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn sqlite_backend_needs_path() {
        let mut config = GatewayConfig::default();
        config.storage.backend = StorageBackend::Sqlite;
        assert!(config.build_repository().is_err());
    }
}
