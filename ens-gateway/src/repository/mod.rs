//! Domain record storage.
//!
//! [`Repository`] is the storage contract consumed by resolver handlers and
//! the integrity stage. Two backends are provided:
//!
//! - [`InMemoryRepository`]: `tokio::sync::RwLock<HashMap<..>>`, ephemeral.
//! - [`SqliteRepository`]: persistent, `rusqlite` bridged through
//!   `spawn_blocking` (feature `sqlite`).
//!
//! All records are keyed by the 32-byte ENS node. Setters upsert, so a
//! record can hold values before it has an owner (on-chain ownership mode).
//! Writing an empty value clears the entry, which keeps the canonical state
//! identical to a record that never had it.

mod in_memory;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::collections::BTreeMap;

use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use alloy::sol_types::SolValue;
use async_trait::async_trait;

pub use in_memory::InMemoryRepository;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepository;

use crate::error::Result;

/// Storage-layer error.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum RepositoryError {
    /// SQLite driver failure.
    #[error("storage error: {0}")]
    Sqlite(String),

    /// A connection or map lock was poisoned.
    #[error("storage lock poisoned: {0}")]
    Lock(String),

    /// A blocking task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),

    /// The node has no record.
    #[error("domain not found: {0}")]
    NotFound(B256),

    /// The node already has an owner.
    #[error("domain already registered")]
    AlreadyRegistered(B256),

    /// A stored value could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e.to_string())
    }
}

mod state {
    alloy::sol! {
        struct TextEntry {
            string key;
            string value;
        }

        struct AddrEntry {
            uint256 coinType;
            bytes value;
        }

        struct RecordState {
            bytes32 node;
            address owner;
            uint64 ttl;
            bytes contenthash;
            TextEntry[] texts;
            AddrEntry[] addresses;
        }
    }
}

/// Everything stored for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainRecord {
    /// ENS node (namehash).
    pub node: B256,
    /// Owner; zero when the node was never registered.
    pub owner: Address,
    /// Ttl offset in seconds served with reads.
    pub ttl: u64,
    /// Text records by key.
    pub texts: BTreeMap<String, String>,
    /// Address records by SLIP-44 coin type.
    pub addresses: BTreeMap<U256, Bytes>,
    /// Content hash (EIP-1577).
    pub contenthash: Option<Bytes>,
    /// Integrity marker, last computed by the integrity stage.
    pub fingerprint: Option<B256>,
}

impl DomainRecord {
    /// Empty, unowned record for `node`.
    #[must_use]
    pub fn new(node: B256) -> Self {
        Self {
            node,
            ..Self::default()
        }
    }

    /// Record with an owner and ttl.
    #[must_use]
    pub fn registered(node: B256, owner: Address, ttl: u64) -> Self {
        Self {
            node,
            owner,
            ttl,
            ..Self::default()
        }
    }

    /// Whether the node has an owner.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        !self.owner.is_zero()
    }

    /// Set or clear a text record.
    pub fn put_text(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.texts.remove(key);
        } else {
            self.texts.insert(key.to_owned(), value.to_owned());
        }
    }

    /// Set or clear an address record.
    pub fn put_addr(&mut self, coin_type: U256, value: Bytes) {
        if value.is_empty() {
            self.addresses.remove(&coin_type);
        } else {
            self.addresses.insert(coin_type, value);
        }
    }

    /// Set or clear the content hash.
    pub fn put_contenthash(&mut self, hash: Bytes) {
        self.contenthash = (!hash.is_empty()).then_some(hash);
    }

    /// keccak256 over the ABI-encoded canonical state.
    ///
    /// Entries are taken in key order and the stored fingerprint is not part
    /// of the input.
    #[must_use]
    pub fn fingerprint(&self) -> B256 {
        let state = state::RecordState {
            node: self.node,
            owner: self.owner,
            ttl: self.ttl,
            contenthash: self.contenthash.clone().unwrap_or_default(),
            texts: self
                .texts
                .iter()
                .map(|(key, value)| state::TextEntry {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            addresses: self
                .addresses
                .iter()
                .map(|(coin_type, value)| state::AddrEntry {
                    coinType: *coin_type,
                    value: value.clone(),
                })
                .collect(),
        };
        keccak256(state.abi_encode())
    }
}

/// Storage contract for ENS records.
///
/// Read methods return `None` when nothing is stored; they never fail for a
/// missing node.
#[async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    /// Full record for `node`.
    async fn domain(&self, node: B256) -> Result<Option<DomainRecord>>;

    /// Create `node` owned by `owner`.
    ///
    /// Fails with [`RepositoryError::AlreadyRegistered`] when the node
    /// already has an owner.
    async fn register(&self, node: B256, owner: Address, ttl: u64) -> Result<()>;

    /// Hand `node` to `owner`.
    ///
    /// Fails with [`RepositoryError::NotFound`] when the node is unregistered.
    async fn transfer(&self, node: B256, owner: Address) -> Result<()>;

    /// Set a text record; an empty value clears it.
    async fn set_text(&self, node: B256, key: &str, value: &str) -> Result<()>;

    /// Set an address record; empty bytes clear it.
    async fn set_addr(&self, node: B256, coin_type: U256, value: Bytes) -> Result<()>;

    /// Set the content hash; empty bytes clear it.
    async fn set_contenthash(&self, node: B256, hash: Bytes) -> Result<()>;

    /// Persist the integrity marker.
    async fn set_fingerprint(&self, node: B256, fingerprint: B256) -> Result<()>;

    /// Text record `key` of `node`.
    async fn text(&self, node: B256, key: &str) -> Result<Option<String>> {
        Ok(self
            .domain(node)
            .await?
            .and_then(|record| record.texts.get(key).cloned()))
    }

    /// Address record for `coin_type`.
    async fn addr(&self, node: B256, coin_type: U256) -> Result<Option<Bytes>> {
        Ok(self
            .domain(node)
            .await?
            .and_then(|record| record.addresses.get(&coin_type).cloned()))
    }

    /// Content hash of `node`.
    async fn contenthash(&self, node: B256) -> Result<Option<Bytes>> {
        Ok(self.domain(node).await?.and_then(|record| record.contenthash))
    }

    /// Owner of `node`, if registered.
    async fn owner(&self, node: B256) -> Result<Option<Address>> {
        Ok(self
            .domain(node)
            .await?
            .filter(DomainRecord::is_registered)
            .map(|record| record.owner))
    }
}
