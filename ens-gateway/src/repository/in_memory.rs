//! In-memory repository.
//!
//! [`InMemoryRepository`] keeps records in a `HashMap` behind a
//! `tokio::sync::RwLock`. Clones share the same map. Data is lost when the
//! last handle is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DomainRecord, Repository, RepositoryError};
use crate::error::Result;

/// Ephemeral repository for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<RwLock<HashMap<B256, DomainRecord>>>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = DomainRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.node, r)).collect();
        Self {
            records: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of stored nodes.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn upsert(&self, node: B256, f: impl FnOnce(&mut DomainRecord) + Send) {
        let mut guard = self.records.write().await;
        f(guard.entry(node).or_insert_with(|| DomainRecord::new(node)));
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn domain(&self, node: B256) -> Result<Option<DomainRecord>> {
        Ok(self.records.read().await.get(&node).cloned())
    }

    async fn register(&self, node: B256, owner: Address, ttl: u64) -> Result<()> {
        let mut guard = self.records.write().await;
        let record = guard.entry(node).or_insert_with(|| DomainRecord::new(node));
        if record.is_registered() {
            return Err(RepositoryError::AlreadyRegistered(node).into());
        }
        record.owner = owner;
        record.ttl = ttl;
        Ok(())
    }

    async fn transfer(&self, node: B256, owner: Address) -> Result<()> {
        let mut guard = self.records.write().await;
        match guard.get_mut(&node) {
            Some(record) if record.is_registered() => {
                record.owner = owner;
                Ok(())
            }
            _ => Err(RepositoryError::NotFound(node).into()),
        }
    }

    async fn set_text(&self, node: B256, key: &str, value: &str) -> Result<()> {
        self.upsert(node, |record| record.put_text(key, value)).await;
        Ok(())
    }

    async fn set_addr(&self, node: B256, coin_type: U256, value: Bytes) -> Result<()> {
        self.upsert(node, |record| record.put_addr(coin_type, value))
            .await;
        Ok(())
    }

    async fn set_contenthash(&self, node: B256, hash: Bytes) -> Result<()> {
        self.upsert(node, |record| record.put_contenthash(hash)).await;
        Ok(())
    }

    async fn set_fingerprint(&self, node: B256, fingerprint: B256) -> Result<()> {
        let mut guard = self.records.write().await;
        let record = guard
            .get_mut(&node)
            .ok_or(RepositoryError::NotFound(node))?;
        record.fingerprint = Some(fingerprint);
        Ok(())
    }
}
