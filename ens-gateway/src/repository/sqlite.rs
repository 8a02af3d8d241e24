//! SQLite-backed repository.
//!
//! [`SqliteRepository`] persists records across restarts. Uses [`rusqlite`]
//! for synchronous access, bridged to async via
//! [`tokio::task::spawn_blocking`].
//!
//! # Storage Model
//!
//! One `domains` row per node plus `texts` and `addresses` child tables.
//! Hashes, addresses and byte values are stored as `0x`-prefixed hex; coin
//! types as decimal strings.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256, Bytes, U256, hex};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::{DomainRecord, Repository, RepositoryError};
use crate::error::Result;

type StoreResult<T> = std::result::Result<T, RepositoryError>;

/// Persistent repository backed by a single SQLite database.
///
/// Cloneable via `Arc<Mutex<Connection>>`; clones share the connection.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Opens (or creates) a database at `path` and initializes the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(RepositoryError::from)?;
        Self::from_connection(conn)
    }

    /// Opens an ephemeral in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(RepositoryError::from)?;
        Self::from_connection(conn)
    }

    /// Wraps an existing [`Connection`], applying pragmas and schema setup.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(RepositoryError::from)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS domains (
                node        TEXT    PRIMARY KEY,
                owner       TEXT    NOT NULL,
                ttl         INTEGER NOT NULL DEFAULT 0,
                contenthash TEXT,
                fingerprint TEXT,
                updated_at  TEXT    NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS texts (
                node  TEXT NOT NULL REFERENCES domains(node) ON DELETE CASCADE,
                key   TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (node, key)
            );

            CREATE TABLE IF NOT EXISTS addresses (
                node      TEXT NOT NULL REFERENCES domains(node) ON DELETE CASCADE,
                coin_type TEXT NOT NULL,
                value     TEXT NOT NULL,
                PRIMARY KEY (node, coin_type)
            );",
        )
        .map_err(RepositoryError::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the locked connection on the blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        Ok(tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::Lock(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| RepositoryError::Task(e.to_string()))??)
    }
}

fn key(node: B256) -> String {
    hex::encode_prefixed(node)
}

fn parse<T: FromStr>(column: &str, raw: &str) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| RepositoryError::Corrupt(format!("{column} '{raw}': {e}")))
}

fn ensure_row(conn: &Connection, node: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO domains (node, owner) VALUES (?1, ?2)",
        params![node, hex::encode_prefixed(Address::ZERO)],
    )?;
    Ok(())
}

fn touch(conn: &Connection, node: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE domains SET updated_at = CURRENT_TIMESTAMP WHERE node = ?1",
        params![node],
    )?;
    Ok(())
}

fn load(conn: &Connection, node: B256) -> StoreResult<Option<DomainRecord>> {
    let id = key(node);
    let row: Option<(String, i64, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT owner, ttl, contenthash, fingerprint FROM domains WHERE node = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    let Some((owner, ttl, contenthash, fingerprint)) = row else {
        return Ok(None);
    };

    let mut texts = BTreeMap::new();
    {
        let mut stmt = conn.prepare("SELECT key, value FROM texts WHERE node = ?1")?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (k, v) = row?;
            texts.insert(k, v);
        }
    }

    let mut addresses = BTreeMap::new();
    {
        let mut stmt = conn.prepare("SELECT coin_type, value FROM addresses WHERE node = ?1")?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (coin_type, value) = row?;
            addresses.insert(
                parse::<U256>("coin_type", &coin_type)?,
                parse::<Bytes>("address value", &value)?,
            );
        }
    }

    Ok(Some(DomainRecord {
        node,
        owner: parse("owner", &owner)?,
        ttl: u64::try_from(ttl).map_err(|e| RepositoryError::Corrupt(format!("ttl {ttl}: {e}")))?,
        texts,
        addresses,
        contenthash: contenthash
            .map(|raw| parse::<Bytes>("contenthash", &raw))
            .transpose()?,
        fingerprint: fingerprint
            .map(|raw| parse::<B256>("fingerprint", &raw))
            .transpose()?,
    }))
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn domain(&self, node: B256) -> Result<Option<DomainRecord>> {
        self.blocking(move |conn| load(conn, node)).await
    }

    async fn register(&self, node: B256, owner: Address, ttl: u64) -> Result<()> {
        let ttl = i64::try_from(ttl)
            .map_err(|e| RepositoryError::Corrupt(format!("ttl {ttl}: {e}")))?;
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let id = key(node);
            let current: Option<String> = tx
                .query_row(
                    "SELECT owner FROM domains WHERE node = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(current) = current {
                if !parse::<Address>("owner", &current)?.is_zero() {
                    return Err(RepositoryError::AlreadyRegistered(node));
                }
            }
            ensure_row(&tx, &id)?;
            tx.execute(
                "UPDATE domains SET owner = ?2, ttl = ?3, updated_at = CURRENT_TIMESTAMP \
                 WHERE node = ?1",
                params![id, hex::encode_prefixed(owner), ttl],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn transfer(&self, node: B256, owner: Address) -> Result<()> {
        let zero = hex::encode_prefixed(Address::ZERO);
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE domains SET owner = ?2, updated_at = CURRENT_TIMESTAMP \
                 WHERE node = ?1 AND owner <> ?3",
                params![key(node), hex::encode_prefixed(owner), zero],
            )?;
            if changed == 0 {
                return Err(RepositoryError::NotFound(node));
            }
            Ok(())
        })
        .await
    }

    async fn set_text(&self, node: B256, key_name: &str, value: &str) -> Result<()> {
        let key_name = key_name.to_owned();
        let value = value.to_owned();
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let id = key(node);
            ensure_row(&tx, &id)?;
            if value.is_empty() {
                tx.execute(
                    "DELETE FROM texts WHERE node = ?1 AND key = ?2",
                    params![id, key_name],
                )?;
            } else {
                tx.execute(
                    "INSERT INTO texts (node, key, value) VALUES (?1, ?2, ?3) \
                     ON CONFLICT (node, key) DO UPDATE SET value = excluded.value",
                    params![id, key_name, value],
                )?;
            }
            touch(&tx, &id)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn set_addr(&self, node: B256, coin_type: U256, value: Bytes) -> Result<()> {
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let id = key(node);
            ensure_row(&tx, &id)?;
            if value.is_empty() {
                tx.execute(
                    "DELETE FROM addresses WHERE node = ?1 AND coin_type = ?2",
                    params![id, coin_type.to_string()],
                )?;
            } else {
                tx.execute(
                    "INSERT INTO addresses (node, coin_type, value) VALUES (?1, ?2, ?3) \
                     ON CONFLICT (node, coin_type) DO UPDATE SET value = excluded.value",
                    params![id, coin_type.to_string(), value.to_string()],
                )?;
            }
            touch(&tx, &id)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn set_contenthash(&self, node: B256, hash: Bytes) -> Result<()> {
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let id = key(node);
            ensure_row(&tx, &id)?;
            let stored = (!hash.is_empty()).then(|| hash.to_string());
            tx.execute(
                "UPDATE domains SET contenthash = ?2, updated_at = CURRENT_TIMESTAMP \
                 WHERE node = ?1",
                params![id, stored],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn set_fingerprint(&self, node: B256, fingerprint: B256) -> Result<()> {
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE domains SET fingerprint = ?2 WHERE node = ?1",
                params![key(node), hex::encode_prefixed(fingerprint)],
            )?;
            if changed == 0 {
                return Err(RepositoryError::NotFound(node));
            }
            Ok(())
        })
        .await
    }

    async fn text(&self, node: B256, key_name: &str) -> Result<Option<String>> {
        let key_name = key_name.to_owned();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM texts WHERE node = ?1 AND key = ?2",
                    params![key(node), key_name],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }
}
