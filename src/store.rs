//! Append-only key/value backing for the resource cache.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] bincode::Error),

    #[error("failed to (de)compress cache entry: {0}")]
    Compression(#[source] std::io::Error),

    #[error("no cache entry for {0}")]
    NotFound(String),
}

/// The two independent key spaces of the resource cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Namespace {
    Replaced,
    Added,
}

impl Namespace {
    fn table(self) -> &'static str {
        match self {
            Namespace::Replaced => "replaced",
            Namespace::Added => "added",
        }
    }
}

/// Storage contract: write-once keys, point lookups, and full listing.
/// No update or delete is exposed.
pub trait Store {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` unless the key already exists. Returns
    /// whether a new entry was written.
    fn insert_if_absent(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<bool, CacheError>;

    /// Every entry in `ns`, ordered by key.
    fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, CacheError>;

    fn contains(&self, ns: Namespace, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(ns, key)?.is_some())
    }
}

/// SQLite-backed store over a single connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the cache database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        Self::init(Connection::open(path)?)
    }

    /// Creates an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        for ns in [Namespace::Replaced, Namespace::Added] {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (path TEXT PRIMARY KEY NOT NULL, value BLOB NOT NULL)",
                    ns.table()
                ),
                [],
            )?;
        }
        Ok(Self { conn })
    }
}

impl Store for SqliteStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self
            .conn
            .query_row(
                &format!("SELECT value FROM {} WHERE path = ?1", ns.table()),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn insert_if_absent(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<bool, CacheError> {
        let changed = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (path, value) VALUES (?1, ?2)",
                ns.table()
            ),
            params![key, value],
        )?;
        Ok(changed > 0)
    }

    fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT path, value FROM {} ORDER BY path", ns.table()))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(Namespace, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&(ns, key.to_string())).cloned())
    }

    fn insert_if_absent(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = (ns, key.to_string());
        if entries.contains_key(&slot) {
            return Ok(false);
        }
        entries.insert(slot, value.to_vec());
        Ok(true)
    }

    fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .iter()
            .filter(|((entry_ns, _), _)| *entry_ns == ns)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(ns, key)
    }

    fn insert_if_absent(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<bool, CacheError> {
        (**self).insert_if_absent(ns, key, value)
    }

    fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        (**self).list(ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn Store) {
        assert!(store.insert_if_absent(Namespace::Replaced, "a", b"first").unwrap());
        assert!(!store.insert_if_absent(Namespace::Replaced, "a", b"second").unwrap());
        assert_eq!(
            store.get(Namespace::Replaced, "a").unwrap().as_deref(),
            Some(&b"first"[..])
        );
        assert!(!store.contains(Namespace::Added, "a").unwrap());

        store.insert_if_absent(Namespace::Added, "z", b"").unwrap();
        store.insert_if_absent(Namespace::Added, "m", b"").unwrap();
        let keys: Vec<_> = store
            .list(Namespace::Added)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["m", "z"]);
        assert_eq!(store.list(Namespace::Replaced).unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store_contract() {
        exercise(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_if_absent(Namespace::Replaced, "data/file1", b"A")
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.contains(Namespace::Replaced, "data/file1").unwrap());
        assert!(!store
            .insert_if_absent(Namespace::Replaced, "data/file1", b"B")
            .unwrap());
    }
}
