//! Resource cache: the durable undo log of a client installation.
//!
//! The replacement cache holds the original bytes and modification time of
//! every client file a patch has overwritten; the addition cache holds the
//! path of every file a patch has created. Both are write-once per path, so
//! the first capture of a file is never replaced by a later one.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::store::{Namespace, Store};

pub use crate::store::CacheError;

const COMPRESSION_LEVEL: i32 = 3;

/// Original content of a client file captured before it was first replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacedResource {
    pub path: String,
    pub modified: SystemTime,
    pub content: Vec<u8>,
}

#[derive(Deserialize)]
struct StoredOriginal {
    modified: SystemTime,
    content: Vec<u8>,
}

/// Borrowed twin of `StoredOriginal`; bincode encodes both identically.
#[derive(Serialize)]
struct StoredOriginalRef<'a> {
    modified: SystemTime,
    content: &'a [u8],
}

fn encode_original(modified: SystemTime, content: &[u8]) -> Result<Vec<u8>, CacheError> {
    let encoded = bincode::serialize(&StoredOriginalRef { modified, content })?;
    zstd::bulk::compress(&encoded, COMPRESSION_LEVEL).map_err(CacheError::Compression)
}

fn decode_original(path: String, value: &[u8]) -> Result<ReplacedResource, CacheError> {
    let decoded = zstd::stream::decode_all(value).map_err(CacheError::Compression)?;
    let stored: StoredOriginal = bincode::deserialize(&decoded)?;
    Ok(ReplacedResource {
        path,
        modified: stored.modified,
        content: stored.content,
    })
}

pub struct ResourceCache<S> {
    store: S,
}

impl<S: Store> ResourceCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn replaced(&self) -> ReplacementCache<'_, S> {
        ReplacementCache { store: &self.store }
    }

    pub fn added(&self) -> AdditionCache<'_, S> {
        AdditionCache { store: &self.store }
    }
}

pub struct ReplacementCache<'a, S> {
    store: &'a S,
}

impl<S: Store> ReplacementCache<'_, S> {
    /// Record an original. Returns `false` (and keeps the existing entry)
    /// when the path was captured before.
    pub fn add(&self, entry: &ReplacedResource) -> Result<bool, CacheError> {
        self.capture(&entry.path, entry.modified, &entry.content)
    }

    /// Like [`add`](Self::add), straight from borrowed bytes such as a
    /// mapped file.
    pub fn capture(
        &self,
        path: &str,
        modified: SystemTime,
        content: &[u8],
    ) -> Result<bool, CacheError> {
        let value = encode_original(modified, content)?;
        self.store.insert_if_absent(Namespace::Replaced, path, &value)
    }

    pub fn get(&self, path: &str) -> Result<ReplacedResource, CacheError> {
        match self.store.get(Namespace::Replaced, path)? {
            Some(value) => decode_original(path.to_string(), &value),
            None => Err(CacheError::NotFound(path.to_string())),
        }
    }

    pub fn has(&self, path: &str) -> Result<bool, CacheError> {
        self.store.contains(Namespace::Replaced, path)
    }

    pub fn list(&self) -> Result<Vec<ReplacedResource>, CacheError> {
        self.store
            .list(Namespace::Replaced)?
            .into_iter()
            .map(|(path, value)| decode_original(path, &value))
            .collect()
    }
}

pub struct AdditionCache<'a, S> {
    store: &'a S,
}

impl<S: Store> AdditionCache<'_, S> {
    /// Record a created path. Returns `false` when it was already recorded.
    pub fn add(&self, path: &str) -> Result<bool, CacheError> {
        self.store.insert_if_absent(Namespace::Added, path, &[])
    }

    pub fn get(&self, path: &str) -> Result<String, CacheError> {
        match self.store.get(Namespace::Added, path)? {
            Some(_) => Ok(path.to_string()),
            None => Err(CacheError::NotFound(path.to_string())),
        }
    }

    pub fn has(&self, path: &str) -> Result<bool, CacheError> {
        self.store.contains(Namespace::Added, path)
    }

    pub fn list(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .store
            .list(Namespace::Added)?
            .into_iter()
            .map(|(path, _)| path)
            .collect())
    }
}
