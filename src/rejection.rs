use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

/// Versions the user declined, per server ID, persisted as a JSON object
/// (`{"server": ["v1.0.0", ...]}`) and rewritten on every rejection.
#[derive(Debug, Clone)]
pub struct RejectionList {
    path: Option<PathBuf>,
    entries: BTreeMap<String, Vec<String>>,
}

impl RejectionList {
    /// Load from `path`; a missing file is an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| Error::json("failed to decode rejection list", &path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(Error::io("failed to read rejection list", &path, e)),
        };
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// A list that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_rejected(&self, server_id: &str, version: &str) -> bool {
        self.entries
            .get(server_id)
            .is_some_and(|versions| versions.iter().any(|v| v == version))
    }

    pub fn rejected(&self, server_id: &str) -> &[String] {
        self.entries
            .get(server_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Append `version` for `server_id` and persist. Rejecting twice is a no-op.
    pub fn reject(&mut self, server_id: &str, version: &str) -> Result<()> {
        if self.is_rejected(server_id, version) {
            return Ok(());
        }
        self.entries
            .entry(server_id.to_string())
            .or_default()
            .push(version.to_string());
        info!(server = server_id, version, "version rejected");
        self.save()
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io("failed to create directory", parent, e))?;
        }
        let data = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| Error::json("failed to encode rejection list", path, e))?;
        std::fs::write(path, data).map_err(|e| Error::io("failed to write rejection list", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let list = RejectionList::load(dir.path().join("rejected.json")).unwrap();
        assert!(!list.is_rejected("s1", "v1.0.0"));
        assert!(list.rejected("s1").is_empty());
    }

    #[test]
    fn test_reject_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/rejected.json");

        let mut list = RejectionList::load(&path).unwrap();
        list.reject("s1", "v4.0.0").unwrap();
        list.reject("s1", "v4.0.0").unwrap();
        list.reject("s2", "v1.0.0").unwrap();

        let reloaded = RejectionList::load(&path).unwrap();
        assert!(reloaded.is_rejected("s1", "v4.0.0"));
        assert!(!reloaded.is_rejected("s1", "v1.0.0"));
        assert!(reloaded.is_rejected("s2", "v1.0.0"));
        assert_eq!(reloaded.rejected("s1").to_vec(), vec!["v4.0.0".to_string()]);

        let raw: BTreeMap<String, Vec<String>> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["s1"], vec!["v4.0.0"]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rejected.json");
        std::fs::write(&path, b"[not an object").unwrap();
        let err = RejectionList::load(&path).unwrap_err();
        assert!(matches!(err, Error::Json { .. }), "{err:?}");
        assert!(!err.is_retryable());
    }
}
