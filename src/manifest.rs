use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File name of a cached manifest inside a version's staging directory.
pub const MANIFEST_FILE: &str = "patch.json";

/// Per-version description of what a patch downloads, updates, replaces and
/// adds. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Version tokens; a trailing `*` asks for that dependency's own
    /// dependencies as well.
    #[serde(rename = "depend")]
    pub dependencies: Vec<String>,
    /// Remote path -> staged file name (empty means the remote base name).
    pub download: BTreeMap<String, String>,
    pub update: Update,
    /// Staged source -> client destination, overwriting and capturing the original.
    pub replace: BTreeMap<String, String>,
    /// Staged source -> client destination, which must not exist yet.
    pub add: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Update {
    pub boot: String,
    pub protocol: String,
}

impl Update {
    pub fn boot(&self) -> Option<&str> {
        Some(self.boot.as_str()).filter(|s| !s.is_empty())
    }

    pub fn protocol(&self) -> Option<&str> {
        Some(self.protocol.as_str()).filter(|s| !s.is_empty())
    }
}

impl Manifest {
    pub fn from_json(version: &str, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|source| Error::Manifest {
            version: version.to_string(),
            source,
        })
    }
}

/// A manifest together with the version it was resolved for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub version: String,
    pub manifest: Manifest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_manifest() {
        let json = br#"{
            "depend": ["v1.0.0", "v2.0.0*"],
            "download": {"client/boot.cfg": "", "res/a.fdb": "a.fdb"},
            "update": {"boot": "boot.cfg", "protocol": "https"},
            "replace": {"a.fdb": "res/cdclient.fdb"},
            "add": {"extra.txt": "res/extra.txt"}
        }"#;
        let manifest = Manifest::from_json("v3.0.0", json).unwrap();
        assert_eq!(manifest.dependencies, vec!["v1.0.0", "v2.0.0*"]);
        assert_eq!(manifest.download["client/boot.cfg"], "");
        assert_eq!(manifest.update.boot(), Some("boot.cfg"));
        assert_eq!(manifest.update.protocol(), Some("https"));
        assert_eq!(manifest.replace["a.fdb"], "res/cdclient.fdb");
        assert_eq!(manifest.add["extra.txt"], "res/extra.txt");
    }

    #[test]
    fn test_absent_fields_are_empty() {
        let manifest = Manifest::from_json("v1.0.0", b"{}").unwrap();
        assert_eq!(manifest, Manifest::default());
        assert_eq!(manifest.update.boot(), None);
        assert_eq!(manifest.update.protocol(), None);
    }

    #[test]
    fn test_malformed_manifest_names_version() {
        let err = Manifest::from_json("v9.9.9", b"{\"depend\": 3}").unwrap_err();
        assert!(matches!(err, Error::Manifest { ref version, .. } if version == "v9.9.9"));
    }
}
