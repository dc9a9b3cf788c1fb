use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::boot::BootConfig;

fn default_protocol() -> String {
    "http".to_string()
}

/// The server profile a patch operates against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Stable identifier; namespaces staging directories and rejections.
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Root under which `<id>/<version>/` staging directories are created.
    pub download_dir: PathBuf,
    #[serde(default)]
    pub patch_token: String,
    #[serde(default = "default_protocol")]
    pub patch_protocol: String,
    #[serde(default)]
    pub boot: BootConfig,
}

impl Server {
    pub fn new(id: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            download_dir: download_dir.into(),
            patch_token: String::new(),
            patch_protocol: default_protocol(),
            boot: BootConfig::default(),
        }
    }

    /// `<download_dir>/<id>/<version>`. Callers validate `version` first.
    pub fn staging_dir(&self, version: &str) -> PathBuf {
        self.download_dir.join(&self.id).join(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_staging_dir_is_namespaced() {
        let server = Server::new("overbuild", "/tmp/downloads");
        assert_eq!(
            server.staging_dir("v1.0.0"),
            Path::new("/tmp/downloads/overbuild/v1.0.0")
        );
    }

    #[test]
    fn test_profile_defaults() {
        let server: Server =
            serde_json::from_str(r#"{"id": "s1", "download_dir": "/d"}"#).unwrap();
        assert_eq!(server.patch_protocol, "http");
        assert!(server.patch_token.is_empty());
        assert_eq!(server.boot, BootConfig::default());
    }
}
