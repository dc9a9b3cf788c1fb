use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use patchsync::Server;

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("patchsync")
}

fn default_cache_path() -> PathBuf {
    data_dir().join("resources.sqlite")
}

fn default_rejections_path() -> PathBuf {
    data_dir().join("rejected.json")
}

/// Launcher-side settings the CLI needs to drive the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Root of the game-client installation that transfers write into.
    pub client_dir: PathBuf,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_rejections_path")]
    pub rejections_path: PathBuf,
    #[serde(default)]
    pub servers: Vec<Server>,
}

impl LauncherConfig {
    /// `<config dir>/patchsync/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("patchsync").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, data)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }

    pub fn server(&self, id: &str) -> Result<&Server> {
        self.servers
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| anyhow!("Unknown server: {id}"))
    }

    pub fn server_mut(&mut self, id: &str) -> Result<&mut Server> {
        self.servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| anyhow!("Unknown server: {id}"))
    }
}
