//! Manifest retrieval and dependency resolution.

use std::io::Read;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::manifest::{Manifest, Patch, MANIFEST_FILE};
use crate::server::Server;
use crate::transport::Transport;
use crate::version;

/// Marker asking for a dependency's own dependencies as well.
const EXPAND_MARKER: char = '*';

pub struct Resolver<T> {
    transport: T,
    recursive: bool,
}

impl<T: Transport> Resolver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            recursive: false,
        }
    }

    /// Expand every dependency's dependencies, starred or not.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Load the manifest for `version` from the staging cache, or fetch it
    /// and cache the raw bytes. A cached manifest is never fetched again.
    pub fn manifest(&self, server: &Server, version: &str) -> Result<Manifest> {
        version::validate(version)?;
        let dir = server.staging_dir(version);
        let cached = dir.join(MANIFEST_FILE);

        match std::fs::read(&cached) {
            Ok(data) => {
                debug!(server = %server.id, version, "manifest cache hit");
                return Manifest::from_json(version, &data);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io("failed to read cached manifest", &cached, e)),
        }

        let mut data = Vec::new();
        self.transport
            .fetch(server, &[version])?
            .read_to_end(&mut data)
            .map_err(|e| Error::Unavailable(format!("manifest {version}: {e}")))?;
        let manifest = Manifest::from_json(version, &data)?;

        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::io("failed to create staging directory", &dir, e))?;
        std::fs::write(&cached, &data)
            .map_err(|e| Error::io("failed to cache manifest", &cached, e))?;
        info!(server = %server.id, version, "manifest fetched");

        Ok(manifest)
    }

    pub fn patch(&self, server: &Server, version: &str) -> Result<Patch> {
        Ok(Patch {
            version: version.to_string(),
            manifest: self.manifest(server, version)?,
        })
    }

    /// Resolve `patch`'s dependency list into application order.
    ///
    /// Tokens are walked depth-first. An expanded dependency (starred, or any
    /// dependency when resolving recursively) is preceded by its own resolved
    /// dependencies. Repeats along separate branches are kept; meeting a
    /// version that is still being expanded is a cycle.
    pub fn dependencies(&self, server: &Server, patch: &Patch) -> Result<Vec<Patch>> {
        let mut chain = vec![patch.version.clone()];
        let mut resolved = Vec::new();
        self.walk(server, &patch.manifest, &mut chain, &mut resolved)?;
        Ok(resolved)
    }

    fn walk(
        &self,
        server: &Server,
        manifest: &Manifest,
        chain: &mut Vec<String>,
        resolved: &mut Vec<Patch>,
    ) -> Result<()> {
        for token in &manifest.dependencies {
            let token = token.trim();
            let (version, expand) = match token.strip_suffix(EXPAND_MARKER) {
                Some(stripped) => (stripped.trim_end(), true),
                None => (token, false),
            };
            if version.is_empty() {
                continue;
            }

            if chain.iter().any(|v| v == version) {
                let mut cycle = chain.clone();
                cycle.push(version.to_string());
                return Err(Error::CyclicDependency(cycle));
            }

            let dependency = self.patch(server, version)?;
            if expand || self.recursive {
                chain.push(dependency.version.clone());
                self.walk(server, &dependency.manifest, chain, resolved)?;
                chain.pop();
            }
            resolved.push(dependency);
        }
        Ok(())
    }
}
