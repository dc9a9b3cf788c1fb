//! Patch engine: download, update and transfer phases for one client
//! installation.
//!
//! Every call runs sequentially on the calling thread and blocks on network
//! and disk I/O. Callers serialize work per server/version themselves and run
//! the engine on a background worker. There is no cancellation: once a step
//! has started it runs to completion or failure.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::boot::BootConfig;
use crate::cache::ResourceCache;
use crate::error::{self, Error, Result};
use crate::ldf;
use crate::manifest::{Patch, MANIFEST_FILE};
use crate::rejection::RejectionList;
use crate::resolver::Resolver;
use crate::server::Server;
use crate::store::{SqliteStore, Store};
use crate::transfer::{Transfer, TransferSummary};
use crate::transport::Transport;
use crate::util;
use crate::version;

/// Resource on the patch server naming the current version.
pub const VERSION_RESOURCE: &str = "version";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub version: String,
    /// Dependencies in the order they were downloaded.
    pub dependencies: Vec<String>,
    pub files_downloaded: usize,
    pub boot_updated: bool,
    pub protocol_updated: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub files_restored: usize,
    pub files_removed: usize,
}

pub struct PatchEngine<T, S> {
    resolver: Resolver<T>,
    cache: ResourceCache<S>,
    rejections: RejectionList,
    client_dir: PathBuf,
}

impl<T: Transport> PatchEngine<T, SqliteStore> {
    /// Open the on-disk resource cache and rejection list. Failing to open
    /// the cache is fatal for the whole engine.
    pub fn open(
        transport: T,
        cache_path: &Path,
        rejections_path: &Path,
        client_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        if let Some(parent) = cache_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io("failed to create directory", parent, e))?;
        }
        let store = SqliteStore::open(cache_path)?;
        let rejections = RejectionList::load(rejections_path)?;
        Ok(Self::new(transport, store, rejections, client_dir))
    }
}

impl<T: Transport, S: Store> PatchEngine<T, S> {
    pub fn new(
        transport: T,
        store: S,
        rejections: RejectionList,
        client_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver: Resolver::new(transport),
            cache: ResourceCache::new(store),
            rejections,
            client_dir: client_dir.into(),
        }
    }

    /// Expand every dependency's dependencies, starred or not.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.resolver = self.resolver.recursive(recursive);
        self
    }

    pub fn resolver(&self) -> &Resolver<T> {
        &self.resolver
    }

    pub fn cache(&self) -> &ResourceCache<S> {
        &self.cache
    }

    pub fn rejections(&self) -> &RejectionList {
        &self.rejections
    }

    pub fn client_dir(&self) -> &Path {
        &self.client_dir
    }

    /// Permanently skip `version` for `server_id`.
    pub fn reject(&mut self, server_id: &str, version: &str) -> Result<()> {
        version::validate(version)?;
        self.rejections.reject(server_id, version)
    }

    fn ensure_wanted(&self, server: &Server, version: &str) -> Result<()> {
        if self.rejections.is_rejected(&server.id, version) {
            return Err(Error::Rejected {
                server: server.id.clone(),
                version: version.to_string(),
            });
        }
        version::validate(version)
    }

    /// Ask the patch server which version is current.
    pub fn remote_version(&self, server: &Server) -> Result<String> {
        let mut body = Vec::new();
        self.resolver
            .transport()
            .fetch(server, &[VERSION_RESOURCE])?
            .read_to_end(&mut body)
            .map_err(|e| Error::Unavailable(format!("{VERSION_RESOURCE}: {e}")))?;
        // A body that is not text cannot name a version.
        let text = String::from_utf8(body).map_err(|e| {
            Error::InvalidVersion(String::from_utf8_lossy(e.as_bytes()).into_owned())
        })?;
        let current = text.trim().to_string();
        version::validate(&current)?;
        Ok(current)
    }

    /// Resolve the manifest for `version` unless the user rejected it, in
    /// which case nothing is fetched and `None` is returned.
    pub fn check_update(&self, server: &Server, version: &str) -> Result<Option<Patch>> {
        match self.ensure_wanted(server, version) {
            Ok(()) => {}
            Err(Error::Rejected { .. }) => {
                debug!(server = %server.id, version, "skipping rejected version");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }
        self.resolver.patch(server, version).map(Some)
    }

    /// Download every file listed in `patch` into its staging directory,
    /// stopping at the first failure. Returns the number of files written.
    pub fn download(&self, server: &Server, patch: &Patch) -> Result<usize> {
        self.ensure_wanted(server, &patch.version)?;
        let staging = server.staging_dir(&patch.version);

        for (remote, local) in &patch.manifest.download {
            let local = if local.is_empty() {
                util::base_name(remote)
            } else {
                local.as_str()
            };
            let local = util::clean_local(local)?;
            // The cached manifest lives beside the staged files.
            if local == MANIFEST_FILE {
                return Err(Error::NonlocalPath(local));
            }
            let target = staging.join(local);

            let mut body = self.resolver.transport().fetch(server, &[remote.as_str()])?;

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::io("failed to create directory", parent, e))?;
            }
            let file = File::create(&target)
                .map_err(|e| Error::io("failed to create staged file", &target, e))?;
            let mut writer = BufWriter::with_capacity(256 * 1024, file);
            let written = std::io::copy(&mut body, &mut writer)
                .map_err(|e| Error::io("failed to download into", &target, e))?;
            writer
                .flush()
                .map_err(|e| Error::io("failed to flush staged file", &target, e))?;
            debug!(version = %patch.version, %remote, bytes = written, "downloaded");
        }

        info!(
            server = %server.id,
            version = %patch.version,
            files = patch.manifest.download.len(),
            "download complete"
        );
        Ok(patch.manifest.download.len())
    }

    /// Apply the manifest's `update` block to `server`. The boot and
    /// protocol updates are independent; both are attempted and their
    /// failures reported together.
    pub fn apply_updates(&self, server: &mut Server, patch: &Patch) -> Result<(bool, bool)> {
        let mut errors = Vec::new();
        let mut boot_updated = false;
        let mut protocol_updated = false;

        if let Some(boot) = patch.manifest.update.boot() {
            match self.read_boot(server, &patch.version, boot) {
                Ok(config) => {
                    server.boot = config;
                    boot_updated = true;
                    info!(server = %server.id, version = %patch.version, "boot configuration updated");
                }
                Err(err) => {
                    warn!(server = %server.id, error = %err, "boot update failed");
                    errors.push(err);
                }
            }
        }

        if let Some(protocol) = patch.manifest.update.protocol() {
            server.patch_protocol = protocol.to_string();
            protocol_updated = true;
            info!(server = %server.id, protocol, "patch protocol updated");
        }

        error::join(errors)?;
        Ok((boot_updated, protocol_updated))
    }

    fn read_boot(&self, server: &Server, version: &str, name: &str) -> Result<BootConfig> {
        let path = server.staging_dir(version).join(util::clean_local(name)?);
        let data =
            std::fs::read(&path).map_err(|e| Error::io("failed to read staged boot file", &path, e))?;
        Ok(ldf::from_bytes(&data)?)
    }

    /// Resolve, download dependencies then `version` itself, and apply the
    /// `update` block of `version` only. Dependencies contribute files,
    /// never configuration. Any download failure aborts before updates.
    pub fn update_resources(&self, server: &mut Server, version: &str) -> Result<UpdateSummary> {
        self.ensure_wanted(server, version)?;
        let patch = self.resolver.patch(server, version)?;
        let dependencies = self.resolver.dependencies(server, &patch)?;

        let mut files_downloaded = 0;
        for dependency in &dependencies {
            files_downloaded += self.download(server, dependency)?;
        }
        files_downloaded += self.download(server, &patch)?;

        let (boot_updated, protocol_updated) = self.apply_updates(server, &patch)?;

        Ok(UpdateSummary {
            version: patch.version,
            dependencies: dependencies.into_iter().map(|p| p.version).collect(),
            files_downloaded,
            boot_updated,
            protocol_updated,
        })
    }

    /// Move staged files into the client directory: each dependency in
    /// download order, then `version` itself. Every resource failure is
    /// collected and reported together.
    pub fn transfer_resources(&self, server: &Server, version: &str) -> Result<TransferSummary> {
        self.ensure_wanted(server, version)?;
        let patch = self.resolver.patch(server, version)?;
        let dependencies = self.resolver.dependencies(server, &patch)?;

        let mut summary = TransferSummary::default();
        let mut errors = Vec::new();
        for current in dependencies.iter().chain(std::iter::once(&patch)) {
            debug!(version = %current.version, "transferring");
            Transfer::new(
                &self.cache,
                &self.client_dir,
                server.staging_dir(&current.version),
            )
            .run(&current.manifest, &mut summary, &mut errors);
        }

        info!(
            server = %server.id,
            version,
            replaced = summary.files_replaced,
            added = summary.files_added,
            failed = errors.len(),
            "transfer complete"
        );
        error::join(errors)?;
        Ok(summary)
    }

    /// Put the client directory back to its pre-patch state: write every
    /// captured original back (content and modification time) and delete
    /// every file a patch added. Cache entries are kept.
    pub fn restore_originals(&self) -> Result<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        let mut errors = Vec::new();

        for original in self.cache.replaced().list()? {
            match self.restore_one(&original.path, &original.content, original.modified) {
                Ok(()) => summary.files_restored += 1,
                Err(err) => errors.push(err),
            }
        }

        for added in self.cache.added().list()? {
            let path = match util::clean_local(&added) {
                Ok(key) => self.client_dir.join(key),
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            match std::fs::remove_file(&path) {
                Ok(()) => summary.files_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => errors.push(Error::io("failed to remove added file", &path, e)),
            }
        }

        info!(
            restored = summary.files_restored,
            removed = summary.files_removed,
            failed = errors.len(),
            "restore complete"
        );
        error::join(errors)?;
        Ok(summary)
    }

    fn restore_one(&self, key: &str, content: &[u8], modified: std::time::SystemTime) -> Result<()> {
        let path = self.client_dir.join(util::clean_local(key)?);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io("failed to create directory", parent, e))?;
        }
        std::fs::write(&path, content).map_err(|e| Error::io("failed to restore file", &path, e))?;
        File::options()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_modified(modified))
            .map_err(|e| Error::io("failed to restore modification time", &path, e))
    }
}
