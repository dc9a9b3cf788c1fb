//! Moving staged files into the live client directory.
//!
//! `replace` entries overwrite an existing client file after its original
//! content has been captured in the replacement cache (once per path, ever).
//! `add` entries create new files and never clobber an existing one.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cache::ResourceCache;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::store::Store;
use crate::util;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub files_replaced: usize,
    pub files_added: usize,
    pub originals_captured: usize,
}

/// How far a failure reaches: one resource, or the rest of its map.
enum Failure {
    Resource(Error),
    Fatal(Error),
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::Resource(err)
    }
}

impl From<crate::cache::CacheError> for Failure {
    fn from(err: crate::cache::CacheError) -> Self {
        Failure::Resource(err.into())
    }
}

pub struct Transfer<'a, S> {
    cache: &'a ResourceCache<S>,
    client_dir: &'a Path,
    staging_dir: PathBuf,
}

impl<'a, S: Store> Transfer<'a, S> {
    pub fn new(cache: &'a ResourceCache<S>, client_dir: &'a Path, staging_dir: PathBuf) -> Self {
        Self {
            cache,
            client_dir,
            staging_dir,
        }
    }

    /// Apply a manifest's `replace` map, then its `add` map. Every failure
    /// is collected into `errors`; an unreadable source stops the remainder
    /// of its own map only.
    pub fn run(&self, manifest: &Manifest, summary: &mut TransferSummary, errors: &mut Vec<Error>) {
        for (source, destination) in &manifest.replace {
            match self.replace(source, destination) {
                Ok(captured) => {
                    summary.files_replaced += 1;
                    if captured {
                        summary.originals_captured += 1;
                    }
                }
                Err(Failure::Resource(err)) => {
                    warn!(%source, %destination, error = %err, "replace failed");
                    errors.push(err);
                }
                Err(Failure::Fatal(err)) => {
                    warn!(%source, error = %err, "replace aborted");
                    errors.push(err);
                    break;
                }
            }
        }

        for (source, destination) in &manifest.add {
            match self.add(source, destination) {
                Ok(()) => summary.files_added += 1,
                Err(Failure::Resource(err)) => {
                    warn!(%source, %destination, error = %err, "add failed");
                    errors.push(err);
                }
                Err(Failure::Fatal(err)) => {
                    warn!(%source, error = %err, "add aborted");
                    errors.push(err);
                    break;
                }
            }
        }
    }

    fn open_source(&self, source: &str) -> Result<(File, PathBuf), Failure> {
        let path = self.staging_dir.join(util::clean_local(source)?);
        let file = File::open(&path)
            .map_err(|e| Failure::Fatal(Error::io("failed to open staged file", &path, e)))?;
        Ok((file, path))
    }

    /// Returns whether the original was captured by this call.
    fn replace(&self, source: &str, destination: &str) -> Result<bool, Failure> {
        let key = util::clean_local(destination)?;
        let (mut staged, staged_path) = self.open_source(source)?;
        let live = self.client_dir.join(&key);

        let mut captured = false;
        if !self.cache.replaced().has(&key)? {
            let meta = std::fs::metadata(&live)
                .map_err(|e| Error::io("failed to stat replaced file", &live, e))?;
            let modified = meta
                .modified()
                .map_err(|e| Error::io("failed to read modification time", &live, e))?;
            // The mapping is dropped inside with_mapped, before the file is rewritten below.
            captured = util::with_mapped(&live, |content| {
                self.cache.replaced().capture(&key, modified, content)
            })??;
            debug!(path = %key, "captured original");
        }

        if let Some(parent) = live.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io("failed to create directory", parent, e))?;
        }
        let out = File::create(&live).map_err(|e| Error::io("failed to write file", &live, e))?;
        copy_verified(&mut staged, &staged_path, out, &live, &key)?;
        debug!(%source, destination = %key, "replaced");
        Ok(captured)
    }

    fn add(&self, source: &str, destination: &str) -> Result<(), Failure> {
        let key = util::clean_local(destination)?;
        let (mut staged, staged_path) = self.open_source(source)?;
        let live = self.client_dir.join(&key);

        let exists = live
            .try_exists()
            .map_err(|e| Error::io("failed to check destination", &live, e))?;
        if exists {
            return Err(Error::Conflict(key).into());
        }

        self.cache.added().add(&key)?;

        if let Some(parent) = live.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io("failed to create directory", parent, e))?;
        }
        let out = match OpenOptions::new().write(true).create_new(true).open(&live) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Conflict(key).into());
            }
            Err(e) => return Err(Error::io("failed to create file", &live, e).into()),
        };
        copy_verified(&mut staged, &staged_path, out, &live, &key)?;
        debug!(%source, destination = %key, "added");
        Ok(())
    }
}

/// Copy the staged file into `out`, then compare BLAKE3 digests of both.
fn copy_verified(
    staged: &mut File,
    staged_path: &Path,
    out: File,
    live: &Path,
    key: &str,
) -> Result<()> {
    let mut writer = BufWriter::with_capacity(256 * 1024, out);
    std::io::copy(staged, &mut writer).map_err(|e| Error::io("failed to copy file", live, e))?;
    writer
        .flush()
        .map_err(|e| Error::io("failed to flush file", live, e))?;
    drop(writer);

    if util::hash_file(staged_path)? != util::hash_file(live)? {
        return Err(Error::IntegrityMismatch(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct Fixture {
        _root: tempfile::TempDir,
        client: PathBuf,
        staging: PathBuf,
        cache: ResourceCache<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let client = root.path().join("client");
            let staging = root.path().join("staging");
            std::fs::create_dir_all(&client).unwrap();
            std::fs::create_dir_all(&staging).unwrap();
            Self {
                _root: root,
                client,
                staging,
                cache: ResourceCache::new(MemoryStore::new()),
            }
        }

        fn client_file(&self, rel: &str, content: &[u8]) {
            let path = self.client.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn staged_file(&self, rel: &str, content: &[u8]) {
            std::fs::write(self.staging.join(rel), content).unwrap();
        }

        fn run(&self, manifest: &Manifest) -> (TransferSummary, Vec<Error>) {
            let mut summary = TransferSummary::default();
            let mut errors = Vec::new();
            Transfer::new(&self.cache, &self.client, self.staging.clone()).run(
                manifest,
                &mut summary,
                &mut errors,
            );
            (summary, errors)
        }
    }

    fn replace(source: &str, destination: &str) -> Manifest {
        let mut manifest = Manifest::default();
        manifest.replace.insert(source.into(), destination.into());
        manifest
    }

    fn add(source: &str, destination: &str) -> Manifest {
        let mut manifest = Manifest::default();
        manifest.add.insert(source.into(), destination.into());
        manifest
    }

    #[test]
    fn test_replace_captures_true_original_once() {
        let fx = Fixture::new();
        fx.client_file("data/file1", b"A");
        fx.staged_file("b", b"B");
        fx.staged_file("c", b"C");

        let (summary, errors) = fx.run(&replace("b", "data/file1"));
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(summary.originals_captured, 1);
        assert_eq!(std::fs::read(fx.client.join("data/file1")).unwrap(), b"B");
        assert_eq!(fx.cache.replaced().get("data/file1").unwrap().content, b"A");

        let (summary, errors) = fx.run(&replace("c", "./data//file1"));
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(summary.originals_captured, 0);
        assert_eq!(std::fs::read(fx.client.join("data/file1")).unwrap(), b"C");
        assert_eq!(fx.cache.replaced().get("data/file1").unwrap().content, b"A");
    }

    #[test]
    fn test_replace_missing_destination_fails() {
        let fx = Fixture::new();
        fx.staged_file("b", b"B");

        let (summary, errors) = fx.run(&replace("b", "data/missing"));
        assert_eq!(summary.files_replaced, 0);
        assert!(matches!(errors.as_slice(), [Error::Io { .. }]));
        assert!(!fx.cache.replaced().has("data/missing").unwrap());
    }

    #[test]
    fn test_add_never_clobbers() {
        let fx = Fixture::new();
        fx.client_file("res/existing.txt", b"keep me");
        fx.staged_file("new", b"new content");

        let (_, errors) = fx.run(&add("new", "res/existing.txt"));
        assert!(matches!(errors.as_slice(), [Error::Conflict(p)] if p == "res/existing.txt"));
        assert_eq!(
            std::fs::read(fx.client.join("res/existing.txt")).unwrap(),
            b"keep me"
        );
        assert!(!fx.cache.added().has("res/existing.txt").unwrap());

        let (summary, errors) = fx.run(&add("new", "res/fresh/created.txt"));
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(summary.files_added, 1);
        assert_eq!(
            std::fs::read(fx.client.join("res/fresh/created.txt")).unwrap(),
            b"new content"
        );
        assert!(fx.cache.added().has("res/fresh/created.txt").unwrap());
    }

    #[test]
    fn test_failures_are_aggregated_not_short_circuited() {
        let fx = Fixture::new();
        fx.client_file("a", b"1");
        fx.staged_file("s", b"S");

        let mut manifest = Manifest::default();
        manifest.replace.insert("s".into(), "../escape".into());
        manifest.add.insert("s".into(), "a".into());
        manifest.add.insert("t".into(), "/abs".into());

        let (_, errors) = fx.run(&manifest);
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], Error::NonlocalPath(_)));
        assert!(matches!(errors[1], Error::Conflict(_)));
        assert!(matches!(errors[2], Error::NonlocalPath(_)));
    }

    #[test]
    fn test_replace_succeeds_alongside_failing_add() {
        let fx = Fixture::new();
        fx.client_file("a", b"1");
        fx.staged_file("s", b"S");

        let mut manifest = Manifest::default();
        manifest.replace.insert("s".into(), "a".into());
        manifest.add.insert("s".into(), "a".into());

        let (summary, errors) = fx.run(&manifest);
        assert_eq!(summary.files_replaced, 1);
        assert!(matches!(errors.as_slice(), [Error::Conflict(_)]));
        assert_eq!(std::fs::read(fx.client.join("a")).unwrap(), b"S");
    }

    #[test]
    fn test_unreadable_source_aborts_its_own_map_only() {
        let fx = Fixture::new();
        fx.client_file("x", b"1");
        fx.client_file("y", b"2");
        fx.staged_file("good", b"G");

        let mut manifest = Manifest::default();
        // BTreeMap order: "absent" is attempted before "good".
        manifest.replace.insert("absent".into(), "x".into());
        manifest.replace.insert("good".into(), "y".into());
        manifest.add.insert("good".into(), "z".into());

        let (summary, errors) = fx.run(&manifest);
        assert_eq!(errors.len(), 1);
        assert_eq!(summary.files_replaced, 0);
        assert_eq!(summary.files_added, 1);
        assert_eq!(std::fs::read(fx.client.join("y")).unwrap(), b"2");
        assert_eq!(std::fs::read(fx.client.join("z")).unwrap(), b"G");
    }
}
