use memmap2::Mmap;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// A file found under a staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Forward-slash path relative to the staging directory.
    pub relative_path: String,
    pub size: u64,
}

/// Lexically clean a manifest path and make sure it stays inside its base
/// directory. Returns the cleaned, forward-slash form used for joins and as
/// the resource-cache key.
pub fn clean_local(path: &str) -> Result<String> {
    let nonlocal = || Error::NonlocalPath(path.to_string());
    let normalized = path.replace('\\', "/");

    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(nonlocal());
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(nonlocal());
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Err(nonlocal());
    }
    Ok(parts.join("/"))
}

/// `C:` style prefixes only mean a drive on Windows; elsewhere `a:b.txt` is
/// an ordinary file name.
fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    cfg!(windows) && bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Last segment of a remote path.
pub fn base_name(remote_path: &str) -> &str {
    remote_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(remote_path)
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file =
        std::fs::File::open(path).map_err(|e| Error::io("failed to open file", path, e))?;
    // SAFETY: We only read from this mapping; no concurrent modification of these files.
    unsafe { Mmap::map(&file).map_err(|e| Error::io("failed to memory-map file", path, e)) }
}

/// Map `path` and hand its bytes to `f`. The mapping is released before
/// returning, so the caller may overwrite the file afterwards.
pub fn with_mapped<T>(path: &Path, f: impl FnOnce(&[u8]) -> T) -> Result<T> {
    let meta = std::fs::metadata(path).map_err(|e| Error::io("failed to stat file", path, e))?;
    // Zero-length files cannot be mapped on every platform.
    if meta.len() == 0 {
        return Ok(f(&[]));
    }
    let map = mmap_file(path)?;
    Ok(f(&map[..]))
}

/// Stream-hash a file using BLAKE3.
/// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
pub fn hash_file(path: &Path) -> Result<blake3::Hash> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::io("failed to open file for hashing", path, e))?;
    let mut reader = std::io::BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut reader, &mut hasher)
        .map_err(|e| Error::io("failed to hash file", path, e))?;
    Ok(hasher.finalize())
}

/// Walk a staging directory and list every file with its relative path.
/// Paths use forward slashes so they can be compared with manifest entries.
pub fn staged_files(root: &Path) -> Result<Vec<StagedFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::io("failed to read directory entry", path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let relative_path = relative.to_string_lossy().replace('\\', "/");
        let size = entry
            .metadata()
            .map_err(|e| Error::io("failed to read metadata", entry.path(), e.into()))?
            .len();

        files.push(StagedFile {
            relative_path,
            size,
        });
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_local_normalizes() {
        assert_eq!(clean_local("data/file1").unwrap(), "data/file1");
        assert_eq!(clean_local("./data//file1").unwrap(), "data/file1");
        assert_eq!(clean_local("data/../res/x.fdb").unwrap(), "res/x.fdb");
        assert_eq!(clean_local("res\\textures\\a.dds").unwrap(), "res/textures/a.dds");
    }

    #[test]
    fn test_clean_local_rejects_escapes() {
        for path in ["", ".", "..", "../x", "a/../../x", "/etc/passwd", "\\server\\share"] {
            assert!(
                matches!(clean_local(path), Err(Error::NonlocalPath(_))),
                "{path:?} should be rejected"
            );
        }
    }

    #[test]
    #[cfg(windows)]
    fn test_clean_local_rejects_drive_prefixes() {
        for path in ["C:/Windows", "c:x", "d:\\games"] {
            assert!(matches!(clean_local(path), Err(Error::NonlocalPath(_))));
        }
    }

    #[test]
    #[cfg(not(windows))]
    fn test_clean_local_keeps_colon_names() {
        assert_eq!(clean_local("a:b.txt").unwrap(), "a:b.txt");
        assert_eq!(clean_local("res/c:x").unwrap(), "res/c:x");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("client/res/cdclient.fdb"), "cdclient.fdb");
        assert_eq!(base_name("boot.cfg"), "boot.cfg");
        assert_eq!(base_name("dir/"), "dir");
    }

    #[test]
    fn test_with_mapped_handles_empty_and_full() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        let full = dir.path().join("full");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"content").unwrap();
        assert_eq!(with_mapped(&empty, |bytes| bytes.len()).unwrap(), 0);
        assert_eq!(with_mapped(&full, blake3::hash).unwrap(), blake3::hash(b"content"));
        assert_eq!(hash_file(&full).unwrap(), blake3::hash(b"content"));

        // The mapping is gone once the closure returns.
        std::fs::write(&full, b"rewritten").unwrap();
        assert!(matches!(
            with_mapped(&dir.path().join("missing"), |_| ()),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_staged_files_lists_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"12").unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), b"1").unwrap();

        let files = staged_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "sub/a.txt"]);
        assert_eq!(files[0].size, 2);
    }
}
