//! Content-addressed image cache (C3).
//!
//! Grounded on the teacher's `storage` module (atomic temp-file-then-rename
//! discipline, `posix_fallocate`/`cfg(unix)` idiom) for the commit-after-flush
//! posture, and `checksum::sha256_path` for the digest helper. The directory
//! permission handling (`0750`/`0600`, absent from the teacher) is added per
//! `spec.md` §3/§4.3 using `std::os::unix::fs::PermissionsExt`, the same
//! `cfg(unix)` pattern the teacher already uses for `posix_fallocate`.

pub mod checksum;

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::CacheError;

const SIDECAR_SUFFIX: &str = ".sha256";

/// A located cache entry (`spec.md` §4.3 `lookup`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
    pub checksum: String,
}

/// Content-addressed store of image files rooted at a single directory.
#[derive(Debug, Clone)]
pub struct ImageCache {
    root: PathBuf,
}

impl ImageCache {
    /// Open the cache at `root`, creating it with `0750` permissions if it
    /// doesn't exist.
    pub fn open(root: PathBuf) -> Result<Self, CacheError> {
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|source| CacheError::Io {
                path: root.display().to_string(),
                source,
            })?;
        }
        set_dir_permissions(&root)?;
        Ok(ImageCache { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<token>`. Ensures the root exists; does not create the file.
    pub fn allocate_path(&self, token: &str) -> Result<PathBuf, CacheError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|source| CacheError::Io {
                path: self.root.display().to_string(),
                source,
            })?;
            set_dir_permissions(&self.root)?;
        }
        Ok(self.root.join(token))
    }

    /// Locate `<root>/<checksum>.sha256`. A sidecar whose image partner is
    /// missing is an orphan: treated as a miss, never an error.
    pub fn lookup(&self, checksum: &str) -> Result<Option<CacheEntry>, CacheError> {
        let sidecar_path = self.root.join(format!("{checksum}{SIDECAR_SUFFIX}"));
        if !sidecar_path.exists() {
            return Ok(None);
        }
        let image_path = self.root.join(checksum);
        match fs::metadata(&image_path) {
            Ok(meta) => Ok(Some(CacheEntry {
                path: image_path,
                size: meta.len(),
                checksum: checksum.to_string(),
            })),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(checksum, "orphan sidecar with no image file, treating as miss");
                Ok(None)
            }
            Err(source) => Err(CacheError::Io {
                path: image_path.display().to_string(),
                source,
            }),
        }
    }

    /// Write the sidecar for a fully materialized `path`. Must be called
    /// only after `path`'s contents are fsync-durable; the sidecar's
    /// existence is the commit marker (`spec.md` §3).
    pub fn commit(&self, path: &Path, checksum: &str) -> Result<(), CacheError> {
        if !checksum::is_valid_checksum(checksum) {
            return Err(CacheError::InvalidChecksumFormat);
        }
        let sidecar_path = sidecar_for(path);
        fs::write(&sidecar_path, checksum).map_err(|source| CacheError::Io {
            path: sidecar_path.display().to_string(),
            source,
        })?;
        set_file_permissions(&sidecar_path)?;
        set_file_permissions(path)?;
        Ok(())
    }

    /// Best-effort delete of both the file and its sidecar. Missing files
    /// are not errors.
    pub fn remove(&self, path: &Path) {
        let sidecar_path = sidecar_for(path);
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove cache image");
            }
        }
        if let Err(e) = fs::remove_file(&sidecar_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %sidecar_path.display(), error = %e, "failed to remove cache sidecar");
            }
        }
    }

    /// SHA-256 of a file known to live inside this cache's root.
    pub fn checksum_of(&self, path: &Path) -> Result<String, CacheError> {
        checksum::sha256_within_root(&self.root, path)
    }
}

fn sidecar_for(image_path: &Path) -> PathBuf {
    let mut os = image_path.as_os_str().to_owned();
    os.push(SIDECAR_SUFFIX);
    PathBuf::from(os)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CacheError> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o750)).map_err(|source| CacheError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CacheError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CacheError> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| CacheError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CacheError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, contents: &[u8]) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(contents).unwrap();
    }

    #[test]
    fn allocate_path_creates_root_and_joins_token() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested/cache");
        let cache = ImageCache::open(root.clone()).unwrap();
        let p = cache.allocate_path("ubuntu").unwrap();
        assert_eq!(p, root.join("ubuntu"));
        assert!(root.is_dir());
    }

    #[test]
    fn lookup_miss_when_sidecar_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::open(dir.path().to_path_buf()).unwrap();
        assert!(cache.lookup(&"a".repeat(64)).unwrap().is_none());
    }

    #[test]
    fn lookup_orphan_sidecar_is_a_miss_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::open(dir.path().to_path_buf()).unwrap();
        let checksum = "b".repeat(64);
        write_file(&dir.path().join(format!("{checksum}.sha256")), checksum.as_bytes());
        assert!(cache.lookup(&checksum).unwrap().is_none());
    }

    #[test]
    fn commit_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::open(dir.path().to_path_buf()).unwrap();
        let checksum = "c".repeat(64);
        let image_path = dir.path().join(&checksum);
        write_file(&image_path, b"image bytes");
        cache.commit(&image_path, &checksum).unwrap();

        let entry = cache.lookup(&checksum).unwrap().unwrap();
        assert_eq!(entry.path, image_path);
        assert_eq!(entry.size, 11);
        assert_eq!(entry.checksum, checksum);
    }

    #[test]
    fn commit_rejects_malformed_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::open(dir.path().to_path_buf()).unwrap();
        let image_path = dir.path().join("img");
        write_file(&image_path, b"x");
        let err = cache.commit(&image_path, "too-short").unwrap_err();
        assert!(matches!(err, CacheError::InvalidChecksumFormat));
    }

    #[test]
    fn remove_is_best_effort_on_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::open(dir.path().to_path_buf()).unwrap();
        cache.remove(&dir.path().join("nonexistent"));
    }

    #[test]
    fn remove_deletes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::open(dir.path().to_path_buf()).unwrap();
        let checksum = "d".repeat(64);
        let image_path = dir.path().join(&checksum);
        write_file(&image_path, b"data");
        cache.commit(&image_path, &checksum).unwrap();

        cache.remove(&image_path);
        assert!(!image_path.exists());
        assert!(!dir.path().join(format!("{checksum}.sha256")).exists());
    }

    #[cfg(unix)]
    #[test]
    fn directory_permissions_are_restricted() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let cache = ImageCache::open(root.clone()).unwrap();
        let mode = fs::metadata(cache.root()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }
}
