//! SHA-256 of a file inside the cache root, with path-traversal defense.
//!
//! Grounded on the teacher's `checksum::sha256_path` (chunked buffered read,
//! lowercase hex output); adds the canonicalize-then-`starts_with` guard
//! `spec.md` §9 calls for ("must not be usable as a general file-read
//! primitive by an attacker who controls a job record").

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::CacheError;

const BUF_SIZE: usize = 64 * 1024;

/// Canonicalize `path` and confirm it is a descendant of `root` (also
/// canonicalized). Returns the canonical path on success.
pub fn canonicalize_within_root(root: &Path, path: &Path) -> Result<PathBuf, CacheError> {
    let canon_root = root.canonicalize().map_err(|source| CacheError::Io {
        path: root.display().to_string(),
        source,
    })?;
    let canon_path = path.canonicalize().map_err(|source| CacheError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if !canon_path.starts_with(&canon_root) {
        return Err(CacheError::PathEscapesRoot(path.display().to_string()));
    }
    Ok(canon_path)
}

/// Compute the SHA-256 of a file known to live inside `root`, in lowercase
/// hex. Refuses to read anything that canonicalizes outside `root`.
pub fn sha256_within_root(root: &Path, path: &Path) -> Result<String, CacheError> {
    let canon = canonicalize_within_root(root, path)?;
    sha256_path(&canon)
}

fn sha256_path(path: &Path) -> Result<String, CacheError> {
    let mut f = File::open(path).map_err(|source| CacheError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f.read(&mut buf).map_err(|source| CacheError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Derive a filesystem-safe token from a URL's basename: non-alphanumerics
/// become underscores, the extension is stripped (`spec.md` §3).
pub fn sanitize_token(url: &str) -> String {
    let basename = url.rsplit('/').next().unwrap_or(url);
    let stem = match basename.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => basename,
    };
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// True iff `s` is exactly 64 lowercase hex characters.
pub fn is_valid_checksum(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sha256_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"hello\n").unwrap();
        drop(f);
        let digest = sha256_within_root(dir.path(), &path).unwrap();
        assert_eq!(digest, "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be0");
    }

    #[test]
    fn rejects_path_escaping_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let path = outside.path().join("evil");
        File::create(&path).unwrap();
        let err = sha256_within_root(root.path(), &path).unwrap_err();
        assert!(matches!(err, CacheError::PathEscapesRoot(_)));
    }

    #[test]
    fn sanitize_token_replaces_non_alphanumerics_and_strips_extension() {
        assert_eq!(sanitize_token("http://obj/b/ubuntu.qcow2"), "ubuntu");
        assert_eq!(sanitize_token("http://obj/b/my-image.v2.raw"), "my_image_v2");
        assert_eq!(sanitize_token("noext"), "noext");
    }

    #[test]
    fn checksum_validation() {
        assert!(is_valid_checksum(&"a".repeat(64)));
        assert!(!is_valid_checksum(&"a".repeat(63)));
        assert!(!is_valid_checksum(&"A".repeat(64)));
        assert!(!is_valid_checksum("not-hex-at-all-but-64-characters-long-for-the-test-case-here!!"));
    }
}
