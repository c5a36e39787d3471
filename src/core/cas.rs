//! Content-addressable store: write bytes, retrieve by SHA-256.
//!
//! Writes are idempotent; a blob whose hash already exists is not rewritten,
//! which also makes concurrent writers safe without coordination.

use crate::core::canon::sha256_hex;
use crate::core::error::{MeshError, MeshResult};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Cas {
    dir: PathBuf,
}

impl Cas {
    pub fn open<P: AsRef<Path>>(dir: P) -> MeshResult<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn blob_path(&self, sha: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", sha))
    }

    /// Store bytes, returning their SHA-256 hex digest.
    pub fn put(&self, bytes: &[u8]) -> MeshResult<String> {
        let sha = sha256_hex(bytes);
        let path = self.blob_path(&sha);
        if !path.exists() {
            // Temp-then-rename so a crashed writer never leaves a partial
            // blob under the final name.
            let tmp = self.dir.join(format!("{}.partial", sha));
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(sha)
    }

    pub fn get(&self, sha: &str) -> MeshResult<Vec<u8>> {
        let path = self.blob_path(sha);
        if !path.exists() {
            return Err(MeshError::NotFound(format!("cas blob {}", sha)));
        }
        Ok(fs::read(path)?)
    }

    pub fn has(&self, sha: &str) -> bool {
        self.blob_path(sha).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let cas = Cas::open(tmp.path().join("cas")).unwrap();
        let sha = cas.put(b"capsule payload").unwrap();
        assert!(cas.has(&sha));
        assert_eq!(cas.get(&sha).unwrap(), b"capsule payload");
    }

    #[test]
    fn test_put_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cas = Cas::open(tmp.path().join("cas")).unwrap();
        let a = cas.put(b"same bytes").unwrap();
        let b = cas.put(b"same bytes").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let cas = Cas::open(tmp.path().join("cas")).unwrap();
        assert!(matches!(
            cas.get("deadbeef"),
            Err(crate::core::error::MeshError::NotFound(_))
        ));
    }
}
