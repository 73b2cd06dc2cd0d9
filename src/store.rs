//! Artifact store used to publish CRLs

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid store key {0:?}")]
    InvalidKey(String),

    #[error("store returned no URL for {0}")]
    NoUrl(String),
}

/// Destination for published artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Upload `file` as `key` in `bucket` and return its URL.
    fn put(&self, key: &str, file: &Path, bucket: &str, public: bool) -> Result<String, StoreError>;
}

/// Store backed by a local directory tree.
///
/// Objects land at `{root}/{bucket}/{key}` and are addressed as
/// `{url_prefix}/{bucket}/{key}`.
#[derive(Clone, Debug)]
pub struct LocalArtifactStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let valid = |part: &str| {
            !part.is_empty() && part.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
        };
        if !valid(bucket) || bucket.contains('/') {
            return Err(StoreError::InvalidKey(bucket.to_string()));
        }
        if !valid(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put(&self, key: &str, file: &Path, bucket: &str, public: bool) -> Result<String, StoreError> {
        let dest = self.object_path(bucket, key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::copy(file, &dest).map_err(|source| StoreError::Io {
            path: file.to_path_buf(),
            source,
        })?;
        log::debug!("stored {} (public: {})", dest.display(), public);
        Ok(format!("{}/{}/{}", self.url_prefix, bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_copies_and_returns_url() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("ca.crl");
        fs::write(&src, "crl").unwrap();
        let store = LocalArtifactStore::new(dir.path().join("store"), "https://pki.example.com/files/");

        let url = store.put("crl/ca.crl", &src, "public-crl", true).unwrap();
        assert_eq!(url, "https://pki.example.com/files/public-crl/crl/ca.crl");
        assert_eq!(
            fs::read_to_string(dir.path().join("store/public-crl/crl/ca.crl")).unwrap(),
            "crl"
        );
    }

    #[test]
    fn test_rejects_traversal_keys() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path(), "http://x");
        for key in ["../escape", "crl//a", ""] {
            assert!(matches!(
                store.put(key, dir.path(), "b", true),
                Err(StoreError::InvalidKey(_))
            ));
        }
    }
}
