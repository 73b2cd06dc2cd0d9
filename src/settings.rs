//! CA settings
//!
//! Loaded from a JSON file. Every field has a default rooted at `/opt/ca`,
//! so a settings file only needs the values that differ.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Overrides `private_password` when set.
pub const PASSPHRASE_ENV: &str = "ANCHOR_PKI_PASSPHRASE";

/// RSA sizes the request builder accepts.
pub const SUPPORTED_KEY_SIZES: [u32; 3] = [2048, 3072, 4096];

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaSettings {
    /// Directory holding the config stubs
    pub conf_dir: PathBuf,
    /// Staging area for issuances in flight
    pub inprocess_dir: PathBuf,
    /// Root of the completed hierarchy
    pub completed_dir: PathBuf,

    // Root CA database
    pub ca_main_conf: PathBuf,
    pub ca_serial_file: PathBuf,
    pub ca_signed_dir: PathBuf,

    pub crl_dir: PathBuf,
    pub crl_filename: String,
    pub crl_bucket: String,

    /// Passphrase of the root CA key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_password: Option<Zeroizing<String>>,

    pub openssl_bin: PathBuf,
    pub engine_timeout_secs: u64,

    pub publish_crl: bool,
    pub store_dir: Option<PathBuf>,
    pub store_url_prefix: String,

    /// Move revoked trees to `revoked_dir` instead of deleting them
    pub retain_revoked: bool,
    pub revoked_dir: PathBuf,

    pub default_anchor_key_size: u32,
    pub default_endpoint_key_size: u32,
    pub default_validity_days: u32,
}

impl Default for CaSettings {
    fn default() -> Self {
        Self::rooted_at("/opt/ca")
    }
}

impl CaSettings {
    /// Standard layout under `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            conf_dir: root.join("conf"),
            inprocess_dir: root.join("inprocess"),
            completed_dir: root.join("completed"),
            ca_main_conf: root.join("conf").join("openssl.cnf"),
            ca_serial_file: root.join("serial"),
            ca_signed_dir: root.join("newcerts"),
            crl_dir: root.join("crl"),
            crl_filename: "ca.crl".to_string(),
            crl_bucket: "crl".to_string(),
            private_password: None,
            openssl_bin: PathBuf::from("openssl"),
            engine_timeout_secs: 120,
            publish_crl: false,
            store_dir: Some(root.join("published")),
            store_url_prefix: format!("file://{}", root.join("published").display()),
            retain_revoked: false,
            revoked_dir: root.join("revoked"),
            default_anchor_key_size: 2048,
            default_endpoint_key_size: 4096,
            default_validity_days: 365,
        }
    }

    /// Load from a JSON file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Self = serde_json::from_slice(&data).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let write = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        let data = serde_json::to_vec_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, data).map_err(write)
    }

    pub fn apply_env(&mut self) {
        if let Ok(pass) = std::env::var(PASSPHRASE_ENV) {
            self.private_password = Some(Zeroizing::new(pass));
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, size) in [
            ("default_anchor_key_size", self.default_anchor_key_size),
            ("default_endpoint_key_size", self.default_endpoint_key_size),
        ] {
            if !SUPPORTED_KEY_SIZES.contains(&size) {
                return Err(SettingsError::Invalid {
                    field,
                    reason: format!("{size} is not one of {SUPPORTED_KEY_SIZES:?}"),
                });
            }
        }
        if self.default_validity_days == 0 {
            return Err(SettingsError::Invalid {
                field: "default_validity_days",
                reason: "must be positive".to_string(),
            });
        }
        if self.engine_timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                field: "engine_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.crl_filename.is_empty() || self.crl_filename.contains(['/', '\\']) {
            return Err(SettingsError::Invalid {
                field: "crl_filename",
                reason: format!("{:?} is not a plain file name", self.crl_filename),
            });
        }
        Ok(())
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.private_password.as_ref().map(|p| p.as_str())
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn crl_path(&self) -> PathBuf {
        self.crl_dir.join(&self.crl_filename)
    }

    /// Staging parent for one kind of issuance
    pub fn staging_root(&self, kind: &str) -> PathBuf {
        self.inprocess_dir.join(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "crl_bucket": "public-crl", "retain_revoked": true }"#).unwrap();

        let settings = CaSettings::load(&path).unwrap();
        assert_eq!(settings.crl_bucket, "public-crl");
        assert!(settings.retain_revoked);
        assert_eq!(settings.completed_dir, PathBuf::from("/opt/ca/completed"));
        assert_eq!(settings.default_endpoint_key_size, 4096);
    }

    #[test]
    fn test_save_then_load_rooted_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let settings = CaSettings::rooted_at(dir.path());
        settings.save(&path).unwrap();

        let loaded = CaSettings::load(&path).unwrap();
        assert_eq!(loaded.ca_serial_file, dir.path().join("serial"));
        assert_eq!(loaded.crl_path(), dir.path().join("crl").join("ca.crl"));
    }

    #[test]
    fn test_rejects_unsupported_key_size() {
        let mut settings = CaSettings::default();
        settings.default_anchor_key_size = 1024;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field: "default_anchor_key_size", .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(CaSettings::load(&path), Err(SettingsError::Parse { .. })));
    }
}
