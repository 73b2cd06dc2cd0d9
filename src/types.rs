//! Requests, results and certificate handles

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::SUPPORTED_KEY_SIZES;
use crate::x509::Subject;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("{field} {value:?} is not usable as a path component")]
    UnsafeName { field: &'static str, value: String },

    #[error("unsupported key size {0}, expected 2048, 3072 or 4096")]
    KeySize(u32),

    #[error("validity must be at least one day")]
    Validity,

    #[error("common name is empty")]
    CommonName,
}

/// Lifecycle state of a certificate.
///
/// Issuance ends in `Unverified` or `Failed`. `Good` and `Revoked` are set
/// by the approval workflow and by revocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertStatus {
    InProcess,
    Unverified,
    Failed,
    Good,
    Revoked,
}

impl CertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::Unverified => "unverified",
            Self::Failed => "failed",
            Self::Good => "good",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A certificate request. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub subject: Subject,
    pub key_size: u32,
    pub validity_days: u32,
    /// Owning user, first level of the completed hierarchy
    pub user: String,
}

impl CertificateRequest {
    pub fn new(subject: Subject, user: impl Into<String>, key_size: u32, validity_days: u32) -> Self {
        Self {
            subject,
            key_size,
            validity_days,
            user: user.into(),
        }
    }

    pub fn dns(&self) -> &str {
        &self.subject.dns
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        check_component("dns", &self.subject.dns)?;
        check_component("user", &self.user)?;
        if !SUPPORTED_KEY_SIZES.contains(&self.key_size) {
            return Err(RequestError::KeySize(self.key_size));
        }
        if self.validity_days == 0 {
            return Err(RequestError::Validity);
        }
        if self.subject.common_name.trim().is_empty() {
            return Err(RequestError::CommonName);
        }
        Ok(())
    }
}

/// `value` must name exactly one directory entry.
pub(crate) fn check_component(field: &'static str, value: &str) -> Result<(), RequestError> {
    let unsafe_name = value.is_empty()
        || value == "."
        || value == ".."
        || value.starts_with('.')
        || value.contains(['/', '\\', '\0', '\n', '\r']);
    if unsafe_name {
        return Err(RequestError::UnsafeName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Outcome of one issuance attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceResult {
    pub status: CertStatus,
    pub dns: String,
    /// Serial assigned by the engine
    pub serial_number: Option<String>,
    /// 40 lowercase hex characters
    pub sha1_fingerprint: Option<String>,
    /// 64 lowercase hex characters over the DER encoding
    pub sha256_digest: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub public_key_path: Option<PathBuf>,
    pub completed_dir: Option<PathBuf>,
    pub archive_name: Option<String>,
    /// Engine output on failure
    pub notes: String,
}

impl IssuanceResult {
    pub(crate) fn in_process(dns: &str) -> Self {
        Self {
            status: CertStatus::InProcess,
            dns: dns.to_string(),
            serial_number: None,
            sha1_fingerprint: None,
            sha256_digest: None,
            private_key_path: None,
            public_key_path: None,
            completed_dir: None,
            archive_name: None,
            notes: String::new(),
        }
    }

    pub(crate) fn fail(mut self, notes: impl Into<String>) -> Self {
        self.status = CertStatus::Failed;
        self.notes = notes.into();
        self.completed_dir = None;
        self.archive_name = None;
        self
    }

    pub fn is_unverified(&self) -> bool {
        self.status == CertStatus::Unverified
    }
}

/// A completed trust anchor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    pub dns: String,
    pub completed_dir: PathBuf,
    pub result: IssuanceResult,
}

impl TrustAnchor {
    /// Wrap a result that completed. `None` for failed issuances.
    pub fn from_result(result: IssuanceResult) -> Option<Self> {
        let completed_dir = result.completed_dir.clone()?;
        (result.status == CertStatus::Unverified || result.status == CertStatus::Good).then(|| Self {
            dns: result.dns.clone(),
            completed_dir,
            result,
        })
    }

    /// Handle to an anchor already on disk.
    pub fn at(dns: impl Into<String>, completed_dir: impl Into<PathBuf>) -> Self {
        let dns = dns.into();
        let completed_dir = completed_dir.into();
        let mut result = IssuanceResult::in_process(&dns);
        result.status = CertStatus::Unverified;
        result.completed_dir = Some(completed_dir.clone());
        Self {
            dns,
            completed_dir,
            result,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        self.result.serial_number.as_deref()
    }

    pub fn certificate_ref(&self) -> CertificateRef {
        CertificateRef::Anchor {
            dns: self.dns.clone(),
            completed_dir: self.completed_dir.clone(),
            serial: self.result.serial_number.clone(),
        }
    }
}

/// A completed endpoint certificate. `anchor_dir` refers to the issuing
/// anchor and does not own it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCertificate {
    pub dns: String,
    pub completed_dir: PathBuf,
    pub anchor_dir: PathBuf,
    pub result: IssuanceResult,
}

impl EndpointCertificate {
    pub fn from_result(result: IssuanceResult, anchor: &TrustAnchor) -> Option<Self> {
        let completed_dir = result.completed_dir.clone()?;
        (result.status == CertStatus::Unverified || result.status == CertStatus::Good).then(|| Self {
            dns: result.dns.clone(),
            completed_dir,
            anchor_dir: anchor.completed_dir.clone(),
            result,
        })
    }

    pub fn certificate_ref(&self) -> CertificateRef {
        CertificateRef::Endpoint {
            dns: self.dns.clone(),
            completed_dir: self.completed_dir.clone(),
            anchor_dir: self.anchor_dir.clone(),
            serial: self.result.serial_number.clone(),
        }
    }
}

/// What to revoke.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateRef {
    Anchor {
        dns: String,
        completed_dir: PathBuf,
        serial: Option<String>,
    },
    Endpoint {
        dns: String,
        completed_dir: PathBuf,
        anchor_dir: PathBuf,
        serial: Option<String>,
    },
}

impl CertificateRef {
    pub fn dns(&self) -> &str {
        match self {
            Self::Anchor { dns, .. } | Self::Endpoint { dns, .. } => dns,
        }
    }

    pub fn completed_dir(&self) -> &Path {
        match self {
            Self::Anchor { completed_dir, .. } | Self::Endpoint { completed_dir, .. } => completed_dir,
        }
    }

    pub fn serial(&self) -> Option<&str> {
        match self {
            Self::Anchor { serial, .. } | Self::Endpoint { serial, .. } => serial.as_deref(),
        }
    }
}

/// Issuer of a CRL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authority {
    Root,
    Anchor(TrustAnchor),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dns: &str) -> CertificateRequest {
        CertificateRequest::new(Subject::new("Example", dns), "alice", 2048, 365)
    }

    #[test]
    fn test_validate_accepts_plain_request() {
        assert_eq!(request("example.com").validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_traversal() {
        for dns in ["", ".", "..", "../etc", "a/b", ".hidden", "a\\b"] {
            assert!(
                matches!(request(dns).validate(), Err(RequestError::UnsafeName { field: "dns", .. })),
                "{dns:?}"
            );
        }
    }

    #[test]
    fn test_validate_key_size_and_validity() {
        let mut req = request("example.com");
        req.key_size = 1024;
        assert_eq!(req.validate(), Err(RequestError::KeySize(1024)));
        req.key_size = 4096;
        req.validity_days = 0;
        assert_eq!(req.validate(), Err(RequestError::Validity));
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&CertStatus::InProcess).unwrap(), "\"in-process\"");
        assert_eq!(CertStatus::Unverified.to_string(), "unverified");
    }

    #[test]
    fn test_failed_result_is_not_an_anchor() {
        let result = IssuanceResult::in_process("example.com").fail("engine exited with status 1");
        assert!(TrustAnchor::from_result(result).is_none());
    }
}
