//! Artifact names and directory layout
//!
//! ```text
//! {completed}/{user}/anchors/{dns}/
//!     {dns}Key.key {dns}Key.der {dns}.pem {dns}.der {dns}.csr
//!     {dns}trust-anchor-stub.cnf {dns}-crl-stub.cnf
//!     index serial newcerts/
//!     {dns}-ANCHOR.zip
//! {anchor}/endpoints/{dns}/
//!     {dns}Key.key {dns}Key.der {dns}.pem {dns}.der {dns}.p12 {dns}.csr
//!     {dns}domain-bound-stub.cnf
//!     {uuid}-{dns}-ENDPOINT.zip
//! ```

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

pub const ANCHORS_DIR: &str = "anchors";
pub const ENDPOINTS_DIR: &str = "endpoints";
pub const ANCHOR_STAGING: &str = "anchors";
pub const ENDPOINT_STAGING: &str = "domain-bound";

/// An anchor's own CA database
pub const INDEX_FILE: &str = "index";
pub const SERIAL_FILE: &str = "serial";
pub const NEWCERTS_DIR: &str = "newcerts";

/// File names of one certificate's artifacts, all derived from its DNS name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactNames {
    dns: String,
}

impl ArtifactNames {
    pub fn new(dns: impl Into<String>) -> Self {
        Self { dns: dns.into() }
    }

    pub fn dns(&self) -> &str {
        &self.dns
    }

    pub fn csr(&self) -> String {
        format!("{}.csr", self.dns)
    }

    pub fn private_key(&self) -> String {
        format!("{}Key.key", self.dns)
    }

    pub fn private_key_der(&self) -> String {
        format!("{}Key.der", self.dns)
    }

    pub fn certificate(&self) -> String {
        format!("{}.pem", self.dns)
    }

    pub fn certificate_der(&self) -> String {
        format!("{}.der", self.dns)
    }

    pub fn pkcs12(&self) -> String {
        format!("{}.p12", self.dns)
    }

    pub fn anchor_config(&self) -> String {
        format!("{}trust-anchor-stub.cnf", self.dns)
    }

    pub fn endpoint_config(&self) -> String {
        format!("{}domain-bound-stub.cnf", self.dns)
    }

    pub fn crl_config(&self) -> String {
        format!("{}-crl-stub.cnf", self.dns)
    }

    pub fn crl(&self) -> String {
        format!("{}.crl", self.dns)
    }

    pub fn anchor_archive(&self) -> String {
        format!("{}-ANCHOR.zip", self.dns)
    }

    /// Endpoint archives carry a fresh id since a DNS name may be reissued.
    pub fn endpoint_archive(&self, id: Uuid) -> String {
        format!("{}-{}-ENDPOINT.zip", id, self.dns)
    }
}

/// `{completed}/{user}/anchors`
pub fn anchors_parent(completed_root: &Path, user: &str) -> PathBuf {
    completed_root.join(user).join(ANCHORS_DIR)
}

/// `{anchor}/endpoints`
pub fn endpoints_parent(anchor_dir: &Path) -> PathBuf {
    anchor_dir.join(ENDPOINTS_DIR)
}

/// Whether `dir` is `{completed_root}/{user}/anchors/{name}` for some user.
pub fn is_anchor_dir(completed_root: &Path, dir: &Path) -> bool {
    let Ok(rest) = dir.strip_prefix(completed_root) else {
        return false;
    };
    let parts: Vec<Component<'_>> = rest.components().collect();
    matches!(
        parts.as_slice(),
        [Component::Normal(_), Component::Normal(anchors), Component::Normal(_)] if *anchors == ANCHORS_DIR
    )
}

/// Whether `dir` is an endpoint directory of the anchor at `anchor_dir`.
pub fn is_nested_endpoint(anchor_dir: &Path, dir: &Path) -> bool {
    dir.parent() == Some(endpoints_parent(anchor_dir).as_path())
        && matches!(dir.components().next_back(), Some(Component::Normal(_)))
}
