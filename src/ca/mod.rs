//! Two-tier certificate authority
//!
//! [`CertificateAuthority`] ties the pieces together: it issues trust
//! anchors under the root CA, endpoint certificates under an anchor, revokes
//! either, and regenerates CRLs.

pub mod crl;
pub mod endpoint;
pub mod issuance;
pub mod revocation;
pub mod serial;
pub mod trust_anchor;

pub use crl::{CrlError, CrlPublication, PublishStatus};
pub use issuance::Stage;
pub use revocation::{RevocationReport, TreeDisposition};
pub use serial::{SerialCounter, SerialError, SerialLease, SerialNumber};

use crate::engine::{Engine, OpenSslEngine};
use crate::error::Result;
use crate::lifecycle::DirectoryManager;
use crate::settings::CaSettings;
use crate::store::{ArtifactStore, LocalArtifactStore};
use crate::template::StubRepository;
use crate::types::{Authority, CertificateRef, CertificateRequest, IssuanceResult, TrustAnchor};

pub struct CertificateAuthority<E: Engine = OpenSslEngine> {
    settings: CaSettings,
    engine: E,
    stubs: StubRepository,
    directories: DirectoryManager,
    store: Option<Box<dyn ArtifactStore>>,
}

impl CertificateAuthority<OpenSslEngine> {
    /// Authority driving the `openssl` binary named in `settings`.
    ///
    /// A local artifact store is attached when CRL publishing is on and a
    /// store directory is configured.
    pub fn from_settings(settings: CaSettings) -> Result<Self> {
        let engine = OpenSslEngine::new(&settings.openssl_bin, settings.engine_timeout());
        let store = match (&settings.store_dir, settings.publish_crl) {
            (Some(dir), true) => Some(LocalArtifactStore::new(dir, settings.store_url_prefix.clone())),
            _ => None,
        };
        let ca = Self::new(settings, engine)?;
        Ok(match store {
            Some(store) => ca.with_artifact_store(store),
            None => ca,
        })
    }
}

impl<E: Engine> CertificateAuthority<E> {
    pub fn new(settings: CaSettings, engine: E) -> Result<Self> {
        settings.validate()?;
        let revoked_dir = settings.retain_revoked.then(|| settings.revoked_dir.clone());
        Ok(Self {
            stubs: StubRepository::new(&settings.conf_dir),
            directories: DirectoryManager::new(revoked_dir),
            settings,
            engine,
            store: None,
        })
    }

    pub fn with_artifact_store(mut self, store: impl ArtifactStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn settings(&self) -> &CaSettings {
        &self.settings
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Issue a trust anchor signed by the root CA.
    pub fn create_trust_anchor(&self, request: &CertificateRequest) -> Result<IssuanceResult> {
        request.validate()?;
        log::info!("creating trust anchor {} for {}", request.dns(), request.user);
        let plan = trust_anchor::plan(&self.settings, &self.stubs, request)?;
        issuance::run(&self.engine, &self.directories, plan)
    }

    /// Issue an endpoint certificate signed by `anchor`.
    pub fn create_endpoint_certificate(
        &self,
        request: &CertificateRequest,
        anchor: &TrustAnchor,
    ) -> Result<IssuanceResult> {
        request.validate()?;
        log::info!("creating endpoint {} under {}", request.dns(), anchor.dns);
        let plan = endpoint::plan(&self.settings, &self.stubs, request, anchor)?;
        issuance::run(&self.engine, &self.directories, plan)
    }

    /// Revoke a certificate and tear down its completed directory.
    pub fn revoke(&self, cert: &CertificateRef) -> Result<RevocationReport> {
        revocation::revoke(&self.engine, &self.settings, &self.directories, cert)
    }

    /// Regenerate and publish the CRL of `authority`.
    pub fn build_crl(&self, authority: &Authority) -> Result<CrlPublication> {
        crl::build(&self.engine, &self.settings, self.store.as_deref(), authority)
    }
}
