//! Anchor PKI
//!
//! Issuance pipeline for a two-tier PKI: per-organization **trust anchors**
//! signed by a root CA, and **endpoint certificates** signed by an anchor.
//! Signing is delegated to an external X.509 engine (`openssl`); this crate
//! owns what surrounds it.
//!
//! # Components
//!
//! - **template**: `|TOKEN|` substitution over signing-config stubs
//! - **ca::serial**: locked, durable per-CA serial counters
//! - **engine**: the engine boundary, a process implementation and a test double
//! - **x509**: subject names, PEM/DER handling and artifact extraction
//! - **lifecycle**: atomic promotion into the completed hierarchy
//! - **archive**: deliverable zip archives
//! - **ca**: issuance, revocation and CRL publication
//!
//! # Example
//!
//! ```rust,no_run
//! use anchor_pki::{CaSettings, CertificateAuthority, CertificateRequest, Subject};
//!
//! let settings = CaSettings::load("/opt/ca/settings.json")?;
//! let ca = CertificateAuthority::from_settings(settings)?;
//!
//! let subject = Subject::new("Example Org", "example.com")
//!     .with_organization("Example")
//!     .with_locality("Gaithersburg", "MD", "US");
//! let result = ca.create_trust_anchor(&CertificateRequest::new(subject, "alice", 2048, 1095))?;
//! println!("{} {}", result.status, result.serial_number.unwrap_or_default());
//! # Ok::<(), anchor_pki::Error>(())
//! ```

#![deny(unsafe_code)]

pub mod archive;
pub mod ca;
pub mod engine;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod messages;
pub mod settings;
pub mod store;
pub mod template;
pub mod types;
pub mod x509;

pub use ca::{CertificateAuthority, CrlPublication, PublishStatus, RevocationReport};
pub use engine::{Engine, OpenSslEngine, ScriptedEngine, SigningEngine, CertificateTool};
pub use error::{Error, Result};
pub use settings::CaSettings;
pub use store::{ArtifactStore, LocalArtifactStore};
pub use types::{
    Authority, CertStatus, CertificateRef, CertificateRequest, EndpointCertificate, IssuanceResult, TrustAnchor,
};
pub use x509::Subject;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
