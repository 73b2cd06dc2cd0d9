//! Certificate revocation
//!
//! The engine revoke is best effort: whatever it reports, the certificate's
//! completed directory is torn down afterwards. The engine's answer is kept
//! in the [`RevocationReport`].

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::serial::SerialCounter;
use crate::engine::{EngineOutput, SigningEngine};
use crate::error::{Error, Result};
use crate::layout::{is_anchor_dir, is_nested_endpoint, ArtifactNames, NEWCERTS_DIR, SERIAL_FILE};
use crate::lifecycle::{DirectoryManager, Disposition};
use crate::settings::CaSettings;
use crate::types::{check_component, CertificateRef};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreeDisposition {
    Deleted,
    Retained,
    /// The directory was already gone; the engine was not called
    Absent,
}

#[derive(Clone, Debug, Serialize)]
pub struct RevocationReport {
    pub dns: String,
    pub serial: Option<String>,
    /// Signed PEM handed to the engine
    pub certificate: Option<PathBuf>,
    /// Raw engine output
    pub engine_output: Option<EngineOutput>,
    /// Set when the engine did not confirm the revocation
    pub engine_error: Option<String>,
    pub disposition: TreeDisposition,
    pub retained_at: Option<PathBuf>,
}

impl RevocationReport {
    pub fn engine_confirmed(&self) -> bool {
        self.engine_output.is_some() && self.engine_error.is_none()
    }
}

struct RevokeTarget<'a> {
    config: PathBuf,
    signed_dir: PathBuf,
    counter: SerialCounter,
    passphrase: Option<&'a str>,
}

fn target<'a>(settings: &'a CaSettings, cert: &CertificateRef) -> RevokeTarget<'a> {
    match cert {
        CertificateRef::Anchor { .. } => RevokeTarget {
            config: settings.ca_main_conf.clone(),
            signed_dir: settings.ca_signed_dir.clone(),
            counter: SerialCounter::new(&settings.ca_serial_file),
            passphrase: settings.passphrase(),
        },
        // The endpoint's own config targets the issuing anchor's database.
        CertificateRef::Endpoint {
            dns,
            completed_dir,
            anchor_dir,
            ..
        } => RevokeTarget {
            config: completed_dir.join(ArtifactNames::new(dns.as_str()).endpoint_config()),
            signed_dir: anchor_dir.join(NEWCERTS_DIR),
            counter: SerialCounter::new(anchor_dir.join(SERIAL_FILE)),
            passphrase: None,
        },
    }
}

/// A reference may only name a directory this CA issued into: an anchor
/// at `{completed}/{user}/anchors/{dns}` or an endpoint nested under one.
fn check_managed(settings: &CaSettings, cert: &CertificateRef) -> Result<()> {
    check_component("dns", cert.dns())?;
    let completed = cert.completed_dir();
    let managed = completed.file_name().is_some_and(|name| name == cert.dns())
        && match cert {
            CertificateRef::Anchor { .. } => is_anchor_dir(&settings.completed_dir, completed),
            CertificateRef::Endpoint { anchor_dir, .. } => {
                is_anchor_dir(&settings.completed_dir, anchor_dir) && is_nested_endpoint(anchor_dir, completed)
            }
        };
    if !managed {
        return Err(Error::OutsideCompletedTree(completed.to_path_buf()));
    }
    Ok(())
}

/// Signed PEM by serial in the authority's newcerts, else the copy in the
/// completed directory.
fn locate_certificate(signed_dir: &Path, cert: &CertificateRef) -> Option<PathBuf> {
    let by_serial = cert
        .serial()
        .map(|serial| signed_dir.join(format!("{}.pem", serial.to_ascii_uppercase())))
        .filter(|path| path.is_file());
    by_serial.or_else(|| {
        let fallback = cert
            .completed_dir()
            .join(ArtifactNames::new(cert.dns()).certificate());
        fallback.is_file().then_some(fallback)
    })
}

pub(crate) fn revoke<E: SigningEngine + ?Sized>(
    engine: &E,
    settings: &CaSettings,
    directories: &DirectoryManager,
    cert: &CertificateRef,
) -> Result<RevocationReport> {
    let mut report = RevocationReport {
        dns: cert.dns().to_string(),
        serial: cert.serial().map(str::to_string),
        certificate: None,
        engine_output: None,
        engine_error: None,
        disposition: TreeDisposition::Absent,
        retained_at: None,
    };

    check_managed(settings, cert)?;
    let completed = cert.completed_dir();
    if !completed.exists() {
        log::info!("{}: already revoked", report.dns);
        return Ok(report);
    }

    let target = target(settings, cert);
    match locate_certificate(&target.signed_dir, cert) {
        Some(pem) => {
            // A lock failure is recorded like an engine failure; the tree
            // still comes down.
            match target.counter.exclusive() {
                Ok(_lock) => match engine.revoke(&target.config, &pem, target.passphrase) {
                    Ok(outcome) => {
                        if let Some(notes) = outcome.failure_notes() {
                            log::warn!("{}: engine revoke failed: {}", report.dns, notes.trim());
                            report.engine_error = Some(notes);
                        }
                        report.engine_output = Some(outcome.output);
                    }
                    Err(e) => {
                        log::warn!("{}: engine revoke failed: {}", report.dns, e);
                        report.engine_error = Some(e.to_string());
                    }
                },
                Err(e) => {
                    log::warn!("{}: could not lock the issuing database: {}", report.dns, e);
                    report.engine_error = Some(format!("could not lock the issuing database: {e}"));
                }
            }
            report.certificate = Some(pem);
        }
        None => {
            log::warn!("{}: no signed certificate found to revoke", report.dns);
            report.engine_error = Some("no signed certificate found".to_string());
        }
    }

    match directories.revoke(completed)? {
        Disposition::Deleted => report.disposition = TreeDisposition::Deleted,
        Disposition::Retained(path) => {
            report.disposition = TreeDisposition::Retained;
            report.retained_at = Some(path);
        }
        Disposition::Absent => report.disposition = TreeDisposition::Absent,
    }
    log::info!("{}: revoked", report.dns);
    Ok(report)
}
