//! Issuance state machine
//!
//! ```text
//! Requested -> ConfigBuilt -> Signed -> Extracted -> Promoted -> Packaged (unverified)
//!                                 \           \           \          \
//!                                  +-----------+-----------+----------+--> Failed
//! ```
//!
//! Anchors and endpoints share this pipeline. What differs between them
//! (stub, counter, passphrase, extra artifacts, archive contents) is carried
//! in an [`IssuancePlan`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::serial::SerialCounter;
use crate::archive;
use crate::engine::{Engine, EngineOutcome, SignJob};
use crate::error::Error;
use crate::layout::{ArtifactNames, INDEX_FILE, NEWCERTS_DIR, SERIAL_FILE};
use crate::lifecycle::{DirectoryManager, LifecycleError};
use crate::template::{ConfigTemplate, TokenMap};
use crate::types::{CertStatus, CertificateRequest, IssuanceResult};
use crate::x509::extract_artifacts;

/// Serial an anchor's own database starts at
pub const FIRST_ANCHOR_SERIAL: &str = "01";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Requested,
    ConfigBuilt,
    Signed,
    Extracted,
    Promoted,
    Packaged,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::ConfigBuilt => "config built",
            Self::Signed => "signed",
            Self::Extracted => "extracted",
            Self::Promoted => "promoted",
            Self::Packaged => "packaged",
        };
        f.write_str(name)
    }
}

/// Artifacts that only one kind of certificate produces.
pub(crate) enum Deliverables {
    /// Seeds its own CA database and renders its CRL config
    Anchor {
        crl_template: ConfigTemplate,
        crl_tokens: TokenMap,
    },
    /// Adds a PKCS12 bundle and ships the private key
    Endpoint,
}

pub(crate) struct IssuancePlan<'a> {
    pub request: &'a CertificateRequest,
    pub template: ConfigTemplate,
    /// Everything except `SERIAL`, which is filled in after allocation
    pub tokens: TokenMap,
    pub config_name: String,
    pub counter: SerialCounter,
    pub passphrase: Option<&'a str>,
    pub staging_root: PathBuf,
    pub completed_parent: PathBuf,
    pub deliverables: Deliverables,
}

/// Why an issuance stopped early.
enum Halt {
    /// Ends the issuance as `failed` with these notes
    Failed(String),
    /// Returned to the caller
    Fatal(Error),
}

fn fatal(e: impl Into<Error>) -> Halt {
    Halt::Fatal(e.into())
}

fn failed(notes: impl Into<String>) -> Halt {
    Halt::Failed(notes.into())
}

fn check(step: &str, outcome: EngineOutcome) -> Result<(), Halt> {
    match outcome.failure_notes() {
        None => Ok(()),
        Some(notes) => {
            log::warn!("{step} failed: {}", outcome.output.combined().trim());
            Err(failed(notes))
        }
    }
}

/// Run one issuance to completion.
///
/// Engine, extraction, promotion and packaging failures end in a `failed`
/// result. Allocation, template and request errors are returned as `Err`.
pub(crate) fn run<E: Engine + ?Sized>(
    engine: &E,
    directories: &DirectoryManager,
    plan: IssuancePlan<'_>,
) -> Result<IssuanceResult, Error> {
    plan.request.validate()?;
    let dns = plan.request.dns().to_string();
    let mut result = IssuanceResult::in_process(&dns);

    match execute(engine, directories, &plan, &mut result) {
        Ok(()) => Ok(result),
        Err(Halt::Failed(notes)) => {
            log::warn!("{dns}: issuance failed");
            Ok(result.fail(notes))
        }
        Err(Halt::Fatal(e)) => Err(e),
    }
}

fn advance(dns: &str, stage: Stage) {
    log::info!("{dns}: {stage}");
}

fn execute<E: Engine + ?Sized>(
    engine: &E,
    directories: &DirectoryManager,
    plan: &IssuancePlan<'_>,
    result: &mut IssuanceResult,
) -> Result<(), Halt> {
    let request = plan.request;
    let dns = request.dns();
    let names = ArtifactNames::new(dns);
    advance(dns, Stage::Requested);

    let staging = plan.staging_root.join(Uuid::new_v4().to_string());
    fs::create_dir_all(&staging)
        .map_err(|e| failed(format!("could not create staging {}: {e}", staging.display())))?;

    let key = staging.join(names.private_key());
    let csr = staging.join(names.csr());
    let certificate = staging.join(names.certificate());

    let outcome = engine
        .new_request(&request.subject.to_dn(), request.key_size, &key, &csr)
        .map_err(|e| failed(e.to_string()))?;
    check("key generation", outcome)?;

    // The lease keeps the CA locked until the engine has updated its database.
    let lease = plan.counter.allocate().map_err(fatal)?;
    let mut tokens = plan.tokens.clone();
    tokens.set("SERIAL", lease.serial().as_str());
    let config = staging.join(&plan.config_name);
    plan.template.render_to(&tokens, &config).map_err(fatal)?;
    advance(dns, Stage::ConfigBuilt);

    let job = SignJob {
        config: &config,
        csr: &csr,
        certificate_out: &certificate,
        passphrase: plan.passphrase,
    };
    let outcome = engine.sign(&job).map_err(|e| failed(e.to_string()))?;
    check("signing", outcome)?;
    if !certificate.is_file() {
        return Err(failed("engine reported success but wrote no certificate"));
    }
    lease.commit().map_err(fatal)?;
    advance(dns, Stage::Signed);

    let der = staging.join(names.certificate_der());
    let artifacts = extract_artifacts(engine, &certificate, &der).map_err(|e| {
        log::warn!("{dns}: extraction failed: {e}");
        failed(e.raw_output().map(str::to_string).unwrap_or_else(|| e.to_string()))
    })?;
    result.serial_number = Some(artifacts.serial);
    result.sha1_fingerprint = Some(artifacts.sha1_fingerprint);
    result.sha256_digest = Some(artifacts.sha256_digest);

    let outcome = engine
        .export_pkcs8(&key, &staging.join(names.private_key_der()))
        .map_err(|e| failed(e.to_string()))?;
    check("pkcs8 export", outcome)?;
    advance(dns, Stage::Extracted);

    let archive_name = match &plan.deliverables {
        Deliverables::Anchor {
            crl_template,
            crl_tokens,
        } => {
            seed_database(&staging).map_err(|e| failed(format!("could not seed CA database: {e}")))?;
            crl_template
                .render_to(crl_tokens, &staging.join(names.crl_config()))
                .map_err(fatal)?;
            names.anchor_archive()
        }
        Deliverables::Endpoint => {
            let outcome = engine
                .export_pkcs12(&key, &certificate, &staging.join(names.pkcs12()))
                .map_err(|e| failed(e.to_string()))?;
            check("pkcs12 export", outcome)?;
            names.endpoint_archive(Uuid::new_v4())
        }
    };

    // The archive is built inside the incoming copy, so a packaging failure
    // never replaces a previously issued directory.
    let files = archive_contents(&names, &plan.deliverables);
    let completed = directories
        .promote(&staging, &plan.completed_parent, dns, |incoming| {
            archive::package(incoming, &archive_name, &files)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .map_err(|e| match e {
            LifecycleError::Finish(reason) => failed(format!("packaging failed: {reason}")),
            other => failed(format!("promotion failed: {other}")),
        })?;
    advance(dns, Stage::Promoted);
    advance(dns, Stage::Packaged);

    if let Err(e) = fs::remove_dir_all(&staging) {
        log::warn!("could not clean staging {}: {}", staging.display(), e);
    }

    result.status = CertStatus::Unverified;
    result.private_key_path = Some(completed.join(names.private_key()));
    result.public_key_path = Some(completed.join(names.certificate()));
    result.archive_name = Some(archive_name);
    result.completed_dir = Some(completed);
    result.notes.clear();
    Ok(())
}

/// Tokens every stub takes from the request.
pub(crate) fn request_tokens(request: &CertificateRequest) -> TokenMap {
    let subject = &request.subject;
    TokenMap::new()
        .with("DNS", subject.dns.as_str())
        .with("DAYS", request.validity_days.to_string())
        .with("COUNTRY", subject.country.as_str())
        .with("STATE", subject.state.as_str())
        .with("CITY", subject.city.as_str())
        .with("COMMON_NAME", subject.common_name.as_str())
        .with("ORGANIZATION", subject.organization.as_str())
        .with("EMAIL_ADDRESS", subject.email.as_str())
}

fn archive_contents(names: &ArtifactNames, deliverables: &Deliverables) -> Vec<String> {
    let mut files = vec![names.certificate(), names.certificate_der()];
    if let Deliverables::Endpoint = deliverables {
        files.extend([names.private_key(), names.private_key_der(), names.pkcs12()]);
    }
    files
}

/// Empty index, serial counter at 01 and a newcerts directory.
fn seed_database(dir: &Path) -> std::io::Result<()> {
    fs::write(dir.join(INDEX_FILE), "")?;
    fs::write(dir.join(SERIAL_FILE), format!("{FIRST_ANCHOR_SERIAL}\n"))?;
    fs::create_dir_all(dir.join(NEWCERTS_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_archive_ships_key_material() {
        let names = ArtifactNames::new("www.example.com");
        let files = archive_contents(&names, &Deliverables::Endpoint);
        assert_eq!(
            files,
            vec![
                "www.example.com.pem",
                "www.example.com.der",
                "www.example.comKey.key",
                "www.example.comKey.der",
                "www.example.com.p12",
            ]
        );
    }

    #[test]
    fn test_anchor_archive_is_public_material_only() {
        let names = ArtifactNames::new("example.com");
        let deliverables = Deliverables::Anchor {
            crl_template: ConfigTemplate::parse(""),
            crl_tokens: TokenMap::new(),
        };
        assert_eq!(archive_contents(&names, &deliverables), vec!["example.com.pem", "example.com.der"]);
    }

    #[test]
    fn test_seed_database() {
        let dir = tempfile::TempDir::new().unwrap();
        seed_database(dir.path()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("index")).unwrap(), "");
        assert_eq!(fs::read_to_string(dir.path().join("serial")).unwrap(), "01\n");
        assert!(dir.path().join("newcerts").is_dir());
    }
}
