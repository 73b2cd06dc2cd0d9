//! Endpoint certificate issuance
//!
//! Endpoints are signed by a trust anchor against the anchor's own database.
//! The rendered config names the anchor's directory, key and certificate,
//! and the completed directory nests under `{anchor}/endpoints/`.

use super::issuance::{request_tokens, Deliverables, IssuancePlan};
use super::serial::SerialCounter;
use crate::error::{Error, Result};
use crate::layout::{endpoints_parent, ArtifactNames, ENDPOINT_STAGING, SERIAL_FILE};
use crate::settings::CaSettings;
use crate::template::{StubKind, StubRepository};
use crate::types::{CertificateRequest, TrustAnchor};

pub(crate) fn plan<'a>(
    settings: &'a CaSettings,
    stubs: &StubRepository,
    request: &'a CertificateRequest,
    anchor: &TrustAnchor,
) -> Result<IssuancePlan<'a>> {
    if !anchor.completed_dir.is_dir() {
        return Err(Error::AnchorMissing(anchor.completed_dir.clone()));
    }

    let names = ArtifactNames::new(request.dns());
    let anchor_names = ArtifactNames::new(&anchor.dns);
    let anchor_certificate = anchor
        .result
        .public_key_path
        .clone()
        .unwrap_or_else(|| anchor.completed_dir.join(anchor_names.certificate()));
    let anchor_key = anchor
        .result
        .private_key_path
        .clone()
        .unwrap_or_else(|| anchor.completed_dir.join(anchor_names.private_key()));

    let stub = if request.subject.is_email_bound() {
        StubKind::EmailBound
    } else {
        StubKind::DomainBound
    };
    let template = stubs.load(stub)?;

    let tokens = request_tokens(request)
        .with("ANCHORDNS", anchor.dns.as_str())
        .with("COMPLETED_ANCHOR_DIR", anchor.completed_dir.to_string_lossy())
        .with("CERTIFICATE", anchor_certificate.to_string_lossy())
        .with("PRIVATE_KEY", anchor_key.to_string_lossy());

    Ok(IssuancePlan {
        request,
        template,
        tokens,
        config_name: names.endpoint_config(),
        counter: SerialCounter::new(anchor.completed_dir.join(SERIAL_FILE)),
        passphrase: None,
        staging_root: settings.staging_root(ENDPOINT_STAGING),
        completed_parent: endpoints_parent(&anchor.completed_dir),
        deliverables: Deliverables::Endpoint,
    })
}
