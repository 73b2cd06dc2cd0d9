//! Trust anchor issuance
//!
//! An anchor is signed by the root CA against the root's database and
//! serial counter. Its completed directory doubles as a CA of its own: it
//! carries an `index`, a `serial` file and `newcerts/` so endpoints can be
//! signed against it, plus a rendered CRL config.

use super::issuance::{request_tokens, Deliverables, IssuancePlan};
use super::serial::SerialCounter;
use crate::error::Result;
use crate::layout::{anchors_parent, ArtifactNames, ANCHOR_STAGING};
use crate::settings::CaSettings;
use crate::template::{StubKind, StubRepository};
use crate::types::CertificateRequest;

pub(crate) fn plan<'a>(
    settings: &'a CaSettings,
    stubs: &StubRepository,
    request: &'a CertificateRequest,
) -> Result<IssuancePlan<'a>> {
    let dns = request.dns();
    let names = ArtifactNames::new(dns);
    let completed_parent = anchors_parent(&settings.completed_dir, &request.user);
    let anchor_dir = completed_parent.join(dns);

    let template = stubs.load(StubKind::TrustAnchor)?;
    let crl_template = stubs.load(StubKind::Crl)?;

    let tokens = request_tokens(request)
        .with("ANCHORDNS", dns)
        .with("COMPLETED_ANCHOR_DIR", anchor_dir.to_string_lossy());

    // The CRL config points at where the anchor's key and certificate will
    // live once promoted, not at staging.
    let crl_tokens = tokens
        .clone()
        .with("CERTIFICATE", anchor_dir.join(names.certificate()).to_string_lossy())
        .with("PRIVATE_KEY", anchor_dir.join(names.private_key()).to_string_lossy());

    Ok(IssuancePlan {
        request,
        template,
        tokens,
        config_name: names.anchor_config(),
        counter: SerialCounter::new(&settings.ca_serial_file),
        passphrase: settings.passphrase(),
        staging_root: settings.staging_root(ANCHOR_STAGING),
        completed_parent,
        deliverables: Deliverables::Anchor {
            crl_template,
            crl_tokens,
        },
    })
}
