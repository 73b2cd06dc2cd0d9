//! Revocation and CRL generation against the scripted engine

mod common;

use std::fs;

use anchor_pki::ca::{CrlError, TreeDisposition};
use anchor_pki::{
    Authority, CertStatus, CertificateAuthority, CertificateRef, EndpointCertificate, Error, LocalArtifactStore,
    PublishStatus, ScriptedEngine, TrustAnchor,
};
use common::{anchor_request, endpoint_request, Fixture};

fn anchor_with_endpoint(ca: &CertificateAuthority<ScriptedEngine>) -> (TrustAnchor, EndpointCertificate) {
    let result = ca.create_trust_anchor(&anchor_request("example.com")).unwrap();
    let anchor = TrustAnchor::from_result(result).unwrap();
    let result = ca
        .create_endpoint_certificate(&endpoint_request("www.example.com", "admin@example.com"), &anchor)
        .unwrap();
    assert_eq!(result.status, CertStatus::Unverified, "notes: {}", result.notes);
    let endpoint = EndpointCertificate::from_result(result, &anchor).unwrap();
    (anchor, endpoint)
}

#[test]
fn test_revoke_endpoint_keeps_anchor() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (anchor, endpoint) = anchor_with_endpoint(&ca);

    let report = ca.revoke(&endpoint.certificate_ref()).unwrap();

    assert!(report.engine_confirmed(), "engine error: {:?}", report.engine_error);
    assert_eq!(report.disposition, TreeDisposition::Deleted);
    assert_eq!(report.certificate, Some(anchor.completed_dir.join("newcerts/01.pem")));
    assert!(!endpoint.completed_dir.exists());

    assert!(anchor.completed_dir.join("example.com.pem").is_file());
    let index = fs::read_to_string(anchor.completed_dir.join("index")).unwrap();
    assert!(index.starts_with("R\t01\t"));
    // The root database is untouched
    assert!(fixture.root_index().starts_with("V\t01\t"));
}

#[test]
fn test_second_revoke_is_noop() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (_anchor, endpoint) = anchor_with_endpoint(&ca);
    let cert = endpoint.certificate_ref();

    ca.revoke(&cert).unwrap();
    let again = ca.revoke(&cert).unwrap();

    assert_eq!(again.disposition, TreeDisposition::Absent);
    assert!(again.engine_output.is_none());
    assert_eq!(ca.engine().revoke_calls(), 1);
}

#[test]
fn test_revoke_anchor_removes_nested_endpoints() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (anchor, endpoint) = anchor_with_endpoint(&ca);

    let report = ca.revoke(&anchor.certificate_ref()).unwrap();

    assert!(report.engine_confirmed());
    assert_eq!(report.certificate, Some(fixture.root().join("newcerts/01.pem")));
    assert!(!anchor.completed_dir.exists());
    assert!(!endpoint.completed_dir.exists());
    assert!(fixture.root_index().starts_with("R\t01\t"));
}

#[test]
fn test_revoke_without_serial_uses_completed_copy() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (anchor, _endpoint) = anchor_with_endpoint(&ca);

    let cert = TrustAnchor::at("example.com", &anchor.completed_dir).certificate_ref();
    let report = ca.revoke(&cert).unwrap();

    assert!(report.engine_confirmed());
    assert_eq!(report.certificate, Some(anchor.completed_dir.join("example.com.pem")));
}

#[test]
fn test_retained_revocation_moves_tree() {
    let mut fixture = Fixture::new();
    fixture.settings.retain_revoked = true;
    let ca = fixture.authority(ScriptedEngine::new());
    let (_anchor, endpoint) = anchor_with_endpoint(&ca);

    let report = ca.revoke(&endpoint.certificate_ref()).unwrap();

    assert_eq!(report.disposition, TreeDisposition::Retained);
    let retained = report.retained_at.unwrap();
    assert!(retained.starts_with(&fixture.settings.revoked_dir));
    assert!(retained.to_string_lossy().ends_with("-www.example.com"));
    assert!(retained.join("www.example.com.pem").is_file());
    assert!(!endpoint.completed_dir.exists());
}

#[test]
fn test_engine_failure_still_tears_down() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new().fail_revoke_with("ERROR: index is locked\n", 1));
    let (_anchor, endpoint) = anchor_with_endpoint(&ca);

    let report = ca.revoke(&endpoint.certificate_ref()).unwrap();

    assert!(!report.engine_confirmed());
    assert!(report.engine_error.unwrap().contains("index is locked"));
    assert_eq!(report.disposition, TreeDisposition::Deleted);
    assert!(!endpoint.completed_dir.exists());
}

#[test]
fn test_lock_failure_still_tears_down() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (anchor, endpoint) = anchor_with_endpoint(&ca);
    let lock_path = anchor.completed_dir.join("serial.lock");
    let _ = fs::remove_file(&lock_path);
    fs::create_dir(&lock_path).unwrap();

    let report = ca.revoke(&endpoint.certificate_ref()).unwrap();

    assert!(!report.engine_confirmed());
    assert!(report
        .engine_error
        .unwrap()
        .contains("could not lock the issuing database"));
    assert_eq!(ca.engine().revoke_calls(), 0);
    assert_eq!(report.disposition, TreeDisposition::Deleted);
    assert!(!endpoint.completed_dir.exists());
}

#[test]
fn test_revoke_rejects_directory_outside_completed_tree() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (anchor, _endpoint) = anchor_with_endpoint(&ca);
    let unrelated = fixture.root().join("unrelated");
    fs::create_dir_all(&unrelated).unwrap();
    fs::write(unrelated.join("keep.txt"), "keep").unwrap();

    let cert = CertificateRef::Endpoint {
        dns: "unrelated".to_string(),
        completed_dir: unrelated.clone(),
        anchor_dir: anchor.completed_dir.clone(),
        serial: None,
    };
    let err = ca.revoke(&cert).unwrap_err();

    assert!(matches!(err, Error::OutsideCompletedTree(ref path) if *path == unrelated));
    assert!(unrelated.join("keep.txt").is_file());
    assert_eq!(ca.engine().revoke_calls(), 0);
}

#[test]
fn test_revoke_rejects_parent_dir_name() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (anchor, endpoint) = anchor_with_endpoint(&ca);

    // `{anchor}/endpoints/..` is the anchor itself
    let cert = CertificateRef::Endpoint {
        dns: "..".to_string(),
        completed_dir: anchor.completed_dir.join("endpoints").join(".."),
        anchor_dir: anchor.completed_dir.clone(),
        serial: None,
    };
    assert!(matches!(ca.revoke(&cert).unwrap_err(), Error::Request(_)));

    let cert = CertificateRef::Anchor {
        dns: "anchors".to_string(),
        completed_dir: fixture.settings.completed_dir.join("alice").join("anchors"),
        serial: None,
    };
    assert!(matches!(ca.revoke(&cert).unwrap_err(), Error::OutsideCompletedTree(_)));

    assert!(anchor.completed_dir.join("example.com.pem").is_file());
    assert!(endpoint.completed_dir.is_dir());
    assert_eq!(ca.engine().revoke_calls(), 0);
}

#[test]
fn test_revoke_rejects_endpoint_of_foreign_anchor() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (_anchor, _endpoint) = anchor_with_endpoint(&ca);
    let foreign_anchor = fixture.root().join("elsewhere");
    let foreign = foreign_anchor.join("endpoints").join("www.example.com");
    fs::create_dir_all(&foreign).unwrap();

    let cert = CertificateRef::Endpoint {
        dns: "www.example.com".to_string(),
        completed_dir: foreign.clone(),
        anchor_dir: foreign_anchor,
        serial: None,
    };
    assert!(matches!(ca.revoke(&cert).unwrap_err(), Error::OutsideCompletedTree(_)));
    assert!(foreign.is_dir());
}

#[test]
fn test_root_crl_lists_revoked_anchor() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let (anchor, _endpoint) = anchor_with_endpoint(&ca);
    ca.revoke(&anchor.certificate_ref()).unwrap();

    let publication = ca.build_crl(&Authority::Root).unwrap();

    assert_eq!(publication.crl_path, fixture.root().join("crl/ca.crl"));
    assert_eq!(publication.publish, PublishStatus::Disabled);
    let crl = fs::read_to_string(&publication.crl_path).unwrap();
    assert!(crl.starts_with("-----BEGIN X509 CRL-----"));
}

#[test]
fn test_anchor_crl_is_published() {
    let mut fixture = Fixture::new();
    fixture.settings.publish_crl = true;
    let store_root = fixture.root().join("published");
    let ca = fixture
        .authority(ScriptedEngine::new())
        .with_artifact_store(LocalArtifactStore::new(&store_root, "https://pki.example.com"));
    let (anchor, endpoint) = anchor_with_endpoint(&ca);
    ca.revoke(&endpoint.certificate_ref()).unwrap();

    let publication = ca.build_crl(&Authority::Anchor(anchor.clone())).unwrap();

    assert_eq!(publication.crl_path, anchor.completed_dir.join("example.com.crl"));
    assert_eq!(
        publication.publish,
        PublishStatus::Published {
            url: "https://pki.example.com/crl/crl/example.com.crl".to_string()
        }
    );
    assert!(store_root.join("crl/crl/example.com.crl").is_file());
}

#[test]
fn test_publishing_without_store_is_disabled() {
    let mut fixture = Fixture::new();
    fixture.settings.publish_crl = true;
    let ca = fixture.authority(ScriptedEngine::new());

    let publication = ca.build_crl(&Authority::Root).unwrap();
    assert_eq!(publication.publish, PublishStatus::Disabled);
}

#[test]
fn test_crl_engine_failure_is_error() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new().fail_crl_with("unable to load CA private key\n", 0));

    let err = ca.build_crl(&Authority::Root).unwrap_err();
    assert!(matches!(err, Error::Crl(CrlError::Engine { .. })));
}

#[test]
fn test_crl_for_unknown_anchor_is_error() {
    let fixture = Fixture::new();
    let ca = fixture.authority(ScriptedEngine::new());
    let missing = TrustAnchor::at("gone.example.com", fixture.root().join("completed/alice/anchors/gone.example.com"));

    let err = ca.build_crl(&Authority::Anchor(missing)).unwrap_err();
    assert!(matches!(err, Error::Crl(CrlError::MissingConfig(_))));
}
