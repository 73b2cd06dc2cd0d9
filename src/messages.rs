//! JSON messages handed to the approval workflow and relying parties

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use crate::types::CertStatus;
use crate::x509::{pem_bodies, PemType};

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MessageError>;

const THIS_UPDATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Field order is part of the message format.
#[derive(Serialize)]
struct Verification<'a> {
    #[serde(rename = "SerialNumber")]
    serial_number: &'a str,
    #[serde(rename = "CommonName")]
    common_name: &'a str,
    #[serde(rename = "CertStatus")]
    status: CertStatus,
    #[serde(rename = "CertSHA1Fingerprint")]
    fingerprint: &'a str,
    #[serde(rename = "ThisUpdate")]
    this_update: String,
    #[serde(rename = "Note", skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

/// Verification message for one certificate, stamped with the local time.
pub fn verification_message(
    serial_number: &str,
    common_name: &str,
    status: CertStatus,
    fingerprint: &str,
    note: &str,
) -> Result<String> {
    verification_message_at(serial_number, common_name, status, fingerprint, note, Local::now())
}

pub fn verification_message_at(
    serial_number: &str,
    common_name: &str,
    status: CertStatus,
    fingerprint: &str,
    note: &str,
    now: DateTime<Local>,
) -> Result<String> {
    let message = Verification {
        serial_number,
        common_name,
        status,
        fingerprint,
        this_update: now.format(THIS_UPDATE_FORMAT).to_string(),
        note: (!note.is_empty()).then_some(note),
    };
    Ok(serde_json::to_string_pretty(&message)?)
}

/// Concatenate `sources` into `out` and return the base64 body of every
/// certificate in the bundle, line breaks removed.
pub fn chain_certificates(out: &Path, sources: &[PathBuf]) -> Result<Vec<String>> {
    let mut bundle = String::new();
    for source in sources {
        let text = fs::read_to_string(source).map_err(|e| MessageError::Io {
            path: source.clone(),
            source: e,
        })?;
        bundle.push_str(&text);
        if !bundle.ends_with('\n') {
            bundle.push('\n');
        }
    }
    fs::write(out, &bundle).map_err(|source| MessageError::Io {
        path: out.to_path_buf(),
        source,
    })?;
    Ok(pem_bodies(&bundle, PemType::Certificate))
}

#[derive(Serialize)]
struct JwkSet<'a> {
    keys: [Jwk<'a>; 1],
}

#[derive(Serialize)]
struct Jwk<'a> {
    kty: &'static str,
    x5c: &'a [String],
    #[serde(rename = "use")]
    usage: &'static str,
    kid: &'a str,
}

/// JWK set publishing `certs` as an `x5c` chain under `kid`.
pub fn x5c_message(kid: &str, certs: &[String]) -> Result<String> {
    let set = JwkSet {
        keys: [Jwk {
            kty: "PKIX",
            x5c: certs,
            usage: "sig",
            kid,
        }],
    };
    Ok(serde_json::to_string_pretty(&set)?)
}
