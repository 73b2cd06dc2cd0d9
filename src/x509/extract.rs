//! Identifying material of a signed certificate
//!
//! The serial and SHA-1 fingerprint come from the engine's inspection
//! output. The DER encoding is decoded here from the PEM the engine wrote,
//! and the SHA-256 digest is computed over it.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::pem_der::{decode_pem_as, PemType};
use super::X509Error;
use crate::engine::{CertificateTool, EngineError};

/// Length of a SHA-1 fingerprint in hex characters
pub const SHA1_HEX_LEN: usize = 40;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("inspection engine failed: {0}")]
    Engine(#[from] EngineError),

    #[error("could not parse serial from engine output: {raw:?}")]
    Serial { raw: String },

    #[error("could not parse SHA-1 fingerprint from engine output: {raw:?}")]
    Fingerprint { raw: String },

    #[error("certificate PEM is unreadable: {0}")]
    Pem(#[from] X509Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Engine text worth preserving in an issuance's notes
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Serial { raw } | Self::Fingerprint { raw } => Some(raw),
            _ => None,
        }
    }
}

/// Everything recovered from one signed certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedArtifacts {
    /// Serial as assigned by the engine, uppercase hex
    pub serial: String,
    /// 40 lowercase hex characters
    pub sha1_fingerprint: String,
    /// 64 lowercase hex characters over the DER encoding
    pub sha256_digest: String,
    pub der_path: PathBuf,
}

/// Parse `serial=0A1B` output. Anything after the first `=` is the value.
pub fn parse_serial(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("serial") {
            return None;
        }
        let value = value.trim();
        let valid = !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| value.to_ascii_uppercase())
    })
}

/// Parse `SHA1 Fingerprint=AB:CD:...` output into 40 lowercase hex characters.
pub fn parse_fingerprint(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        let key = key.trim().to_ascii_lowercase();
        if !key.contains("fingerprint") {
            return None;
        }
        let hex: String = value
            .trim()
            .chars()
            .filter(|c| *c != ':')
            .collect::<String>()
            .to_ascii_lowercase();
        let valid = hex.len() == SHA1_HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit());
        valid.then_some(hex)
    })
}

/// Lowercase hex SHA-256 of `der`.
pub fn sha256_hex(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Recover serial, fingerprint and digests for `cert_pem`, writing the DER
/// encoding to `der_out`.
pub fn extract_artifacts<T>(tool: &T, cert_pem: &Path, der_out: &Path) -> Result<ExtractedArtifacts, ExtractError>
where
    T: CertificateTool + ?Sized,
{
    let serial_output = tool.read_serial(cert_pem)?;
    let serial = parse_serial(&serial_output.stdout).ok_or_else(|| ExtractError::Serial {
        raw: serial_output.combined(),
    })?;

    let fingerprint_output = tool.read_fingerprint(cert_pem)?;
    let sha1_fingerprint =
        parse_fingerprint(&fingerprint_output.stdout).ok_or_else(|| ExtractError::Fingerprint {
            raw: fingerprint_output.combined(),
        })?;

    let pem = fs::read_to_string(cert_pem).map_err(|source| ExtractError::Io {
        path: cert_pem.to_path_buf(),
        source,
    })?;
    let der = decode_pem_as(&pem, PemType::Certificate)?;
    fs::write(der_out, &der).map_err(|source| ExtractError::Io {
        path: der_out.to_path_buf(),
        source,
    })?;

    Ok(ExtractedArtifacts {
        serial,
        sha1_fingerprint,
        sha256_digest: sha256_hex(&der),
        der_path: der_out.to_path_buf(),
    })
}
