//! PEM and DER conversion for engine artifacts

use super::*;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// PEM types produced by the signing engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PemType {
    Certificate,
    PrivateKey,
    CertificateRequest,
    Crl,
}

impl PemType {
    /// Get PEM header for this type
    pub fn header(&self) -> &'static str {
        match self {
            Self::Certificate => "CERTIFICATE",
            Self::PrivateKey => "PRIVATE KEY",
            Self::CertificateRequest => "CERTIFICATE REQUEST",
            Self::Crl => "X509 CRL",
        }
    }

    fn from_header(header: &str) -> Option<Self> {
        match header {
            "CERTIFICATE" => Some(Self::Certificate),
            "PRIVATE KEY" => Some(Self::PrivateKey),
            "CERTIFICATE REQUEST" => Some(Self::CertificateRequest),
            "X509 CRL" => Some(Self::Crl),
            _ => None,
        }
    }

    /// Get begin marker
    pub fn begin_marker(&self) -> String {
        format!("-----BEGIN {}-----", self.header())
    }

    /// Get end marker
    pub fn end_marker(&self) -> String {
        format!("-----END {}-----", self.header())
    }
}

/// Encode data to PEM format
pub fn encode_pem(data: &[u8], pem_type: PemType) -> String {
    let mut output = String::new();

    output.push_str(&pem_type.begin_marker());
    output.push('\n');

    // Base64 encode data in 64-character lines
    let b64 = BASE64.encode(data);
    for chunk in b64.as_bytes().chunks(64) {
        output.push_str(&String::from_utf8_lossy(chunk));
        output.push('\n');
    }

    output.push_str(&pem_type.end_marker());
    output.push('\n');

    output
}

/// Decode the first PEM block in `pem`.
///
/// Text before the begin marker is skipped: `openssl ca -out` prefixes the
/// block with a human-readable dump of the certificate.
pub fn decode_pem(pem: &str) -> Result<(Vec<u8>, PemType)> {
    let block = blocks(pem).next().ok_or(X509Error::InvalidFormat)?;
    let pem_type = PemType::from_header(block.header).ok_or(X509Error::InvalidFormat)?;
    let data = BASE64
        .decode(block.body.as_bytes())
        .map_err(|_| X509Error::InvalidFormat)?;
    Ok((data, pem_type))
}

/// Decode the first PEM block and require it to be of `expected` type.
pub fn decode_pem_as(pem: &str, expected: PemType) -> Result<Vec<u8>> {
    let block = blocks(pem).next().ok_or(X509Error::InvalidFormat)?;
    if block.header != expected.header() {
        return Err(X509Error::UnexpectedBlock {
            expected: expected.header(),
            found: block.header.to_string(),
        });
    }
    BASE64
        .decode(block.body.as_bytes())
        .map_err(|_| X509Error::InvalidFormat)
}

/// Base64 bodies of every `pem_type` block in `pem`, line breaks removed.
pub fn pem_bodies(pem: &str, pem_type: PemType) -> Vec<String> {
    blocks(pem)
        .filter(|block| block.header == pem_type.header())
        .map(|block| block.body)
        .collect()
}

struct Block<'a> {
    header: &'a str,
    body: String,
}

fn blocks(pem: &str) -> impl Iterator<Item = Block<'_>> {
    let mut lines = pem.lines();
    std::iter::from_fn(move || {
        let header = loop {
            let line = lines.next()?.trim();
            if let Some(rest) = line.strip_prefix("-----BEGIN ") {
                break rest.trim_end_matches('-');
            }
        };

        let mut body = String::new();
        for line in lines.by_ref() {
            let line = line.trim();
            if line.starts_with("-----END ") {
                return Some(Block { header, body });
            }
            body.push_str(line);
        }
        // Unterminated block
        None
    })
}
