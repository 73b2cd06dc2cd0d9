//! X.509 helpers: subject names, PEM/DER handling and artifact extraction

pub mod distinguished_name;
pub mod extract;
pub mod pem_der;

pub use distinguished_name::Subject;
pub use extract::{extract_artifacts, ExtractError, ExtractedArtifacts};
pub use pem_der::{decode_pem, encode_pem, pem_bodies, PemType};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum X509Error {
    #[error("Invalid PEM format")]
    InvalidFormat,

    #[error("Unexpected PEM block: expected {expected}, found {found}")]
    UnexpectedBlock {
        expected: &'static str,
        found: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, X509Error>;
