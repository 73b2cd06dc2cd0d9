//! Error types for the library

use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop an operation before it can produce a result.
///
/// Engine, extraction, promotion and packaging failures during issuance are
/// not errors; they end the issuance as `failed`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("settings error: {0}")]
    Settings(#[from] crate::settings::SettingsError),

    #[error("invalid request: {0}")]
    Request(#[from] crate::types::RequestError),

    #[error("template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("serial allocation error: {0}")]
    Serial(#[from] crate::ca::serial::SerialError),

    #[error("directory lifecycle error: {0}")]
    Lifecycle(#[from] crate::lifecycle::LifecycleError),

    #[error("CRL error: {0}")]
    Crl(#[from] crate::ca::crl::CrlError),

    #[error("message error: {0}")]
    Message(#[from] crate::messages::MessageError),

    #[error("trust anchor directory {0} does not exist")]
    AnchorMissing(PathBuf),

    #[error("{0} is not a certificate directory of this CA")]
    OutsideCompletedTree(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
