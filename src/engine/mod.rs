//! Signing engine boundary
//!
//! The pipeline never signs anything itself. It drives an X.509 engine
//! through two capabilities:
//!
//! - [`SigningEngine`]: operations that touch an authority's database
//!   (`sign`, `revoke`, `generate_crl`)
//! - [`CertificateTool`]: stateless helpers (key/CSR generation, inspection,
//!   format conversion)
//!
//! [`OpenSslEngine`] runs the `openssl` binary. [`ScriptedEngine`] is a
//! deterministic in-process double used by the test suite.

pub mod openssl;
pub mod process;
pub mod scripted;

pub use openssl::OpenSslEngine;
pub use scripted::ScriptedEngine;

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Phrases the engine prints when a sign or revoke did not take effect.
///
/// `openssl ca` has been observed to exit 0 after printing these, so the
/// output is scanned in addition to the exit status. Matching is
/// case-insensitive.
pub const KNOWN_FAILURE_PHRASES: &[&str] = &[
    "failed to update database",
    "unable to load ca private key",
];

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("IO error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Raw result of one engine invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    pub fn new(exit_code: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr, as an operator would have seen it
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// First known failure phrase present in either stream.
    pub fn failure_phrase(&self) -> Option<&'static str> {
        let stdout = self.stdout.to_lowercase();
        let stderr = self.stderr.to_lowercase();
        KNOWN_FAILURE_PHRASES
            .iter()
            .copied()
            .find(|phrase| stdout.contains(phrase) || stderr.contains(phrase))
    }

    /// Classify the invocation. A failure phrase wins over a clean exit.
    pub fn verdict(&self) -> Verdict {
        if let Some(phrase) = self.failure_phrase() {
            return Verdict::Failed(format!("engine reported \"{phrase}\""));
        }
        match self.exit_code {
            Some(0) => Verdict::Succeeded,
            Some(code) => Verdict::Failed(format!("engine exited with status {code}")),
            None => Verdict::Failed("engine was terminated by a signal".to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    Failed(String),
}

/// Classified engine invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOutcome {
    pub output: EngineOutput,
    pub verdict: Verdict,
}

impl EngineOutcome {
    pub fn classify(output: EngineOutput) -> Self {
        let verdict = output.verdict();
        Self { output, verdict }
    }

    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Succeeded
    }

    /// Text recorded in an issuance's notes when this invocation failed
    pub fn failure_notes(&self) -> Option<String> {
        match &self.verdict {
            Verdict::Succeeded => None,
            Verdict::Failed(reason) => {
                let raw = self.output.combined();
                if raw.trim().is_empty() {
                    Some(reason.clone())
                } else {
                    Some(raw)
                }
            }
        }
    }
}

/// Inputs of a batch-mode `sign`
#[derive(Clone, Copy, Debug)]
pub struct SignJob<'a> {
    pub config: &'a Path,
    pub csr: &'a Path,
    pub certificate_out: &'a Path,
    pub passphrase: Option<&'a str>,
}

/// Operations that read or write an authority's certificate database.
///
/// Callers serialize these per authority, see
/// [`SerialCounter`](crate::ca::serial::SerialCounter).
pub trait SigningEngine: Send + Sync {
    fn sign(&self, job: &SignJob<'_>) -> Result<EngineOutcome>;

    fn revoke(&self, config: &Path, certificate: &Path, passphrase: Option<&str>) -> Result<EngineOutcome>;

    fn generate_crl(&self, config: &Path, crl_out: &Path, passphrase: Option<&str>) -> Result<EngineOutcome>;
}

/// Stateless key, request and format operations.
pub trait CertificateTool: Send + Sync {
    /// Generate an unencrypted RSA key and a CSR for `subject_dn`.
    fn new_request(&self, subject_dn: &str, key_size: u32, key_out: &Path, csr_out: &Path) -> Result<EngineOutcome>;

    /// Print the serial of `certificate`, as `serial=<HEX>`.
    fn read_serial(&self, certificate: &Path) -> Result<EngineOutput>;

    /// Print the SHA-1 fingerprint of `certificate`, as `SHA1 Fingerprint=AA:BB:...`.
    fn read_fingerprint(&self, certificate: &Path) -> Result<EngineOutput>;

    fn export_pkcs8(&self, key_pem: &Path, der_out: &Path) -> Result<EngineOutcome>;

    /// Bundle key and certificate into a password-less PKCS12 file.
    fn export_pkcs12(&self, key_pem: &Path, certificate: &Path, p12_out: &Path) -> Result<EngineOutcome>;
}

/// Everything the issuance pipeline needs from an engine.
pub trait Engine: SigningEngine + CertificateTool {}

impl<T: SigningEngine + CertificateTool> Engine for T {}
