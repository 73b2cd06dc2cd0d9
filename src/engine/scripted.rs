//! Deterministic in-process engine
//!
//! Mirrors the observable contract of `openssl ca` closely enough to drive
//! the whole pipeline without the binary:
//!
//! - `sign` reads `serial`, `database` and `new_certs_dir` from the config,
//!   stamps the serial into the certificate, advances the serial file and
//!   appends a `V` row to the index
//! - `revoke` flips the row to `R` and refuses to revoke twice
//! - `generate_crl` lists the `R` rows
//!
//! Failures can be scripted to exercise the pipeline's failure edges.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::{CertificateTool, EngineError, EngineOutcome, EngineOutput, Result, SignJob, SigningEngine};
use crate::x509::pem_der::{decode_pem_as, encode_pem, PemType};

const PROGRAM: &str = "scripted-engine";

#[derive(Debug, Default)]
struct Script {
    sign_failure: Option<EngineOutput>,
    revoke_failure: Option<EngineOutput>,
    crl_failure: Option<EngineOutput>,
    sign_timeout: Option<Duration>,
    garbled_inspection: bool,
    pkcs12_missing: bool,
    skip_serial_advance: bool,
    expected_passphrase: Option<String>,
    sign_calls: usize,
    revoke_calls: usize,
}

/// In-process stand-in for [`OpenSslEngine`](super::OpenSslEngine).
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: Mutex<Script>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `sign` prints `text` on stderr and exits with `exit_code`
    /// without writing a certificate.
    pub fn fail_sign_with(self, text: &str, exit_code: i32) -> Self {
        self.script().sign_failure = Some(EngineOutput::new(Some(exit_code), "", text));
        self
    }

    pub fn fail_revoke_with(self, text: &str, exit_code: i32) -> Self {
        self.script().revoke_failure = Some(EngineOutput::new(Some(exit_code), "", text));
        self
    }

    pub fn fail_crl_with(self, text: &str, exit_code: i32) -> Self {
        self.script().crl_failure = Some(EngineOutput::new(Some(exit_code), "", text));
        self
    }

    /// Every `sign` gives up as if the child outlived `timeout`.
    pub fn time_out_sign(self, timeout: Duration) -> Self {
        self.script().sign_timeout = Some(timeout);
        self
    }

    /// `export_pkcs12` reports success but writes no bundle.
    pub fn without_pkcs12_output(self) -> Self {
        self.script().pkcs12_missing = true;
        self
    }

    /// `read_serial` and `read_fingerprint` print output that cannot be parsed.
    pub fn garble_inspection(self) -> Self {
        self.script().garbled_inspection = true;
        self
    }

    /// Sign without advancing the serial file, like a config that does not
    /// point the engine at the shared counter.
    pub fn without_serial_advance(self) -> Self {
        self.script().skip_serial_advance = true;
        self
    }

    /// Only signs accepting `passphrase` succeed. Anything else produces the
    /// engine's ambiguous "unable to load CA private key" with exit 0.
    pub fn expect_passphrase(self, passphrase: &str) -> Self {
        self.script().expected_passphrase = Some(passphrase.to_string());
        self
    }

    pub fn sign_calls(&self) -> usize {
        self.script().sign_calls
    }

    pub fn revoke_calls(&self) -> usize {
        self.script().revoke_calls
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn io_err(source: std::io::Error) -> EngineError {
    EngineError::Io {
        program: PROGRAM.to_string(),
        source,
    }
}

fn ok(stdout: impl Into<String>, stderr: impl Into<String>) -> EngineOutcome {
    EngineOutcome::classify(EngineOutput::new(Some(0), stdout, stderr))
}

fn fail(stderr: impl Into<String>) -> EngineOutcome {
    EngineOutcome::classify(EngineOutput::new(Some(1), "", stderr))
}

/// Value of `key` in an openssl-style config, with `$dir` expanded.
fn config_value(config: &str, key: &str) -> Option<String> {
    let lookup = |wanted: &str| {
        config.lines().find_map(|line| {
            let line = line.split('#').next().unwrap_or_default();
            let (k, v) = line.split_once('=')?;
            (k.trim() == wanted).then(|| v.trim().to_string())
        })
    };
    let value = lookup(key)?;
    match lookup("dir") {
        Some(dir) => Some(value.replace("$dir", &dir)),
        None => Some(value),
    }
}

fn certificate_text(der: &[u8]) -> String {
    String::from_utf8_lossy(der).into_owned()
}

fn serial_of(der: &[u8]) -> Option<String> {
    certificate_text(der)
        .split_whitespace()
        .find_map(|field| field.strip_prefix("serial=").map(str::to_string))
}

fn read_certificate(path: &Path) -> Option<Vec<u8>> {
    let text = fs::read_to_string(path).ok()?;
    decode_pem_as(&text, PemType::Certificate).ok()
}

fn next_serial(current: &str) -> String {
    let value = u128::from_str_radix(current, 16).unwrap_or(0) + 1;
    let mut hex = format!("{value:02X}");
    if hex.len() % 2 == 1 {
        hex.insert(0, '0');
    }
    hex
}

impl SigningEngine for ScriptedEngine {
    fn sign(&self, job: &SignJob<'_>) -> Result<EngineOutcome> {
        let (failure, timeout, skip_advance, expected) = {
            let mut script = self.script();
            script.sign_calls += 1;
            (
                script.sign_failure.clone(),
                script.sign_timeout,
                script.skip_serial_advance,
                script.expected_passphrase.clone(),
            )
        };
        if let Some(timeout) = timeout {
            return Err(EngineError::Timeout {
                program: PROGRAM.to_string(),
                timeout,
            });
        }
        if let Some(output) = failure {
            return Ok(EngineOutcome::classify(output));
        }
        if expected.is_some() && expected.as_deref() != job.passphrase {
            return Ok(ok("", "unable to load CA private key\n"));
        }

        let config = fs::read_to_string(job.config).map_err(io_err)?;
        let Some(serial_file) = config_value(&config, "serial") else {
            return Ok(fail("unable to load number from serial file\n"));
        };
        let serial = match fs::read_to_string(&serial_file) {
            Ok(text) => text.trim().to_uppercase(),
            Err(_) => return Ok(fail(format!("{serial_file}: unable to load number from serial file\n"))),
        };

        let csr_pem = fs::read_to_string(job.csr).map_err(io_err)?;
        let subject = match decode_pem_as(&csr_pem, PemType::CertificateRequest) {
            Ok(der) => certificate_text(&der),
            Err(_) => return Ok(fail("unable to load certificate request\n")),
        };

        if let Some(database) = config_value(&config, "database") {
            let index = fs::read_to_string(&database).unwrap_or_default();
            let duplicate = index
                .lines()
                .any(|row| row.starts_with('V') && row.ends_with(&format!("\t{subject}")));
            if duplicate {
                // openssl refuses a second valid cert for the same subject
                return Ok(ok(
                    "",
                    "failed to update database\nTXT_DB error number 2\n",
                ));
            }
            fs::write(&database, format!("{index}V\t{serial}\t{subject}\n")).map_err(io_err)?;
        }

        let der = format!("scripted-certificate serial={serial} subject={subject}").into_bytes();
        let pem = format!(
            "Certificate:\n    Serial Number: {serial}\n    Subject: {subject}\n{}",
            encode_pem(&der, PemType::Certificate)
        );
        fs::write(job.certificate_out, &pem).map_err(io_err)?;

        if let Some(new_certs_dir) = config_value(&config, "new_certs_dir") {
            let dir = PathBuf::from(new_certs_dir);
            fs::create_dir_all(&dir).map_err(io_err)?;
            fs::write(dir.join(format!("{serial}.pem")), &pem).map_err(io_err)?;
        }

        if !skip_advance {
            fs::write(&serial_file, format!("{}\n", next_serial(&serial))).map_err(io_err)?;
        }

        Ok(ok(
            "",
            format!("Using configuration from {}\nData Base Updated\n", job.config.display()),
        ))
    }

    fn revoke(&self, config: &Path, certificate: &Path, _passphrase: Option<&str>) -> Result<EngineOutcome> {
        let failure = {
            let mut script = self.script();
            script.revoke_calls += 1;
            script.revoke_failure.clone()
        };
        if let Some(output) = failure {
            return Ok(EngineOutcome::classify(output));
        }

        let Some(serial) = read_certificate(certificate).and_then(|der| serial_of(&der)) else {
            return Ok(fail("unable to load certificate\n"));
        };
        let config_text = fs::read_to_string(config).map_err(io_err)?;
        let Some(database) = config_value(&config_text, "database") else {
            return Ok(fail("variable lookup failed for ca::database\n"));
        };

        let index = fs::read_to_string(&database).unwrap_or_default();
        let mut rows: Vec<String> = index.lines().map(str::to_string).collect();
        let needle = format!("\t{serial}\t");
        match rows.iter_mut().find(|row| row.contains(&needle)) {
            Some(row) if row.starts_with('R') => {
                return Ok(fail(format!("ERROR:Already revoked, serial number {serial}\n")));
            }
            Some(row) => row.replace_range(0..1, "R"),
            None => rows.push(format!("R\t{serial}\tunknown")),
        }
        let mut updated = rows.join("\n");
        updated.push('\n');
        fs::write(&database, updated).map_err(io_err)?;

        Ok(ok("", format!("Revoking Certificate {serial}.\nData Base Updated\n")))
    }

    fn generate_crl(&self, config: &Path, crl_out: &Path, _passphrase: Option<&str>) -> Result<EngineOutcome> {
        if let Some(output) = self.script().crl_failure.clone() {
            return Ok(EngineOutcome::classify(output));
        }

        let config_text = fs::read_to_string(config).map_err(io_err)?;
        let revoked: Vec<String> = config_value(&config_text, "database")
            .and_then(|db| fs::read_to_string(db).ok())
            .unwrap_or_default()
            .lines()
            .filter(|row| row.starts_with('R'))
            .filter_map(|row| row.split('\t').nth(1).map(str::to_string))
            .collect();

        let body = format!("scripted-crl revoked={}", revoked.join(","));
        fs::write(crl_out, encode_pem(body.as_bytes(), PemType::Crl)).map_err(io_err)?;
        Ok(ok("", ""))
    }
}

impl CertificateTool for ScriptedEngine {
    fn new_request(&self, subject_dn: &str, key_size: u32, key_out: &Path, csr_out: &Path) -> Result<EngineOutcome> {
        let key = format!("scripted-rsa-{key_size} {subject_dn}");
        fs::write(key_out, encode_pem(key.as_bytes(), PemType::PrivateKey)).map_err(io_err)?;
        fs::write(csr_out, encode_pem(subject_dn.as_bytes(), PemType::CertificateRequest)).map_err(io_err)?;
        Ok(ok("", format!("Generating a {key_size} bit RSA private key\n")))
    }

    fn read_serial(&self, certificate: &Path) -> Result<EngineOutput> {
        if self.script().garbled_inspection {
            return Ok(EngineOutput::new(Some(0), "unable to load certificate\n", ""));
        }
        Ok(match read_certificate(certificate).and_then(|der| serial_of(&der)) {
            Some(serial) => EngineOutput::new(Some(0), format!("serial={serial}\n"), ""),
            None => EngineOutput::new(Some(1), "", "unable to load certificate\n"),
        })
    }

    /// Reports the first 20 bytes of the SHA-256 of the DER, formatted the
    /// way `openssl x509 -fingerprint` prints a SHA-1.
    fn read_fingerprint(&self, certificate: &Path) -> Result<EngineOutput> {
        if self.script().garbled_inspection {
            return Ok(EngineOutput::new(Some(0), "unable to load certificate\n", ""));
        }
        let Some(der) = read_certificate(certificate) else {
            return Ok(EngineOutput::new(Some(1), "", "unable to load certificate\n"));
        };
        let digest = Sha256::digest(&der);
        let pairs: Vec<String> = digest[..20].iter().map(|b| format!("{b:02X}")).collect();
        Ok(EngineOutput::new(
            Some(0),
            format!("SHA1 Fingerprint={}\n", pairs.join(":")),
            "",
        ))
    }

    fn export_pkcs8(&self, key_pem: &Path, der_out: &Path) -> Result<EngineOutcome> {
        let text = fs::read_to_string(key_pem).map_err(io_err)?;
        match decode_pem_as(&text, PemType::PrivateKey) {
            Ok(der) => {
                fs::write(der_out, der).map_err(io_err)?;
                Ok(ok("", ""))
            }
            Err(_) => Ok(fail("unable to load key\n")),
        }
    }

    fn export_pkcs12(&self, key_pem: &Path, certificate: &Path, p12_out: &Path) -> Result<EngineOutcome> {
        if self.script().pkcs12_missing {
            return Ok(ok("", ""));
        }
        let mut bundle = b"scripted-pkcs12\n".to_vec();
        bundle.extend(fs::read(key_pem).map_err(io_err)?);
        bundle.extend(fs::read(certificate).map_err(io_err)?);
        fs::write(p12_out, bundle).map_err(io_err)?;
        Ok(ok("", ""))
    }
}
