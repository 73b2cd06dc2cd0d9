//! `openssl` command-line engine

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::process::run_bounded;
use super::{CertificateTool, EngineOutcome, EngineOutput, Result, SignJob, SigningEngine};

/// Environment variable used to hand the CA passphrase to the child.
/// Keeps the secret out of the process table.
const PASSIN_VAR: &str = "ANCHOR_PKI_PASSIN";

/// Engine backed by the `openssl` binary.
#[derive(Clone, Debug)]
pub struct OpenSslEngine {
    program: PathBuf,
    timeout: Duration,
}

impl OpenSslEngine {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command<I, S>(&self, args: I, passphrase: Option<&str>) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(pass) = passphrase {
            command.arg("-passin").arg(format!("env:{PASSIN_VAR}"));
            command.env(PASSIN_VAR, pass);
        }
        // Not `{:?}` on the command itself: that would print the env.
        let shown: Vec<_> = command.get_args().collect();
        log::debug!("engine: {:?} {:?}", command.get_program(), shown);
        command
    }

    fn run<I, S>(&self, args: I, passphrase: Option<&str>) -> Result<EngineOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        run_bounded(self.command(args, passphrase), self.timeout)
    }
}

impl Default for OpenSslEngine {
    fn default() -> Self {
        Self::new("openssl", Duration::from_secs(120))
    }
}

impl SigningEngine for OpenSslEngine {
    fn sign(&self, job: &SignJob<'_>) -> Result<EngineOutcome> {
        let args: [&OsStr; 8] = [
            "ca".as_ref(),
            "-batch".as_ref(),
            "-config".as_ref(),
            job.config.as_os_str(),
            "-in".as_ref(),
            job.csr.as_os_str(),
            "-out".as_ref(),
            job.certificate_out.as_os_str(),
        ];
        self.run(args, job.passphrase).map(EngineOutcome::classify)
    }

    fn revoke(&self, config: &Path, certificate: &Path, passphrase: Option<&str>) -> Result<EngineOutcome> {
        let args: [&OsStr; 5] = [
            "ca".as_ref(),
            "-config".as_ref(),
            config.as_os_str(),
            "-revoke".as_ref(),
            certificate.as_os_str(),
        ];
        self.run(args, passphrase).map(EngineOutcome::classify)
    }

    fn generate_crl(&self, config: &Path, crl_out: &Path, passphrase: Option<&str>) -> Result<EngineOutcome> {
        let args: [&OsStr; 6] = [
            "ca".as_ref(),
            "-config".as_ref(),
            config.as_os_str(),
            "-gencrl".as_ref(),
            "-out".as_ref(),
            crl_out.as_os_str(),
        ];
        self.run(args, passphrase).map(EngineOutcome::classify)
    }
}

impl CertificateTool for OpenSslEngine {
    fn new_request(&self, subject_dn: &str, key_size: u32, key_out: &Path, csr_out: &Path) -> Result<EngineOutcome> {
        let newkey = format!("rsa:{key_size}");
        let args: [&OsStr; 11] = [
            "req".as_ref(),
            "-subj".as_ref(),
            subject_dn.as_ref(),
            "-out".as_ref(),
            csr_out.as_os_str(),
            "-new".as_ref(),
            "-newkey".as_ref(),
            newkey.as_ref(),
            "-nodes".as_ref(),
            "-keyout".as_ref(),
            key_out.as_os_str(),
        ];
        self.run(args, None).map(EngineOutcome::classify)
    }

    fn read_serial(&self, certificate: &Path) -> Result<EngineOutput> {
        let args: [&OsStr; 5] = [
            "x509".as_ref(),
            "-in".as_ref(),
            certificate.as_os_str(),
            "-serial".as_ref(),
            "-noout".as_ref(),
        ];
        self.run(args, None)
    }

    fn read_fingerprint(&self, certificate: &Path) -> Result<EngineOutput> {
        let args: [&OsStr; 6] = [
            "x509".as_ref(),
            "-in".as_ref(),
            certificate.as_os_str(),
            "-fingerprint".as_ref(),
            "-sha1".as_ref(),
            "-noout".as_ref(),
        ];
        self.run(args, None)
    }

    fn export_pkcs8(&self, key_pem: &Path, der_out: &Path) -> Result<EngineOutcome> {
        let args: [&OsStr; 11] = [
            "pkcs8".as_ref(),
            "-topk8".as_ref(),
            "-out".as_ref(),
            der_out.as_os_str(),
            "-in".as_ref(),
            key_pem.as_os_str(),
            "-inform".as_ref(),
            "pem".as_ref(),
            "-outform".as_ref(),
            "der".as_ref(),
            "-nocrypt".as_ref(),
        ];
        self.run(args, None).map(EngineOutcome::classify)
    }

    fn export_pkcs12(&self, key_pem: &Path, certificate: &Path, p12_out: &Path) -> Result<EngineOutcome> {
        let args: [&OsStr; 10] = [
            "pkcs12".as_ref(),
            "-export".as_ref(),
            "-inkey".as_ref(),
            key_pem.as_os_str(),
            "-in".as_ref(),
            certificate.as_os_str(),
            "-out".as_ref(),
            p12_out.as_os_str(),
            "-passout".as_ref(),
            "pass:".as_ref(),
        ];
        self.run(args, None).map(EngineOutcome::classify)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Stand-in `openssl` that prints `stderr_text` and exits with `code`.
    fn fake_binary(dir: &Path, stderr_text: &str, code: i32) -> PathBuf {
        let path = dir.join("fake-openssl");
        let script = format!("#!/bin/sh\necho '{stderr_text}' >&2\nexit {code}\n");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn job<'a>(dir: &'a TempDir, out: &'a Path) -> SignJob<'a> {
        SignJob {
            config: dir.path(),
            csr: dir.path(),
            certificate_out: out,
            passphrase: Some("secret"),
        }
    }

    #[test]
    fn test_sign_failure_text_overrides_clean_exit() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("cert.pem");
        let engine = OpenSslEngine::new(fake_binary(dir.path(), "ERROR:Failed To Update Database", 0), Duration::from_secs(5));

        let outcome = engine.sign(&job(&dir, &out)).unwrap();
        assert_eq!(outcome.output.exit_code, Some(0));
        assert!(!outcome.is_success());
        assert!(outcome.failure_notes().unwrap().contains("Failed To Update Database"));
    }

    #[test]
    fn test_sign_success_with_clean_output() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("cert.pem");
        let engine = OpenSslEngine::new(fake_binary(dir.path(), "Data Base Updated", 0), Duration::from_secs(5));

        assert!(engine.sign(&job(&dir, &out)).unwrap().is_success());
    }

    #[test]
    fn test_passphrase_goes_through_environment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("echo-env");
        fs::write(&path, format!("#!/bin/sh\necho \"$@\"\necho \"pass=${PASSIN_VAR}\"\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        let engine = OpenSslEngine::new(path, Duration::from_secs(5));

        let out = dir.path().join("cert.pem");
        let outcome = engine.sign(&job(&dir, &out)).unwrap();
        let stdout = &outcome.output.stdout;
        assert!(stdout.contains("-passin env:ANCHOR_PKI_PASSIN"));
        assert!(!stdout.lines().next().unwrap().contains("secret"));
        assert!(stdout.contains("pass=secret"));
    }
}
