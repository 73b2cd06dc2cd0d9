//! Shared fixture: a CA tree under a temp dir with stubs wired for the
//! scripted engine.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use anchor_pki::{CaSettings, CertificateAuthority, CertificateRequest, ScriptedEngine, Subject};
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub settings: CaSettings,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let settings = CaSettings::rooted_at(dir.path());
        write_tree(dir.path(), &settings);
        Self { dir, settings }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn authority(&self, engine: ScriptedEngine) -> CertificateAuthority<ScriptedEngine> {
        CertificateAuthority::new(self.settings.clone(), engine).unwrap()
    }

    pub fn root_index(&self) -> String {
        fs::read_to_string(self.root().join("index")).unwrap()
    }

    pub fn root_serial(&self) -> String {
        fs::read_to_string(&self.settings.ca_serial_file).unwrap().trim().to_string()
    }
}

fn write_tree(root: &Path, settings: &CaSettings) {
    fs::create_dir_all(&settings.conf_dir).unwrap();
    fs::create_dir_all(&settings.ca_signed_dir).unwrap();
    fs::write(&settings.ca_serial_file, "01\n").unwrap();
    fs::write(root.join("index"), "").unwrap();

    let root_db = format!(
        "dir = {}\nserial = $dir/serial\ndatabase = $dir/index\nnew_certs_dir = $dir/newcerts\n",
        root.display()
    );
    fs::write(&settings.ca_main_conf, format!("[ CA_default ]\n{root_db}")).unwrap();

    let conf = &settings.conf_dir;
    fs::write(
        conf.join("trust-anchor-stub.cnf"),
        format!(
            "[ CA_default ]\n{root_db}default_days = |DAYS|\n\n\
             [ anchor_ext ]\nsubjectAltName = DNS:|ANCHORDNS|\n\
             crlDistributionPoints = URI:http://crl.example.com/|DNS|.crl\n"
        ),
    )
    .unwrap();

    let endpoint_db = "[ CA_default ]\n\
                       dir = |COMPLETED_ANCHOR_DIR|\n\
                       serial = $dir/serial\n\
                       database = $dir/index\n\
                       new_certs_dir = $dir/newcerts\n\
                       certificate = |CERTIFICATE|\n\
                       private_key = |PRIVATE_KEY|\n\
                       default_days = |DAYS|\n";
    fs::write(
        conf.join("domain-bound-stub.cnf"),
        format!("{endpoint_db}\n[ ext ]\nsubjectAltName = DNS:|DNS|\n"),
    )
    .unwrap();
    fs::write(
        conf.join("email-bound-stub.cnf"),
        format!("{endpoint_db}\n[ ext ]\nsubjectAltName = email:|EMAIL_ADDRESS|\n"),
    )
    .unwrap();

    fs::write(
        conf.join("crl-stub.cnf"),
        "[ CA_default ]\n\
         database = |COMPLETED_ANCHOR_DIR|/index\n\
         certificate = |CERTIFICATE|\n\
         private_key = |PRIVATE_KEY|\n",
    )
    .unwrap();
}

pub fn anchor_request(dns: &str) -> CertificateRequest {
    let subject = Subject::new(format!("{dns} trust anchor"), dns)
        .with_organization("Example")
        .with_locality("Gaithersburg", "MD", "US");
    CertificateRequest::new(subject, "alice", 2048, 1095)
}

pub fn endpoint_request(dns: &str, email: &str) -> CertificateRequest {
    let subject = Subject::new(dns, dns)
        .with_email(email)
        .with_organization("Example")
        .with_locality("Gaithersburg", "MD", "US");
    CertificateRequest::new(subject, "alice", 4096, 365)
}

pub fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
