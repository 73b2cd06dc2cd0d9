//! anchorctl - trust anchor and endpoint certificate management

use std::error::Error as StdError;
use std::fs;
use std::path::PathBuf;

use anchor_pki::ca::issuance::FIRST_ANCHOR_SERIAL;
use anchor_pki::ca::{SerialCounter, SerialNumber};
use anchor_pki::layout::{ANCHOR_STAGING, ENDPOINT_STAGING, INDEX_FILE};
use anchor_pki::messages;
use anchor_pki::{
    Authority, CaSettings, CertificateAuthority, CertificateRef, CertificateRequest, IssuanceResult, Subject,
    TrustAnchor,
};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

#[derive(Parser)]
#[command(name = "anchorctl")]
#[command(about = "Trust anchor and endpoint certificate management", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = "/opt/ca/settings.json")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SubjectArgs {
    /// DNS name, also names the artifacts
    #[arg(long)]
    dns: String,

    /// Common name (defaults to the DNS name)
    #[arg(long)]
    common_name: Option<String>,

    /// Email; an address containing '@' makes an endpoint email-bound
    #[arg(long)]
    email: Option<String>,

    #[arg(long, default_value = "")]
    organization: String,

    #[arg(long, default_value = "")]
    city: String,

    #[arg(long, default_value = "")]
    state: String,

    #[arg(long, default_value = "")]
    country: String,

    /// Owning user
    #[arg(long)]
    user: String,

    #[arg(long)]
    key_size: Option<u32>,

    /// Validity in days
    #[arg(long)]
    days: Option<u32>,
}

impl SubjectArgs {
    fn into_request(self, default_key_size: u32, default_days: u32) -> CertificateRequest {
        let common_name = self.common_name.unwrap_or_else(|| self.dns.clone());
        let mut subject = Subject::new(common_name, self.dns)
            .with_organization(self.organization)
            .with_locality(self.city, self.state, self.country);
        if let Some(email) = self.email {
            subject = subject.with_email(email);
        }
        CertificateRequest::new(
            subject,
            self.user,
            self.key_size.unwrap_or(default_key_size),
            self.days.unwrap_or(default_days),
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Lay out a CA directory tree and write default settings
    Init {
        /// Root of the new tree
        #[arg(long)]
        root: PathBuf,
    },

    /// Issue a trust anchor signed by the root CA
    CreateAnchor {
        #[command(flatten)]
        subject: SubjectArgs,
    },

    /// Issue an endpoint certificate under a trust anchor
    CreateEndpoint {
        #[command(flatten)]
        subject: SubjectArgs,

        /// DNS name of the issuing anchor
        #[arg(long)]
        anchor_dns: String,

        /// Completed directory of the issuing anchor
        #[arg(long)]
        anchor_dir: PathBuf,
    },

    /// Revoke a trust anchor
    RevokeAnchor {
        #[arg(long)]
        dns: String,

        #[arg(long)]
        user: String,

        /// Serial as printed at issuance
        #[arg(long)]
        serial: Option<String>,
    },

    /// Revoke an endpoint certificate
    RevokeEndpoint {
        #[arg(long)]
        dns: String,

        #[arg(long)]
        anchor_dir: PathBuf,

        #[arg(long)]
        serial: Option<String>,
    },

    /// Regenerate the root CRL, or an anchor's with --anchor-dns
    BuildCrl {
        #[arg(long, requires = "anchor_dir")]
        anchor_dns: Option<String>,

        #[arg(long, requires = "anchor_dns")]
        anchor_dir: Option<PathBuf>,
    },

    /// Bundle certificates and print them as an x5c JWK set
    X5c {
        /// Key id
        #[arg(long)]
        kid: String,

        /// Bundle to write
        #[arg(long)]
        out: PathBuf,

        /// PEM files, leaf first
        #[arg(long = "cert", required = true)]
        certs: Vec<PathBuf>,
    },

    /// Show version information
    Version,
}

fn print_result(result: &IssuanceResult, common_name: &str) -> Result<(), Box<dyn StdError>> {
    let message = messages::verification_message(
        result.serial_number.as_deref().unwrap_or_default(),
        common_name,
        result.status,
        result.sha1_fingerprint.as_deref().unwrap_or_default(),
        &result.notes,
    )?;
    println!("{message}");
    if result.is_unverified() {
        if let Some(dir) = &result.completed_dir {
            eprintln!("{} {}", "Completed:".green().bold(), dir.display());
        }
        if let Some(archive) = &result.archive_name {
            eprintln!("{} {}", "Archive:".green().bold(), archive);
        }
    } else {
        eprintln!("{}", "Issuance failed".red().bold());
    }
    Ok(())
}

fn init(root: PathBuf, settings_path: PathBuf) -> Result<(), Box<dyn StdError>> {
    let settings = CaSettings::rooted_at(&root);
    for dir in [
        settings.conf_dir.clone(),
        settings.staging_root(ANCHOR_STAGING),
        settings.staging_root(ENDPOINT_STAGING),
        settings.completed_dir.clone(),
        settings.ca_signed_dir.clone(),
        settings.crl_dir.clone(),
    ] {
        fs::create_dir_all(&dir)?;
    }
    let first = SerialNumber::parse(FIRST_ANCHOR_SERIAL).ok_or("invalid first serial")?;
    SerialCounter::initialize(&settings.ca_serial_file, &first)?;
    let index = root.join(INDEX_FILE);
    if !index.exists() {
        fs::write(&index, "")?;
    }
    settings.save(&settings_path)?;

    println!("{}", "CA tree initialized".green().bold());
    println!("   Root: {}", root.display());
    println!("   Settings: {}", settings_path.display());
    println!();
    println!(
        "{}",
        "Place openssl.cnf and the trust-anchor, domain-bound, email-bound and crl stubs in:".yellow()
    );
    println!("   {}", settings.conf_dir.display());
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn StdError>> {
    let settings_path = cli.settings;
    let load = || -> Result<CertificateAuthority, Box<dyn StdError>> {
        let settings = CaSettings::load(&settings_path)?;
        Ok(CertificateAuthority::from_settings(settings)?)
    };

    match cli.command {
        Commands::Init { root } => init(root, settings_path.clone())?,

        Commands::CreateAnchor { subject } => {
            let ca = load()?;
            let s = ca.settings();
            let request = subject.into_request(s.default_anchor_key_size, s.default_validity_days);
            let result = ca.create_trust_anchor(&request)?;
            print_result(&result, &request.subject.common_name)?;
        }

        Commands::CreateEndpoint {
            subject,
            anchor_dns,
            anchor_dir,
        } => {
            let ca = load()?;
            let s = ca.settings();
            let request = subject.into_request(s.default_endpoint_key_size, s.default_validity_days);
            let anchor = TrustAnchor::at(anchor_dns, anchor_dir);
            let result = ca.create_endpoint_certificate(&request, &anchor)?;
            print_result(&result, &request.subject.common_name)?;
        }

        Commands::RevokeAnchor { dns, user, serial } => {
            let ca = load()?;
            let completed_dir = anchor_pki::layout::anchors_parent(&ca.settings().completed_dir, &user).join(&dns);
            let report = ca.revoke(&CertificateRef::Anchor {
                dns,
                completed_dir,
                serial,
            })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::RevokeEndpoint {
            dns,
            anchor_dir,
            serial,
        } => {
            let ca = load()?;
            let completed_dir = anchor_pki::layout::endpoints_parent(&anchor_dir).join(&dns);
            let report = ca.revoke(&CertificateRef::Endpoint {
                dns,
                completed_dir,
                anchor_dir,
                serial,
            })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::BuildCrl {
            anchor_dns,
            anchor_dir,
        } => {
            let ca = load()?;
            let authority = match (anchor_dns, anchor_dir) {
                (Some(dns), Some(dir)) => Authority::Anchor(TrustAnchor::at(dns, dir)),
                _ => Authority::Root,
            };
            let publication = ca.build_crl(&authority)?;
            println!("{}", serde_json::to_string_pretty(&publication)?);
        }

        Commands::X5c { kid, out, certs } => {
            let bodies = messages::chain_certificates(&out, &certs)?;
            println!("{}", messages::x5c_message(&kid, &bodies)?);
        }

        Commands::Version => {
            println!("anchorctl v{}", anchor_pki::VERSION);
            println!("Two-tier PKI issuance around an external X.509 engine");
            println!("\nComponents:");
            println!("  • Trust anchors signed by the root CA");
            println!("  • Domain- and email-bound endpoint certificates");
            println!("  • Revocation and CRL publication");
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_crl_anchor_flags_go_together() {
        assert!(Cli::try_parse_from(["anchorctl", "build-crl", "--anchor-dir", "/ca/a"]).is_err());
        assert!(Cli::try_parse_from(["anchorctl", "build-crl", "--anchor-dns", "example.com"]).is_err());

        let cli = Cli::try_parse_from([
            "anchorctl",
            "build-crl",
            "--anchor-dns",
            "example.com",
            "--anchor-dir",
            "/ca/a",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::BuildCrl {
                anchor_dns: Some(_),
                anchor_dir: Some(_)
            }
        ));
        assert!(Cli::try_parse_from(["anchorctl", "build-crl"]).is_ok());
    }
}
