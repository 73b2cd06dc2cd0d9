//! CRL generation and publication

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::serial::SerialCounter;
use crate::engine::{EngineError, SigningEngine};
use crate::layout::{ArtifactNames, SERIAL_FILE};
use crate::settings::CaSettings;
use crate::store::{ArtifactStore, StoreError};
use crate::types::Authority;

#[derive(Error, Debug)]
pub enum CrlError {
    #[error("CRL generation failed: {notes}")]
    Engine { notes: String },

    #[error(transparent)]
    Process(#[from] EngineError),

    #[error("CRL config {0} does not exist")]
    MissingConfig(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of handing a CRL to the artifact store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum PublishStatus {
    Published { url: String },
    Failed { reason: String },
    /// No store configured, or publishing turned off
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CrlPublication {
    pub crl_path: PathBuf,
    pub publish: PublishStatus,
}

struct CrlTarget<'a> {
    config: PathBuf,
    out: PathBuf,
    counter: SerialCounter,
    passphrase: Option<&'a str>,
}

fn target<'a>(settings: &'a CaSettings, authority: &Authority) -> CrlTarget<'a> {
    match authority {
        Authority::Root => CrlTarget {
            config: settings.ca_main_conf.clone(),
            out: settings.crl_path(),
            counter: SerialCounter::new(&settings.ca_serial_file),
            passphrase: settings.passphrase(),
        },
        Authority::Anchor(anchor) => {
            let names = ArtifactNames::new(&anchor.dns);
            CrlTarget {
                config: anchor.completed_dir.join(names.crl_config()),
                out: anchor.completed_dir.join(names.crl()),
                counter: SerialCounter::new(anchor.completed_dir.join(SERIAL_FILE)),
                passphrase: None,
            }
        }
    }
}

/// Regenerate the CRL of `authority` and publish it.
pub(crate) fn build<E: SigningEngine + ?Sized>(
    engine: &E,
    settings: &CaSettings,
    store: Option<&dyn ArtifactStore>,
    authority: &Authority,
) -> crate::error::Result<CrlPublication> {
    let target = target(settings, authority);
    if !target.config.is_file() {
        return Err(CrlError::MissingConfig(target.config).into());
    }
    if let Some(parent) = target.out.parent() {
        fs::create_dir_all(parent).map_err(|source| CrlError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    {
        let _lock = target.counter.exclusive()?;
        let outcome = engine
            .generate_crl(&target.config, &target.out, target.passphrase)
            .map_err(CrlError::from)?;
        if let Some(notes) = outcome.failure_notes() {
            return Err(CrlError::Engine { notes }.into());
        }
    }
    log::info!("generated CRL {}", target.out.display());

    let publish = if settings.publish_crl {
        publish(store, settings, &target.out)
    } else {
        PublishStatus::Disabled
    };

    Ok(CrlPublication {
        crl_path: target.out,
        publish,
    })
}

fn publish(store: Option<&dyn ArtifactStore>, settings: &CaSettings, crl: &Path) -> PublishStatus {
    let Some(store) = store else {
        return PublishStatus::Disabled;
    };
    let file_name = crl
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let key = format!("crl/{file_name}");

    match store.put(&key, crl, &settings.crl_bucket, true) {
        Ok(url) if !url.trim().is_empty() => {
            log::info!("published {} at {}", key, url);
            PublishStatus::Published { url }
        }
        Ok(_) => {
            let e = StoreError::NoUrl(key);
            log::warn!("upload failed: {}", e);
            PublishStatus::Failed { reason: e.to_string() }
        }
        Err(e) => {
            log::warn!("upload of {} failed: {}", key, e);
            PublishStatus::Failed { reason: e.to_string() }
        }
    }
}
