//! Deliverable archives

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("artifact {0} is missing")]
    MissingArtifact(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Zip `files` (names relative to `dir`) into `dir/archive_name`.
///
/// Entries are stored flat under their file names. The archive is written
/// to `{archive_name}.partial` and renamed into place once complete.
pub fn package(dir: &Path, archive_name: &str, files: &[String]) -> Result<PathBuf> {
    for name in files {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(ArchiveError::MissingArtifact(path));
        }
    }

    let archive = dir.join(archive_name);
    let partial = dir.join(format!("{archive_name}.partial"));
    if let Err(e) = write_zip(dir, &partial, files) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, &archive).map_err(|source| ArchiveError::Io {
        path: archive.clone(),
        source,
    })?;

    log::info!("packaged {} artifacts into {}", files.len(), archive.display());
    Ok(archive)
}

fn write_zip(dir: &Path, out: &Path, files: &[String]) -> Result<()> {
    let file = File::create(out).map_err(|source| ArchiveError::Io {
        path: out.to_path_buf(),
        source,
    })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o600);

    for name in files {
        let path = dir.join(name);
        let mut source = File::open(&path).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        zip.start_file(name.as_str(), options)?;
        io::copy(&mut source, &mut zip).map_err(|source| ArchiveError::Io { path, source })?;
    }

    let file = zip.finish()?;
    file.sync_all().map_err(|source| ArchiveError::Io {
        path: out.to_path_buf(),
        source,
    })
}
