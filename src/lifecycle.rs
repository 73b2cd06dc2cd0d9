//! Completed-directory lifecycle
//!
//! [`DirectoryManager`] is the only writer of the completed hierarchy.
//! Promotion copies a staging directory into a hidden sibling of the target
//! and renames it into place, so a reader never sees a half-copied
//! certificate directory. Promotion and revocation of the same path are
//! serialized through a keyed lock.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("invalid directory name {0:?}")]
    InvalidName(String),

    /// The caller's finishing step rejected the incoming copy
    #[error("{0}")]
    Finish(String),

    #[cfg(test)]
    #[error("injected failure after {0} files")]
    Injected(usize),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> LifecycleError + '_ {
    move |source| LifecycleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What happened to a revoked tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Deleted,
    Retained(PathBuf),
    /// Nothing was on disk
    Absent,
}

#[derive(Default, Debug)]
struct KeyedLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl KeyedLocks {
    fn acquire(&self, key: &Path) -> KeyGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.to_path_buf());
        KeyGuard {
            locks: self,
            key: key.to_path_buf(),
        }
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: PathBuf,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        self.locks.released.notify_all();
    }
}

/// Owns the completed hierarchy.
#[derive(Debug)]
pub struct DirectoryManager {
    locks: KeyedLocks,
    /// Where revoked trees go when retained; `None` deletes them
    revoked_dir: Option<PathBuf>,
    #[cfg(test)]
    fail_after_files: Option<usize>,
}

impl Default for DirectoryManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DirectoryManager {
    pub fn new(revoked_dir: Option<PathBuf>) -> Self {
        Self {
            locks: KeyedLocks::default(),
            revoked_dir,
            #[cfg(test)]
            fail_after_files: None,
        }
    }

    /// Copy `staging` to `{parent}/{name}`, replacing any previous directory
    /// of that name. The staging directory is left intact.
    ///
    /// `finish` runs on the hidden copy before it is renamed into place,
    /// under the same keyed lock. If it fails, the copy is dropped and any
    /// previous directory is left as it was.
    pub fn promote<F>(&self, staging: &Path, parent: &Path, name: &str, finish: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> std::result::Result<(), String>,
    {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(LifecycleError::InvalidName(name.to_string()));
        }
        if !staging.is_dir() {
            return Err(LifecycleError::NotADirectory(staging.to_path_buf()));
        }
        fs::create_dir_all(parent).map_err(io_at(parent))?;

        let target = parent.join(name);
        let _guard = self.locks.acquire(&target);

        let token = Uuid::new_v4().simple();
        let incoming = parent.join(format!(".{name}.incoming-{token}"));
        let mut copied = 0usize;
        if let Err(e) = self.copy_tree(staging, &incoming, &mut copied) {
            let _ = fs::remove_dir_all(&incoming);
            return Err(e);
        }
        if let Err(reason) = finish(&incoming) {
            let _ = fs::remove_dir_all(&incoming);
            return Err(LifecycleError::Finish(reason));
        }

        // Last issuance wins. Move the old tree aside so it can be restored
        // if the final rename fails.
        let superseded = parent.join(format!(".{name}.superseded-{token}"));
        let had_previous = target.exists();
        if had_previous {
            if let Err(source) = fs::rename(&target, &superseded) {
                let _ = fs::remove_dir_all(&incoming);
                return Err(LifecycleError::Io { path: target, source });
            }
        }

        if let Err(source) = fs::rename(&incoming, &target) {
            let _ = fs::remove_dir_all(&incoming);
            if had_previous {
                let _ = fs::rename(&superseded, &target);
            }
            return Err(LifecycleError::Io { path: target, source });
        }

        if had_previous {
            log::info!("replaced existing {}", target.display());
            if let Err(e) = fs::remove_dir_all(&superseded) {
                log::warn!("could not remove superseded {}: {}", superseded.display(), e);
            }
        }

        Ok(target)
    }

    /// Tear down a completed directory. A missing directory is not an error.
    pub fn revoke(&self, completed: &Path) -> Result<Disposition> {
        let _guard = self.locks.acquire(completed);

        if !completed.exists() {
            return Ok(Disposition::Absent);
        }

        match &self.revoked_dir {
            Some(revoked_dir) => {
                fs::create_dir_all(revoked_dir).map_err(io_at(revoked_dir))?;
                let name = completed
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
                let dest = revoked_dir.join(format!("{stamp}-{name}"));
                fs::rename(completed, &dest).map_err(io_at(completed))?;
                log::info!("retained revoked {} at {}", completed.display(), dest.display());
                Ok(Disposition::Retained(dest))
            }
            None => {
                fs::remove_dir_all(completed).map_err(io_at(completed))?;
                log::info!("deleted {}", completed.display());
                Ok(Disposition::Deleted)
            }
        }
    }

    fn copy_tree(&self, from: &Path, to: &Path, copied: &mut usize) -> Result<()> {
        fs::create_dir(to).map_err(io_at(to))?;
        for entry in fs::read_dir(from).map_err(io_at(from))? {
            let entry = entry.map_err(io_at(from))?;
            let src = entry.path();
            let dest = to.join(entry.file_name());
            let file_type = entry.file_type().map_err(io_at(&src))?;
            if file_type.is_dir() {
                self.copy_tree(&src, &dest, copied)?;
            } else {
                #[cfg(test)]
                if self.fail_after_files == Some(*copied) {
                    return Err(LifecycleError::Injected(*copied));
                }
                fs::copy(&src, &dest).map_err(io_at(&src))?;
                *copied += 1;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fail_after(mut self, files: usize) -> Self {
        self.fail_after_files = Some(files);
        self
    }
}
