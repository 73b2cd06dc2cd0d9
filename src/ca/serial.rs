//! Serial number allocation
//!
//! One file per CA holds the next serial in hex, the format `openssl ca`
//! reads and advances. Every database operation against the CA takes an
//! exclusive advisory lock on a sibling `.lock` file; an allocation keeps
//! that lock until its lease is committed or dropped, so the engine's own
//! update of the counter happens inside the same critical section.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("serial counter {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serial counter {path} holds malformed value {content:?}")]
    Malformed { path: PathBuf, content: String },

    #[error("could not lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist serial counter {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Certificate serial as uppercase hex with an even number of digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(String);

impl SerialNumber {
    pub fn parse(text: &str) -> Option<Self> {
        let digits = text.trim();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let mut hex = digits.to_ascii_uppercase();
        if hex.len() % 2 == 1 {
            hex.insert(0, '0');
        }
        Some(Self(hex))
    }

    /// The serial that follows this one. Widens by a byte on overflow
    /// (`FF` -> `0100`).
    pub fn next(&self) -> Self {
        let mut digits: Vec<u8> = self.0.bytes().collect();
        let mut carry = true;
        for digit in digits.iter_mut().rev() {
            if !carry {
                break;
            }
            let value = (*digit as char).to_digit(16).unwrap_or(0) + 1;
            carry = value == 16;
            *digit = std::char::from_digit(value % 16, 16)
                .unwrap_or('0')
                .to_ascii_uppercase() as u8;
        }
        let mut hex = String::from_utf8_lossy(&digits).into_owned();
        if carry {
            hex.insert_str(0, "01");
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable per-CA serial counter.
#[derive(Clone, Debug)]
pub struct SerialCounter {
    path: PathBuf,
    lock_path: PathBuf,
}

impl SerialCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    /// Create the counter with `first` unless it already exists.
    pub fn initialize(path: impl Into<PathBuf>, first: &SerialNumber) -> Result<Self> {
        let counter = Self::new(path);
        if !counter.path.exists() {
            write_atomic(&counter.path, first)?;
        }
        Ok(counter)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value without taking the lock.
    pub fn peek(&self) -> Result<SerialNumber> {
        read_counter(&self.path)
    }

    /// Lock the CA and reserve the current serial.
    ///
    /// Blocks while another allocation or database operation holds the
    /// lock. The lease must be committed after a successful sign.
    pub fn allocate(&self) -> Result<SerialLease> {
        let lock = self.exclusive()?;
        let serial = read_counter(&self.path)?;
        log::debug!("allocated serial {} from {}", serial, self.path.display());
        Ok(SerialLease {
            path: self.path.clone(),
            serial,
            _lock: lock,
        })
    }

    /// Hold the CA lock without allocating, for revoke and CRL generation.
    pub fn exclusive(&self) -> Result<DatabaseLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| SerialError::Lock {
                path: self.lock_path.clone(),
                source,
            })?;
        file.lock().map_err(|source| SerialError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;
        Ok(DatabaseLock { _file: file })
    }
}

/// Exclusive hold on a CA database. Released on drop.
#[derive(Debug)]
pub struct DatabaseLock {
    _file: File,
}

/// A reserved serial. The CA stays locked while the lease lives.
#[derive(Debug)]
pub struct SerialLease {
    path: PathBuf,
    serial: SerialNumber,
    _lock: DatabaseLock,
}

impl SerialLease {
    pub fn serial(&self) -> &SerialNumber {
        &self.serial
    }

    /// Make sure the counter has moved past the leased serial.
    ///
    /// The engine normally advances the file when it updates its database.
    /// If the counter still holds the leased value it is advanced here.
    /// Returns the next serial the counter will hand out.
    pub fn commit(self) -> Result<SerialNumber> {
        let current = read_counter(&self.path)?;
        if current != self.serial {
            return Ok(current);
        }
        let next = self.serial.next();
        write_atomic(&self.path, &next)?;
        Ok(next)
    }
}

fn read_counter(path: &Path) -> Result<SerialNumber> {
    let content = fs::read_to_string(path).map_err(|source| SerialError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    SerialNumber::parse(&content).ok_or_else(|| SerialError::Malformed {
        path: path.to_path_buf(),
        content,
    })
}

/// Temp file, fsync, rename. Readers see the old or the new value, never a
/// torn write.
fn write_atomic(path: &Path, serial: &SerialNumber) -> Result<()> {
    let persist = |source| SerialError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let mut temp = path.to_path_buf().into_os_string();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp).map_err(persist)?;
    writeln!(file, "{serial}").map_err(persist)?;
    file.sync_all().map_err(persist)?;
    drop(file);

    fs::rename(&temp, path).map_err(persist)
}
