//! Append-only on-disk message log.
//!
//! The store is a single file at a fixed path holding the raw bytes of every
//! message received during the current run, with no header or framing.
//! Appends and reads open the file independently. No locking is done here:
//! the accept loop serves one connection at a time, so an append and the
//! read that follows it are never interleaved with another client's. A server
//! that handles connections concurrently would need to hold a lock across
//! each append+read pair to keep "a client sees its own append".

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Permission bits for a newly created store file.
const STORE_MODE: u32 = 0o644;

/// Handle to the store file. Holds only the path; no descriptor stays open
/// between operations.
#[derive(Debug, Clone)]
pub struct PersistentStore {
    path: PathBuf,
}

impl PersistentStore {
    /// Create a handle for the store at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `data` to the end of the store, creating the file if absent.
    ///
    /// Earlier contents are never rewritten.
    pub fn append(&self, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(STORE_MODE)
            .open(&self.path)?;
        file.write_all(data)?;
        trace!(bytes = data.len(), path = %self.path.display(), "Appended to store");
        Ok(())
    }

    /// Open the store for reading from the beginning.
    pub fn open_reader(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    /// Delete the store file.
    ///
    /// Returns `Ok(false)` if there was nothing to delete.
    pub fn remove(&self) -> io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Store removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
