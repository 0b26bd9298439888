//! Engine-wide exclusive lock.
//!
//! Held for every operation that mutates mounts or the inventory. Taking it
//! never blocks: a second activation fails fast with `LockContention`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::defs::LOCK_FILE;
use crate::error::{EngineError, EngineResult};

/// Released when dropped (closing the fd drops the flock).
#[derive(Debug)]
pub struct EngineLock {
    _file: File,
    path: PathBuf,
}

impl EngineLock {
    pub fn acquire(statedir: &Path) -> EngineResult<Self> {
        fs::create_dir_all(statedir)?;
        let path = statedir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        // SAFETY: the fd is valid for the lifetime of `file`.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(EngineError::LockContention(path));
            }
            return Err(EngineError::Io(err));
        }

        tracing::debug!(path = %path.display(), "engine lock acquired");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
