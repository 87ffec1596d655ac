use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::SyncError;

pub const LOCK_FILE_NAME: &str = "transfer.running";

/// Single-instance guard: an empty sentinel file whose existence alone means
/// "an invocation is in progress". Exclusive create gives mutual exclusion on
/// a local filesystem; there is no in-process locking because there is no
/// in-process concurrency.
#[derive(Debug)]
pub struct DaemonLock {
    path: PathBuf,
}

impl DaemonLock {
    /// Create the marker, failing with `SyncError::LockHeld` if it already
    /// exists. Callers must exit without touching any other state on that
    /// error.
    pub fn acquire(workdir: &Path) -> Result<Self> {
        let path = workdir.join(LOCK_FILE_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(SyncError::LockHeld(path).into())
            }
            Err(e) => {
                Err(e).with_context(|| format!("cannot create lock marker {}", path.display()))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker. Only called when no operator action is pending.
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path)
            .with_context(|| format!("cannot remove lock marker {}", self.path.display()))
    }

    /// Deliberately leave the marker behind so every following cron tick
    /// exits early instead of re-alerting, until an operator removes it.
    pub fn keep(self) {
        tracing::warn!(
            "leaving lock marker {} in place; remove it after fixing the reported condition",
            self.path.display()
        );
    }
}
