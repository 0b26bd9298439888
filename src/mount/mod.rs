//! Mount primitives.
//!
//! The executor only talks to the [`Mounter`] trait. [`CommandMounter`]
//! performs real mounts through `mount`/`umount`; [`RecordingMounter`]
//! records requests without touching the system (dry runs and tests).

pub mod command;
pub mod recording;

pub use command::CommandMounter;
pub use recording::{MountCall, RecordingMounter};

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::defs::{UMOUNT_BUSY_ATTEMPTS, UMOUNT_BUSY_DELAY_MS};
use crate::inventory::{InventoryEntry, MountType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    /// Target is in use. The only condition that is retried.
    #[error("{0} is busy")]
    Busy(PathBuf),

    /// The platform can't perform this kind of mount.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{op} on {target} failed: {message}")]
    Failed {
        op: &'static str,
        target: PathBuf,
        message: String,
    },
}

pub trait Mounter {
    /// Whether the kernel offers the overlay filesystem.
    fn supports_overlay(&self) -> bool;

    fn mount_overlay(&self, source: &str, target: &Path, options: &str) -> Result<(), MountError>;

    fn bind(&self, source: &Path, target: &Path) -> Result<(), MountError>;

    /// Atomically move an existing mount. `Unsupported` if the platform can't.
    fn move_mount(&self, from: &Path, to: &Path) -> Result<(), MountError>;

    fn unmount(&self, target: &Path) -> Result<(), MountError>;
}

/// Recreate the mount described by an inventory entry.
pub fn mount_entry(mounter: &dyn Mounter, entry: &InventoryEntry) -> Result<(), MountError> {
    match entry.mount_type {
        MountType::Overlay => mounter.mount_overlay(&entry.source, &entry.target, &entry.options),
        MountType::Bind => mounter.bind(Path::new(&entry.source), &entry.target),
    }
}

/// Unmount, retrying a fixed number of times while the target is busy.
pub fn unmount_with_retry(mounter: &dyn Mounter, target: &Path) -> Result<(), MountError> {
    let mut attempt = 1;
    loop {
        match mounter.unmount(target) {
            Err(MountError::Busy(_)) if attempt < UMOUNT_BUSY_ATTEMPTS => {
                tracing::debug!(target = %target.display(), attempt, "target busy, retrying unmount");
                thread::sleep(Duration::from_millis(UMOUNT_BUSY_DELAY_MS));
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_unmount_is_retried_then_succeeds() {
        let mounter = RecordingMounter::new();
        mounter.busy_for(Path::new("/system"), 2);

        unmount_with_retry(&mounter, Path::new("/system")).unwrap();
        assert_eq!(mounter.unmount_count(), 3);
    }

    #[test]
    fn test_busy_retry_is_bounded() {
        let mounter = RecordingMounter::new();
        mounter.busy_for(Path::new("/system"), 10);

        let err = unmount_with_retry(&mounter, Path::new("/system")).unwrap_err();
        assert_eq!(err, MountError::Busy(PathBuf::from("/system")));
        assert_eq!(mounter.unmount_count(), UMOUNT_BUSY_ATTEMPTS as usize);
    }

    #[test]
    fn test_other_failures_are_not_retried() {
        let mounter = RecordingMounter::new();
        mounter.fail_unmount_on(Path::new("/vendor"));

        assert!(unmount_with_retry(&mounter, Path::new("/vendor")).is_err());
        assert_eq!(mounter.unmount_count(), 1);
    }
}
