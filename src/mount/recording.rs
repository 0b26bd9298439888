//! A mounter that records requests instead of performing them.
//!
//! Backs `modlayer mount --dry-run` and the executor tests. It keeps a model
//! of the live mount table so callers can check what would be mounted after a
//! sequence of operations, and can inject failures per target.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{MountError, Mounter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Overlay {
        source: String,
        target: PathBuf,
        options: String,
    },
    Bind {
        source: PathBuf,
        target: PathBuf,
    },
    Move {
        from: PathBuf,
        to: PathBuf,
    },
    Unmount {
        target: PathBuf,
    },
}

#[derive(Debug, Default)]
struct State {
    /// Successful operations, in order.
    calls: Vec<MountCall>,
    /// Modelled mount table: (target, what is mounted there).
    live: Vec<(PathBuf, MountCall)>,
    unmount_attempts: usize,
    /// Mount requests at or below these paths fail.
    fail_mount: Vec<PathBuf>,
    fail_unmount: Vec<PathBuf>,
    /// Remaining busy responses per unmount target.
    busy: HashMap<PathBuf, u32>,
}

#[derive(Debug)]
pub struct RecordingMounter {
    overlay: bool,
    move_supported: bool,
    state: Mutex<State>,
}

impl Default for RecordingMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingMounter {
    pub fn new() -> Self {
        Self {
            overlay: true,
            move_supported: true,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_overlay(mut self, supported: bool) -> Self {
        self.overlay = supported;
        self
    }

    pub fn without_move(mut self) -> Self {
        self.move_supported = false;
        self
    }

    /// Fail every mount whose target is `path` or lies under it.
    pub fn fail_on(&self, path: &Path) {
        self.lock().fail_mount.push(path.to_path_buf());
    }

    pub fn fail_unmount_on(&self, path: &Path) {
        self.lock().fail_unmount.push(path.to_path_buf());
    }

    /// Report `target` busy for the next `times` unmount attempts.
    pub fn busy_for(&self, target: &Path, times: u32) {
        self.lock().busy.insert(target.to_path_buf(), times);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.fail_mount.clear();
        state.fail_unmount.clear();
        state.busy.clear();
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn unmount_count(&self) -> usize {
        self.lock().unmount_attempts
    }

    /// Targets currently mounted in the model, in mount order.
    pub fn mounted(&self) -> Vec<PathBuf> {
        self.lock().live.iter().map(|(t, _)| t.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicking test thread must not hide the recorded state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_mount(&self, op: &'static str, target: &Path, call: MountCall) -> Result<(), MountError> {
        let mut state = self.lock();
        if state.fail_mount.iter().any(|p| target.starts_with(p)) {
            return Err(MountError::Failed {
                op,
                target: target.to_path_buf(),
                message: "injected failure".to_string(),
            });
        }
        tracing::info!(target = %target.display(), "[dry-run] {op}");
        state.calls.push(call.clone());
        state.live.push((target.to_path_buf(), call));
        Ok(())
    }
}

impl Mounter for RecordingMounter {
    fn supports_overlay(&self) -> bool {
        self.overlay
    }

    fn mount_overlay(&self, source: &str, target: &Path, options: &str) -> Result<(), MountError> {
        self.record_mount(
            "overlay",
            target,
            MountCall::Overlay {
                source: source.to_string(),
                target: target.to_path_buf(),
                options: options.to_string(),
            },
        )
    }

    fn bind(&self, source: &Path, target: &Path) -> Result<(), MountError> {
        self.record_mount(
            "bind",
            target,
            MountCall::Bind {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
            },
        )
    }

    fn move_mount(&self, from: &Path, to: &Path) -> Result<(), MountError> {
        if !self.move_supported {
            return Err(MountError::Unsupported("move mount".to_string()));
        }
        let mut state = self.lock();
        if state.fail_mount.iter().any(|p| to.starts_with(p)) {
            return Err(MountError::Failed {
                op: "move",
                target: to.to_path_buf(),
                message: "injected failure".to_string(),
            });
        }
        let Some(slot) = state.live.iter().rposition(|(t, _)| t == from) else {
            return Err(MountError::Failed {
                op: "move",
                target: from.to_path_buf(),
                message: "not mounted".to_string(),
            });
        };
        state.live[slot].0 = to.to_path_buf();
        state.calls.push(MountCall::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let mut state = self.lock();
        state.unmount_attempts += 1;

        if let Some(remaining) = state.busy.get_mut(target) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MountError::Busy(target.to_path_buf()));
            }
        }
        if state.fail_unmount.iter().any(|p| target.starts_with(p)) {
            return Err(MountError::Failed {
                op: "umount",
                target: target.to_path_buf(),
                message: "injected failure".to_string(),
            });
        }

        // Unknown targets are accepted: a dry run starts from an empty model.
        if let Some(slot) = state.live.iter().rposition(|(t, _)| t == target) {
            state.live.remove(slot);
        }
        state.calls.push(MountCall::Unmount {
            target: target.to_path_buf(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_tracks_mount_and_unmount() {
        let mounter = RecordingMounter::new();
        mounter.mount_overlay("KSU", Path::new("/system"), "lowerdir=/a:/system").unwrap();
        mounter.bind(Path::new("/m/x"), Path::new("/system/x")).unwrap();
        assert_eq!(mounter.mounted(), vec![PathBuf::from("/system"), PathBuf::from("/system/x")]);

        mounter.unmount(Path::new("/system/x")).unwrap();
        assert_eq!(mounter.mounted(), vec![PathBuf::from("/system")]);
        assert_eq!(mounter.calls().len(), 3);
    }

    #[test]
    fn test_injected_failure_covers_subtree() {
        let mounter = RecordingMounter::new();
        mounter.fail_on(Path::new("/vendor"));
        assert!(mounter.bind(Path::new("/m/a"), Path::new("/vendor/lib/a.so")).is_err());
        assert!(mounter.bind(Path::new("/m/a"), Path::new("/system/a")).is_ok());
        assert!(mounter.mounted().iter().all(|t| !t.starts_with("/vendor")));
    }

    #[test]
    fn test_move_without_support_is_unsupported() {
        let mounter = RecordingMounter::new().without_move();
        let err = mounter.move_mount(Path::new("/a"), Path::new("/b")).unwrap_err();
        assert!(matches!(err, MountError::Unsupported(_)));
    }
}
