//! Real mounts via the system `mount`/`umount` tools.

use std::fs;
use std::path::Path;

use super::{MountError, Mounter};
use crate::defs::PROC_FILESYSTEMS;
use crate::process::{Cmd, CommandResult};

#[derive(Debug, Default, Clone, Copy)]
pub struct CommandMounter;

impl CommandMounter {
    pub fn new() -> Self {
        Self
    }

    fn exec(&self, op: &'static str, target: &Path, cmd: Cmd) -> Result<(), MountError> {
        let line = cmd.display();
        let result = cmd.allow_fail().run().map_err(|e| MountError::Failed {
            op,
            target: target.to_path_buf(),
            message: format!("{e:#}"),
        })?;
        if result.success() {
            tracing::debug!(cmd = %line, "ok");
            return Ok(());
        }
        Err(classify(op, target, &result))
    }
}

/// Map a failed command to a typed error from its stderr.
fn classify(op: &'static str, target: &Path, result: &CommandResult) -> MountError {
    let stderr = result.stderr_trimmed();
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("busy") {
        return MountError::Busy(target.to_path_buf());
    }
    if lower.contains("unrecognized option")
        || lower.contains("invalid option")
        || lower.contains("unknown filesystem type")
    {
        return MountError::Unsupported(format!("{op}: {stderr}"));
    }
    MountError::Failed {
        op,
        target: target.to_path_buf(),
        message: format!("exit code {}: {stderr}", result.code()),
    }
}

/// Whether an `overlay` line is present in a /proc/filesystems listing.
pub fn filesystems_list_overlay(listing: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().last() == Some("overlay"))
}

impl Mounter for CommandMounter {
    fn supports_overlay(&self) -> bool {
        match fs::read_to_string(PROC_FILESYSTEMS) {
            Ok(listing) => filesystems_list_overlay(&listing),
            Err(e) => {
                tracing::warn!("cannot read {PROC_FILESYSTEMS}: {e}");
                false
            }
        }
    }

    fn mount_overlay(&self, source: &str, target: &Path, options: &str) -> Result<(), MountError> {
        let cmd = Cmd::new("mount")
            .args(["-t", "overlay", source, "-o", options])
            .arg_path(target);
        self.exec("overlay", target, cmd)
    }

    fn bind(&self, source: &Path, target: &Path) -> Result<(), MountError> {
        let cmd = Cmd::new("mount").arg("--bind").arg_path(source).arg_path(target);
        self.exec("bind", target, cmd)
    }

    fn move_mount(&self, from: &Path, to: &Path) -> Result<(), MountError> {
        let cmd = Cmd::new("mount").arg("--move").arg_path(from).arg_path(to);
        self.exec("move", to, cmd)
    }

    fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let cmd = Cmd::new("umount").arg_path(target);
        self.exec("umount", target, cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_detection() {
        let with = "nodev\tsysfs\nnodev\ttmpfs\n\text4\nnodev\toverlay\n";
        let without = "nodev\tsysfs\n\text4\nnodev\toverlayfs-not\n";
        assert!(filesystems_list_overlay(with));
        assert!(!filesystems_list_overlay(without));
    }

    #[test]
    fn test_classify_busy_and_unsupported() {
        let result = Cmd::new("sh")
            .args(["-c", "echo 'umount: /system: target is busy.' >&2; exit 32"])
            .allow_fail()
            .run()
            .unwrap();
        assert_eq!(
            classify("umount", Path::new("/system"), &result),
            MountError::Busy("/system".into())
        );

        let result = Cmd::new("sh")
            .args(["-c", "echo 'mount: unrecognized option --move' >&2; exit 1"])
            .allow_fail()
            .run()
            .unwrap();
        assert!(matches!(
            classify("move", Path::new("/b"), &result),
            MountError::Unsupported(_)
        ));
    }

    #[test]
    fn test_unmount_of_non_mountpoint_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = CommandMounter::new().unmount(dir.path()).unwrap_err();
        assert!(!matches!(err, MountError::Busy(_)));
    }
}
