//! Fixed names and locations shared across the engine.

/// Partitions a module may contribute to when the config does not override the list.
pub const DEFAULT_PARTITIONS: &[&str] = &["system", "vendor", "product", "system_ext", "odm", "oem"];

/// Module flag files. Any of these present in a module directory excludes it from the scan.
pub const DISABLE_FILE_NAME: &str = "disable";
pub const REMOVE_FILE_NAME: &str = "remove";
pub const SKIP_MOUNT_FILE_NAME: &str = "skip_mount";

/// Per-module metadata file (key=value lines).
pub const MODULE_PROP_FILE: &str = "module.prop";

pub const DEFAULT_MODULE_DIR: &str = "/data/adb/modules";
pub const DEFAULT_STATE_DIR: &str = "/data/adb/modlayer";
pub const DEFAULT_CONFIG_FILE: &str = "/data/adb/modlayer/config.toml";
pub const DEFAULT_MOUNT_SOURCE: &str = "KSU";

/// Files kept under the state directory.
pub const INVENTORY_FILE: &str = "inventory.json";
pub const WINNOWING_FILE: &str = "winnowing.json";
pub const MODULE_PREFS_FILE: &str = "module_prefs.json";
pub const LOCK_FILE: &str = ".lock";
pub const RUN_LOG_FILE: &str = "run.log";

/// Directory created inside the selected temp root for overlay upper/work layers.
pub const TEMP_WORK_DIR: &str = ".modlayer";

/// Candidate temp roots tried in order when `tempdir` is not configured.
pub const TEMP_DIR_CANDIDATES: &[&str] = &["/debug_ramdisk", "/patch_hw", "/oem", "/root", "/sbin"];

/// Changes on every boot. Inventories stamped with another id describe mounts that are gone.
pub const DEFAULT_BOOT_ID_FILE: &str = "/proc/sys/kernel/random/boot_id";

/// Source of truth for overlay driver availability.
pub const PROC_FILESYSTEMS: &str = "/proc/filesystems";

/// Unmount attempts for a busy mount point before giving up.
pub const UMOUNT_BUSY_ATTEMPTS: u32 = 3;
pub const UMOUNT_BUSY_DELAY_MS: u64 = 100;
