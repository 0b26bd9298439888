//! Inventory store: the persisted record of mounts this engine owns.
//!
//! The inventory, not live filesystem introspection, decides what gets torn
//! down. It is loaded once per activation and replaced as a whole after the
//! executor succeeds; it is never edited in place.
//!
//! Mounts do not survive a reboot, so the inventory is stamped with the boot
//! id it was written under. One carrying a different id is read as empty.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::{read_json_or_default, write_json_atomic};
use crate::defs::INVENTORY_FILE;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Overlay,
    Bind,
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlay => f.write_str("overlay"),
            Self::Bind => f.write_str("bind"),
        }
    }
}

/// One live mount created by this engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Partition the mount belongs to.
    pub partition: String,
    /// Overlay source label, or the file/dir bound for `Bind`.
    pub source: String,
    pub target: PathBuf,
    pub mount_type: MountType,
    /// Mount data needed to recreate the mount (overlay layer options).
    #[serde(default)]
    pub options: String,
}

impl fmt::Display for InventoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.mount_type,
            self.source,
            self.target.display()
        )
    }
}

/// Entries in creation order. Teardown walks them in reverse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Boot the entries were mounted under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_id: Option<String>,
    pub entries: Vec<InventoryEntry>,
    /// partition -> digest of the plan its entries were built from.
    #[serde(default)]
    pub fingerprints: BTreeMap<String, String>,
}

impl Inventory {
    pub fn path(statedir: &Path) -> PathBuf {
        statedir.join(INVENTORY_FILE)
    }

    pub fn load(statedir: &Path) -> Result<Self, StoreError> {
        read_json_or_default(&Self::path(statedir))
    }

    /// Load the inventory, discarding it when it was written under another boot.
    ///
    /// Without a current boot id nothing can be compared and the stored
    /// inventory is trusted.
    pub fn load_for_boot(statedir: &Path, boot_id: Option<&str>) -> Result<Self, StoreError> {
        let stored = Self::load(statedir)?;
        match (stored.boot_id.as_deref(), boot_id) {
            (Some(recorded), Some(current)) if recorded != current => {
                tracing::info!(
                    recorded,
                    current,
                    entries = stored.len(),
                    "inventory is from a previous boot, ignoring it"
                );
                Ok(Self {
                    boot_id: Some(current.to_string()),
                    ..Self::default()
                })
            }
            _ => Ok(stored),
        }
    }

    /// Atomically replace the persisted inventory with `self`.
    pub fn save(&self, statedir: &Path) -> Result<(), StoreError> {
        write_json_atomic(&Self::path(statedir), self)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries owned by `partition`, in creation order.
    pub fn for_partition<'a>(
        &'a self,
        partition: &'a str,
    ) -> impl Iterator<Item = &'a InventoryEntry> + 'a {
        self.entries.iter().filter(move |e| e.partition == partition)
    }

    pub fn partitions(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.partition.as_str()).collect()
    }

    pub fn find_target(&self, target: &Path) -> Option<&InventoryEntry> {
        self.entries.iter().find(|e| e.target == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(partition: &str, target: &str, mount_type: MountType) -> InventoryEntry {
        InventoryEntry {
            partition: partition.to_string(),
            source: "KSU".to_string(),
            target: PathBuf::from(target),
            mount_type,
            options: String::new(),
        }
    }

    #[test]
    fn test_load_without_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(Inventory::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_previous_inventory() {
        let dir = TempDir::new().unwrap();
        let first = Inventory {
            entries: vec![
                entry("system", "/system", MountType::Overlay),
                entry("vendor", "/vendor", MountType::Overlay),
            ],
            ..Inventory::default()
        };
        first.save(dir.path()).unwrap();

        let second = Inventory {
            entries: vec![entry("vendor", "/vendor/lib/a.so", MountType::Bind)],
            ..Inventory::default()
        };
        second.save(dir.path()).unwrap();

        let loaded = Inventory::load(dir.path()).unwrap();
        assert_eq!(loaded, second);
    }

    #[test]
    fn test_partition_queries() {
        let inventory = Inventory {
            entries: vec![
                entry("system", "/system", MountType::Overlay),
                entry("system", "/system/etc/hosts", MountType::Bind),
                entry("odm", "/odm", MountType::Overlay),
            ],
            ..Inventory::default()
        };
        assert_eq!(inventory.for_partition("system").count(), 2);
        assert_eq!(
            inventory.partitions().into_iter().collect::<Vec<_>>(),
            vec!["odm", "system"]
        );
        assert!(inventory.find_target(Path::new("/odm")).is_some());
        assert!(inventory.find_target(Path::new("/vendor")).is_none());
    }

    #[test]
    fn test_inventory_from_previous_boot_is_empty() {
        let dir = TempDir::new().unwrap();
        let inventory = Inventory {
            boot_id: Some("boot-1".to_string()),
            entries: vec![entry("system", "/system", MountType::Overlay)],
            ..Inventory::default()
        };
        inventory.save(dir.path()).unwrap();

        let same = Inventory::load_for_boot(dir.path(), Some("boot-1")).unwrap();
        assert_eq!(same, inventory);

        let next = Inventory::load_for_boot(dir.path(), Some("boot-2")).unwrap();
        assert!(next.is_empty());
        assert_eq!(next.boot_id.as_deref(), Some("boot-2"));

        // Unknown current boot: keep what was recorded.
        assert_eq!(Inventory::load_for_boot(dir.path(), None).unwrap(), inventory);
    }

    #[test]
    fn test_serialized_mount_type_is_lowercase() {
        let json = serde_json::to_string(&entry("system", "/system", MountType::Overlay)).unwrap();
        assert!(json.contains("\"mount_type\":\"overlay\""));
    }
}
