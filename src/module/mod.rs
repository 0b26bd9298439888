//! Modules as seen by one planning cycle.
//!
//! A [`Module`] is built by the scanner from on-disk state and is immutable
//! for the rest of the activation. Its [`Rank`] is fixed at scan time so that
//! reruns order modules identically regardless of collection iteration order.

pub mod prefs;
pub mod scanner;

pub use prefs::{ModulePref, ModulePrefs};
pub use scanner::{scan_modules, ScanReport};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mount strategy a module asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    /// Let the planner decide.
    #[default]
    Auto,
    Overlay,
    Graft,
    /// Contribute nothing (to one partition, or to all of them).
    Ignore,
}

impl FromStr for MountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "overlay" | "overlayfs" => Ok(Self::Overlay),
            "graft" | "magic" => Ok(Self::Graft),
            "ignore" | "none" => Ok(Self::Ignore),
            other => Err(format!(
                "unknown mount mode '{other}' (expected auto, overlay, graft or ignore)"
            )),
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Overlay => "overlay",
            Self::Graft => "graft",
            Self::Ignore => "ignore",
        };
        f.write_str(s)
    }
}

/// Stable priority of a module within one scan.
///
/// Ordering is lexicographic over the fields: a lower `priority` wins, equal
/// priorities fall back to scan position, then to the module id. Two modules
/// never compare equal because ids are unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rank {
    pub priority: u32,
    pub scan_index: u32,
    pub id: String,
}

/// An enabled module with content on at least one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Module {
    /// Directory name, unique within the module root.
    pub id: String,
    /// Display name from `module.prop`, or the id.
    pub name: String,
    pub path: PathBuf,
    /// Effective mode after persisted overrides.
    pub mode: MountMode,
    /// partition -> mode, where it differs from `mode`.
    pub partition_modes: BTreeMap<String, MountMode>,
    pub rank: Rank,
    /// partition -> relative file paths this module provides there.
    pub contributions: BTreeMap<String, BTreeSet<String>>,
}

impl Module {
    /// Partitions this module contributes to.
    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.contributions.keys().map(String::as_str)
    }

    /// Mode this module asks for on one partition.
    pub fn mode_for(&self, partition: &str) -> MountMode {
        self.partition_modes.get(partition).copied().unwrap_or(self.mode)
    }

    /// Root of this module's subtree for `partition`.
    pub fn partition_dir(&self, partition: &str) -> PathBuf {
        self.path.join(partition)
    }

    /// Absolute path of one contributed file.
    pub fn file_path(&self, partition: &str, relative_path: &str) -> PathBuf {
        self.partition_dir(partition).join(Path::new(relative_path))
    }

    pub fn provides(&self, partition: &str, relative_path: &str) -> bool {
        self.contributions
            .get(partition)
            .is_some_and(|files| files.contains(relative_path))
    }

    /// The `{id, name, mode}` view exposed to the control panel.
    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            mode: self.mode,
            partition_modes: self.partition_modes.clone(),
        }
    }
}

/// Scanner output as reported by `modlayer scan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub mode: MountMode,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partition_modes: BTreeMap<String, MountMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(priority: u32, scan_index: u32, id: &str) -> Rank {
        Rank {
            priority,
            scan_index,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("graft".parse::<MountMode>().unwrap(), MountMode::Graft);
        assert_eq!(" Overlay ".parse::<MountMode>().unwrap(), MountMode::Overlay);
        assert_eq!("magic".parse::<MountMode>().unwrap(), MountMode::Graft);
        assert_eq!("ignore".parse::<MountMode>().unwrap(), MountMode::Ignore);
        assert!("bind".parse::<MountMode>().is_err());
    }

    #[test]
    fn test_partition_mode_overrides_module_mode() {
        let module = Module {
            id: "m".to_string(),
            name: "m".to_string(),
            path: PathBuf::from("/modules/m"),
            mode: MountMode::Graft,
            partition_modes: BTreeMap::from([("vendor".to_string(), MountMode::Ignore)]),
            rank: rank(0, 0, "m"),
            contributions: BTreeMap::new(),
        };
        assert_eq!(module.mode_for("system"), MountMode::Graft);
        assert_eq!(module.mode_for("vendor"), MountMode::Ignore);
    }

    #[test]
    fn test_rank_orders_priority_then_scan_then_id() {
        let mut ranks = vec![
            rank(1, 0, "a"),
            rank(0, 5, "z"),
            rank(0, 5, "b"),
            rank(0, 2, "y"),
        ];
        ranks.sort();
        let ids: Vec<&str> = ranks.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "b", "z", "a"]);
    }
}
