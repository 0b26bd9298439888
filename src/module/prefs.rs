//! Persisted per-module overrides set from the control panel.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::MountMode;
use crate::common::{read_json_or_default, write_json_atomic};
use crate::defs::MODULE_PREFS_FILE;
use crate::error::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePref {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MountMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// partition -> mode for that partition only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partitions: BTreeMap<String, MountMode>,
}

impl ModulePref {
    fn is_empty(&self) -> bool {
        self.mode.is_none() && self.priority.is_none() && self.partitions.is_empty()
    }
}

/// Mode and priority overrides keyed by module id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulePrefs {
    path: PathBuf,
    prefs: BTreeMap<String, ModulePref>,
}

impl ModulePrefs {
    pub fn load(statedir: &Path) -> Result<Self, StoreError> {
        let path = statedir.join(MODULE_PREFS_FILE);
        let prefs = read_json_or_default(&path)?;
        Ok(Self { path, prefs })
    }

    pub fn get(&self, id: &str) -> Option<&ModulePref> {
        self.prefs.get(id)
    }

    pub fn set_mode(&mut self, id: &str, mode: Option<MountMode>) -> Result<(), StoreError> {
        self.prefs.entry(id.to_string()).or_default().mode = mode;
        self.save()
    }

    pub fn set_priority(&mut self, id: &str, priority: Option<u32>) -> Result<(), StoreError> {
        self.prefs.entry(id.to_string()).or_default().priority = priority;
        self.save()
    }

    pub fn set_partition_mode(
        &mut self,
        id: &str,
        partition: &str,
        mode: Option<MountMode>,
    ) -> Result<(), StoreError> {
        let pref = self.prefs.entry(id.to_string()).or_default();
        match mode {
            Some(mode) => {
                pref.partitions.insert(partition.to_string(), mode);
            }
            None => {
                pref.partitions.remove(partition);
            }
        }
        self.save()
    }

    fn save(&mut self) -> Result<(), StoreError> {
        self.prefs.retain(|_, pref| !pref.is_empty());
        write_json_atomic(&self.path, &self.prefs)
    }
}
