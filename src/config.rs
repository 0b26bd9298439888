//! Configuration management for modlayer.
//!
//! Reads configuration from a TOML file and environment variables.
//! Environment variables take precedence over the file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::defs::{
    DEFAULT_BOOT_ID_FILE, DEFAULT_MODULE_DIR, DEFAULT_MOUNT_SOURCE, DEFAULT_PARTITIONS,
    DEFAULT_STATE_DIR,
};

/// What happens to a winnowing rule whose module is no longer installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinnowingPolicy {
    /// Rules stay dormant and reactivate if the module comes back.
    #[default]
    Keep,
    /// Rules naming a module absent from the scan are deleted at plan time.
    Prune,
}

/// modlayer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root containing module directories.
    pub moduledir: PathBuf,
    /// Writable scratch root for overlay upper/work layers (auto-selected if unset).
    pub tempdir: Option<PathBuf>,
    /// Source label for overlay mounts.
    pub mountsource: String,
    /// Debug-level logging. No behavioral effect.
    pub verbose: bool,
    /// Explicit partition allow-list; empty means the built-in list.
    pub partitions: Vec<String>,
    /// Tear down everything this engine owns instead of planning.
    pub umount: bool,
    /// Where inventory, rules, lock and run log live.
    pub statedir: PathBuf,
    /// Allow the overlay strategy. `false` forces graft everywhere.
    pub overlay: bool,
    pub winnowing_policy: WinnowingPolicy,
    /// Live system root that partition names are resolved against.
    pub root: PathBuf,
    /// File holding the current boot id; ties the inventory to one boot.
    pub boot_id_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            moduledir: PathBuf::from(DEFAULT_MODULE_DIR),
            tempdir: None,
            mountsource: DEFAULT_MOUNT_SOURCE.to_string(),
            verbose: false,
            partitions: Vec::new(),
            umount: false,
            statedir: PathBuf::from(DEFAULT_STATE_DIR),
            overlay: true,
            winnowing_policy: WinnowingPolicy::Keep,
            root: PathBuf::from("/"),
            boot_id_file: PathBuf::from(DEFAULT_BOOT_ID_FILE),
        }
    }
}

impl Config {
    /// Load configuration from `path` and the process environment.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(std::env::vars());
        Ok(config)
    }

    /// Parse the TOML file at `path`, or return defaults if it doesn't exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply `MODLAYER_*` overrides.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env_vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with("MODLAYER_"))
            .collect();

        if let Some(dir) = env_vars.get("MODLAYER_MODULEDIR") {
            self.moduledir = PathBuf::from(dir);
        }
        if let Some(dir) = env_vars.get("MODLAYER_TEMPDIR") {
            self.tempdir = Some(PathBuf::from(dir));
        }
        if let Some(verbose) = env_vars.get("MODLAYER_VERBOSE") {
            self.verbose = matches!(verbose.trim(), "1" | "true" | "yes");
        }
    }

    /// Partition allow-list in effect for this configuration.
    pub fn partition_list(&self) -> Vec<String> {
        if self.partitions.is_empty() {
            DEFAULT_PARTITIONS.iter().map(|p| p.to_string()).collect()
        } else {
            self.partitions.clone()
        }
    }

    /// Id of the running boot, or `None` when it can't be read.
    pub fn boot_id(&self) -> Option<String> {
        match fs::read_to_string(&self.boot_id_file) {
            Ok(id) => Some(id.trim().to_string()).filter(|id| !id.is_empty()),
            Err(e) => {
                tracing::debug!(path = %self.boot_id_file.display(), "no boot id: {e}");
                None
            }
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  moduledir:        {}", self.moduledir.display());
        match &self.tempdir {
            Some(dir) => println!("  tempdir:          {}", dir.display()),
            None => println!("  tempdir:          (auto)"),
        }
        println!("  mountsource:      {}", self.mountsource);
        println!("  verbose:          {}", self.verbose);
        println!("  partitions:       {}", self.partition_list().join(", "));
        println!("  umount:           {}", self.umount);
        println!("  statedir:         {}", self.statedir.display());
        println!("  overlay:          {}", self.overlay);
        println!("  winnowing_policy: {:?}", self.winnowing_policy);
        println!("  root:             {}", self.root.display());
        println!("  boot_id_file:     {}", self.boot_id_file.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_file(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.partition_list().len(), DEFAULT_PARTITIONS.len());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "moduledir = \"/tmp/mods\"\npartitions = [\"system\", \"my_custom\"]\nwinnowing_policy = \"prune\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.moduledir, PathBuf::from("/tmp/mods"));
        assert_eq!(config.partition_list(), vec!["system", "my_custom"]);
        assert_eq!(config.winnowing_policy, WinnowingPolicy::Prune);
        assert_eq!(config.mountsource, DEFAULT_MOUNT_SOURCE);
        assert!(config.overlay);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "verbose = maybe").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        config.apply_env(vec![
            ("MODLAYER_MODULEDIR".to_string(), "/env/mods".to_string()),
            ("MODLAYER_VERBOSE".to_string(), "1".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);
        assert_eq!(config.moduledir, PathBuf::from("/env/mods"));
        assert!(config.verbose);
        assert!(config.tempdir.is_none());
    }

    #[test]
    fn test_boot_id_is_trimmed_and_optional() {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            boot_id_file: dir.path().join("boot_id"),
            ..Config::default()
        };
        assert_eq!(config.boot_id(), None);

        fs::write(&config.boot_id_file, "4a1f-77\n").unwrap();
        assert_eq!(config.boot_id().as_deref(), Some("4a1f-77"));

        config.boot_id_file = dir.path().join("missing");
        assert_eq!(config.boot_id(), None);
    }
}
