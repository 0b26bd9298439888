//! Winnowing rule store: user-chosen winners for contested paths.
//!
//! Rules are only written by explicit user action (or the prune policy).
//! A rule naming a module that doesn't contend for its path stays on disk,
//! inert, until that module contends again or the rule is cleared.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::common::{read_json_or_default, write_json_atomic};
use crate::defs::WINNOWING_FILE;
use crate::error::{EngineError, EngineResult, StoreError};

/// partition -> relative path -> module id.
type RuleMap = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WinnowingRules {
    path: PathBuf,
    rules: RuleMap,
}

impl WinnowingRules {
    pub fn load(statedir: &Path) -> Result<Self, StoreError> {
        let path = statedir.join(WINNOWING_FILE);
        let rules = read_json_or_default(&path)?;
        Ok(Self { path, rules })
    }

    pub fn get(&self, partition: &str, relative_path: &str) -> Option<&str> {
        self.rules
            .get(partition)
            .and_then(|paths| paths.get(relative_path))
            .map(String::as_str)
    }

    /// Set the winner for a path. Returns whether anything changed.
    pub fn set(
        &mut self,
        partition: &str,
        relative_path: &str,
        module_id: &str,
    ) -> Result<bool, StoreError> {
        if self.get(partition, relative_path) == Some(module_id) {
            return Ok(false);
        }
        self.rules
            .entry(partition.to_string())
            .or_default()
            .insert(relative_path.to_string(), module_id.to_string());
        self.save()?;
        Ok(true)
    }

    /// Remove the rule for a path. Returns whether one existed.
    pub fn clear(&mut self, partition: &str, relative_path: &str) -> Result<bool, StoreError> {
        let removed = self
            .rules
            .get_mut(partition)
            .and_then(|paths| paths.remove(relative_path))
            .is_some();
        if removed {
            self.rules.retain(|_, paths| !paths.is_empty());
            self.save()?;
        }
        Ok(removed)
    }

    /// Delete every rule whose module fails `keep`. Returns the number deleted.
    pub fn prune<F>(&mut self, keep: F) -> Result<usize, StoreError>
    where
        F: Fn(&str) -> bool,
    {
        let before = self.len();
        for paths in self.rules.values_mut() {
            paths.retain(|_, module| keep(module));
        }
        self.rules.retain(|_, paths| !paths.is_empty());
        let removed = before - self.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (partition, relative_path, module_id) for every rule.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.rules.iter().flat_map(|(partition, paths)| {
            paths
                .iter()
                .map(move |(rel, module)| (partition.as_str(), rel.as_str(), module.as_str()))
        })
    }

    fn save(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &self.rules)
    }
}

/// Split `/partition/relative/path` into its partition and relative path.
///
/// The partition must be one of `partitions`. `.` segments and duplicate
/// slashes are dropped; `..` is rejected.
pub fn parse_rule_path(full_path: &str, partitions: &[String]) -> EngineResult<(String, String)> {
    let invalid = || EngineError::InvalidRulePath(full_path.to_string());

    let mut segments = Vec::new();
    for component in Path::new(full_path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(s) => segments.push(s.to_str().ok_or_else(invalid)?),
            Component::ParentDir | Component::Prefix(_) => return Err(invalid()),
        }
    }

    let Some((partition, rest)) = segments.split_first() else {
        return Err(invalid());
    };
    if rest.is_empty() || !partitions.iter().any(|p| p == partition) {
        return Err(invalid());
    }
    Ok((partition.to_string(), rest.join("/")))
}
