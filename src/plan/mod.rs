//! Planning: partition strategies, conflict detection and winnowing.
//!
//! ```text
//! [Module]  ──planner──▶  RawPlan  ──resolver(+rules)──▶  ResolvedPlan  ──▶ executor
//! ```
//!
//! The raw plan depends only on scanned module contents, so it can be kept
//! and re-resolved when a winnowing rule changes without rescanning.

pub mod planner;
pub mod resolver;
pub mod rules;

pub use planner::{plan, PlanOptions};
pub use resolver::resolve;
pub use rules::{parse_rule_path, WinnowingRules};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::module::Rank;

/// How a partition's modules are applied. Chosen once per partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Read-only lower layers under a private writable upper layer.
    Overlay,
    /// Per-file bind placement over the existing partition tree.
    Graft,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlay => f.write_str("overlay"),
            Self::Graft => f.write_str("graft"),
        }
    }
}

/// One module's subtree for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLayer {
    pub id: String,
    pub rank: Rank,
    /// `<module>/<partition>` on disk.
    pub dir: PathBuf,
}

/// Partition plan before conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub name: String,
    /// Mount point on the live system (symlinks resolved).
    pub target: PathBuf,
    pub strategy: Strategy,
    /// Contributing modules, highest priority first.
    pub modules: Vec<ModuleLayer>,
    /// relative path -> providing module ids, highest priority first.
    pub providers: BTreeMap<String, Vec<String>>,
}

impl PartitionPlan {
    pub fn layer(&self, id: &str) -> Option<&ModuleLayer> {
        self.modules.iter().find(|m| m.id == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawPlan {
    /// Non-empty partitions, in allow-list order.
    pub partitions: Vec<PartitionPlan>,
    /// Every module id seen by the scan, contributing or not.
    pub module_ids: BTreeSet<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A path provided by two or more modules on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub partition: String,
    pub relative_path: String,
    /// Highest priority first.
    pub contending_modules: Vec<String>,
    pub selected: String,
    /// True iff `selected` comes from a winnowing rule.
    pub is_forced: bool,
}

/// A winner that the overlay stack order would not select by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOverride {
    pub relative_path: String,
    pub module_id: String,
    pub source: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPartition {
    pub name: String,
    pub target: PathBuf,
    pub strategy: Strategy,
    /// Lowest priority first; the top of the stack is the last element.
    pub stack: Vec<ModuleLayer>,
    /// relative path -> winning source file, for every contributed path.
    pub winners: BTreeMap<String, PathBuf>,
    /// Forced winners that sit below another contender in `stack`.
    pub overrides: Vec<PathOverride>,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedPlan {
    pub partitions: Vec<ResolvedPartition>,
    /// Sorted by (partition, relative_path).
    pub conflicts: Vec<ConflictEntry>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub context: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            context: context.into(),
            message: message.into(),
        }
    }
}
