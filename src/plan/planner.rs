//! Planner: per-partition contributors, strategy and provider maps.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Diagnostic, DiagnosticLevel, ModuleLayer, PartitionPlan, RawPlan, Strategy};
use crate::config::Config;
use crate::module::{Module, MountMode};

/// Inputs the planner needs beyond the module set.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Partition allow-list, in planning order.
    pub partitions: Vec<String>,
    /// Live system root partition names resolve against.
    pub root: PathBuf,
    /// Overlay permitted by configuration.
    pub overlay_enabled: bool,
    /// Overlay driver present on this kernel.
    pub overlay_supported: bool,
}

impl PlanOptions {
    pub fn from_config(config: &Config, overlay_supported: bool) -> Self {
        Self {
            partitions: config.partition_list(),
            root: config.root.clone(),
            overlay_enabled: config.overlay,
            overlay_supported,
        }
    }
}

/// Build the raw, pre-conflict plan.
pub fn plan(modules: &[Module], opts: &PlanOptions) -> RawPlan {
    let mut ordered: Vec<&Module> = modules.iter().collect();
    ordered.sort_by(|a, b| a.rank.cmp(&b.rank));

    let mut raw = RawPlan {
        module_ids: modules.iter().map(|m| m.id.clone()).collect(),
        ..RawPlan::default()
    };

    for partition in &opts.partitions {
        let contributors: Vec<&Module> = ordered
            .iter()
            .copied()
            .filter(|m| m.contributions.contains_key(partition))
            .filter(|m| {
                let ignored = m.mode_for(partition) == MountMode::Ignore;
                if ignored {
                    tracing::debug!(partition = %partition, module = %m.id, "module ignored on partition");
                }
                !ignored
            })
            .collect();

        if contributors.is_empty() {
            tracing::debug!(partition = %partition, "no contributors, skipping");
            continue;
        }

        let Some(target) = resolve_target(&opts.root, partition) else {
            raw.diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Critical,
                partition.as_str(),
                format!(
                    "target mount point does not exist: {}",
                    opts.root.join(partition).display()
                ),
            ));
            continue;
        };

        let strategy = choose_strategy(partition, &contributors, opts, &mut raw.diagnostics);

        let mut providers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut layers = Vec::with_capacity(contributors.len());
        for module in &contributors {
            if let Some(files) = module.contributions.get(partition) {
                for rel in files {
                    providers.entry(rel.clone()).or_default().push(module.id.clone());
                }
            }
            check_symlinks(module, partition, &opts.root, &mut raw.diagnostics);
            layers.push(ModuleLayer {
                id: module.id.clone(),
                rank: module.rank.clone(),
                dir: module.partition_dir(partition),
            });
        }

        tracing::info!(
            partition = %partition,
            strategy = %strategy,
            modules = layers.len(),
            files = providers.len(),
            "planned partition"
        );

        raw.partitions.push(PartitionPlan {
            name: partition.clone(),
            target,
            strategy,
            modules: layers,
            providers,
        });
    }

    raw
}

/// Strategy is partition-global: one module asking for graft moves the whole
/// partition to graft, since mixed strategies cannot be layered.
fn choose_strategy(
    partition: &str,
    contributors: &[&Module],
    opts: &PlanOptions,
    diagnostics: &mut Vec<Diagnostic>,
) -> Strategy {
    if !opts.overlay_enabled || !opts.overlay_supported {
        let reason = if opts.overlay_enabled {
            "overlay driver unavailable"
        } else {
            "overlay disabled by configuration"
        };
        let wanted: Vec<&str> = contributors
            .iter()
            .filter(|m| m.mode_for(partition) == MountMode::Overlay)
            .map(|m| m.id.as_str())
            .collect();
        if !wanted.is_empty() || opts.overlay_enabled {
            tracing::warn!(partition, "{reason}, falling back to graft");
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warning,
                partition,
                format!("{reason}; grafting instead (overlay requested by: {})", list_or_none(&wanted)),
            ));
        }
        return Strategy::Graft;
    }

    let grafters: Vec<&str> = contributors
        .iter()
        .filter(|m| m.mode_for(partition) == MountMode::Graft)
        .map(|m| m.id.as_str())
        .collect();
    if !grafters.is_empty() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Info,
            partition,
            format!("graft requested by {}; whole partition grafted", grafters.join(", ")),
        ));
        return Strategy::Graft;
    }

    Strategy::Overlay
}

fn list_or_none(ids: &[&str]) -> String {
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids.join(", ")
    }
}

/// `<root>/<partition>`, following a symlinked partition to its real location.
fn resolve_target(root: &Path, partition: &str) -> Option<PathBuf> {
    let target = root.join(partition);
    if target.is_symlink() {
        let resolved = fs::canonicalize(&target).ok()?;
        tracing::debug!(
            partition,
            from = %target.display(),
            to = %resolved.display(),
            "partition target is a symlink"
        );
        return resolved.is_dir().then_some(resolved);
    }
    target.is_dir().then_some(target)
}

/// Warn about absolute symlinks in a module that point nowhere on the live system.
fn check_symlinks(module: &Module, partition: &str, root: &Path, diagnostics: &mut Vec<Diagnostic>) {
    let Some(files) = module.contributions.get(partition) else {
        return;
    };
    for rel in files {
        let path = module.file_path(partition, rel);
        if !path.is_symlink() {
            continue;
        }
        let Ok(link) = fs::read_link(&path) else {
            continue;
        };
        if !link.is_absolute() {
            continue;
        }
        let on_root = root.join(link.strip_prefix("/").unwrap_or(&link));
        if !on_root.exists() {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warning,
                module.id.as_str(),
                format!("dead absolute symlink: {} -> {}", path.display(), link.display()),
            ));
        }
    }
}
