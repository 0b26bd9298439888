//! The activation pipeline: scan, plan, resolve, execute.
//!
//! `Engine` owns the configuration, the mounter and the persisted user
//! state (winnowing rules, module preferences). The raw plan from the last
//! scan is cached, so changing a winnowing rule only re-runs resolution.
//! Anything that changes module ranks or modes drops the cache.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::{cleanup_work_dir, select_temp_dir, work_root};
use crate::config::{Config, WinnowingPolicy};
use crate::error::{EngineError, EngineResult};
use crate::executor::{self, ExecContext};
use crate::inventory::Inventory;
use crate::lock::EngineLock;
use crate::module::{scan_modules, Module, ModulePrefs, ModuleSummary, MountMode};
use crate::mount::Mounter;
use crate::plan::{
    self, parse_rule_path, resolve, ConflictEntry, Diagnostic, DiagnosticLevel, PlanOptions,
    RawPlan, ResolvedPlan, Strategy, WinnowingRules,
};
use crate::timing::Timer;

/// Result of the last scan, reused until invalidated.
#[derive(Debug)]
struct ScanState {
    modules: Vec<Module>,
    raw: RawPlan,
    /// Modules skipped because they could not be read.
    scan_errors: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSummary {
    pub name: String,
    pub target: PathBuf,
    pub strategy: Strategy,
    /// Lowest priority first.
    pub modules: Vec<String>,
}

/// What an activation or teardown did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub dry_run: bool,
    pub mounted: usize,
    pub unmounted: usize,
    /// Partitions left as they were.
    pub unchanged: Vec<String>,
    pub partitions: Vec<PartitionSummary>,
    pub conflicts: usize,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Engine<M: Mounter> {
    config: Config,
    mounter: M,
    partitions: Vec<String>,
    rules: WinnowingRules,
    prefs: ModulePrefs,
    dry_run: bool,
    cache: Option<ScanState>,
}

impl<M: Mounter> Engine<M> {
    /// Load persisted rules and preferences from the configured state dir.
    pub fn new(config: Config, mounter: M) -> EngineResult<Self> {
        let rules = WinnowingRules::load(&config.statedir)?;
        let prefs = ModulePrefs::load(&config.statedir)?;
        Ok(Self {
            partitions: config.partition_list(),
            config,
            mounter,
            rules,
            prefs,
            dry_run: false,
            cache: None,
        })
    }

    /// Run mount operations without persisting the inventory.
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn mounter(&self) -> &M {
        &self.mounter
    }

    pub fn rules(&self) -> &WinnowingRules {
        &self.rules
    }

    /// What this boot has mounted. A record from an earlier boot reads as empty.
    pub fn inventory(&self) -> EngineResult<Inventory> {
        let boot_id = self.config.boot_id();
        Ok(Inventory::load_for_boot(&self.config.statedir, boot_id.as_deref())?)
    }

    fn save_inventory(&self, mut inventory: Inventory) -> EngineResult<()> {
        inventory.boot_id = self.config.boot_id();
        inventory.save(&self.config.statedir)?;
        Ok(())
    }

    /// Take the engine lock and re-read the state other processes may have written.
    fn lock(&mut self) -> EngineResult<EngineLock> {
        let lock = EngineLock::acquire(&self.config.statedir)?;
        self.rules = WinnowingRules::load(&self.config.statedir)?;
        let prefs = ModulePrefs::load(&self.config.statedir)?;
        if prefs != self.prefs {
            self.prefs = prefs;
            self.invalidate();
        }
        Ok(lock)
    }

    /// Force the next query to rescan module contents.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    fn ensure_scanned(&mut self) -> EngineResult<()> {
        if self.cache.is_some() {
            return Ok(());
        }
        let timer = Timer::start("scan and plan");
        let report = scan_modules(&self.config.moduledir, &self.partitions, &self.prefs)?;
        let scan_errors = report
            .errors
            .iter()
            .map(|e| {
                tracing::warn!("{e}");
                Diagnostic::new(DiagnosticLevel::Warning, e.module.clone(), e.to_string())
            })
            .collect();

        let opts = PlanOptions::from_config(&self.config, self.mounter.supports_overlay());
        let raw = plan::plan(&report.modules, &opts);
        tracing::info!(
            modules = report.modules.len(),
            partitions = raw.partitions.len(),
            "scan complete"
        );
        timer.finish();

        self.cache = Some(ScanState {
            modules: report.modules,
            raw,
            scan_errors,
        });
        Ok(())
    }

    /// Enabled modules in scan order.
    pub fn modules(&mut self) -> EngineResult<&[Module]> {
        self.ensure_scanned()?;
        Ok(self.cache.as_ref().map_or(&[][..], |s| s.modules.as_slice()))
    }

    pub fn summaries(&mut self) -> EngineResult<Vec<ModuleSummary>> {
        Ok(self.modules()?.iter().map(Module::summary).collect())
    }

    /// Resolve the cached raw plan against the current rules.
    pub fn resolved(&mut self) -> EngineResult<ResolvedPlan> {
        self.ensure_scanned()?;
        let Some(state) = &self.cache else {
            return Ok(ResolvedPlan::default());
        };
        Ok(resolve(&state.raw, &self.rules))
    }

    /// Every conflicting path, sorted by (partition, relative_path).
    pub fn conflicts(&mut self) -> EngineResult<Vec<ConflictEntry>> {
        Ok(self.resolved()?.conflicts)
    }

    /// Planning, resolution and execution-preview diagnostics.
    pub fn diagnostics(&mut self) -> EngineResult<Vec<Diagnostic>> {
        let resolved = self.resolved()?;
        let inventory = self.inventory()?;
        let work = self.work_root();
        let ctx = ExecContext {
            mounter: &self.mounter,
            work_root: &work,
            mountsource: &self.config.mountsource,
            dry_run: true,
        };
        let changes = executor::diff(&resolved, &inventory, &ctx);

        let mut out = self
            .cache
            .as_ref()
            .map(|s| s.scan_errors.clone())
            .unwrap_or_default();
        out.extend(resolved.diagnostics);
        out.extend(changes.diagnostics);
        Ok(out)
    }

    /// Force `module_id` to win `full_path` (e.g. `/system/etc/hosts`).
    ///
    /// Returns whether the stored rule changed. Takes effect on the next
    /// resolve without a rescan.
    pub fn set_winnowing_rule(&mut self, full_path: &str, module_id: &str) -> EngineResult<bool> {
        let (partition, rel) = parse_rule_path(full_path, &self.partitions)?;
        let _lock = self.lock()?;
        let changed = self.rules.set(&partition, &rel, module_id)?;
        if changed {
            tracing::info!(partition = %partition, path = %rel, module = module_id, "winnowing rule set");
        }
        Ok(changed)
    }

    pub fn clear_winnowing_rule(&mut self, full_path: &str) -> EngineResult<bool> {
        let (partition, rel) = parse_rule_path(full_path, &self.partitions)?;
        let _lock = self.lock()?;
        let removed = self.rules.clear(&partition, &rel)?;
        if removed {
            tracing::info!(partition = %partition, path = %rel, "winnowing rule cleared");
        }
        Ok(removed)
    }

    /// Persist a mount mode override; `None` goes back to the declared mode.
    pub fn set_mode(&mut self, module_id: &str, mode: Option<MountMode>) -> EngineResult<()> {
        let _lock = self.lock()?;
        self.prefs.set_mode(module_id, mode)?;
        self.invalidate();
        Ok(())
    }

    /// Persist a priority override; `None` goes back to the scan index.
    pub fn set_priority(&mut self, module_id: &str, priority: Option<u32>) -> EngineResult<()> {
        let _lock = self.lock()?;
        self.prefs.set_priority(module_id, priority)?;
        self.invalidate();
        Ok(())
    }

    /// Persist a mode override for one partition; `None` drops it.
    pub fn set_partition_mode(
        &mut self,
        module_id: &str,
        partition: &str,
        mode: Option<MountMode>,
    ) -> EngineResult<()> {
        if !self.partitions.iter().any(|p| p == partition) {
            return Err(EngineError::UnknownPartition(partition.to_string()));
        }
        let _lock = self.lock()?;
        self.prefs.set_partition_mode(module_id, partition, mode)?;
        self.invalidate();
        Ok(())
    }

    fn work_root(&self) -> PathBuf {
        let tempdir = self.config.tempdir.clone().unwrap_or_else(select_temp_dir);
        work_root(&tempdir)
    }

    /// One activation: teardown when `umount` is configured, otherwise
    /// scan, plan, resolve, apply and persist the new inventory.
    pub fn activate(&mut self) -> EngineResult<ActivationReport> {
        if self.config.umount {
            return self.teardown();
        }

        let _lock = self.lock()?;
        let total = Timer::start("activation");

        // Always start from a fresh view of the module tree.
        self.invalidate();
        self.ensure_scanned()?;
        self.apply_rule_policy()?;
        let resolved = self.resolved()?;

        let work = self.work_root();
        fs::create_dir_all(&work).map_err(|source| EngineError::TempStorage {
            path: work.clone(),
            source,
        })?;

        let current = self.inventory()?;
        let ctx = ExecContext {
            mounter: &self.mounter,
            work_root: &work,
            mountsource: &self.config.mountsource,
            dry_run: self.dry_run,
        };
        let changes = executor::diff(&resolved, &current, &ctx);
        tracing::info!(ops = changes.op_count(), unchanged = changes.unchanged.len(), "mount plan ready");

        let applied = executor::apply(&changes, &ctx)?;
        if self.dry_run {
            tracing::info!("dry run, inventory not written");
        } else {
            self.save_inventory(applied.inventory)?;
        }
        total.finish();

        let mut diagnostics = resolved.diagnostics;
        diagnostics.extend(applied.diagnostics);
        Ok(ActivationReport {
            dry_run: self.dry_run,
            mounted: applied.mounted,
            unmounted: applied.unmounted,
            unchanged: applied.unchanged,
            partitions: resolved
                .partitions
                .iter()
                .map(|p| PartitionSummary {
                    name: p.name.clone(),
                    target: p.target.clone(),
                    strategy: p.strategy,
                    modules: p.stack.iter().map(|l| l.id.clone()).collect(),
                })
                .collect(),
            conflicts: resolved.conflicts.len(),
            diagnostics,
        })
    }

    /// Delete rules for uninstalled modules when the policy says so.
    fn apply_rule_policy(&mut self) -> EngineResult<()> {
        if self.config.winnowing_policy != WinnowingPolicy::Prune {
            return Ok(());
        }
        let Some(state) = &self.cache else {
            return Ok(());
        };
        let known = &state.raw.module_ids;
        let removed = self.rules.prune(|module| known.contains(module))?;
        if removed > 0 {
            tracing::info!(removed, "pruned winnowing rules for missing modules");
        }
        Ok(())
    }

    /// Unmount everything the inventory records, newest first.
    pub fn teardown(&mut self) -> EngineResult<ActivationReport> {
        let _lock = self.lock()?;
        let current = self.inventory()?;
        let remaining = executor::teardown(&current, &self.mounter);
        let unmounted = current.len() - remaining.len();

        if !self.dry_run {
            self.save_inventory(Inventory {
                entries: remaining.clone(),
                ..Inventory::default()
            })?;
        }
        if !remaining.is_empty() {
            return Err(EngineError::TeardownIncomplete {
                remaining: remaining.len(),
            });
        }

        if !self.dry_run {
            // Nothing is stacked on the layers any more.
            cleanup_work_dir(&self.work_root());
        }
        tracing::info!(unmounted, "teardown complete");
        Ok(ActivationReport {
            dry_run: self.dry_run,
            unmounted,
            ..Default::default()
        })
    }

    /// Move an owned mount from `from` to `to` and record the new target.
    pub fn relocate(&mut self, from: &Path, to: &Path) -> EngineResult<Inventory> {
        let _lock = self.lock()?;
        let current = self.inventory()?;
        let updated = executor::relocate(&current, from, to, &self.mounter)?;
        if !self.dry_run {
            self.save_inventory(updated.clone())?;
        }
        Ok(updated)
    }
}
