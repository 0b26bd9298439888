//! Executor - turns a resolved plan into mount operations.
//!
//! Every activation is computed as a diff against the inventory at
//! partition granularity. Each planned partition has a fingerprint of the
//! plan its mounts come from:
//!
//! - a partition whose fingerprint matches the recorded one is left alone
//! - a changed partition has all its old entries unmounted (newest first),
//!   then its new entries mounted
//! - a recorded partition absent from the plan is unmounted
//! - a partition mounted inside a changing one is remounted with it
//!
//! All unmounts run before any mount: nested targets come down first and
//! go back up last. Graft entries are computed only once the partition's
//! old mounts are gone, so they see the partition as it really is.
//!
//! Each completed step goes into a journal. If any step fails, the journal
//! is replayed backwards so the system is left as it was before the run,
//! and the caller must not persist a new inventory.

pub mod graft;
pub mod overlay;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};
use crate::inventory::{Inventory, InventoryEntry, MountType};
use crate::mount::{mount_entry, unmount_with_retry, MountError, Mounter};
use crate::plan::{Diagnostic, DiagnosticLevel, ResolvedPartition, ResolvedPlan, Strategy};

/// What the executor needs besides the plan.
pub struct ExecContext<'a> {
    pub mounter: &'a dyn Mounter,
    /// `<tempdir>/.modlayer`: overlay layers and graft skeletons.
    pub work_root: &'a Path,
    /// Source label given to overlay mounts.
    pub mountsource: &'a str,
    /// Leave the work root alone; only the mounter sees the operations.
    pub dry_run: bool,
}

/// One step of an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Mount(InventoryEntry),
    Unmount(InventoryEntry),
    /// Bind placement for a whole partition, expanded when it runs.
    Graft(ResolvedPartition),
}

impl Op {
    pub fn partition(&self) -> &str {
        match self {
            Op::Mount(entry) | Op::Unmount(entry) => &entry.partition,
            Op::Graft(part) => &part.name,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Mount(entry) => write!(f, "mount {entry}"),
            Op::Unmount(entry) => write!(f, "unmount {entry}"),
            Op::Graft(part) => write!(f, "graft {} files onto {}", part.winners.len(), part.target.display()),
        }
    }
}

/// The full set of changes an activation would make.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    /// Unmounts first, then mounts.
    pub ops: Vec<Op>,
    /// Partitions that get unmounted or (re)mounted.
    pub changed: Vec<String>,
    /// Partitions whose mounts already match the plan.
    pub unchanged: Vec<String>,
    /// Recorded entries of unchanged partitions, carried over as they are.
    pub kept: Vec<InventoryEntry>,
    /// Fingerprint of every planned partition.
    pub fingerprints: BTreeMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Changeset {
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn is_noop(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Summary of a successful activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub mounted: usize,
    pub unmounted: usize,
    pub unchanged: Vec<String>,
    /// What the system looks like now. Not stamped with a boot id.
    pub inventory: Inventory,
    /// Problems found while expanding graft partitions.
    pub diagnostics: Vec<Diagnostic>,
}

/// Digest of everything a partition's mounts are built from.
pub fn fingerprint(part: &ResolvedPartition, ctx: &ExecContext<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(part.strategy.to_string());
    hasher.update(part.target.to_string_lossy().as_bytes());
    match part.strategy {
        Strategy::Overlay => {
            for entry in overlay::entries(part, ctx.work_root, ctx.mountsource) {
                hasher.update(format!("\n{entry} {}", entry.options));
            }
        }
        Strategy::Graft => {
            for (rel, source) in &part.winners {
                hasher.update(format!("\n{rel}={}", source.display()));
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

fn skipped_diagnostics(partition: &str, skipped: &[(PathBuf, &'static str)]) -> Vec<Diagnostic> {
    skipped
        .iter()
        .map(|(target, reason)| {
            Diagnostic::new(
                DiagnosticLevel::Warning,
                partition,
                format!("{} not grafted: {reason}", target.display()),
            )
        })
        .collect()
}

/// Compute the changes needed to move from `current` to `plan`.
pub fn diff(plan: &ResolvedPlan, current: &Inventory, ctx: &ExecContext<'_>) -> Changeset {
    let mut changes = Changeset::default();
    let planned: BTreeMap<&str, &ResolvedPartition> =
        plan.partitions.iter().map(|p| (p.name.as_str(), p)).collect();

    let mut changed: BTreeSet<String> = BTreeSet::new();
    for part in &plan.partitions {
        let fp = fingerprint(part, ctx);
        if current.fingerprints.get(&part.name) != Some(&fp) {
            changed.insert(part.name.clone());
        }
        changes.fingerprints.insert(part.name.clone(), fp);
    }
    for name in current.partitions() {
        if !planned.contains_key(name) {
            changed.insert(name.to_string());
        }
    }

    // Anything mounted on or under a target that is about to change has to
    // come down first and go back up after it.
    loop {
        let mut disturbed: Vec<&Path> = current
            .entries
            .iter()
            .filter(|e| changed.contains(&e.partition))
            .map(|e| e.target.as_path())
            .collect();
        disturbed.extend(
            plan.partitions
                .iter()
                .filter(|p| changed.contains(&p.name))
                .map(|p| p.target.as_path()),
        );
        let nested: BTreeSet<String> = current
            .entries
            .iter()
            .filter(|e| !changed.contains(&e.partition))
            .filter(|e| disturbed.iter().any(|t| e.target.starts_with(t)))
            .map(|e| e.partition.clone())
            .collect();
        if nested.is_empty() {
            break;
        }
        for name in nested {
            tracing::info!(partition = %name, "mounted inside a changing partition, remounting");
            changed.insert(name);
        }
    }

    let depth = |name: &str| -> usize {
        match planned.get(name) {
            Some(part) => part.target.components().count(),
            None => current
                .for_partition(name)
                .map(|e| e.target.components().count())
                .min()
                .unwrap_or(0),
        }
    };

    let mut removing: Vec<&str> = changed.iter().map(String::as_str).collect();
    removing.sort_by_key(|name| Reverse(depth(*name)));
    for name in &removing {
        let recorded: Vec<&InventoryEntry> = current.for_partition(name).collect();
        changes
            .ops
            .extend(recorded.into_iter().rev().cloned().map(Op::Unmount));
    }

    let mut mounting: Vec<&ResolvedPartition> = plan
        .partitions
        .iter()
        .filter(|p| changed.contains(&p.name))
        .collect();
    mounting.sort_by_key(|p| p.target.components().count());
    for part in mounting {
        match part.strategy {
            Strategy::Overlay => changes.ops.extend(
                overlay::entries(part, ctx.work_root, ctx.mountsource)
                    .into_iter()
                    .map(Op::Mount),
            ),
            Strategy::Graft => {
                // The live view only shows the real partition when nothing of ours covers it.
                if current.for_partition(&part.name).next().is_none() {
                    let preview = graft::entries(part, ctx.work_root);
                    changes
                        .diagnostics
                        .extend(skipped_diagnostics(&part.name, &preview.skipped));
                }
                changes.ops.push(Op::Graft(part.clone()));
            }
        }
    }

    for part in &plan.partitions {
        if !changed.contains(&part.name) {
            changes.unchanged.push(part.name.clone());
        }
    }
    changes.kept = current
        .entries
        .iter()
        .filter(|e| !changed.contains(&e.partition))
        .cloned()
        .collect();
    changes.changed = changed.into_iter().collect();
    changes
}

/// A step that completed and must be reverted on failure.
#[derive(Debug)]
enum Done {
    Mounted(InventoryEntry),
    Unmounted(InventoryEntry),
}

/// State of one `apply` call.
struct Run<'a, 'c> {
    ctx: &'a ExecContext<'c>,
    journal: Vec<Done>,
    /// Entries created by this run, in creation order.
    created: Vec<InventoryEntry>,
    unmounted: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Run<'_, '_> {
    fn mount(&mut self, entry: InventoryEntry) -> EngineResult<()> {
        mount_entry(self.ctx.mounter, &entry).map_err(|source| EngineError::MountFailure {
            partition: entry.partition.clone(),
            source,
        })?;
        self.journal.push(Done::Mounted(entry.clone()));
        self.created.push(entry);
        Ok(())
    }

    fn execute(&mut self, op: &Op) -> EngineResult<()> {
        match op {
            Op::Unmount(entry) => {
                unmount_with_retry(self.ctx.mounter, &entry.target).map_err(|source| {
                    EngineError::MountFailure {
                        partition: entry.partition.clone(),
                        source,
                    }
                })?;
                self.journal.push(Done::Unmounted(entry.clone()));
                self.unmounted += 1;
            }
            Op::Mount(entry) => {
                // The layers may belong to a live overlay until the run is real.
                if entry.mount_type == MountType::Overlay && !self.ctx.dry_run {
                    overlay::prepare(self.ctx.work_root, &entry.partition).map_err(|source| {
                        EngineError::TempStorage {
                            path: overlay::layer_dir(self.ctx.work_root, &entry.partition),
                            source,
                        }
                    })?;
                }
                self.mount(entry.clone())?;
            }
            Op::Graft(part) => {
                let plan = graft::entries(part, self.ctx.work_root);
                self.diagnostics
                    .extend(skipped_diagnostics(&part.name, &plan.skipped));
                for step in plan.steps {
                    if let Some(prep) = step.prepare.as_ref().filter(|_| !self.ctx.dry_run) {
                        graft::prepare(prep).map_err(|source| EngineError::TempStorage {
                            path: prep.path().to_path_buf(),
                            source,
                        })?;
                    }
                    self.mount(step.entry)?;
                }
            }
        }
        Ok(())
    }
}

/// Revert completed steps, newest first. Returns how many could not be reverted.
fn unwind(journal: Vec<Done>, mounter: &dyn Mounter) -> usize {
    let mut failed = 0;
    for step in journal.into_iter().rev() {
        let result = match &step {
            Done::Mounted(entry) => unmount_with_retry(mounter, &entry.target),
            Done::Unmounted(entry) => mount_entry(mounter, entry),
        };
        if let Err(e) = result {
            tracing::error!("cannot revert {step:?}: {e}");
            failed += 1;
        }
    }
    failed
}

/// Run every op in `changes`. On failure, everything this call did is unwound.
pub fn apply(changes: &Changeset, ctx: &ExecContext<'_>) -> EngineResult<ApplyReport> {
    let mut run = Run {
        ctx,
        journal: Vec::new(),
        created: Vec::new(),
        unmounted: 0,
        diagnostics: Vec::new(),
    };

    for op in &changes.ops {
        tracing::debug!("{op}");
        if let Err(err) = run.execute(op) {
            tracing::error!(partition = %op.partition(), "{op} failed: {err}");
            let steps = run.journal.len();
            let failed = unwind(run.journal, ctx.mounter);
            if failed > 0 {
                return Err(EngineError::UnwindIncomplete {
                    partition: op.partition().to_string(),
                    failed,
                });
            }
            tracing::warn!(steps, "activation unwound");
            return Err(err);
        }
    }

    let mut entries = changes.kept.clone();
    let mounted = run.created.len();
    entries.extend(run.created);
    Ok(ApplyReport {
        mounted,
        unmounted: run.unmounted,
        unchanged: changes.unchanged.clone(),
        inventory: Inventory {
            boot_id: None,
            entries,
            fingerprints: changes.fingerprints.clone(),
        },
        diagnostics: run.diagnostics,
    })
}

/// Unmount everything in `inventory`, newest first.
///
/// Keeps going past failures. Returns the entries that are still mounted.
pub fn teardown(inventory: &Inventory, mounter: &dyn Mounter) -> Vec<InventoryEntry> {
    let mut remaining = Vec::new();
    for entry in inventory.entries.iter().rev() {
        match unmount_with_retry(mounter, &entry.target) {
            Ok(()) => tracing::debug!("unmounted {entry}"),
            Err(e) => {
                tracing::error!("cannot unmount {entry}: {e}");
                remaining.push(entry.clone());
            }
        }
    }
    remaining.reverse();
    remaining
}

fn rebase(target: &Path, from: &Path, to: &Path) -> PathBuf {
    match target.strip_prefix(from) {
        Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
        Ok(rest) => to.join(rest),
        Err(_) => target.to_path_buf(),
    }
}

/// Move the owned mount at `from` to `to`.
///
/// Uses an atomic move when the mounter supports one. Otherwise the mount
/// and anything stacked on it are unmounted and recreated at the new place.
/// Returns the updated inventory.
pub fn relocate(
    inventory: &Inventory,
    from: &Path,
    to: &Path,
    mounter: &dyn Mounter,
) -> EngineResult<Inventory> {
    let Some(entry) = inventory.find_target(from) else {
        return Err(EngineError::NotOwned(from.to_path_buf()));
    };
    let partition = entry.partition.clone();
    let fail = |source: MountError| EngineError::MountFailure {
        partition: partition.clone(),
        source,
    };

    let mut updated = inventory.clone();
    for e in updated.entries.iter_mut().filter(|e| e.target.starts_with(from)) {
        e.target = rebase(&e.target, from, to);
    }

    match mounter.move_mount(from, to) {
        Ok(()) => {
            tracing::info!("moved {} -> {}", from.display(), to.display());
            return Ok(updated);
        }
        Err(MountError::Unsupported(reason)) => {
            tracing::info!("move not supported ({reason}), remounting");
        }
        Err(e) => return Err(fail(e)),
    }

    // Fallback: tear down the subtree, then rebuild it at the new place.
    let affected: Vec<&InventoryEntry> = inventory
        .entries
        .iter()
        .filter(|e| e.target.starts_with(from))
        .collect();

    let mut journal = Vec::new();
    for old in affected.iter().rev() {
        if let Err(e) = unmount_with_retry(mounter, &old.target) {
            let failed = unwind(journal, mounter);
            if failed > 0 {
                return Err(EngineError::UnwindIncomplete {
                    partition: partition.clone(),
                    failed,
                });
            }
            return Err(fail(e));
        }
        journal.push(Done::Unmounted((*old).clone()));
    }
    for old in &affected {
        let mut moved = (*old).clone();
        moved.target = rebase(&old.target, from, to);
        if let Err(e) = mount_entry(mounter, &moved) {
            let failed = unwind(journal, mounter);
            if failed > 0 {
                return Err(EngineError::UnwindIncomplete {
                    partition: partition.clone(),
                    failed,
                });
            }
            return Err(fail(e));
        }
        journal.push(Done::Mounted(moved));
    }

    tracing::info!("remounted {} at {}", from.display(), to.display());
    Ok(updated)
}
