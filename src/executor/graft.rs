//! Graft strategy: place each winning module file into the live partition
//! with bind mounts.
//!
//! A file that replaces an existing entry is bound straight onto it. A file
//! the partition doesn't have yet needs a directory it can appear in, so its
//! nearest existing ancestor is rebuilt as a skeleton:
//!
//! 1. the partition itself is bound to `mirror/`, keeping its existing
//!    entries reachable once the ancestor is covered
//! 2. `skel/<n>` is filled with placeholders and bound over the ancestor
//! 3. every existing child is bound back from the mirror
//! 4. module files are bound onto their placeholders
//!
//! Symlinks can't be bind targets and are recreated in the skeleton.
//!
//! Everything here is computed from the partition as it is when the
//! partition's grafts are about to be mounted, after the previous mounts of
//! the partition are gone.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::inventory::{InventoryEntry, MountType};
use crate::plan::ResolvedPartition;

/// What a skeleton holds at one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Dir,
    File,
    Symlink(PathBuf),
}

/// A directory built under the work root before it is bound over the partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skeleton {
    pub dir: PathBuf,
    /// Permission bits copied from the directory it stands in for.
    pub mode: Option<u32>,
    /// Path inside the skeleton -> what to create there.
    pub entries: BTreeMap<String, Placeholder>,
}

/// Filesystem work that has to happen right before a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepare {
    /// An empty directory to mount on. Never cleared: it may still be a mount point.
    MountPoint(PathBuf),
    Skeleton(Skeleton),
}

impl Prepare {
    pub fn path(&self) -> &Path {
        match self {
            Self::MountPoint(dir) => dir,
            Self::Skeleton(skeleton) => &skeleton.dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraftStep {
    pub prepare: Option<Prepare>,
    pub entry: InventoryEntry,
}

#[derive(Debug, Default)]
pub struct GraftPlan {
    /// In mount order.
    pub steps: Vec<GraftStep>,
    /// Targets that cannot be grafted, with the reason.
    pub skipped: Vec<(PathBuf, &'static str)>,
}

impl GraftPlan {
    pub fn entries(&self) -> impl Iterator<Item = &InventoryEntry> {
        self.steps.iter().map(|s| &s.entry)
    }
}

/// `<work_root>/graft/<partition>`.
pub fn graft_dir(work_root: &Path, partition: &str) -> PathBuf {
    work_root.join("graft").join(partition)
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Closest ancestor of `rel` that is a directory on the partition.
///
/// `None` when the closest existing ancestor is something else (a file or a
/// symlink), which no skeleton can replace.
fn existing_ancestor(base: &Path, rel: &str) -> Option<String> {
    for ancestor in Path::new(rel).ancestors().skip(1) {
        match base.join(ancestor).symlink_metadata() {
            Ok(meta) if meta.is_dir() => return Some(ancestor.to_string_lossy().into_owned()),
            Ok(_) => return None,
            Err(_) => continue,
        }
    }
    None
}

struct Bind<'a> {
    rel: &'a str,
    source: &'a Path,
    /// Skeleton the target lives in, for paths new to the partition.
    anchor: Option<String>,
}

pub fn entries(part: &ResolvedPartition, work_root: &Path) -> GraftPlan {
    let base = &part.target;
    let mut plan = GraftPlan::default();
    let mut binds = Vec::new();
    // anchor -> placeholders for new paths below it, relative to the anchor.
    let mut added: BTreeMap<String, BTreeMap<String, Placeholder>> = BTreeMap::new();

    // `winners` already holds the highest-priority or forced source per path.
    for (rel, source) in &part.winners {
        let target = base.join(rel);
        match target.symlink_metadata() {
            Ok(meta) if meta.is_dir() => {
                plan.skipped.push((target, "a directory exists at this path"));
            }
            Ok(_) => binds.push(Bind {
                rel,
                source,
                anchor: None,
            }),
            Err(_) => {
                let Some(anchor) = existing_ancestor(base, rel) else {
                    plan.skipped.push((target, "a parent path is not a directory"));
                    continue;
                };
                let below = match rel.strip_prefix(anchor.as_str()) {
                    Some(rest) => rest.trim_start_matches('/'),
                    None => rel.as_str(),
                };
                let placeholders = added.entry(anchor.clone()).or_default();
                let parts: Vec<&str> = below.split('/').collect();
                for depth in 1..parts.len() {
                    placeholders.insert(parts[..depth].join("/"), Placeholder::Dir);
                }
                if source.is_symlink() {
                    if let Ok(link) = fs::read_link(source) {
                        placeholders.insert(below.to_string(), Placeholder::Symlink(link));
                        continue;
                    }
                }
                placeholders.insert(below.to_string(), Placeholder::File);
                binds.push(Bind {
                    rel,
                    source,
                    anchor: Some(anchor),
                });
            }
        }
    }

    let replaced: BTreeSet<&str> = binds
        .iter()
        .filter(|b| b.anchor.is_none())
        .map(|b| b.rel)
        .collect();
    let bind = |source: &Path, target: PathBuf| bind_entry(&part.name, source, target);

    let dir = graft_dir(work_root, &part.name);
    let mirror = dir.join("mirror");
    let mut failed_anchors = BTreeSet::new();
    let mut skeleton_steps = Vec::new();

    for (index, (anchor, new_paths)) in added.iter().enumerate() {
        let live_dir = base.join(anchor);
        let listing = match list_children(&live_dir) {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(partition = %part.name, dir = %live_dir.display(), "cannot list for graft: {e}");
                failed_anchors.insert(anchor.clone());
                continue;
            }
        };

        let mut skeleton = Skeleton {
            dir: dir.join("skel").join(index.to_string()),
            mode: live_dir.metadata().ok().map(|m| m.permissions().mode()),
            entries: new_paths.clone(),
        };
        let mut restored = Vec::new();
        for (name, kind) in listing {
            let child = join_rel(anchor, &name);
            let placeholder = match kind {
                Placeholder::Symlink(link) => Placeholder::Symlink(link),
                // Covered by its own skeleton, which is mounted later.
                _ if added.contains_key(&child) => Placeholder::Dir,
                // A module file is bound here later.
                _ if replaced.contains(child.as_str()) => Placeholder::File,
                other => {
                    restored.push(child);
                    other
                }
            };
            skeleton.entries.insert(name, placeholder);
        }

        let entry = bind(skeleton.dir.as_path(), live_dir);
        skeleton_steps.push(GraftStep {
            prepare: Some(Prepare::Skeleton(skeleton)),
            entry,
        });
        for child in restored {
            skeleton_steps.push(GraftStep {
                prepare: None,
                entry: bind(mirror.join(&child).as_path(), base.join(&child)),
            });
        }
    }

    if !skeleton_steps.is_empty() {
        plan.steps.push(GraftStep {
            prepare: Some(Prepare::MountPoint(mirror.clone())),
            entry: bind(base.as_path(), mirror),
        });
        plan.steps.extend(skeleton_steps);
    }

    for b in binds {
        let target = base.join(b.rel);
        if b.anchor.as_ref().is_some_and(|a| failed_anchors.contains(a)) {
            plan.skipped.push((target, "its directory could not be listed"));
            continue;
        }
        plan.steps.push(GraftStep {
            prepare: None,
            entry: bind(b.source, target),
        });
    }

    tracing::debug!(
        partition = %part.name,
        steps = plan.steps.len(),
        skeletons = added.len() - failed_anchors.len(),
        skipped = plan.skipped.len(),
        "graft plan"
    );
    plan
}

fn bind_entry(partition: &str, source: &Path, target: PathBuf) -> InventoryEntry {
    InventoryEntry {
        partition: partition.to_string(),
        source: source.to_string_lossy().into_owned(),
        target,
        mount_type: MountType::Bind,
        options: String::new(),
    }
}

/// Children of `dir` by name, typed as the placeholder each needs.
fn list_children(dir: &Path) -> io::Result<BTreeMap<String, Placeholder>> {
    let mut out = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        let kind = if file_type.is_symlink() {
            Placeholder::Symlink(fs::read_link(entry.path())?)
        } else if file_type.is_dir() {
            Placeholder::Dir
        } else {
            Placeholder::File
        };
        out.insert(name, kind);
    }
    Ok(out)
}

/// Do the filesystem work a step needs before its mount.
pub fn prepare(prep: &Prepare) -> io::Result<()> {
    match prep {
        Prepare::MountPoint(dir) => fs::create_dir_all(dir),
        Prepare::Skeleton(skeleton) => build_skeleton(skeleton),
    }
}

fn build_skeleton(skeleton: &Skeleton) -> io::Result<()> {
    if skeleton.dir.exists() {
        fs::remove_dir_all(&skeleton.dir)?;
    }
    fs::create_dir_all(&skeleton.dir)?;
    if let Some(mode) = skeleton.mode {
        fs::set_permissions(&skeleton.dir, fs::Permissions::from_mode(mode))?;
    }

    // BTreeMap order creates parents before their children.
    for (rel, placeholder) in &skeleton.entries {
        let path = skeleton.dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match placeholder {
            Placeholder::Dir => fs::create_dir_all(&path)?,
            Placeholder::File => {
                fs::File::create(&path)?;
            }
            Placeholder::Symlink(link) => std::os::unix::fs::symlink(link, &path)?,
        }
    }
    Ok(())
}
