//! Module scanner: turns the module root into the set of enabled modules.
//!
//! Directory listing is sequential and name-sorted so scan indexes are
//! reproducible. Collecting each module's files is read-only and runs in
//! parallel; all of it completes before this function returns.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use super::{Module, ModulePrefs, MountMode, Rank};
use crate::defs::{DISABLE_FILE_NAME, MODULE_PROP_FILE, REMOVE_FILE_NAME, SKIP_MOUNT_FILE_NAME};
use crate::error::{EngineError, EngineResult, ScanError};

/// Result of one scan: usable modules plus the directories that were skipped on error.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Enabled modules, in scan order.
    pub modules: Vec<Module>,
    pub errors: Vec<ScanError>,
}

struct Candidate {
    id: String,
    path: PathBuf,
    scan_index: u32,
}

/// Scan `moduledir` for enabled modules contributing to any of `partitions`.
pub fn scan_modules(
    moduledir: &Path,
    partitions: &[String],
    prefs: &ModulePrefs,
) -> EngineResult<ScanReport> {
    if !moduledir.exists() {
        tracing::warn!(dir = %moduledir.display(), "module directory does not exist");
        return Ok(ScanReport::default());
    }

    let read_dir = fs::read_dir(moduledir).map_err(|source| EngineError::ModuleDir {
        path: moduledir.to_path_buf(),
        source,
    })?;

    let mut dirs: Vec<(String, PathBuf)> = read_dir
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let id = entry.file_name().into_string().ok()?;
            Some((id, entry.path()))
        })
        .collect();
    dirs.sort_by(|a, b| a.0.cmp(&b.0));

    let candidates: Vec<Candidate> = dirs
        .into_iter()
        .enumerate()
        .filter(|(_, (id, path))| {
            let flagged = [DISABLE_FILE_NAME, REMOVE_FILE_NAME, SKIP_MOUNT_FILE_NAME]
                .iter()
                .find(|flag| path.join(flag).exists());
            if let Some(flag) = flagged {
                tracing::debug!(module = %id, flag, "module excluded by flag file");
                return false;
            }
            true
        })
        .map(|(index, (id, path))| Candidate {
            id,
            path,
            scan_index: index as u32,
        })
        .collect();

    let results: Vec<Result<Option<Module>, ScanError>> = candidates
        .par_iter()
        .map(|candidate| collect_module(candidate, partitions, prefs))
        .collect();

    let mut report = ScanReport::default();
    for result in results {
        match result {
            Ok(Some(module)) => {
                tracing::debug!(
                    module = %module.id,
                    partitions = ?module.contributions.keys().collect::<Vec<_>>(),
                    "collected module"
                );
                report.modules.push(module);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("skipping module: {e}");
                report.errors.push(e);
            }
        }
    }

    tracing::info!(
        modules = report.modules.len(),
        skipped = report.errors.len(),
        "module scan complete"
    );
    Ok(report)
}

fn collect_module(
    candidate: &Candidate,
    partitions: &[String],
    prefs: &ModulePrefs,
) -> Result<Option<Module>, ScanError> {
    let scan_err = |source: io::Error| ScanError {
        module: candidate.id.clone(),
        path: candidate.path.clone(),
        source,
    };

    // Surfaces permission problems on the module root itself.
    fs::read_dir(&candidate.path).map_err(scan_err)?;

    let props = read_module_prop(&candidate.path.join(MODULE_PROP_FILE)).map_err(scan_err)?;

    let mut contributions = BTreeMap::new();
    for partition in partitions {
        let dir = candidate.path.join(partition);
        if !dir.is_dir() {
            continue;
        }
        let files = collect_files(&dir).map_err(scan_err)?;
        if !files.is_empty() {
            contributions.insert(partition.clone(), files);
        }
    }

    if contributions.is_empty() {
        tracing::debug!(module = %candidate.id, "module has no partition content");
        return Ok(None);
    }

    let pref = prefs.get(&candidate.id);
    let mode = pref
        .and_then(|p| p.mode)
        .or_else(|| declared_mode(&candidate.id, &props, "mount_mode"))
        .unwrap_or_default();

    let mut partition_modes = BTreeMap::new();
    for partition in contributions.keys() {
        let chosen = pref
            .and_then(|p| p.partitions.get(partition).copied())
            .or_else(|| declared_mode(&candidate.id, &props, &format!("mount_mode.{partition}")));
        if let Some(chosen) = chosen {
            partition_modes.insert(partition.clone(), chosen);
        }
    }
    let priority = pref
        .and_then(|p| p.priority)
        .unwrap_or(candidate.scan_index);

    Ok(Some(Module {
        id: candidate.id.clone(),
        name: props
            .get("name")
            .cloned()
            .unwrap_or_else(|| candidate.id.clone()),
        path: candidate.path.clone(),
        mode,
        partition_modes,
        rank: Rank {
            priority,
            scan_index: candidate.scan_index,
            id: candidate.id.clone(),
        },
        contributions,
    }))
}

/// A mode set in `module.prop`. Unparseable values are ignored.
fn declared_mode(id: &str, props: &HashMap<String, String>, key: &str) -> Option<MountMode> {
    let raw = props.get(key)?;
    match raw.parse::<MountMode>() {
        Ok(mode) => Some(mode),
        Err(e) => {
            tracing::warn!(module = %id, key, "{e}; ignoring");
            None
        }
    }
}

/// Relative paths of every non-directory entry under `dir`.
fn collect_files(dir: &Path) -> io::Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop in module tree"))
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(dir) {
            files.insert(rel.to_string_lossy().into_owned());
        }
    }
    Ok(files)
}

/// Parse `key=value` lines. A missing file yields an empty map.
fn read_module_prop(path: &Path) -> io::Result<HashMap<String, String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e),
    };

    let mut props = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn partitions() -> Vec<String> {
        vec!["system".to_string(), "vendor".to_string()]
    }

    fn add_file(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    #[test]
    fn test_flagged_modules_are_excluded() {
        let dir = TempDir::new().unwrap();
        for id in ["a", "b", "c", "d"] {
            add_file(dir.path(), &format!("{id}/system/bin/tool"));
        }
        fs::write(dir.path().join("b/disable"), "").unwrap();
        fs::write(dir.path().join("c/remove"), "").unwrap();
        fs::write(dir.path().join("d/skip_mount"), "").unwrap();

        let prefs = ModulePrefs::default();
        let report = scan_modules(dir.path(), &partitions(), &prefs).unwrap();
        let ids: Vec<&str> = report.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_modules_without_content_are_excluded() {
        let dir = TempDir::new().unwrap();
        add_file(dir.path(), "webui-only/webroot/index.html");
        fs::create_dir_all(dir.path().join("empty-system/system")).unwrap();
        add_file(dir.path(), "unknown-part/my_partition/file");

        let prefs = ModulePrefs::default();
        let report = scan_modules(dir.path(), &partitions(), &prefs).unwrap();
        assert!(report.modules.is_empty());
    }

    #[test]
    fn test_scan_order_is_name_sorted_and_ranked() {
        let dir = TempDir::new().unwrap();
        add_file(dir.path(), "zeta/system/a");
        add_file(dir.path(), "alpha/vendor/lib/x.so");
        add_file(dir.path(), "alpha/system/etc/hosts");

        let prefs = ModulePrefs::default();
        let report = scan_modules(dir.path(), &partitions(), &prefs).unwrap();
        assert_eq!(report.modules[0].id, "alpha");
        assert_eq!(report.modules[0].rank.priority, 0);
        assert_eq!(report.modules[1].id, "zeta");
        assert_eq!(report.modules[1].rank.scan_index, 1);

        let alpha = &report.modules[0];
        assert!(alpha.provides("system", "etc/hosts"));
        assert!(alpha.provides("vendor", "lib/x.so"));
        assert_eq!(alpha.partitions().collect::<Vec<_>>(), vec!["system", "vendor"]);
    }

    #[test]
    fn test_module_prop_and_prefs_set_name_and_mode() {
        let dir = TempDir::new().unwrap();
        add_file(dir.path(), "m1/system/a");
        add_file(dir.path(), "m2/system/a");
        fs::write(dir.path().join("m1/module.prop"), "id=m1\nname=Module One\nmount_mode=graft\n").unwrap();
        fs::write(dir.path().join("m2/module.prop"), "mount_mode=graft\n").unwrap();

        let state = TempDir::new().unwrap();
        let mut prefs = ModulePrefs::load(state.path()).unwrap();
        prefs.set_mode("m2", Some(MountMode::Overlay)).unwrap();
        prefs.set_priority("m2", Some(0)).unwrap();

        let report = scan_modules(dir.path(), &partitions(), &prefs).unwrap();
        let m1 = &report.modules[0];
        let m2 = &report.modules[1];
        assert_eq!(m1.name, "Module One");
        assert_eq!(m1.mode, MountMode::Graft);
        assert_eq!(m2.name, "m2");
        assert_eq!(m2.mode, MountMode::Overlay);
        // Equal priorities tie-break on scan position.
        assert!(m1.rank < m2.rank);
    }

    #[test]
    fn test_partition_modes_from_prop_and_prefs() {
        let dir = TempDir::new().unwrap();
        add_file(dir.path(), "m/system/a");
        add_file(dir.path(), "m/vendor/b");
        fs::write(
            dir.path().join("m/module.prop"),
            "mount_mode=graft\nmount_mode.vendor=ignore\nmount_mode.odm=overlay\n",
        )
        .unwrap();

        let prefs = ModulePrefs::default();
        let report = scan_modules(dir.path(), &partitions(), &prefs).unwrap();
        let m = &report.modules[0];
        assert_eq!(m.mode_for("system"), MountMode::Graft);
        assert_eq!(m.mode_for("vendor"), MountMode::Ignore);
        // Only partitions the module has content on are recorded.
        assert!(!m.partition_modes.contains_key("odm"));

        let state = TempDir::new().unwrap();
        let mut prefs = ModulePrefs::load(state.path()).unwrap();
        prefs.set_partition_mode("m", "vendor", Some(MountMode::Overlay)).unwrap();
        let report = scan_modules(dir.path(), &partitions(), &prefs).unwrap();
        assert_eq!(report.modules[0].mode_for("vendor"), MountMode::Overlay);
    }

    #[test]
    fn test_missing_module_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let prefs = ModulePrefs::default();
        let report = scan_modules(&dir.path().join("nope"), &partitions(), &prefs).unwrap();
        assert!(report.modules.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_symlinks_count_as_contributions() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("m/system/bin")).unwrap();
        std::os::unix::fs::symlink("/system/bin/toybox", dir.path().join("m/system/bin/ls")).unwrap();

        let prefs = ModulePrefs::default();
        let report = scan_modules(dir.path(), &partitions(), &prefs).unwrap();
        assert!(report.modules[0].provides("system", "bin/ls"));
    }
}
