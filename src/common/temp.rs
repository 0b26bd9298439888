//! Utilities for managing the temp root that holds overlay upper/work layers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::defs::{TEMP_DIR_CANDIDATES, TEMP_WORK_DIR};

/// Pick the first candidate temp root that exists and accepts writes.
///
/// Falls back to `std::env::temp_dir()` when none of the device candidates
/// are usable (e.g. when running off-device).
pub fn select_temp_dir() -> PathBuf {
    select_temp_dir_from(TEMP_DIR_CANDIDATES.iter().map(Path::new))
        .unwrap_or_else(std::env::temp_dir)
}

/// Candidate probing, split out so tests can supply their own list.
pub fn select_temp_dir_from<'a, I>(candidates: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = &'a Path>,
{
    for candidate in candidates {
        if !candidate.is_dir() {
            continue;
        }
        let marker = candidate.join(".modlayer-writable");
        if fs::write(&marker, b"").is_ok() {
            let _ = fs::remove_file(&marker);
            return Some(candidate.to_path_buf());
        }
        tracing::debug!(candidate = %candidate.display(), "temp candidate not writable");
    }
    None
}

/// Root under the temp dir where this engine keeps its layers.
pub fn work_root(tempdir: &Path) -> PathBuf {
    tempdir.join(TEMP_WORK_DIR)
}

/// Prepare a work directory, removing it if it exists and creating it fresh.
///
/// Used for overlay `upperdir`/`workdir`, which must start empty.
pub fn prepare_work_dir(parent_dir: &Path, name: &str) -> io::Result<PathBuf> {
    let work_dir = parent_dir.join(name);

    if work_dir.exists() {
        fs::remove_dir_all(&work_dir)?;
    }
    fs::create_dir_all(&work_dir)?;

    Ok(work_dir)
}

/// Clean up a work directory after use. Idempotent.
pub fn cleanup_work_dir(path: &Path) {
    let _ = fs::remove_dir_all(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_select_skips_missing_candidates() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let chosen = select_temp_dir_from([missing.as_path(), dir.path()]).unwrap();
        assert_eq!(chosen, dir.path());
    }

    #[test]
    fn test_select_none_when_nothing_usable() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(select_temp_dir_from([missing.as_path()]).is_none());
    }

    #[test]
    fn test_prepare_work_dir_starts_empty() {
        let dir = TempDir::new().unwrap();
        let first = prepare_work_dir(dir.path(), "upper").unwrap();
        fs::write(first.join("stale"), "x").unwrap();

        let second = prepare_work_dir(dir.path(), "upper").unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(&second).unwrap().count(), 0);

        cleanup_work_dir(&second);
        assert!(!second.exists());
    }
}
