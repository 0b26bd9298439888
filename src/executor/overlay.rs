//! Overlay strategy: one overlay per partition, plus bind fixups for forced winners.

use std::io;
use std::path::{Path, PathBuf};

use crate::common::prepare_work_dir;
use crate::inventory::{InventoryEntry, MountType};
use crate::plan::ResolvedPartition;

/// `<work_root>/overlay/<partition>`, holding `upper` and `work`.
pub fn layer_dir(work_root: &Path, partition: &str) -> PathBuf {
    work_root.join("overlay").join(partition)
}

/// Mount options for a partition's overlay.
///
/// `lowerdir` lists the top layer first: modules from highest to lowest
/// priority, then the partition's own contents.
pub fn options(part: &ResolvedPartition, work_root: &Path) -> String {
    let mut lower: Vec<String> = part
        .stack
        .iter()
        .rev()
        .map(|layer| layer.dir.to_string_lossy().into_owned())
        .collect();
    lower.push(part.target.to_string_lossy().into_owned());

    let dir = layer_dir(work_root, &part.name);
    format!(
        "lowerdir={},upperdir={},workdir={}",
        lower.join(":"),
        dir.join("upper").display(),
        dir.join("work").display()
    )
}

/// Inventory entries an overlay partition should have, in mount order.
pub fn entries(part: &ResolvedPartition, work_root: &Path, mountsource: &str) -> Vec<InventoryEntry> {
    let mut entries = vec![InventoryEntry {
        partition: part.name.clone(),
        source: mountsource.to_string(),
        target: part.target.clone(),
        mount_type: MountType::Overlay,
        options: options(part, work_root),
    }];

    // The stack can only express one order; forced winners below the top
    // contender are bound over the merged view.
    for fixup in &part.overrides {
        entries.push(InventoryEntry {
            partition: part.name.clone(),
            source: fixup.source.to_string_lossy().into_owned(),
            target: part.target.join(&fixup.relative_path),
            mount_type: MountType::Bind,
            options: String::new(),
        });
    }
    entries
}

/// Fresh, empty upper and work directories for `partition`.
pub fn prepare(work_root: &Path, partition: &str) -> io::Result<()> {
    let dir = layer_dir(work_root, partition);
    prepare_work_dir(&dir, "upper")?;
    prepare_work_dir(&dir, "work")?;
    Ok(())
}
