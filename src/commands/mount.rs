//! Mount commands - activation, teardown and relocation.

use std::path::Path;

use anyhow::{Context, Result};

use super::{print_json, system_engine};
use modlayer::config::Config;
use modlayer::engine::Engine;
use modlayer::mount::{CommandMounter, Mounter, RecordingMounter};

/// Run one activation. With `dry_run`, mounts are only recorded and the
/// inventory is left alone.
pub fn cmd_mount(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run {
        let overlay = CommandMounter::new().supports_overlay();
        let mounter = RecordingMounter::new().with_overlay(overlay);
        let mut engine = Engine::new(config.clone(), mounter)
            .context("Failed to load engine state")?
            .dry_run(true);
        let report = engine.activate().context("Dry-run activation failed")?;
        tracing::info!(ops = engine.mounter().calls().len(), "dry run complete");
        return print_json(&report);
    }

    let mut engine = system_engine(config)?;
    let report = engine.activate().context("Activation failed")?;
    print_json(&report)
}

pub fn cmd_umount(config: &Config) -> Result<()> {
    let mut engine = system_engine(config)?;
    let report = engine.teardown().context("Teardown failed")?;
    print_json(&report)
}

pub fn cmd_relocate(config: &Config, from: &Path, to: &Path) -> Result<()> {
    let mut engine = system_engine(config)?;
    let inventory = engine
        .relocate(from, to)
        .with_context(|| format!("Failed to relocate {} to {}", from.display(), to.display()))?;
    print_json(&inventory)
}
