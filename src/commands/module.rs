//! Per-module overrides.

use anyhow::{Context, Result};

use super::{print_json, system_engine};
use modlayer::config::Config;
use modlayer::module::MountMode;

/// Persist a mode override, or drop it when `mode` is `None`.
///
/// With a partition the override applies to that partition only.
pub fn cmd_mode(
    config: &Config,
    module_id: &str,
    partition: Option<&str>,
    mode: Option<MountMode>,
) -> Result<()> {
    let mut engine = system_engine(config)?;
    match partition {
        Some(partition) => engine.set_partition_mode(module_id, partition, mode),
        None => engine.set_mode(module_id, mode),
    }
    .with_context(|| format!("Failed to set mode for {module_id}"))?;

    let summary = engine.summaries()?.into_iter().find(|m| m.id == module_id);
    if summary.is_none() {
        tracing::warn!("{module_id} is not an enabled module, override stored anyway");
    }
    print_json(&summary)
}

/// Persist a priority override, or drop it when `priority` is `None`.
pub fn cmd_priority(config: &Config, module_id: &str, priority: Option<u32>) -> Result<()> {
    let mut engine = system_engine(config)?;
    engine
        .set_priority(module_id, priority)
        .with_context(|| format!("Failed to set priority for {module_id}"))?;

    let rank = engine
        .modules()?
        .iter()
        .find(|m| m.id == module_id)
        .map(|m| m.rank.clone());
    print_json(&rank)
}
