//! Conflict listing and winnowing rules.

use anyhow::{Context, Result};

use super::{print_json, system_engine};
use modlayer::config::Config;
use modlayer::plan::parse_rule_path;

pub fn cmd_conflicts(config: &Config) -> Result<()> {
    let mut engine = system_engine(config)?;
    let conflicts = engine.conflicts().context("Failed to resolve conflicts")?;
    print_json(&conflicts)
}

/// Set (`module_id = Some`) or clear (`None`) the forced winner for a path.
pub fn cmd_winnow(config: &Config, full_path: &str, module_id: Option<&str>) -> Result<()> {
    let mut engine = system_engine(config)?;

    let Some(module_id) = module_id else {
        let removed = engine
            .clear_winnowing_rule(full_path)
            .with_context(|| format!("Failed to clear rule for {full_path}"))?;
        if !removed {
            tracing::info!("no rule for {full_path}");
        }
        return print_json(&engine.conflicts()?);
    };

    engine
        .set_winnowing_rule(full_path, module_id)
        .with_context(|| format!("Failed to set rule {full_path} -> {module_id}"))?;
    let (partition, rel) = parse_rule_path(full_path, &config.partition_list())?;

    // Report the affected conflict so the caller sees whether the rule is live.
    let conflicts = engine.conflicts()?;
    let affected: Vec<_> = conflicts
        .iter()
        .filter(|c| c.partition == partition && c.relative_path == rel)
        .collect();
    if affected.is_empty() {
        tracing::warn!("{full_path} has no conflict right now, rule is dormant");
    }
    print_json(&affected)
}
