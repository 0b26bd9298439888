//! Conflict resolver ("winnowing").
//!
//! Every path with two or more providers yields a [`ConflictEntry`]. The
//! default winner is the highest-ranked provider; a winnowing rule for the
//! exact `(partition, relative_path)` overrides it if, and only if, the
//! rule's module still provides that path.

use std::collections::BTreeMap;

use super::{
    ConflictEntry, Diagnostic, DiagnosticLevel, PathOverride, RawPlan, ResolvedPartition,
    ResolvedPlan, WinnowingRules,
};

pub fn resolve(raw: &RawPlan, rules: &WinnowingRules) -> ResolvedPlan {
    let mut resolved = ResolvedPlan {
        diagnostics: raw.diagnostics.clone(),
        ..ResolvedPlan::default()
    };

    for partition in &raw.partitions {
        let mut winners = BTreeMap::new();
        let mut overrides = Vec::new();

        for (rel, providers) in &partition.providers {
            // Providers are rank-ordered; the head is the default winner.
            let Some(default_winner) = providers.first() else {
                continue;
            };

            let rule = rules.get(&partition.name, rel);
            let forced = rule.filter(|module| providers.iter().any(|p| p.as_str() == *module));
            if let (Some(module), None) = (rule, forced) {
                tracing::debug!(
                    partition = %partition.name,
                    path = %rel,
                    module,
                    "winnowing rule dormant: module does not provide this path"
                );
                resolved.diagnostics.push(Diagnostic::new(
                    DiagnosticLevel::Info,
                    partition.name.as_str(),
                    format!("rule for {rel} names {module}, which does not provide it; ignored"),
                ));
            }

            let selected = forced.unwrap_or(default_winner.as_str());
            let Some(layer) = partition.layer(selected) else {
                continue;
            };
            let source = layer.dir.join(rel);

            if providers.len() > 1 {
                resolved.conflicts.push(ConflictEntry {
                    partition: partition.name.clone(),
                    relative_path: rel.clone(),
                    contending_modules: providers.clone(),
                    selected: selected.to_string(),
                    is_forced: forced.is_some(),
                });
            }

            if selected != default_winner.as_str() {
                overrides.push(PathOverride {
                    relative_path: rel.clone(),
                    module_id: selected.to_string(),
                    source: source.clone(),
                });
            }
            winners.insert(rel.clone(), source);
        }

        // Dormant rules for paths nobody provides on this partition anymore.
        for (rule_partition, rel, module) in rules.iter() {
            if rule_partition == partition.name && !partition.providers.contains_key(rel) {
                tracing::debug!(partition = %partition.name, path = rel, module, "winnowing rule dormant");
                resolved.diagnostics.push(Diagnostic::new(
                    DiagnosticLevel::Info,
                    partition.name.as_str(),
                    format!("rule for {rel} names {module}, but no module provides {rel}; kept dormant"),
                ));
            }
        }

        let mut stack = partition.modules.clone();
        stack.reverse();

        resolved.partitions.push(ResolvedPartition {
            name: partition.name.clone(),
            target: partition.target.clone(),
            strategy: partition.strategy,
            stack,
            winners,
            overrides,
        });
    }

    for (rule_partition, rel, module) in rules.iter() {
        if !raw.partitions.iter().any(|p| p.name == rule_partition) {
            tracing::debug!(partition = rule_partition, path = rel, module, "winnowing rule dormant");
            resolved.diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Info,
                rule_partition,
                format!("rule for {rel} names {module}, but nothing is mounted on {rule_partition}; kept dormant"),
            ));
        }
    }

    resolved.conflicts.sort_by(|a, b| {
        a.partition
            .cmp(&b.partition)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });

    tracing::info!(
        conflicts = resolved.conflicts.len(),
        forced = resolved.conflicts.iter().filter(|c| c.is_forced).count(),
        "resolved plan"
    );
    resolved
}
