//! Conflict detection and winnowing rules through the engine API.

mod helpers;

use helpers::TestEnv;
use modlayer::config::WinnowingPolicy;
use modlayer::error::EngineError;
use modlayer::module::{ModulePrefs, MountMode};
use modlayer::plan::{ConflictEntry, DiagnosticLevel, WinnowingRules};
use modlayer::mount::RecordingMounter;
use pretty_assertions::assert_eq;

const SKIN: &str = "system/overlay/skin.png";

fn theme_env() -> TestEnv {
    let env = TestEnv::new();
    env.add_module("theme-a", &[SKIN]);
    env.add_module("theme-b", &[SKIN]);
    env
}

fn skin_conflict(selected: &str, is_forced: bool) -> ConflictEntry {
    ConflictEntry {
        partition: "system".to_string(),
        relative_path: "overlay/skin.png".to_string(),
        contending_modules: vec!["theme-a".to_string(), "theme-b".to_string()],
        selected: selected.to_string(),
        is_forced,
    }
}

// =============================================================================
// Conflict detection
// =============================================================================

#[test]
fn test_single_provider_is_not_a_conflict() {
    let env = TestEnv::new();
    env.add_module("alpha", &["system/etc/a.conf"]);
    env.add_module("beta", &["system/etc/b.conf"]);

    let mut engine = env.engine();
    assert!(engine.conflicts().unwrap().is_empty());
}

#[test]
fn test_default_winner_is_first_in_scan_order() {
    let env = theme_env();
    let mut engine = env.engine();
    assert_eq!(engine.conflicts().unwrap(), vec![skin_conflict("theme-a", false)]);
}

#[test]
fn test_conflicts_are_sorted_by_partition_then_path() {
    let env = TestEnv::new();
    env.add_module("alpha", &["vendor/etc/z.conf", "system/etc/b.conf", "system/etc/a.conf"]);
    env.add_module("beta", &["vendor/etc/z.conf", "system/etc/b.conf", "system/etc/a.conf"]);

    let mut engine = env.engine();
    let keys: Vec<(String, String)> = engine
        .conflicts()
        .unwrap()
        .into_iter()
        .map(|c| (c.partition, c.relative_path))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("system".to_string(), "etc/a.conf".to_string()),
            ("system".to_string(), "etc/b.conf".to_string()),
            ("vendor".to_string(), "etc/z.conf".to_string()),
        ]
    );
}

#[test]
fn test_priority_override_changes_default_winner() {
    let env = theme_env();
    let mut engine = env.engine();
    engine.set_priority("theme-b", Some(0)).unwrap();
    engine.set_priority("theme-a", Some(5)).unwrap();

    let conflicts = engine.conflicts().unwrap();
    assert_eq!(conflicts[0].contending_modules, vec!["theme-b", "theme-a"]);
    assert_eq!(conflicts[0].selected, "theme-b");
    assert!(!conflicts[0].is_forced);
}

// =============================================================================
// Winnowing rules
// =============================================================================

#[test]
fn test_rule_forces_lower_priority_module() {
    let env = theme_env();
    let mut engine = env.engine();

    assert!(engine.set_winnowing_rule("/system/overlay/skin.png", "theme-b").unwrap());
    assert_eq!(engine.conflicts().unwrap(), vec![skin_conflict("theme-b", true)]);

    // Setting the same rule again changes nothing.
    assert!(!engine.set_winnowing_rule("/system/overlay/skin.png", "theme-b").unwrap());
}

#[test]
fn test_theme_rule_survives_reordered_discovery() {
    let env = theme_env();
    env.engine()
        .set_winnowing_rule("/system/overlay/skin.png", "theme-b")
        .unwrap();

    // A new module sorts first and shifts every scan index.
    env.add_module("aaa-base", &["system/etc/base.conf"]);
    let mut engine = env.engine();
    let rank_b = engine
        .modules()
        .unwrap()
        .iter()
        .find(|m| m.id == "theme-b")
        .map(|m| m.rank.scan_index);
    assert_eq!(rank_b, Some(2));

    assert_eq!(engine.conflicts().unwrap(), vec![skin_conflict("theme-b", true)]);
}

#[test]
fn test_rule_applies_without_rescan() {
    let env = theme_env();
    let mut engine = env.engine();
    engine.conflicts().unwrap();

    // The cached plan still knows theme-a; only a rescan would drop it.
    env.remove_module("theme-a");
    engine.set_winnowing_rule("/system/overlay/skin.png", "theme-b").unwrap();
    assert_eq!(engine.conflicts().unwrap(), vec![skin_conflict("theme-b", true)]);

    engine.invalidate();
    assert!(engine.conflicts().unwrap().is_empty());
}

#[test]
fn test_rule_for_non_contender_is_dormant() {
    let env = theme_env();
    env.add_module("other", &["system/etc/other.conf"]);
    let mut engine = env.engine();

    engine.set_winnowing_rule("/system/overlay/skin.png", "other").unwrap();
    assert_eq!(engine.conflicts().unwrap(), vec![skin_conflict("theme-a", false)]);
    assert!(engine
        .diagnostics()
        .unwrap()
        .iter()
        .any(|d| d.level == DiagnosticLevel::Info && d.message.contains("other")));

    // Dormant, not deleted.
    assert_eq!(engine.rules().get("system", "overlay/skin.png"), Some("other"));
}

#[test]
fn test_rule_for_path_nobody_provides_is_reported() {
    let env = theme_env();
    let mut engine = env.engine();
    engine.set_winnowing_rule("/system/etc/gone.conf", "theme-b").unwrap();
    engine.set_winnowing_rule("/vendor/etc/v.conf", "theme-a").unwrap();

    let dormant: Vec<String> = engine
        .diagnostics()
        .unwrap()
        .into_iter()
        .filter(|d| d.level == DiagnosticLevel::Info && d.message.contains("kept dormant"))
        .map(|d| d.context)
        .collect();
    assert_eq!(dormant, vec!["system", "vendor"]);
}

#[test]
fn test_writes_from_two_engines_are_both_kept() {
    let env = theme_env();
    let mut first = env.engine();
    let mut second = env.engine();

    first.set_winnowing_rule("/system/overlay/skin.png", "theme-b").unwrap();
    second.set_winnowing_rule("/system/etc/other.conf", "theme-a").unwrap();
    second.set_priority("theme-b", Some(0)).unwrap();
    first.set_mode("theme-a", Some(MountMode::Graft)).unwrap();

    let rules = WinnowingRules::load(&env.statedir).unwrap();
    assert_eq!(rules.get("system", "overlay/skin.png"), Some("theme-b"));
    assert_eq!(rules.get("system", "etc/other.conf"), Some("theme-a"));

    let prefs = ModulePrefs::load(&env.statedir).unwrap();
    assert_eq!(prefs.get("theme-b").and_then(|p| p.priority), Some(0));
    assert_eq!(prefs.get("theme-a").and_then(|p| p.mode), Some(MountMode::Graft));
}

#[test]
fn test_clear_rule_restores_default_winner() {
    let env = theme_env();
    let mut engine = env.engine();
    engine.set_winnowing_rule("/system/overlay/skin.png", "theme-b").unwrap();

    assert!(engine.clear_winnowing_rule("/system/overlay/skin.png").unwrap());
    assert!(!engine.clear_winnowing_rule("/system/overlay/skin.png").unwrap());
    assert_eq!(engine.conflicts().unwrap(), vec![skin_conflict("theme-a", false)]);
}

#[test]
fn test_malformed_rule_paths_are_rejected() {
    let env = theme_env();
    let mut engine = env.engine();

    for path in ["", "/", "/system", "/system/", "/nosuch/etc/x", "/system/../etc/x"] {
        let err = engine.set_winnowing_rule(path, "theme-b").unwrap_err();
        assert!(
            matches!(err, EngineError::InvalidRulePath(_)),
            "{path:?} should be rejected, got {err:?}"
        );
    }
    assert!(engine.rules().is_empty());
}

// =============================================================================
// Prune policy
// =============================================================================

#[test]
fn test_keep_policy_leaves_rules_for_missing_modules() {
    let env = theme_env();
    env.engine()
        .set_winnowing_rule("/system/overlay/skin.png", "theme-b")
        .unwrap();
    env.remove_module("theme-b");

    env.engine().activate().unwrap();
    let rules = WinnowingRules::load(&env.statedir).unwrap();
    assert_eq!(rules.get("system", "overlay/skin.png"), Some("theme-b"));
}

#[test]
fn test_prune_policy_deletes_rules_for_missing_modules() {
    let env = theme_env();
    env.add_module("vendor-mod", &["vendor/etc/v.conf"]);
    let mut engine = env.engine();
    engine.set_winnowing_rule("/system/overlay/skin.png", "theme-b").unwrap();
    engine.set_winnowing_rule("/vendor/etc/v.conf", "vendor-mod").unwrap();
    drop(engine);
    env.remove_module("theme-b");

    let mut config = env.config();
    config.winnowing_policy = WinnowingPolicy::Prune;
    env.engine_with(config, RecordingMounter::new()).activate().unwrap();

    let rules = WinnowingRules::load(&env.statedir).unwrap();
    assert_eq!(rules.get("system", "overlay/skin.png"), None);
    assert_eq!(rules.get("vendor", "etc/v.conf"), Some("vendor-mod"));
}
