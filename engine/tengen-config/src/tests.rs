//! Tests for the configuration module.

use super::*;

#[test]
fn test_default_config() {
    let config = EngineConfig::default();
    assert_eq!(config.common.log_level, "info");
    assert_eq!(config.search.num_threads, 2);
    assert!((config.search.puct - 0.8).abs() < f64::EPSILON);
    assert_eq!(config.search.eval_batch_size, 8);
    assert_eq!(config.policy.time_manage, "on");
    assert!(!config.policy.dumb_pass);
    assert!(config.policy.ponder_keeps_search_armed);
}

#[test]
fn test_limit_defaults_leave_overflow_headroom() {
    let config = EngineConfig::default();
    // "Unlimited" must stay below i32::MAX so concurrent accumulation
    // cannot overflow the comparison.
    assert!(config.limits.max_playouts <= i32::MAX / 2);
    assert!(config.limits.max_visits <= i32::MAX / 2);
}

#[test]
fn test_memory_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.memory.max_memory_mib, 2048);
    assert_eq!(config.memory.cache_ratio_percent, 10);
}

#[test]
fn test_toml_roundtrip_partial() {
    // A partial file only overrides what it names.
    let config: EngineConfig = toml::from_str(
        r#"
        [search]
        num_threads = 8
        puct = 1.2

        [limits]
        max_visits = 1600
        "#,
    )
    .unwrap();

    assert_eq!(config.search.num_threads, 8);
    assert!((config.search.puct - 1.2).abs() < f64::EPSILON);
    assert_eq!(config.limits.max_visits, 1600);
    // Untouched sections keep their defaults.
    assert_eq!(config.memory.cache_ratio_percent, 10);
    assert_eq!(config.policy.resign_pct, -1);
}

#[test]
fn test_env_override() {
    // Serialized against other env tests by the distinct variable name.
    std::env::set_var("TENGEN_SEARCH_NUM_THREADS", "16");
    let config = loader::apply_env_overrides(EngineConfig::default());
    std::env::remove_var("TENGEN_SEARCH_NUM_THREADS");
    assert_eq!(config.search.num_threads, 16);
}

#[test]
fn test_env_override_bad_value_ignored() {
    std::env::set_var("TENGEN_LIMITS_MAX_VISITS", "not-a-number");
    let config = loader::apply_env_overrides(EngineConfig::default());
    std::env::remove_var("TENGEN_LIMITS_MAX_VISITS");
    assert_eq!(config.limits.max_visits, defaults::MAX_VISITS);
}
