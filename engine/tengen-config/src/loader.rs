//! Configuration loading logic.
//!
//! Handles loading config from files and applying environment variable
//! overrides.

use crate::EngineConfig;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Standard locations to search for engine.toml
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "engine.toml",    // Current directory
    "../engine.toml", // Parent directory (when running from a subdirectory)
];

/// Load the engine configuration from engine.toml.
///
/// Searches for engine.toml in the following order:
/// 1. Path specified by the TENGEN_CONFIG environment variable
/// 2. Current directory (engine.toml)
/// 3. Parent directory (../engine.toml)
///
/// After loading, environment variable overrides are applied.
pub fn load_config() -> EngineConfig {
    if let Ok(path) = std::env::var("TENGEN_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            info!("Loading config from TENGEN_CONFIG: {}", path.display());
            return load_from_path(&path);
        }
        warn!(
            "TENGEN_CONFIG={} not found, searching defaults",
            path.display()
        );
    }

    for path_str in CONFIG_SEARCH_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading config from {}", path.display());
            return load_from_path(&path);
        }
    }

    debug!("No engine.toml found, using built-in defaults");
    apply_env_overrides(EngineConfig::default())
}

/// Load configuration from a specific path.
pub fn load_from_path(path: &PathBuf) -> EngineConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                apply_env_overrides(EngineConfig::default())
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}, using defaults", path.display(), e);
            apply_env_overrides(EngineConfig::default())
        }
    }
}

/// Macro to reduce env override boilerplate
macro_rules! env_override {
    // String field
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(v) = std::env::var($key) {
            $config.$section.$field = v;
        }
    };
    // Parseable field (usize, i32, f64, bool, ...)
    ($config:expr, $section:ident . $field:ident, $key:expr, parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = v;
        }
    };
}

/// Apply environment variable overrides to a configuration.
///
/// Environment variables follow the pattern: TENGEN_<SECTION>_<KEY>
pub fn apply_env_overrides(mut config: EngineConfig) -> EngineConfig {
    // Common
    env_override!(config, common.log_level, "TENGEN_COMMON_LOG_LEVEL");

    // Search
    env_override!(config, search.num_threads, "TENGEN_SEARCH_NUM_THREADS", parse);
    env_override!(config, search.puct, "TENGEN_SEARCH_PUCT", parse);
    env_override!(
        config,
        search.fpu_reduction,
        "TENGEN_SEARCH_FPU_REDUCTION",
        parse
    );
    env_override!(
        config,
        search.fpu_root_reduction,
        "TENGEN_SEARCH_FPU_ROOT_REDUCTION",
        parse
    );
    env_override!(
        config,
        search.virtual_loss_penalty,
        "TENGEN_SEARCH_VIRTUAL_LOSS_PENALTY",
        parse
    );
    env_override!(
        config,
        search.eval_batch_size,
        "TENGEN_SEARCH_EVAL_BATCH_SIZE",
        parse
    );
    env_override!(config, search.rng_seed, "TENGEN_SEARCH_RNG_SEED", parse);
    env_override!(config, search.noise, "TENGEN_SEARCH_NOISE", parse);
    env_override!(
        config,
        search.fixed_symmetry,
        "TENGEN_SEARCH_FIXED_SYMMETRY",
        parse
    );
    env_override!(
        config,
        search.dirichlet_alpha,
        "TENGEN_SEARCH_DIRICHLET_ALPHA",
        parse
    );
    env_override!(
        config,
        search.dirichlet_epsilon,
        "TENGEN_SEARCH_DIRICHLET_EPSILON",
        parse
    );
    env_override!(config, search.random_cnt, "TENGEN_SEARCH_RANDOM_CNT", parse);

    // Limits
    env_override!(config, limits.max_playouts, "TENGEN_LIMITS_MAX_PLAYOUTS", parse);
    env_override!(config, limits.max_visits, "TENGEN_LIMITS_MAX_VISITS", parse);
    env_override!(
        config,
        limits.analyze_interval_centis,
        "TENGEN_LIMITS_ANALYZE_INTERVAL_CENTIS",
        parse
    );

    // Policy
    env_override!(config, policy.resign_pct, "TENGEN_POLICY_RESIGN_PCT", parse);
    env_override!(config, policy.time_manage, "TENGEN_POLICY_TIME_MANAGE");
    env_override!(config, policy.dumb_pass, "TENGEN_POLICY_DUMB_PASS", parse);
    env_override!(
        config,
        policy.ponder_keeps_search_armed,
        "TENGEN_POLICY_PONDER_KEEPS_SEARCH_ARMED",
        parse
    );

    // Memory
    env_override!(
        config,
        memory.max_memory_mib,
        "TENGEN_MEMORY_MAX_MEMORY_MIB",
        parse
    );
    env_override!(
        config,
        memory.cache_ratio_percent,
        "TENGEN_MEMORY_CACHE_RATIO_PERCENT",
        parse
    );

    config
}
