//! Search configuration parameters.

use thiserror::Error;

use tengen_config::{EngineConfig, SearchSection};

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Memory budget too small: {0}")]
    MemoryBudget(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// Time-management policy for `think`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeManagement {
    /// Never stop early.
    Off,
    /// Prune non-contenders and stop when one move remains.
    On,
    /// Like `On`, and also stop early when time cannot be saved up.
    Fast,
    /// Evaluate the stop condition but never deactivate children
    /// (self-play: pruning would bias the visit distribution).
    NoPruning,
}

impl TimeManagement {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "off" => Ok(TimeManagement::Off),
            "on" => Ok(TimeManagement::On),
            "fast" => Ok(TimeManagement::Fast),
            "no_pruning" => Ok(TimeManagement::NoPruning),
            other => Err(ConfigError::InvalidSetting(format!(
                "unknown time_manage value {:?}",
                other
            ))),
        }
    }
}

/// Per-call restrictions on the move `think` may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassFlag {
    Normal,
    /// Never answer with a pass if any alternative exists.
    NoPass,
    /// Never resign.
    NoResign,
}

/// Runtime configuration for the search engine.
///
/// Resolved once from [`EngineConfig`]; the playout/visit/memory limits can
/// be adjusted afterwards through the `UctSearch` setters.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Number of parallel simulation workers.
    pub num_threads: usize,
    /// PUCT exploration weight.
    pub puct: f64,
    /// First-play-urgency reduction away from the root.
    pub fpu_reduction: f64,
    /// First-play-urgency reduction at the root.
    pub fpu_root_reduction: f64,
    /// Winrate credited per in-flight simulation when scoring a child.
    pub virtual_loss_penalty: f64,
    /// Network batch size targeted by the evaluation feeder.
    pub eval_batch_size: usize,
    /// Base RNG seed; worker `i` derives `rng_seed + i`.
    pub rng_seed: u64,
    /// Evaluate under this symmetry, or randomize per simulation.
    pub fixed_symmetry: Option<u8>,
    /// Mix Dirichlet noise into root priors on first expansion.
    pub noise: bool,
    pub dirichlet_alpha: f64,
    pub dirichlet_epsilon: f64,
    /// Randomize the returned move proportionally to visits for this many
    /// opening moves.
    pub random_cnt: usize,
    pub max_playouts: i32,
    pub max_visits: i32,
    /// Emit analysis lines at this interval; 0 disables them.
    pub analyze_interval_centis: i64,
    /// Resign below this winrate percentage; negative selects the built-in
    /// 10%, zero disables resignation.
    pub resign_pct: i32,
    pub time_manage: TimeManagement,
    /// Disable the final-score-based pass heuristics.
    pub dumb_pass: bool,
    /// Whether a ponder interrupted by input leaves the search running
    /// (armed) until the next command. A ponder that exhausts its budget
    /// always disarms.
    pub ponder_keeps_search_armed: bool,
}

impl SearchConfig {
    /// Resolve the runtime configuration from the layered config file.
    pub fn from_engine_config(cfg: &EngineConfig) -> Result<Self, ConfigError> {
        let time_manage = TimeManagement::parse(&cfg.policy.time_manage)?;
        let s: &SearchSection = &cfg.search;
        if s.num_threads == 0 {
            return Err(ConfigError::InvalidSetting(
                "num_threads must be at least 1".into(),
            ));
        }
        if !(0..=7).contains(&s.fixed_symmetry) && s.fixed_symmetry != -1 {
            return Err(ConfigError::InvalidSetting(format!(
                "fixed_symmetry must be -1 or 0..=7, got {}",
                s.fixed_symmetry
            )));
        }
        Ok(Self {
            num_threads: s.num_threads,
            puct: s.puct,
            fpu_reduction: s.fpu_reduction,
            fpu_root_reduction: s.fpu_root_reduction,
            virtual_loss_penalty: s.virtual_loss_penalty,
            eval_batch_size: s.eval_batch_size.max(1),
            rng_seed: s.rng_seed,
            fixed_symmetry: (s.fixed_symmetry >= 0).then_some(s.fixed_symmetry as u8),
            noise: s.noise,
            dirichlet_alpha: s.dirichlet_alpha,
            dirichlet_epsilon: s.dirichlet_epsilon,
            random_cnt: s.random_cnt,
            max_playouts: cfg.limits.max_playouts.max(1),
            max_visits: cfg.limits.max_visits.max(1),
            analyze_interval_centis: cfg.limits.analyze_interval_centis,
            resign_pct: cfg.policy.resign_pct,
            time_manage,
            dumb_pass: cfg.policy.dumb_pass,
            ponder_keeps_search_armed: cfg.policy.ponder_keeps_search_armed,
        })
    }

    /// A small, single-threaded, deterministic config for tests.
    pub fn for_testing() -> Self {
        Self {
            num_threads: 1,
            puct: 0.8,
            fpu_reduction: 0.25,
            fpu_root_reduction: 0.25,
            virtual_loss_penalty: 0.0,
            eval_batch_size: 1,
            rng_seed: 5489,
            fixed_symmetry: Some(0),
            noise: false,
            dirichlet_alpha: 0.03,
            dirichlet_epsilon: 0.25,
            random_cnt: 0,
            max_playouts: 100,
            max_visits: 100,
            analyze_interval_centis: 0,
            resign_pct: -1,
            time_manage: TimeManagement::On,
            dumb_pass: false,
            ponder_keeps_search_armed: true,
        }
    }

    /// Builder pattern: set number of worker threads.
    pub fn with_threads(mut self, n: usize) -> Self {
        self.num_threads = n.max(1);
        self
    }

    /// Builder pattern: set the visit limit.
    pub fn with_visits(mut self, n: i32) -> Self {
        self.max_visits = n.max(1);
        self
    }

    /// Builder pattern: set the playout limit.
    pub fn with_playouts(mut self, n: i32) -> Self {
        self.max_playouts = n.max(1);
        self
    }

    /// Builder pattern: set the time-management policy.
    pub fn with_time_manage(mut self, tm: TimeManagement) -> Self {
        self.time_manage = tm;
        self
    }

    /// The resign threshold as a winrate in [0, 1], or `None` when
    /// resignation is disabled.
    pub fn resign_threshold(&self) -> Option<f64> {
        match self.resign_pct {
            0 => None,
            pct if pct < 0 => Some(0.10),
            pct => Some(0.01 * pct as f64),
        }
    }
}

/// Split a total memory budget between the network cache and the tree.
#[derive(Debug, Clone, Copy)]
pub struct MemoryPlan {
    pub max_tree_bytes: usize,
    pub max_cache_bytes: usize,
}

pub(crate) const MIB: usize = 1024 * 1024;

/// Accepted range for the total memory budget.
pub(crate) const MIN_MEMORY: usize = 128 * MIB;
pub(crate) const MAX_MEMORY: usize = 128 * 1024 * MIB;

/// Floor on the tree's share after the split; below this a search tree is
/// not worth running.
pub(crate) const MIN_TREE_SPACE: usize = 64 * MIB;

/// Compute the tree/cache split for `set_max_memory`.
///
/// `base_memory` is the fixed footprint of the loaded network weights;
/// `cache_ratio_percent` must be in 1..=99 and `max_memory` within
/// 128 MiB..=128 GiB. The remainder after the network footprint is split
/// by the cache ratio, and the tree's share must still clear
/// [`MIN_TREE_SPACE`].
pub fn plan_memory(
    max_memory: usize,
    cache_ratio_percent: usize,
    base_memory: usize,
) -> Result<MemoryPlan, ConfigError> {
    if !(1..=99).contains(&cache_ratio_percent) {
        return Err(ConfigError::InvalidSetting(format!(
            "cache ratio must be 1..=99, got {}",
            cache_ratio_percent
        )));
    }
    if !(MIN_MEMORY..=MAX_MEMORY).contains(&max_memory) {
        return Err(ConfigError::MemoryBudget(format!(
            "budget of {} MiB is outside the accepted {}..={} MiB range",
            max_memory / MIB,
            MIN_MEMORY / MIB,
            MAX_MEMORY / MIB
        )));
    }
    if max_memory <= base_memory {
        return Err(ConfigError::MemoryBudget(format!(
            "budget of {} MiB does not cover the {} MiB network footprint",
            max_memory / MIB,
            base_memory / MIB
        )));
    }
    let for_search = max_memory - base_memory;
    let max_cache_bytes = for_search * cache_ratio_percent / 100;
    let max_tree_bytes = for_search - max_cache_bytes;
    if max_tree_bytes < MIN_TREE_SPACE {
        return Err(ConfigError::MemoryBudget(format!(
            "only {} MiB left for the tree, need at least {} MiB",
            max_tree_bytes / MIB,
            MIN_TREE_SPACE / MIB
        )));
    }
    Ok(MemoryPlan {
        max_tree_bytes,
        max_cache_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_manage_parse() {
        assert_eq!(TimeManagement::parse("on").unwrap(), TimeManagement::On);
        assert_eq!(
            TimeManagement::parse("no_pruning").unwrap(),
            TimeManagement::NoPruning
        );
        assert!(TimeManagement::parse("sometimes").is_err());
    }

    #[test]
    fn test_resign_threshold() {
        let mut cfg = SearchConfig::for_testing();
        assert_eq!(cfg.resign_threshold(), Some(0.10));
        cfg.resign_pct = 0;
        assert_eq!(cfg.resign_threshold(), None);
        cfg.resign_pct = 25;
        assert_eq!(cfg.resign_threshold(), Some(0.25));
    }

    #[test]
    fn test_limits_clamped_to_one() {
        let cfg = SearchConfig::for_testing().with_visits(0).with_playouts(-5);
        assert_eq!(cfg.max_visits, 1);
        assert_eq!(cfg.max_playouts, 1);
    }

    #[test]
    fn test_plan_memory_split() {
        let plan = plan_memory(2048 * MIB, 10, 512 * MIB).unwrap();
        let for_search = (2048 - 512) * MIB;
        assert_eq!(plan.max_cache_bytes, for_search / 10);
        assert_eq!(plan.max_tree_bytes, for_search - for_search / 10);
    }

    #[test]
    fn test_plan_memory_rejects_small_budgets() {
        // Budget below the network footprint.
        assert!(plan_memory(256 * MIB, 10, 512 * MIB).is_err());
        // Tree share below the floor.
        assert!(plan_memory(520 * MIB, 99, 512 * MIB).is_err());
        // Ratio out of range.
        assert!(plan_memory(2048 * MIB, 0, 0).is_err());
    }

    #[test]
    fn test_plan_memory_enforces_budget_range() {
        // Below the 128 MiB floor, even with no network footprint.
        assert!(plan_memory(64 * MIB, 10, 0).is_err());
        assert!(plan_memory(MIN_MEMORY - 1, 10, 0).is_err());
        // The floor itself is accepted.
        assert!(plan_memory(MIN_MEMORY, 10, 0).is_ok());
        // Above the 128 GiB ceiling.
        assert!(plan_memory(MAX_MEMORY + 1, 10, 0).is_err());
        assert!(plan_memory(MAX_MEMORY, 10, 0).is_ok());
    }
}
