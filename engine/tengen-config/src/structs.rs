//! Configuration struct definitions.
//!
//! All config structs with serde deserialization support and default values.

use crate::defaults;
use serde::Deserialize;

// ============================================================================
// Serde default functions (required for #[serde(default = "...")])
// ============================================================================

fn d_log_level() -> String {
    defaults::LOG_LEVEL.into()
}
fn d_num_threads() -> usize {
    defaults::NUM_THREADS
}
fn d_puct() -> f64 {
    defaults::PUCT
}
fn d_fpu_reduction() -> f64 {
    defaults::FPU_REDUCTION
}
fn d_fpu_root_reduction() -> f64 {
    defaults::FPU_ROOT_REDUCTION
}
fn d_virtual_loss_penalty() -> f64 {
    defaults::VIRTUAL_LOSS_PENALTY
}
fn d_eval_batch_size() -> usize {
    defaults::EVAL_BATCH_SIZE
}
fn d_rng_seed() -> u64 {
    defaults::RNG_SEED
}
fn d_noise() -> bool {
    defaults::NOISE
}
fn d_fixed_symmetry() -> i64 {
    defaults::FIXED_SYMMETRY
}
fn d_dirichlet_alpha() -> f64 {
    defaults::DIRICHLET_ALPHA
}
fn d_dirichlet_epsilon() -> f64 {
    defaults::DIRICHLET_EPSILON
}
fn d_random_cnt() -> usize {
    defaults::RANDOM_CNT
}
fn d_max_playouts() -> i32 {
    defaults::MAX_PLAYOUTS
}
fn d_max_visits() -> i32 {
    defaults::MAX_VISITS
}
fn d_analyze_interval() -> i64 {
    defaults::ANALYZE_INTERVAL_CENTIS
}
fn d_resign_pct() -> i32 {
    defaults::RESIGN_PCT
}
fn d_time_manage() -> String {
    defaults::TIME_MANAGE.into()
}
fn d_dumb_pass() -> bool {
    defaults::DUMB_PASS
}
fn d_ponder_armed() -> bool {
    defaults::PONDER_KEEPS_SEARCH_ARMED
}
fn d_max_memory_mib() -> usize {
    defaults::MAX_MEMORY_MIB
}
fn d_cache_ratio() -> usize {
    defaults::CACHE_RATIO_PERCENT
}

// ============================================================================
// Config sections
// ============================================================================

/// Settings shared by every component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommonSection {
    pub log_level: String,
}

impl Default for CommonSection {
    fn default() -> Self {
        Self {
            log_level: d_log_level(),
        }
    }
}

/// Core search weights and worker setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// Number of parallel simulation workers.
    pub num_threads: usize,
    /// PUCT exploration weight.
    pub puct: f64,
    /// First-play-urgency reduction away from the root.
    pub fpu_reduction: f64,
    /// First-play-urgency reduction at the root.
    pub fpu_root_reduction: f64,
    /// Winrate credited per in-flight simulation in the selection formula.
    pub virtual_loss_penalty: f64,
    /// Network batch size targeted by the evaluation feeder.
    pub eval_batch_size: usize,
    /// Base seed; worker `i` derives `rng_seed + i`.
    pub rng_seed: u64,
    /// Mix Dirichlet noise into root priors (self-play only).
    pub noise: bool,
    /// Board symmetry to evaluate under: 0..=7, or -1 to randomize per
    /// simulation.
    pub fixed_symmetry: i64,
    pub dirichlet_alpha: f64,
    pub dirichlet_epsilon: f64,
    /// Randomize the best move proportionally to visits for this many
    /// opening moves.
    pub random_cnt: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            num_threads: d_num_threads(),
            puct: d_puct(),
            fpu_reduction: d_fpu_reduction(),
            fpu_root_reduction: d_fpu_root_reduction(),
            virtual_loss_penalty: d_virtual_loss_penalty(),
            eval_batch_size: d_eval_batch_size(),
            rng_seed: d_rng_seed(),
            noise: d_noise(),
            fixed_symmetry: d_fixed_symmetry(),
            dirichlet_alpha: d_dirichlet_alpha(),
            dirichlet_epsilon: d_dirichlet_epsilon(),
            random_cnt: d_random_cnt(),
        }
    }
}

/// Termination budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_playouts: i32,
    pub max_visits: i32,
    /// Emit analysis lines at this interval; 0 disables them.
    pub analyze_interval_centis: i64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_playouts: d_max_playouts(),
            max_visits: d_max_visits(),
            analyze_interval_centis: d_analyze_interval(),
        }
    }
}

/// Move-selection policy knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Resign below this winrate percentage; -1 selects the built-in 10%,
    /// 0 disables resignation.
    pub resign_pct: i32,
    /// One of "off", "on", "fast", "no_pruning".
    pub time_manage: String,
    /// Disable the final-score-based pass heuristics.
    pub dumb_pass: bool,
    /// Whether a ponder interrupted by input leaves the search running
    /// until the next command.
    pub ponder_keeps_search_armed: bool,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            resign_pct: d_resign_pct(),
            time_manage: d_time_manage(),
            dumb_pass: d_dumb_pass(),
            ponder_keeps_search_armed: d_ponder_armed(),
        }
    }
}

/// Memory budget split between the search tree and the network cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub max_memory_mib: usize,
    pub cache_ratio_percent: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_memory_mib: d_max_memory_mib(),
            cache_ratio_percent: d_cache_ratio(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub common: CommonSection,
    pub search: SearchSection,
    pub limits: LimitsSection,
    pub policy: PolicySection,
    pub memory: MemorySection,
}
