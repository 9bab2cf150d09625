//! Default configuration values.
//!
//! Single source of truth for every tunable the engine exposes.

// Common defaults
pub const LOG_LEVEL: &str = "info";

// Search defaults
pub const NUM_THREADS: usize = 2;
pub const PUCT: f64 = 0.8;
pub const FPU_REDUCTION: f64 = 0.25;
pub const FPU_ROOT_REDUCTION: f64 = 0.25;
pub const VIRTUAL_LOSS_PENALTY: f64 = 0.0;
pub const EVAL_BATCH_SIZE: usize = 8;
pub const RNG_SEED: u64 = 5489;
pub const NOISE: bool = false;
pub const FIXED_SYMMETRY: i64 = -1;
pub const DIRICHLET_ALPHA: f64 = 0.03;
pub const DIRICHLET_EPSILON: f64 = 0.25;
pub const RANDOM_CNT: usize = 0;

// Limit defaults. Playouts and visits are "unlimited" at i32::MAX / 2 so the
// multithreaded comparisons cannot overflow.
pub const MAX_PLAYOUTS: i32 = i32::MAX / 2;
pub const MAX_VISITS: i32 = i32::MAX / 2;
pub const ANALYZE_INTERVAL_CENTIS: i64 = 0;

// Policy defaults
pub const RESIGN_PCT: i32 = -1;
pub const TIME_MANAGE: &str = "on";
pub const DUMB_PASS: bool = false;
pub const PONDER_KEEPS_SEARCH_ARMED: bool = true;

// Memory defaults
pub const MAX_MEMORY_MIB: usize = 2048;
pub const CACHE_RATIO_PERCENT: usize = 10;
