//! Engine configuration loading from engine.toml.
//!
//! # Configuration Priority
//!
//! Settings are loaded with the following priority (highest to lowest):
//! 1. Environment variables (`TENGEN_<SECTION>_<KEY>`)
//! 2. engine.toml file
//! 3. Built-in defaults
//!
//! # Environment Variable Override Pattern
//!
//! ```text
//! TENGEN_<SECTION>_<KEY>=value
//!
//! Examples:
//!     TENGEN_SEARCH_NUM_THREADS=4
//!     TENGEN_SEARCH_PUCT=0.8
//!     TENGEN_LIMITS_MAX_VISITS=3200
//!     TENGEN_COMMON_LOG_LEVEL=debug
//! ```

mod defaults;
mod loader;
mod structs;

pub use defaults::*;
pub use loader::{load_config, load_from_path};
pub use structs::{
    CommonSection, EngineConfig, LimitsSection, MemorySection, PolicySection, SearchSection,
};

#[cfg(test)]
mod tests;
