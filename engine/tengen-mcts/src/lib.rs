//! Parallel Monte Carlo tree search driven by a policy/value network.
//!
//! This crate implements the search engine of a Go-playing program. Many
//! worker threads run simulations over one shared tree while an
//! asynchronous feeder batches leaf positions for the network and backs
//! results up when they arrive, out of order. The controller drives
//! `think`/`ponder` against time, visit, playout and memory budgets and
//! turns the finished tree into a move.
//!
//! # Overview
//!
//! One simulation:
//!
//! 1. **Selection**: descend from the root by PUCT, adding virtual loss at
//!    every node so concurrent simulations spread over different lines
//! 2. **Expansion**: the first simulation to reach a leaf claims it and
//!    submits the position (under a random board symmetry) to the network;
//!    later arrivals bounce out, leaving their virtual loss for the
//!    expander to settle
//! 3. **Evaluation**: the feeder thread batches submitted leaves and runs
//!    the network once per batch
//! 4. **Backup**: the feeder materialises the leaf's children from the
//!    returned priors and propagates the winrate up the recorded path
//!
//! When the game advances, `think` promotes the matching subtree in place
//! and a background task destroys the rest once in-flight simulations have
//! drained.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tengen_core::{Color, FixedTime};
//! use tengen_mcts::{PassFlag, SearchConfig, UctSearch, UniformNetwork};
//!
//! let cfg = SearchConfig::from_engine_config(&tengen_config::load_config())?;
//! let network = Arc::new(UniformNetwork::new());
//! let mut search = UctSearch::new(cfg, position.clone(), network,
//!     Box::new(FixedTime::new(500)));
//!
//! let mv = search.think(&position, Color::Black, PassFlag::Normal);
//! println!("playing {}", mv.to_text(position.board_size()));
//! ```
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                          UctSearch                           |
//! +--------------------------------------------------------------+
//! |  +------------+   +-----------------+   +------------------+ |
//! |  | SearchTree |   | worker pool     |   | feeder thread    | |
//! |  | root slot, |   | select/descend, |   | batch -> Network | |
//! |  | destroyers |   | submit leaves   |   | expand + backup  | |
//! |  +------------+   +-----------------+   +------------------+ |
//! +--------------------------------------------------------------+
//! ```

pub mod analysis;
pub mod config;
pub mod evaluator;
pub mod node;
pub mod search;
pub mod tree;

mod worker;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use analysis::AnalysisSink;
pub use config::{
    plan_memory, ConfigError, MemoryPlan, PassFlag, SearchConfig, TimeManagement,
};
pub use evaluator::{EvalQuery, NetResult, Network, NetworkError, UniformNetwork, NUM_SYMMETRIES};
pub use node::{Node, NodeAction, NodeLock};
pub use search::{
    RootSample, SearchStats, TrainingRecorder, UctSearch, UNLIMITED_PLAYOUTS,
};
pub use tree::{AdvanceOutcome, SearchTree, TreeSize};

#[cfg(feature = "onnx")]
pub use onnx::{FeatureEncoder, OnnxNetwork};
