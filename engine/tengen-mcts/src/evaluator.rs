//! Network evaluation contract.
//!
//! The search talks to the neural network through [`Network`]: a synchronous
//! batched inference call. Asynchrony lives in the engine's feeder thread
//! (see `worker`), which drains a queue of leaf requests, batches them, and
//! performs the tree backup when results arrive. Workers therefore never
//! block on the network; they submit and move on to the next simulation.

use thiserror::Error;

use tengen_core::Position;

/// Number of board symmetries the evaluator understands.
pub const NUM_SYMMETRIES: u8 = 8;

/// Errors surfaced by a network implementation.
///
/// Any error is treated as fatal for the running search: the engine stops,
/// answers with the best move found so far, and rebuilds the tree on the
/// next root advance.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model error: {0}")]
    Model(String),
}

/// Result of evaluating one position.
#[derive(Debug, Clone)]
pub struct NetResult {
    /// Prior probability per policy slot: one per intersection in vertex
    /// order, then the pass slot. Sums to ~1 over legal moves after the
    /// engine's own renormalisation; illegal slots are ignored.
    pub policy: Vec<f32>,

    /// Winrate estimate in [0, 1] from Black's perspective.
    pub winrate: f32,
}

/// One inference request: a position snapshot and the symmetry to evaluate
/// it under (`0..NUM_SYMMETRIES`).
#[derive(Debug, Clone)]
pub struct EvalQuery<P: Position> {
    pub state: P,
    pub symmetry: u8,
}

/// Batched policy/value inference.
///
/// Implementations could be:
/// - [`UniformNetwork`]: equal priors, neutral winrate (for testing)
/// - `OnnxNetwork`: ONNX runtime inference (feature `onnx`)
pub trait Network<P: Position>: Send + Sync + 'static {
    /// Evaluate a batch of positions. Must return exactly one result per
    /// query, in order.
    fn evaluate_batch(&self, batch: &[EvalQuery<P>]) -> Result<Vec<NetResult>, NetworkError>;

    /// Fixed memory footprint of the loaded weights, used by the memory
    /// budget check.
    fn base_memory(&self) -> usize {
        0
    }
}

/// Uniform network that assigns equal probability to every policy slot and
/// a neutral winrate. Useful for exercising the search without a model.
#[derive(Debug, Clone, Default)]
pub struct UniformNetwork;

impl UniformNetwork {
    pub fn new() -> Self {
        Self
    }
}

impl<P: Position> Network<P> for UniformNetwork {
    fn evaluate_batch(&self, batch: &[EvalQuery<P>]) -> Result<Vec<NetResult>, NetworkError> {
        Ok(batch
            .iter()
            .map(|q| {
                let slots = q.state.board_area() + 1;
                NetResult {
                    policy: vec![1.0 / slots as f32; slots],
                    winrate: 0.5,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockPosition;

    #[test]
    fn test_uniform_network() {
        let net = UniformNetwork::new();
        let state = MockPosition::empty(5);
        let results = net
            .evaluate_batch(&[EvalQuery { state, symmetry: 0 }])
            .unwrap();

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.policy.len(), 26);
        let sum: f32 = r.policy.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((r.winrate - 0.5).abs() < 1e-6);
    }
}
