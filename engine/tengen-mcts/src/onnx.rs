//! ONNX Runtime network for the search engine.
//!
//! Loads a policy/value model exported by the trainer and serves it through
//! the [`Network`] contract. Feature encoding is board-specific, so the
//! caller supplies the encoder that turns a position snapshot plus a
//! symmetry index into the model's input planes.
//!
//! # Model Format
//!
//! - Input: "planes" - shape (batch_size, input_len) float32
//! - Output: "policy" - shape (batch_size, board_area + 1) float32 logits
//! - Output: "winrate" - shape (batch_size, 1) float32 in [-1, 1],
//!   side-to-move perspective (converted to Black's here)

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use ort::{session::Session, value::Value};
use tengen_core::{Color, Position};
use tracing::debug;

use crate::evaluator::{EvalQuery, NetResult, Network, NetworkError};

/// Turns a position snapshot into the model's input planes under one of
/// the eight board symmetries.
pub trait FeatureEncoder<P: Position>: Send + Sync + 'static {
    /// Number of floats per position.
    fn input_len(&self) -> usize;

    /// Encode `state` under `symmetry` into `out` (pre-sized to
    /// `input_len`).
    fn encode(&self, state: &P, symmetry: u8, out: &mut [f32]);
}

/// ONNX Runtime evaluator.
///
/// Uses a Mutex internally because `Session::run` requires `&mut self`,
/// while [`Network`] takes `&self` for sharing with the feeder thread.
pub struct OnnxNetwork<P: Position, E: FeatureEncoder<P>> {
    session: Mutex<Session>,
    encoder: E,
    /// Reported to the memory budget check.
    weight_bytes: usize,
    inference_count: AtomicU64,
    total_inference_time_us: AtomicU64,
    _marker: std::marker::PhantomData<fn(&P)>,
}

impl<P: Position, E: FeatureEncoder<P>> OnnxNetwork<P, E> {
    /// Load a model from the given path.
    pub fn load<Q: AsRef<Path>>(model_path: Q, encoder: E) -> Result<Self, NetworkError> {
        let weight_bytes = std::fs::metadata(model_path.as_ref())
            .map(|m| m.len() as usize)
            .unwrap_or(0);
        let session = Session::builder()
            .map_err(|e| NetworkError::Model(format!("Failed to create session builder: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| NetworkError::Model(format!("Failed to set intra threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| NetworkError::Model(format!("Failed to load model: {}", e)))?;

        Ok(Self {
            session: Mutex::new(session),
            encoder,
            weight_bytes,
            inference_count: AtomicU64::new(0),
            total_inference_time_us: AtomicU64::new(0),
            _marker: std::marker::PhantomData,
        })
    }

    fn softmax(logits: &[f32]) -> Vec<f32> {
        let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !max_logit.is_finite() {
            return vec![0.0; logits.len()];
        }
        let mut exp_values: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
        let sum: f32 = exp_values.iter().sum();
        if sum > 0.0 {
            for v in &mut exp_values {
                *v /= sum;
            }
        }
        exp_values
    }

    fn track_inference(&self, start: Instant, samples: u64) {
        let us = start.elapsed().as_micros() as u64;
        let total = self
            .total_inference_time_us
            .fetch_add(us, Ordering::Relaxed)
            + us;
        let count = self.inference_count.fetch_add(samples, Ordering::Relaxed) + samples;
        if count % 10_000 < samples {
            debug!(
                "onnx inference stats: {} positions, avg {:.2}ms per position",
                count,
                total as f64 / count as f64 / 1000.0
            );
        }
    }
}

impl<P: Position, E: FeatureEncoder<P>> Network<P> for OnnxNetwork<P, E> {
    fn evaluate_batch(&self, batch: &[EvalQuery<P>]) -> Result<Vec<NetResult>, NetworkError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = batch.len();
        let input_len = self.encoder.input_len();

        let mut planes = vec![0.0f32; batch_size * input_len];
        for (i, query) in batch.iter().enumerate() {
            self.encoder.encode(
                &query.state,
                query.symmetry,
                &mut planes[i * input_len..(i + 1) * input_len],
            );
        }

        let input_array = ndarray::Array2::from_shape_vec((batch_size, input_len), planes)
            .map_err(|e| NetworkError::Inference(format!("Failed to build input array: {}", e)))?;
        let input_value = Value::from_array(input_array)
            .map_err(|e| NetworkError::Inference(format!("Failed to build input tensor: {}", e)))?;

        let inference_start = Instant::now();
        let (policy_flat, winrates, policy_width) = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| NetworkError::Inference(format!("Session lock poisoned: {}", e)))?;
            let outputs = session
                .run(ort::inputs!["planes" => input_value])
                .map_err(|e| NetworkError::Inference(format!("Inference failed: {}", e)))?;

            let policy_output = outputs
                .get("policy")
                .ok_or_else(|| NetworkError::Model("Missing policy output".to_string()))?;
            let (policy_shape, policy_data) = policy_output
                .try_extract_tensor::<f32>()
                .map_err(|e| NetworkError::Model(format!("Failed to extract policy: {}", e)))?;
            let policy_width = if policy_shape.len() > 1 {
                policy_shape[1] as usize
            } else {
                policy_data.len() / batch_size
            };

            let winrate_output = outputs
                .get("winrate")
                .ok_or_else(|| NetworkError::Model("Missing winrate output".to_string()))?;
            let (_shape, winrate_data) = winrate_output
                .try_extract_tensor::<f32>()
                .map_err(|e| NetworkError::Model(format!("Failed to extract winrate: {}", e)))?;

            (
                policy_data.to_vec(),
                winrate_data.to_vec(),
                policy_width,
            )
        };
        self.track_inference(inference_start, batch_size as u64);

        let mut results = Vec::with_capacity(batch_size);
        for (i, query) in batch.iter().enumerate() {
            let logits = &policy_flat[i * policy_width..(i + 1) * policy_width];
            let policy = Self::softmax(logits);
            // Model output is side-to-move in [-1, 1]; store Black in [0, 1].
            let stm = (winrates.get(i).copied().unwrap_or(0.0) + 1.0) / 2.0;
            let winrate = match query.state.to_move() {
                Color::Black => stm,
                Color::White => 1.0 - stm,
            };
            results.push(NetResult { policy, winrate });
        }
        Ok(results)
    }

    fn base_memory(&self) -> usize {
        self.weight_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_normalises() {
        let policy = OnnxNetwork::<crate::tests::MockPosition, DummyEncoder>::softmax(&[
            1.0, 2.0, 3.0,
        ]);
        let sum: f32 = policy.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(policy[2] > policy[1]);
        assert!(policy[1] > policy[0]);
    }

    struct DummyEncoder;

    impl FeatureEncoder<crate::tests::MockPosition> for DummyEncoder {
        fn input_len(&self) -> usize {
            1
        }

        fn encode(&self, _state: &crate::tests::MockPosition, _symmetry: u8, out: &mut [f32]) {
            out[0] = 0.0;
        }
    }
}
