/// Gradient verification via central finite differences.
///
/// The loss is the summed squared error L = 0.5 Σ_t ||y_t − target_t||², so
/// the per-timestep output error fed to backward is exactly y_t − target_t.
/// Backward averages parameter gradients over the sequence length, so the
/// analytical value for a weight is (dL/dw) / T; the checker scales the
/// numerical estimate accordingly.
///
/// Comparison uses relative error with an absolute floor: entries where both
/// values sit under the floor are below finite-difference resolution and
/// auto-pass.

use crate::model::{NetworkConfig, NetworkParams};
use crate::processor::RecurrentProcessor;

/// 0.5 Σ_t ||y_t − target_t||².
pub fn sum_squared_loss(outputs: &[Vec<f32>], targets: &[Vec<f32>]) -> f32 {
    debug_assert_eq!(outputs.len(), targets.len());
    let mut loss = 0.0f32;
    for (y, t) in outputs.iter().zip(targets.iter()) {
        debug_assert_eq!(y.len(), t.len());
        for i in 0..y.len() {
            let d = y[i] - t[i];
            loss += 0.5 * d * d;
        }
    }
    loss
}

/// dL/dy_t = y_t − target_t for the loss above.
pub fn loss_gradients(outputs: &[Vec<f32>], targets: &[Vec<f32>]) -> Vec<Vec<f32>> {
    outputs
        .iter()
        .zip(targets.iter())
        .map(|(y, t)| y.iter().zip(t.iter()).map(|(a, b)| a - b).collect())
        .collect()
}

/// Run a fresh forward pass and return the loss against `targets`.
pub fn run_loss(
    cfg: &NetworkConfig,
    params: &NetworkParams,
    inputs: &[Vec<f32>],
    targets: &[Vec<f32>],
) -> f32 {
    let mut processor = RecurrentProcessor::new(cfg.clone());
    processor
        .forward(params, inputs)
        .expect("forward failed during gradient check");
    sum_squared_loss(&processor.output_sequence_copied(), targets)
}

/// Central difference for one weight entry: (L(w+eps) − L(w−eps)) / (2 eps).
pub fn fd_single(
    cfg: &NetworkConfig,
    params: &NetworkParams,
    inputs: &[Vec<f32>],
    targets: &[Vec<f32>],
    layer: usize,
    buffer: usize,
    idx: usize,
    eps: f32,
) -> f32 {
    let mut plus = params.clone();
    plus.layers[layer].buffers_mut()[buffer][idx] += eps;
    let loss_plus = run_loss(cfg, &plus, inputs, targets);

    let mut minus = params.clone();
    minus.layers[layer].buffers_mut()[buffer][idx] -= eps;
    let loss_minus = run_loss(cfg, &minus, inputs, targets);

    (loss_plus - loss_minus) / (2.0 * eps)
}

pub struct GradCheckReport {
    pub checked: usize,
    pub failed: usize,
    pub max_rel_err: f32,
}

/// Compare every analytical parameter gradient against its
/// finite-difference estimate. Returns a report; callers assert on
/// `failed == 0`.
pub fn check_gradients(
    cfg: &NetworkConfig,
    params: &NetworkParams,
    inputs: &[Vec<f32>],
    targets: &[Vec<f32>],
    eps: f32,
    tol: f32,
) -> GradCheckReport {
    let abs_floor = 1e-3;
    let seq_len = inputs.len() as f32;

    // analytical gradients
    let mut processor = RecurrentProcessor::new(cfg.clone());
    processor
        .forward(params, inputs)
        .expect("forward failed during gradient check");
    let errors = loss_gradients(&processor.output_sequence_copied(), targets);
    processor
        .backward(params, &errors, false)
        .expect("backward failed during gradient check");
    let analytic = processor.params_errors().expect("no averaged gradients");

    let mut checked = 0usize;
    let mut failed = 0usize;
    let mut max_rel_err = 0.0f32;

    for (li, layer) in analytic.layers.iter().enumerate() {
        for (bi, buf) in layer.buffers().into_iter().enumerate() {
            for idx in 0..buf.len() {
                let a = buf[idx];
                let numeric = fd_single(cfg, params, inputs, targets, li, bi, idx, eps) / seq_len;
                checked += 1;

                let abs_diff = (a - numeric).abs();
                let denom = a.abs().max(numeric.abs());
                if denom < abs_floor {
                    continue;
                }
                let rel = abs_diff / denom;
                if rel > max_rel_err {
                    max_rel_err = rel;
                }
                if rel >= tol {
                    failed += 1;
                    eprintln!(
                        "  FAIL layer {li} buffer {bi} [{idx}]: analytical={a:.6e}, \
                         numerical={numeric:.6e}, rel_err={rel:.4e}"
                    );
                }
            }
        }
    }

    GradCheckReport {
        checked,
        failed,
        max_rel_err,
    }
}
