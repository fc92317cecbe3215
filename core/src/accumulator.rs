/// Gradient accumulator: sums structured per-timestep (or per-example)
/// parameter gradients and produces their average.
///
/// `count` equals the number of `accumulate` calls since the last reset.
/// `average` divides every summed buffer by `count` exactly once; callers
/// must reset between uses; averaging twice would divide again.

use crate::error::EngineError;
use crate::model::{NetworkConfig, NetworkParams};

pub struct GradientAccumulator {
    sums: NetworkParams,
    count: usize,
}

impl GradientAccumulator {
    pub fn new(cfg: &NetworkConfig) -> Self {
        GradientAccumulator {
            sums: NetworkParams::zeros(cfg),
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Element-wise sum `grads` into the running totals.
    pub fn accumulate(&mut self, grads: &NetworkParams) {
        debug_assert_eq!(self.sums.layers.len(), grads.layers.len());
        for (sum, grad) in self.sums.layers.iter_mut().zip(grads.layers.iter()) {
            for (s, g) in sum.buffers_mut().into_iter().zip(grad.buffers().into_iter()) {
                debug_assert_eq!(s.len(), g.len());
                for i in 0..s.len() {
                    s[i] += g[i];
                }
            }
        }
        self.count += 1;
    }

    /// Divide every summed buffer by `count`, turning the totals into the
    /// arithmetic mean of the accumulated gradients.
    pub fn average(&mut self) -> Result<(), EngineError> {
        if self.count == 0 {
            return Err(EngineError::EmptyAccumulator);
        }
        let inv = 1.0 / self.count as f32;
        for layer in self.sums.layers.iter_mut() {
            for buf in layer.buffers_mut() {
                for v in buf.iter_mut() {
                    *v *= inv;
                }
            }
        }
        Ok(())
    }

    /// The accumulated (or, after `average`, averaged) gradient set.
    pub fn values(&self) -> &NetworkParams {
        &self.sums
    }

    /// Zero the sums and the count.
    pub fn reset(&mut self) {
        for layer in self.sums.layers.iter_mut() {
            for buf in layer.buffers_mut() {
                for v in buf.iter_mut() {
                    *v = 0.0;
                }
            }
        }
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionKind;

    fn cfg() -> NetworkConfig {
        NetworkConfig::test_config(ConnectionKind::Feedforward)
    }

    fn gradient_with(cfg: &NetworkConfig, w0: f32, b0: f32) -> NetworkParams {
        let mut g = NetworkParams::zeros(cfg);
        g.layers[0].gates[0].weights[0] = w0;
        g.layers[0].gates[0].biases[0] = b0;
        g
    }

    #[test]
    fn test_same_gradient_n_times_averages_to_itself() {
        let cfg = cfg();
        let mut acc = GradientAccumulator::new(&cfg);
        let g = gradient_with(&cfg, 0.5, -1.5);
        for _ in 0..4 {
            acc.accumulate(&g);
        }
        assert_eq!(acc.count(), 4);
        acc.average().unwrap();
        assert!((acc.values().layers[0].gates[0].weights[0] - 0.5).abs() < 1e-7);
        assert!((acc.values().layers[0].gates[0].biases[0] + 1.5).abs() < 1e-7);
    }

    #[test]
    fn test_different_gradients_average_to_mean() {
        let cfg = cfg();
        let mut acc = GradientAccumulator::new(&cfg);
        acc.accumulate(&gradient_with(&cfg, 1.0, 3.0));
        acc.accumulate(&gradient_with(&cfg, 2.0, -1.0));
        acc.accumulate(&gradient_with(&cfg, 6.0, 1.0));
        acc.average().unwrap();
        assert!((acc.values().layers[0].gates[0].weights[0] - 3.0).abs() < 1e-6);
        assert!((acc.values().layers[0].gates[0].biases[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_average_with_zero_count_fails() {
        let cfg = cfg();
        let mut acc = GradientAccumulator::new(&cfg);
        assert_eq!(acc.average(), Err(EngineError::EmptyAccumulator));
    }

    #[test]
    fn test_reset_clears_sums_and_count() {
        let cfg = cfg();
        let mut acc = GradientAccumulator::new(&cfg);
        acc.accumulate(&gradient_with(&cfg, 1.0, 1.0));
        acc.reset();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.values().layers[0].gates[0].weights[0], 0.0);
        // usable again after reset
        acc.accumulate(&gradient_with(&cfg, 2.0, 0.0));
        acc.average().unwrap();
        assert_eq!(acc.values().layers[0].gates[0].weights[0], 2.0);
    }
}
