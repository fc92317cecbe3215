/// DeltaRNN layer structure.
///
/// Forward (per timestep), with wx = W x and wr = Wrec y_prev:
///   p = sigmoid(wx + bp)                                        (partition)
///   c = act(beta1 ⊙ wx + beta2 ⊙ wr + alpha ⊙ wx ⊙ wr + bc)     (candidate)
///   y = p ⊙ c + (1 − p) ⊙ y_prev
///
/// Every wr / y_prev term is omitted at the first timestep, so
/// c = act(beta1 ⊙ wx + bc) and y = p ⊙ c there. The partition and the
/// candidate share the single W x product.

use crate::activation::Activation;
use crate::array::ActivableArray;
use crate::layer::product_recording;
use crate::model::LayerParams;
use crate::tensor::{matvec_t_acc_f32, outer_acc_f32};

pub struct DeltaLayer {
    pub input: ActivableArray,
    pub output: ActivableArray,
    pub candidate: ActivableArray,
    pub partition: ActivableArray,
    /// W x, shared by the partition and the candidate.
    wx: Vec<f32>,
    /// Wrec y_prev; stays zero at the first timestep.
    wr: Vec<f32>,
    /// Gradient w.r.t. this timestep's output, deposited by the successor.
    pub rec_errors: Vec<f32>,
}

impl DeltaLayer {
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        DeltaLayer {
            input: ActivableArray::new(input_size, None),
            output: ActivableArray::new(output_size, None),
            candidate: ActivableArray::new(output_size, Some(activation)),
            partition: ActivableArray::new(output_size, Some(Activation::Sigmoid)),
            wx: vec![0.0; output_size],
            wr: vec![0.0; output_size],
            rec_errors: vec![0.0; output_size],
        }
    }

    pub fn forward(
        &mut self,
        params: &LayerParams,
        prev: Option<&DeltaLayer>,
        contribs: Option<&mut LayerParams>,
    ) {
        let m = self.output.len();
        let n = self.input.len();
        let unit = &params.gates[0];
        let y_prev = prev.map(|p| p.output.values.as_slice());

        let (rec_w, rec_u) = match contribs {
            Some(c) => {
                let g = &mut c.gates[0];
                (Some(g.weights.as_mut_slice()), Some(g.recurrent.as_mut_slice()))
            }
            None => (None, None),
        };
        product_recording(&unit.weights, &self.input.values, rec_w, &mut self.wx, m, n);
        if let Some(yp) = y_prev {
            product_recording(&unit.recurrent, yp, rec_u, &mut self.wr, m, m);
        }

        // partition: p = sigmoid(wx + bp)
        let bp = &params.gates[1].biases;
        for i in 0..m {
            self.partition.values[i] = self.wx[i] + bp[i];
        }
        self.partition.activate();

        // candidate
        for i in 0..m {
            let mut pre = params.beta1[i] * self.wx[i] + unit.biases[i];
            if y_prev.is_some() {
                pre += params.beta2[i] * self.wr[i]
                    + params.alpha[i] * self.wx[i] * self.wr[i];
            }
            self.candidate.values[i] = pre;
        }
        self.candidate.activate();

        for i in 0..m {
            let p_i = self.partition.values[i];
            let mut y = p_i * self.candidate.values[i];
            if let Some(yp) = y_prev {
                y += (1.0 - p_i) * yp[i];
            }
            self.output.values[i] = y;
        }
    }

    pub fn backward(
        &mut self,
        params: &LayerParams,
        grads: &mut LayerParams,
        prev: Option<&mut DeltaLayer>,
        propagate_to_input: bool,
    ) {
        let m = self.output.len();
        let n = self.input.len();
        let unit = &params.gates[0];

        let mut gy = vec![0.0f32; m];
        for i in 0..m {
            gy[i] = self.output.errors[i] + self.rec_errors[i];
        }

        let mut dc = vec![0.0f32; m];
        for i in 0..m {
            dc[i] = gy[i] * self.partition.values[i] * self.candidate.grad_at(i);
        }
        let mut dp = vec![0.0f32; m];
        {
            let y_prev = prev.as_deref().map(|p| p.output.values.as_slice());
            for i in 0..m {
                let direct = match y_prev {
                    Some(yp) => self.candidate.values[i] - yp[i],
                    None => self.candidate.values[i],
                };
                dp[i] = gy[i] * direct * self.partition.grad_at(i);
            }
        }

        // gate biases
        for i in 0..m {
            grads.gates[0].biases[i] += dc[i];
            grads.gates[1].biases[i] += dp[i];
        }
        // mixing vectors
        for i in 0..m {
            grads.beta1[i] += dc[i] * self.wx[i];
        }

        // error at wx: through beta1, the product term and the partition
        let mut d_wx = vec![0.0f32; m];
        match &prev {
            Some(_) => {
                for i in 0..m {
                    d_wx[i] =
                        dc[i] * (params.beta1[i] + params.alpha[i] * self.wr[i]) + dp[i];
                }
            }
            None => {
                for i in 0..m {
                    d_wx[i] = dc[i] * params.beta1[i] + dp[i];
                }
            }
        }
        outer_acc_f32(&d_wx, &self.input.values, &mut grads.gates[0].weights);

        if propagate_to_input {
            self.input.zero_errors();
            matvec_t_acc_f32(&unit.weights, &d_wx, &mut self.input.errors, m, n);
        }

        if let Some(p) = prev {
            for i in 0..m {
                grads.alpha[i] += dc[i] * self.wx[i] * self.wr[i];
                grads.beta2[i] += dc[i] * self.wr[i];
            }
            let mut d_wr = vec![0.0f32; m];
            for i in 0..m {
                d_wr[i] = dc[i] * (params.beta2[i] + params.alpha[i] * self.wx[i]);
            }
            outer_acc_f32(&d_wr, &p.output.values, &mut grads.gates[0].recurrent);
            matvec_t_acc_f32(&unit.recurrent, &d_wr, &mut p.rec_errors, m, m);
            for i in 0..m {
                p.rec_errors[i] += gy[i] * (1.0 - self.partition.values[i]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionKind;
    use crate::tensor::SimpleRng;

    fn params() -> LayerParams {
        let mut rng = SimpleRng::new(51);
        LayerParams::init(ConnectionKind::DeltaRnn, 3, 2, &mut rng)
    }

    #[test]
    fn test_first_timestep_is_partition_times_candidate() {
        let p = params();
        let mut layer = DeltaLayer::new(3, 2, Activation::Tanh);
        layer.input.assign(&[0.5, -0.1, 0.3]);
        layer.forward(&p, None, None);
        for i in 0..2 {
            let expect = layer.partition.values[i] * layer.candidate.values[i];
            assert!((layer.output.values[i] - expect).abs() < 1e-7);
        }
    }

    #[test]
    fn test_partition_and_candidate_share_wx() {
        let p = params();
        let mut layer = DeltaLayer::new(3, 2, Activation::Tanh);
        layer.input.assign(&[0.5, -0.1, 0.3]);
        layer.forward(&p, None, None);
        // the partition pre-activation is wx + bp
        for i in 0..2 {
            let expect = layer.wx[i] + p.gates[1].biases[i];
            assert!((layer.partition.pre()[i] - expect).abs() < 1e-7);
        }
        // the candidate pre-activation is beta1 ⊙ wx + bc at the first timestep
        for i in 0..2 {
            let expect = p.beta1[i] * layer.wx[i] + p.gates[0].biases[i];
            assert!((layer.candidate.pre()[i] - expect).abs() < 1e-7);
        }
    }

    #[test]
    fn test_second_timestep_mixes_previous_output() {
        let p = params();
        let mut t0 = DeltaLayer::new(3, 2, Activation::Tanh);
        t0.input.assign(&[0.5, -0.1, 0.3]);
        t0.forward(&p, None, None);
        let mut t1 = DeltaLayer::new(3, 2, Activation::Tanh);
        t1.input.assign(&[0.5, -0.1, 0.3]);
        t1.forward(&p, Some(&t0), None);
        for i in 0..2 {
            let p_i = t1.partition.values[i];
            let expect = p_i * t1.candidate.values[i] + (1.0 - p_i) * t0.output.values[i];
            assert!((t1.output.values[i] - expect).abs() < 1e-7);
        }
    }

    #[test]
    fn test_contribution_recording_does_not_change_output() {
        let p = params();
        let mut t0 = DeltaLayer::new(3, 2, Activation::Tanh);
        t0.input.assign(&[0.5, -0.1, 0.3]);
        t0.forward(&p, None, None);

        let mut plain = DeltaLayer::new(3, 2, Activation::Tanh);
        plain.input.assign(&[-0.2, 0.8, 0.4]);
        plain.forward(&p, Some(&t0), None);

        let mut recorded = DeltaLayer::new(3, 2, Activation::Tanh);
        recorded.input.assign(&[-0.2, 0.8, 0.4]);
        let mut contribs = p.zeros_like();
        recorded.forward(&p, Some(&t0), Some(&mut contribs));

        assert_eq!(plain.output.values, recorded.output.values);
        for i in 0..2 {
            for j in 0..3 {
                let expect = p.gates[0].weights[i * 3 + j] * recorded.input.values[j];
                assert_eq!(contribs.gates[0].weights[i * 3 + j], expect);
            }
        }
    }

    #[test]
    fn test_backward_populates_mixing_gradients() {
        let p = params();
        let mut t0 = DeltaLayer::new(3, 2, Activation::Tanh);
        t0.input.assign(&[0.5, -0.1, 0.3]);
        t0.forward(&p, None, None);
        let mut t1 = DeltaLayer::new(3, 2, Activation::Tanh);
        t1.input.assign(&[-0.2, 0.8, 0.4]);
        t1.forward(&p, Some(&t0), None);

        t1.output.set_errors(&[0.9, -0.4]);
        let mut grads = p.zeros_like();
        t1.backward(&p, &mut grads, Some(&mut t0), true);

        assert!(grads.alpha.iter().any(|v| v.abs() > 1e-12));
        assert!(grads.beta1.iter().any(|v| v.abs() > 1e-12));
        assert!(grads.beta2.iter().any(|v| v.abs() > 1e-12));
        assert!(t0.rec_errors.iter().any(|e| e.abs() > 1e-10));
    }
}
