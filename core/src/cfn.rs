/// Chaos-free network (CFN) layer structure.
///
/// Forward (per timestep):
///   i = sigmoid(Wi x + bi + Ui y_prev)       (input gate)
///   f = sigmoid(Wf x + bf + Uf y_prev)       (forget gate)
///   c = act(Wc x)                            (candidate, weights only)
///   y = i ⊙ c + f ⊙ act(y_prev)
///
/// The forget branch and the recurrent gate terms are omitted at the first
/// timestep, so y = i ⊙ c there.

use crate::activation::Activation;
use crate::array::ActivableArray;
use crate::layer::{gate_backward, gate_pre};
use crate::model::LayerParams;

pub struct CfnLayer {
    pub input: ActivableArray,
    pub output: ActivableArray,
    pub in_gate: ActivableArray,
    pub forget_gate: ActivableArray,
    pub candidate: ActivableArray,
    activation: Activation,
    /// Gradient w.r.t. this timestep's output, deposited by the successor.
    pub rec_errors: Vec<f32>,
}

impl CfnLayer {
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        CfnLayer {
            input: ActivableArray::new(input_size, None),
            output: ActivableArray::new(output_size, None),
            in_gate: ActivableArray::new(output_size, Some(Activation::Sigmoid)),
            forget_gate: ActivableArray::new(output_size, Some(Activation::Sigmoid)),
            candidate: ActivableArray::new(output_size, Some(activation)),
            activation,
            rec_errors: vec![0.0; output_size],
        }
    }

    pub fn forward(
        &mut self,
        params: &LayerParams,
        prev: Option<&CfnLayer>,
        contribs: Option<&mut LayerParams>,
    ) {
        let m = self.output.len();
        let y_prev = prev.map(|p| p.output.values.as_slice());
        let (c_i, c_f, c_c) = match contribs {
            Some(c) => {
                let mut it = c.gates.iter_mut();
                (it.next(), it.next(), it.next())
            }
            None => (None, None, None),
        };

        gate_pre(&params.gates[0], c_i, &self.input.values, y_prev, &mut self.in_gate.values);
        self.in_gate.activate();
        gate_pre(&params.gates[1], c_f, &self.input.values, y_prev, &mut self.forget_gate.values);
        self.forget_gate.activate();
        gate_pre(&params.gates[2], c_c, &self.input.values, None, &mut self.candidate.values);
        self.candidate.activate();

        for i in 0..m {
            let mut y = self.in_gate.values[i] * self.candidate.values[i];
            if let Some(yp) = y_prev {
                y += self.forget_gate.values[i] * self.activation.apply(yp[i]);
            }
            self.output.values[i] = y;
        }
    }

    pub fn backward(
        &mut self,
        params: &LayerParams,
        grads: &mut LayerParams,
        prev: Option<&mut CfnLayer>,
        propagate_to_input: bool,
    ) {
        let m = self.output.len();
        let mut gy = vec![0.0f32; m];
        for i in 0..m {
            gy[i] = self.output.errors[i] + self.rec_errors[i];
        }

        let mut d_i = vec![0.0f32; m];
        let mut d_cand = vec![0.0f32; m];
        for i in 0..m {
            d_i[i] = gy[i] * self.candidate.values[i] * self.in_gate.grad_at(i);
            d_cand[i] = gy[i] * self.in_gate.values[i] * self.candidate.grad_at(i);
        }

        if propagate_to_input {
            self.input.zero_errors();
        }

        match prev {
            Some(p) => {
                let mut d_f = vec![0.0f32; m];
                for i in 0..m {
                    let ay = self.activation.apply(p.output.values[i]);
                    d_f[i] = gy[i] * ay * self.forget_gate.grad_at(i);
                }
                gate_backward(
                    &params.gates[0],
                    &mut grads.gates[0],
                    &d_i,
                    &self.input.values,
                    Some(&p.output.values),
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    Some(&mut p.rec_errors),
                );
                gate_backward(
                    &params.gates[1],
                    &mut grads.gates[1],
                    &d_f,
                    &self.input.values,
                    Some(&p.output.values),
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    Some(&mut p.rec_errors),
                );
                gate_backward(
                    &params.gates[2],
                    &mut grads.gates[2],
                    &d_cand,
                    &self.input.values,
                    None,
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    None,
                );
                // direct path through f ⊙ act(y_prev)
                for i in 0..m {
                    let ay = self.activation.apply(p.output.values[i]);
                    p.rec_errors[i] += gy[i]
                        * self.forget_gate.values[i]
                        * self.activation.grad_from_output(ay);
                }
            }
            None => {
                gate_backward(
                    &params.gates[0],
                    &mut grads.gates[0],
                    &d_i,
                    &self.input.values,
                    None,
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    None,
                );
                gate_backward(
                    &params.gates[2],
                    &mut grads.gates[2],
                    &d_cand,
                    &self.input.values,
                    None,
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    None,
                );
                // no gradient flows through the forget gate at the first timestep
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
        let mut rng = SimpleRng::new(41);
        LayerParams::init(ConnectionKind::Cfn, 3, 2, &mut rng)
    }

    #[test]
    fn test_first_timestep_is_gate_times_candidate() {
        let p = params();
        let mut layer = CfnLayer::new(3, 2, Activation::Tanh);
        layer.input.assign(&[0.2, 0.7, -0.4]);
        layer.forward(&p, None, None);
        for i in 0..2 {
            let expect = layer.in_gate.values[i] * layer.candidate.values[i];
            assert!((layer.output.values[i] - expect).abs() < 1e-7);
        }
    }

    #[test]
    fn test_candidate_ignores_history() {
        let p = params();
        let mut t0 = CfnLayer::new(3, 2, Activation::Tanh);
        t0.input.assign(&[0.2, 0.7, -0.4]);
        t0.forward(&p, None, None);

        let mut t1 = CfnLayer::new(3, 2, Activation::Tanh);
        t1.input.assign(&[0.2, 0.7, -0.4]);
        t1.forward(&p, Some(&t0), None);

        // the candidate depends on the input only
        assert_eq!(t0.candidate.values, t1.candidate.values);
        // the output does not
        assert_ne!(t0.output.values, t1.output.values);
    }

    #[test]
    fn test_backward_deposits_previous_error() {
        let p = params();
        let mut t0 = CfnLayer::new(3, 2, Activation::Tanh);
        t0.input.assign(&[0.2, 0.7, -0.4]);
        t0.forward(&p, None, None);
        let mut t1 = CfnLayer::new(3, 2, Activation::Tanh);
        t1.input.assign(&[-0.3, 0.1, 0.6]);
        t1.forward(&p, Some(&t0), None);

        t1.output.set_errors(&[0.5, 0.5]);
        let mut grads = p.zeros_like();
        t1.backward(&p, &mut grads, Some(&mut t0), true);

        assert!(t0.rec_errors.iter().any(|e| e.abs() > 1e-10));
        // candidate gate has no bias buffer, so its gradient stays empty
        assert!(grads.gates[2].biases.is_empty());
        assert!(grads.gates[2].weights.iter().any(|v| v.abs() > 1e-12));
    }
}
