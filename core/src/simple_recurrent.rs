/// Plain recurrent layer structure: y = act(W x + b + U y_prev).
///
/// The recurrent term is omitted at the first timestep. During backward the
/// gradient destined for the previous timestep's output, U^T d, is deposited
/// into the predecessor's `rec_errors`.

use crate::activation::Activation;
use crate::array::ActivableArray;
use crate::layer::{gate_backward, gate_pre};
use crate::model::LayerParams;

pub struct SimpleRecurrentLayer {
    pub input: ActivableArray,
    pub output: ActivableArray,
    /// Gradient w.r.t. this timestep's output, deposited by the successor.
    pub rec_errors: Vec<f32>,
}

impl SimpleRecurrentLayer {
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        SimpleRecurrentLayer {
            input: ActivableArray::new(input_size, None),
            output: ActivableArray::new(output_size, Some(activation)),
            rec_errors: vec![0.0; output_size],
        }
    }

    pub fn forward(
        &mut self,
        params: &LayerParams,
        prev: Option<&SimpleRecurrentLayer>,
        contribs: Option<&mut LayerParams>,
    ) {
        let y_prev = prev.map(|p| p.output.values.as_slice());
        gate_pre(
            &params.gates[0],
            contribs.map(|c| &mut c.gates[0]),
            &self.input.values,
            y_prev,
            &mut self.output.values,
        );
        self.output.activate();
    }

    pub fn backward(
        &mut self,
        params: &LayerParams,
        grads: &mut LayerParams,
        prev: Option<&mut SimpleRecurrentLayer>,
        propagate_to_input: bool,
    ) {
        let m = self.output.len();
        let mut d = vec![0.0f32; m];
        for i in 0..m {
            d[i] = (self.output.errors[i] + self.rec_errors[i]) * self.output.grad_at(i);
        }

        let d_input = if propagate_to_input {
            self.input.zero_errors();
            Some(self.input.errors.as_mut_slice())
        } else {
            None
        };
        match prev {
            Some(p) => gate_backward(
                &params.gates[0],
                &mut grads.gates[0],
                &d,
                &self.input.values,
                Some(&p.output.values),
                d_input,
                Some(&mut p.rec_errors),
            ),
            None => gate_backward(
                &params.gates[0],
                &mut grads.gates[0],
                &d,
                &self.input.values,
                None,
                d_input,
                None,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionKind;
    use crate::tensor::SimpleRng;

    fn params() -> LayerParams {
        let mut rng = SimpleRng::new(11);
        LayerParams::init(ConnectionKind::SimpleRecurrent, 3, 2, &mut rng)
    }

    #[test]
    fn test_first_timestep_ignores_recurrent_weights() {
        let mut p = params();
        let mut layer = SimpleRecurrentLayer::new(3, 2, Activation::Tanh);
        layer.input.assign(&[0.5, -0.5, 0.25]);
        layer.forward(&p, None, None);
        let y_a = layer.output.values.clone();

        // changing the recurrent weights must not change the first timestep
        for u in p.gates[0].recurrent.iter_mut() {
            *u += 10.0;
        }
        let mut layer2 = SimpleRecurrentLayer::new(3, 2, Activation::Tanh);
        layer2.input.assign(&[0.5, -0.5, 0.25]);
        layer2.forward(&p, None, None);
        assert_eq!(y_a, layer2.output.values);
    }

    #[test]
    fn test_second_timestep_uses_previous_output() {
        let p = params();
        let mut t0 = SimpleRecurrentLayer::new(3, 2, Activation::Tanh);
        t0.input.assign(&[0.5, -0.5, 0.25]);
        t0.forward(&p, None, None);

        let mut t1 = SimpleRecurrentLayer::new(3, 2, Activation::Tanh);
        t1.input.assign(&[0.5, -0.5, 0.25]);
        t1.forward(&p, Some(&t0), None);

        assert_ne!(t0.output.values, t1.output.values);
    }

    #[test]
    fn test_backward_deposits_previous_error() {
        let p = params();
        let mut t0 = SimpleRecurrentLayer::new(3, 2, Activation::Tanh);
        t0.input.assign(&[0.5, -0.5, 0.25]);
        t0.forward(&p, None, None);
        let mut t1 = SimpleRecurrentLayer::new(3, 2, Activation::Tanh);
        t1.input.assign(&[-0.1, 0.3, 0.7]);
        t1.forward(&p, Some(&t0), None);

        t1.output.set_errors(&[0.4, -0.6]);
        let mut grads = p.zeros_like();
        t1.backward(&p, &mut grads, Some(&mut t0), true);

        let deposited: f32 = t0.rec_errors.iter().map(|e| e.abs()).sum();
        assert!(deposited > 1e-8, "no recurrent error deposited");
        let rec_grad: f32 = grads.gates[0].recurrent.iter().map(|g| g.abs()).sum();
        assert!(rec_grad > 1e-8, "no recurrent weight gradient");
    }
}
