/// Feed-forward layer structure: y = act(W x + b).
///
/// No temporal state: each timestep is independent of its neighbours.

use crate::activation::Activation;
use crate::array::ActivableArray;
use crate::layer::{gate_backward, gate_pre};
use crate::model::LayerParams;

pub struct FeedforwardLayer {
    pub input: ActivableArray,
    pub output: ActivableArray,
}

impl FeedforwardLayer {
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        FeedforwardLayer {
            input: ActivableArray::new(input_size, None),
            output: ActivableArray::new(output_size, Some(activation)),
        }
    }

    pub fn forward(&mut self, params: &LayerParams, contribs: Option<&mut LayerParams>) {
        gate_pre(
            &params.gates[0],
            contribs.map(|c| &mut c.gates[0]),
            &self.input.values,
            None,
            &mut self.output.values,
        );
        self.output.activate();
    }

    pub fn backward(&mut self, params: &LayerParams, grads: &mut LayerParams, propagate_to_input: bool) {
        let m = self.output.len();
        let mut d = vec![0.0f32; m];
        for i in 0..m {
            d[i] = self.output.errors[i] * self.output.grad_at(i);
        }

        let d_input = if propagate_to_input {
            self.input.zero_errors();
            Some(self.input.errors.as_mut_slice())
        } else {
            None
        };
        gate_backward(
            &params.gates[0],
            &mut grads.gates[0],
            &d,
            &self.input.values,
            None,
            d_input,
            None,
        );
    }
}
