/// GRU layer structure.
///
/// Forward (per timestep):
///   r = sigmoid(Wr x + br + Ur y_prev)                    (reset gate)
///   p = sigmoid(Wp x + bp + Up y_prev)                    (partition gate)
///   c = act(Wc x + bc + Uc (r ⊙ y_prev))                  (candidate)
///   y = p ⊙ c + (1 − p) ⊙ y_prev
///
/// Every y_prev term is omitted at the first timestep, so y = p ⊙ c there.

use crate::activation::Activation;
use crate::array::ActivableArray;
use crate::layer::{gate_backward, gate_pre};
use crate::model::LayerParams;

pub struct GruLayer {
    pub input: ActivableArray,
    pub output: ActivableArray,
    pub reset: ActivableArray,
    pub partition: ActivableArray,
    pub candidate: ActivableArray,
    /// r ⊙ y_prev, the candidate's recurrent input.
    reset_prev: Vec<f32>,
    /// Gradient w.r.t. this timestep's output, deposited by the successor.
    pub rec_errors: Vec<f32>,
}

impl GruLayer {
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        GruLayer {
            input: ActivableArray::new(input_size, None),
            output: ActivableArray::new(output_size, None),
            reset: ActivableArray::new(output_size, Some(Activation::Sigmoid)),
            partition: ActivableArray::new(output_size, Some(Activation::Sigmoid)),
            candidate: ActivableArray::new(output_size, Some(activation)),
            reset_prev: vec![0.0; output_size],
            rec_errors: vec![0.0; output_size],
        }
    }

    pub fn forward(
        &mut self,
        params: &LayerParams,
        prev: Option<&GruLayer>,
        contribs: Option<&mut LayerParams>,
    ) {
        let m = self.output.len();
        let y_prev = prev.map(|p| p.output.values.as_slice());
        let (c_r, c_p, c_c) = match contribs {
            Some(c) => {
                let mut it = c.gates.iter_mut();
                (it.next(), it.next(), it.next())
            }
            None => (None, None, None),
        };

        gate_pre(&params.gates[0], c_r, &self.input.values, y_prev, &mut self.reset.values);
        self.reset.activate();
        gate_pre(&params.gates[1], c_p, &self.input.values, y_prev, &mut self.partition.values);
        self.partition.activate();

        match y_prev {
            Some(yp) => {
                for i in 0..m {
                    self.reset_prev[i] = self.reset.values[i] * yp[i];
                }
                gate_pre(
                    &params.gates[2],
                    c_c,
                    &self.input.values,
                    Some(&self.reset_prev),
                    &mut self.candidate.values,
                );
            }
            None => gate_pre(&params.gates[2], c_c, &self.input.values, None, &mut self.candidate.values),
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
        prev: Option<&mut GruLayer>,
        propagate_to_input: bool,
    ) {
        let m = self.output.len();
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

        if propagate_to_input {
            self.input.zero_errors();
        }

        match prev {
            Some(p) => {
                // candidate gate, recurrent input is r ⊙ y_prev
                let mut d_rp = vec![0.0f32; m];
                gate_backward(
                    &params.gates[2],
                    &mut grads.gates[2],
                    &dc,
                    &self.input.values,
                    Some(&self.reset_prev),
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    Some(&mut d_rp),
                );

                // dr = y_prev ⊙ d_rp ⊙ sigmoid'(r)
                let mut dr = vec![0.0f32; m];
                for i in 0..m {
                    dr[i] = p.output.values[i] * d_rp[i] * self.reset.grad_at(i);
                }

                gate_backward(
                    &params.gates[0],
                    &mut grads.gates[0],
                    &dr,
                    &self.input.values,
                    Some(&p.output.values),
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    Some(&mut p.rec_errors),
                );
                gate_backward(
                    &params.gates[1],
                    &mut grads.gates[1],
                    &dp,
                    &self.input.values,
                    Some(&p.output.values),
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    Some(&mut p.rec_errors),
                );

                // direct paths into the previous output: (1 − p) ⊙ gy and r ⊙ d_rp
                for i in 0..m {
                    p.rec_errors[i] += gy[i] * (1.0 - self.partition.values[i])
                        + self.reset.values[i] * d_rp[i];
                }
            }
            None => {
                gate_backward(
                    &params.gates[2],
                    &mut grads.gates[2],
                    &dc,
                    &self.input.values,
                    None,
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    None,
                );
                gate_backward(
                    &params.gates[1],
                    &mut grads.gates[1],
                    &dp,
                    &self.input.values,
                    None,
                    propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                    None,
                );
                // no gradient flows through the reset gate at the first timestep
            }
        }
    }
}
