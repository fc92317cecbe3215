/// LSTM layer structure.
///
/// Forward (per timestep):
///   i = sigmoid(Wi x + bi + Ui y_prev)       (input gate)
///   o = sigmoid(Wo x + bo + Uo y_prev)       (output gate)
///   f = sigmoid(Wf x + bf + Uf y_prev)       (forget gate)
///   g = act(Wc x + bc + Uc y_prev)           (candidate)
///   cell = i ⊙ g + f ⊙ cell_prev
///   y = o ⊙ act(cell)
///
/// Every *_prev term is omitted at the first timestep. Backward threads two
/// gradients to the predecessor: one into its output (`rec_errors`) and one
/// into its raw cell state (`rec_cell_errors`).

use crate::activation::Activation;
use crate::array::ActivableArray;
use crate::layer::{gate_backward, gate_pre};
use crate::model::LayerParams;

pub struct LstmLayer {
    pub input: ActivableArray,
    pub output: ActivableArray,
    pub in_gate: ActivableArray,
    pub out_gate: ActivableArray,
    pub forget_gate: ActivableArray,
    pub candidate: ActivableArray,
    /// Raw cell in `pre()`, activated cell in `values`.
    pub cell: ActivableArray,
    /// Gradient w.r.t. this timestep's output, deposited by the successor.
    pub rec_errors: Vec<f32>,
    /// Gradient w.r.t. this timestep's raw cell, deposited by the successor.
    pub rec_cell_errors: Vec<f32>,
}

impl LstmLayer {
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        LstmLayer {
            input: ActivableArray::new(input_size, None),
            output: ActivableArray::new(output_size, None),
            in_gate: ActivableArray::new(output_size, Some(Activation::Sigmoid)),
            out_gate: ActivableArray::new(output_size, Some(Activation::Sigmoid)),
            forget_gate: ActivableArray::new(output_size, Some(Activation::Sigmoid)),
            candidate: ActivableArray::new(output_size, Some(activation)),
            cell: ActivableArray::new(output_size, Some(activation)),
            rec_errors: vec![0.0; output_size],
            rec_cell_errors: vec![0.0; output_size],
        }
    }

    pub fn forward(
        &mut self,
        params: &LayerParams,
        prev: Option<&LstmLayer>,
        contribs: Option<&mut LayerParams>,
    ) {
        let m = self.output.len();
        let y_prev = prev.map(|p| p.output.values.as_slice());
        let (c_i, c_o, c_f, c_c) = match contribs {
            Some(c) => {
                let mut it = c.gates.iter_mut();
                (it.next(), it.next(), it.next(), it.next())
            }
            None => (None, None, None, None),
        };

        gate_pre(&params.gates[0], c_i, &self.input.values, y_prev, &mut self.in_gate.values);
        self.in_gate.activate();
        gate_pre(&params.gates[1], c_o, &self.input.values, y_prev, &mut self.out_gate.values);
        self.out_gate.activate();
        gate_pre(&params.gates[2], c_f, &self.input.values, y_prev, &mut self.forget_gate.values);
        self.forget_gate.activate();
        gate_pre(&params.gates[3], c_c, &self.input.values, y_prev, &mut self.candidate.values);
        self.candidate.activate();

        for i in 0..m {
            let mut c = self.in_gate.values[i] * self.candidate.values[i];
            if let Some(p) = prev {
                c += self.forget_gate.values[i] * p.cell.pre()[i];
            }
            self.cell.values[i] = c;
        }
        self.cell.activate();

        for i in 0..m {
            self.output.values[i] = self.out_gate.values[i] * self.cell.values[i];
        }
    }

    pub fn backward(
        &mut self,
        params: &LayerParams,
        grads: &mut LayerParams,
        prev: Option<&mut LstmLayer>,
        propagate_to_input: bool,
    ) {
        let m = self.output.len();
        let mut gy = vec![0.0f32; m];
        for i in 0..m {
            gy[i] = self.output.errors[i] + self.rec_errors[i];
        }

        let mut d_o = vec![0.0f32; m];
        let mut d_cell = vec![0.0f32; m];
        for i in 0..m {
            d_o[i] = gy[i] * self.cell.values[i] * self.out_gate.grad_at(i);
            d_cell[i] =
                gy[i] * self.out_gate.values[i] * self.cell.grad_at(i) + self.rec_cell_errors[i];
        }
        let mut d_i = vec![0.0f32; m];
        let mut d_cand = vec![0.0f32; m];
        for i in 0..m {
            d_i[i] = d_cell[i] * self.candidate.values[i] * self.in_gate.grad_at(i);
            d_cand[i] = d_cell[i] * self.in_gate.values[i] * self.candidate.grad_at(i);
        }

        if propagate_to_input {
            self.input.zero_errors();
        }

        match prev {
            Some(p) => {
                let mut d_f = vec![0.0f32; m];
                for i in 0..m {
                    d_f[i] = d_cell[i] * p.cell.pre()[i] * self.forget_gate.grad_at(i);
                }
                for (gate, d) in [(0usize, &d_i), (1, &d_o), (2, &d_f), (3, &d_cand)] {
                    gate_backward(
                        &params.gates[gate],
                        &mut grads.gates[gate],
                        d,
                        &self.input.values,
                        Some(&p.output.values),
                        propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                        Some(&mut p.rec_errors),
                    );
                }
                for i in 0..m {
                    p.rec_cell_errors[i] += d_cell[i] * self.forget_gate.values[i];
                }
            }
            None => {
                // forget gate is unused at the first timestep
                for (gate, d) in [(0usize, &d_i), (1, &d_o), (3, &d_cand)] {
                    gate_backward(
                        &params.gates[gate],
                        &mut grads.gates[gate],
                        d,
                        &self.input.values,
                        None,
                        propagate_to_input.then(|| self.input.errors.as_mut_slice()),
                        None,
                    );
                }
            }
        }
    }
}
