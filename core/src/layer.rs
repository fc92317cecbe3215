/// Per-timestep layer structures.
///
/// A layer structure is one timestep's instantiation of a layer: it owns its
/// input/output arrays plus the gate intermediates backward needs, and
/// borrows the shared parameter unit of its layer index on every call. The
/// cell variants form a closed set behind one contract: forward, forward
/// with contribution recording, backward.
///
/// Gradients destined for the *previous* timestep are deposited directly
/// into the predecessor structure's pending-error buffers during backward;
/// the predecessor picks them up when its own backward runs.

use crate::activation::Activation;
use crate::array::ActivableArray;
use crate::cfn::CfnLayer;
use crate::delta::DeltaLayer;
use crate::feedforward::FeedforwardLayer;
use crate::gru::GruLayer;
use crate::lstm::LstmLayer;
use crate::model::{ConnectionKind, GateParams, LayerParams};
use crate::simple_recurrent::SimpleRecurrentLayer;
use crate::tensor::{add_assign_f32, matvec_acc_f32, matvec_f32, matvec_t_acc_f32, outer_acc_f32};

/// One timestep's state for one layer index.
pub enum LayerState {
    Feedforward(FeedforwardLayer),
    SimpleRecurrent(SimpleRecurrentLayer),
    Gru(GruLayer),
    Lstm(LstmLayer),
    Cfn(CfnLayer),
    DeltaRnn(DeltaLayer),
}

const KIND_MISMATCH: &str = "adjacent timestep holds a different layer kind at this index";

impl LayerState {
    /// Build a fresh structure for one timestep, shaped from the layer's
    /// parameter unit.
    pub fn new(params: &LayerParams, activation: Activation) -> Self {
        let (i, o) = (params.input_size, params.output_size);
        match params.kind {
            ConnectionKind::Feedforward => {
                LayerState::Feedforward(FeedforwardLayer::new(i, o, activation))
            }
            ConnectionKind::SimpleRecurrent => {
                LayerState::SimpleRecurrent(SimpleRecurrentLayer::new(i, o, activation))
            }
            ConnectionKind::Gru => LayerState::Gru(GruLayer::new(i, o, activation)),
            ConnectionKind::Lstm => LayerState::Lstm(LstmLayer::new(i, o, activation)),
            ConnectionKind::Cfn => LayerState::Cfn(CfnLayer::new(i, o, activation)),
            ConnectionKind::DeltaRnn => LayerState::DeltaRnn(DeltaLayer::new(i, o, activation)),
        }
    }

    pub fn input(&self) -> &ActivableArray {
        match self {
            LayerState::Feedforward(l) => &l.input,
            LayerState::SimpleRecurrent(l) => &l.input,
            LayerState::Gru(l) => &l.input,
            LayerState::Lstm(l) => &l.input,
            LayerState::Cfn(l) => &l.input,
            LayerState::DeltaRnn(l) => &l.input,
        }
    }

    pub fn input_mut(&mut self) -> &mut ActivableArray {
        match self {
            LayerState::Feedforward(l) => &mut l.input,
            LayerState::SimpleRecurrent(l) => &mut l.input,
            LayerState::Gru(l) => &mut l.input,
            LayerState::Lstm(l) => &mut l.input,
            LayerState::Cfn(l) => &mut l.input,
            LayerState::DeltaRnn(l) => &mut l.input,
        }
    }

    pub fn output(&self) -> &ActivableArray {
        match self {
            LayerState::Feedforward(l) => &l.output,
            LayerState::SimpleRecurrent(l) => &l.output,
            LayerState::Gru(l) => &l.output,
            LayerState::Lstm(l) => &l.output,
            LayerState::Cfn(l) => &l.output,
            LayerState::DeltaRnn(l) => &l.output,
        }
    }

    pub fn output_mut(&mut self) -> &mut ActivableArray {
        match self {
            LayerState::Feedforward(l) => &mut l.output,
            LayerState::SimpleRecurrent(l) => &mut l.output,
            LayerState::Gru(l) => &mut l.output,
            LayerState::Lstm(l) => &mut l.output,
            LayerState::Cfn(l) => &mut l.output,
            LayerState::DeltaRnn(l) => &mut l.output,
        }
    }

    /// Run the timestep forward. `prev` is the same layer index at the
    /// previous timestep; absent at the start of a sequence, in which case
    /// every recurrent contribution is omitted.
    pub fn forward(&mut self, params: &LayerParams, prev: Option<&LayerState>) {
        self.run_forward(params, prev, None);
    }

    /// Same computation as `forward`, additionally recording the unactivated
    /// per-source contribution of each weight matrix into `contribs` (shaped
    /// like the parameter unit). The output is identical to `forward`'s.
    pub fn forward_with_contributions(
        &mut self,
        params: &LayerParams,
        contribs: &mut LayerParams,
        prev: Option<&LayerState>,
    ) {
        self.run_forward(params, prev, Some(contribs));
    }

    fn run_forward(
        &mut self,
        params: &LayerParams,
        prev: Option<&LayerState>,
        contribs: Option<&mut LayerParams>,
    ) {
        match self {
            LayerState::Feedforward(l) => l.forward(params, contribs),
            LayerState::SimpleRecurrent(l) => {
                let p = match prev {
                    Some(LayerState::SimpleRecurrent(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.forward(params, p, contribs)
            }
            LayerState::Gru(l) => {
                let p = match prev {
                    Some(LayerState::Gru(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.forward(params, p, contribs)
            }
            LayerState::Lstm(l) => {
                let p = match prev {
                    Some(LayerState::Lstm(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.forward(params, p, contribs)
            }
            LayerState::Cfn(l) => {
                let p = match prev {
                    Some(LayerState::Cfn(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.forward(params, p, contribs)
            }
            LayerState::DeltaRnn(l) => {
                let p = match prev {
                    Some(LayerState::DeltaRnn(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.forward(params, p, contribs)
            }
        }
    }

    /// Run the timestep backward. Reads `output().errors` (plus any pending
    /// recurrent errors deposited by the successor timestep), writes
    /// parameter gradients into the caller-owned `grads`, optionally writes
    /// `input().errors`, and deposits gradients for the predecessor timestep
    /// into `prev`'s pending-error buffers.
    pub fn backward(
        &mut self,
        params: &LayerParams,
        grads: &mut LayerParams,
        prev: Option<&mut LayerState>,
        propagate_to_input: bool,
    ) {
        match self {
            LayerState::Feedforward(l) => l.backward(params, grads, propagate_to_input),
            LayerState::SimpleRecurrent(l) => {
                let p = match prev {
                    Some(LayerState::SimpleRecurrent(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.backward(params, grads, p, propagate_to_input)
            }
            LayerState::Gru(l) => {
                let p = match prev {
                    Some(LayerState::Gru(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.backward(params, grads, p, propagate_to_input)
            }
            LayerState::Lstm(l) => {
                let p = match prev {
                    Some(LayerState::Lstm(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.backward(params, grads, p, propagate_to_input)
            }
            LayerState::Cfn(l) => {
                let p = match prev {
                    Some(LayerState::Cfn(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.backward(params, grads, p, propagate_to_input)
            }
            LayerState::DeltaRnn(l) => {
                let p = match prev {
                    Some(LayerState::DeltaRnn(q)) => Some(q),
                    None => None,
                    Some(_) => panic!("{KIND_MISMATCH}"),
                };
                l.backward(params, grads, p, propagate_to_input)
            }
        }
    }
}

// ── Shared gate arithmetic ───────────────────────────────────────────

/// Gate pre-activation: out = W x (+ b) (+ U y_prev).
///
/// With `rec`, every product w[i,j]·x[j] (and u[i,j]·y_prev[j]) is recorded
/// into the matching entry of the recording buffer. Both paths add the same
/// products in the same order, so their outputs are bit-identical.
pub(crate) fn gate_pre(
    gp: &GateParams,
    rec: Option<&mut GateParams>,
    x: &[f32],
    y_prev: Option<&[f32]>,
    out: &mut [f32],
) {
    let m = out.len();
    let n = x.len();
    debug_assert_eq!(gp.weights.len(), m * n);
    match rec {
        None => {
            matvec_f32(&gp.weights, x, out, m, n);
            if !gp.biases.is_empty() {
                add_assign_f32(out, &gp.biases);
            }
            if let Some(yp) = y_prev {
                matvec_acc_f32(&gp.recurrent, yp, out, m, yp.len());
            }
        }
        Some(r) => {
            product_recording(&gp.weights, x, Some(&mut r.weights), out, m, n);
            if !gp.biases.is_empty() {
                add_assign_f32(out, &gp.biases);
            }
            if let Some(yp) = y_prev {
                let k = yp.len();
                debug_assert_eq!(r.recurrent.len(), m * k);
                for i in 0..m {
                    let mut sum = 0.0f32;
                    for j in 0..k {
                        let c = gp.recurrent[i * k + j] * yp[j];
                        r.recurrent[i * k + j] = c;
                        sum += c;
                    }
                    out[i] += sum;
                }
            }
        }
    }
}

/// out = M v, optionally recording each product m[i,j]·v[j]. Sums the same
/// products in the same order as the plain matrix-vector path.
pub(crate) fn product_recording(
    mat: &[f32],
    v: &[f32],
    rec: Option<&mut [f32]>,
    out: &mut [f32],
    m: usize,
    n: usize,
) {
    match rec {
        None => matvec_f32(mat, v, out, m, n),
        Some(r) => {
            debug_assert_eq!(r.len(), m * n);
            for i in 0..m {
                let mut sum = 0.0f32;
                for j in 0..n {
                    let c = mat[i * n + j] * v[j];
                    r[i * n + j] = c;
                    sum += c;
                }
                out[i] = sum;
            }
        }
    }
}

/// Gradient bookkeeping shared by every gate: given the error `d` at the
/// gate's pre-activation, accumulate parameter gradients and propagate to
/// the gate's inputs.
pub(crate) fn gate_backward(
    gp: &GateParams,
    grads: &mut GateParams,
    d: &[f32],
    x: &[f32],
    y_prev: Option<&[f32]>,
    d_input: Option<&mut [f32]>,
    d_prev: Option<&mut [f32]>,
) {
    let m = d.len();
    let n = x.len();
    outer_acc_f32(d, x, &mut grads.weights);
    if !grads.biases.is_empty() {
        add_assign_f32(&mut grads.biases, d);
    }
    if let Some(yp) = y_prev {
        outer_acc_f32(d, yp, &mut grads.recurrent);
        if let Some(dp) = d_prev {
            matvec_t_acc_f32(&gp.recurrent, d, dp, m, yp.len());
        }
    }
    if let Some(di) = d_input {
        matvec_t_acc_f32(&gp.weights, d, di, m, n);
    }
}
