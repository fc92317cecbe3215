/// Per-sequence state store.
///
/// A `TimeState` is the full stack of layer structures for one timestep; the
/// `Sequence` is a growable arena of them, indexed 0..len-1. Adjacent
/// timesteps see each other only through index lookups into the arena;
/// states never hold references to other states, so resetting the sequence
/// is just clearing the arena. The timestep under computation is always an
/// explicit argument, supplied by the processor for every forward and
/// backward call.

use crate::layer::LayerState;
use crate::model::{NetworkConfig, NetworkParams};
use crate::tensor::SimpleRng;

/// One timestep's full network instantiation: one layer structure per layer
/// index, bound to the network's shared parameter units on every call.
pub struct TimeState {
    pub layers: Vec<LayerState>,
    /// Per-layer dropout factors (0 for dropped units, 1/(1-q) for kept
    /// ones); `None` where no mask was applied. Backward routes gradients
    /// through the same factors.
    masks: Vec<Option<Vec<f32>>>,
}

impl TimeState {
    pub fn new(params: &NetworkParams, cfg: &NetworkConfig) -> Self {
        let layers: Vec<LayerState> = params
            .layers
            .iter()
            .enumerate()
            .map(|(l, lp)| LayerState::new(lp, cfg.layers[l + 1].activation))
            .collect();
        let masks = vec![None; layers.len()];
        TimeState { layers, masks }
    }

    /// Run the stack forward for this timestep. `prev` is the previous
    /// timestep's stack, absent at the start of a sequence. With `dropout`,
    /// each layer's staged input is masked with that layer's configured
    /// dropout probability (inverted scaling keeps expectations unchanged).
    pub fn forward(
        &mut self,
        params: &NetworkParams,
        cfg: &NetworkConfig,
        input: &[f32],
        prev: Option<&TimeState>,
        mut dropout: Option<&mut SimpleRng>,
        mut contribs: Option<&mut NetworkParams>,
    ) {
        for l in 0..self.layers.len() {
            let (below, rest) = self.layers.split_at_mut(l);
            let layer = &mut rest[0];
            if l == 0 {
                layer.input_mut().assign(input);
            } else {
                layer.input_mut().assign(&below[l - 1].output().values);
            }

            let q = cfg.layers[l + 1].dropout;
            if q > 0.0 {
                if let Some(rng) = dropout.as_deref_mut() {
                    self.masks[l] = Some(mask_inverted(&mut layer.input_mut().values, q, rng));
                }
            }

            let prev_layer = prev.map(|p| &p.layers[l]);
            match contribs.as_deref_mut() {
                Some(c) => layer.forward_with_contributions(
                    &params.layers[l],
                    &mut c.layers[l],
                    prev_layer,
                ),
                None => layer.forward(&params.layers[l], prev_layer),
            }
        }
    }

    /// Run the stack backward for this timestep. `output_errors` is the loss
    /// gradient at the top layer's output; parameter gradients accumulate
    /// into `grads`; gradients for the previous timestep are deposited into
    /// `prev`'s pending-error buffers.
    pub fn backward(
        &mut self,
        params: &NetworkParams,
        grads: &mut NetworkParams,
        output_errors: &[f32],
        mut prev: Option<&mut TimeState>,
        propagate_to_input: bool,
    ) {
        let last = self.layers.len() - 1;
        self.layers[last].output_mut().set_errors(output_errors);

        for l in (0..self.layers.len()).rev() {
            let (below, rest) = self.layers.split_at_mut(l);
            let layer = &mut rest[0];
            let prev_layer = match prev {
                Some(ref mut p) => Some(&mut p.layers[l]),
                None => None,
            };
            layer.backward(
                &params.layers[l],
                &mut grads.layers[l],
                prev_layer,
                l > 0 || propagate_to_input,
            );
            // a masked input routes its gradient through the same factors
            if let Some(mask) = &self.masks[l] {
                for (e, f) in layer.input_mut().errors.iter_mut().zip(mask.iter()) {
                    *e *= f;
                }
            }
            if l > 0 {
                below[l - 1].output_mut().set_errors(&layer.input().errors);
            }
        }
    }

    /// The network output at this timestep.
    pub fn output(&self) -> &[f32] {
        &self.layers[self.layers.len() - 1].output().values
    }

    /// The gradient w.r.t. this timestep's input features; meaningful only
    /// after a backward call with input propagation.
    pub fn input_errors(&self) -> &[f32] {
        &self.layers[0].input().errors
    }
}

/// Inverted dropout: zero each unit with probability q, scale survivors by
/// 1/(1-q). Returns the per-unit factors for backward.
fn mask_inverted(values: &mut [f32], q: f32, rng: &mut SimpleRng) -> Vec<f32> {
    let keep_scale = 1.0 / (1.0 - q);
    let mut factors = vec![0.0f32; values.len()];
    for (v, f) in values.iter_mut().zip(factors.iter_mut()) {
        if rng.next_f32() < q {
            *v = 0.0;
        } else {
            *v *= keep_scale;
            *f = keep_scale;
        }
    }
    factors
}

/// Ordered, growable store of per-timestep network instantiations. Length
/// only grows during a forward pass and resets to zero exactly when a new
/// sequence is signalled.
pub struct Sequence {
    states: Vec<TimeState>,
}

impl Sequence {
    pub fn new() -> Self {
        Sequence { states: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn last_index(&self) -> usize {
        debug_assert!(!self.states.is_empty());
        self.states.len() - 1
    }

    /// Drop every stored timestep. The explicit new-sequence signal.
    pub fn reset(&mut self) {
        self.states.clear();
    }

    pub fn push(&mut self, state: TimeState) {
        self.states.push(state);
    }

    pub fn get(&self, t: usize) -> &TimeState {
        &self.states[t]
    }

    /// The previous timestep's stack, absent at the sequence start.
    pub fn prev(&self, t: usize) -> Option<&TimeState> {
        if t == 0 {
            None
        } else {
            self.states.get(t - 1)
        }
    }

    /// The next timestep's stack, absent at the sequence end.
    pub fn next(&self, t: usize) -> Option<&TimeState> {
        self.states.get(t + 1)
    }

    /// Split borrow for timestep `t`: the state under computation plus its
    /// predecessor, without aliasing.
    pub fn current_and_prev(&mut self, t: usize) -> (&mut TimeState, Option<&mut TimeState>) {
        assert!(t < self.states.len(), "timestep {t} out of bounds");
        let (left, right) = self.states.split_at_mut(t);
        (&mut right[0], left.last_mut())
    }

    /// Iterate stored states in order.
    pub fn iter(&self) -> std::slice::Iter<'_, TimeState> {
        self.states.iter()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::new()
    }
}
