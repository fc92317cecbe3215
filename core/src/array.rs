/// Activatable array: a flat value buffer paired with an optional activation
/// function, its pre-activation snapshot, and an error buffer for backward.
///
/// Lifecycle per forward pass: the owner writes pre-activation sums into
/// `values`, then calls `activate()` once; `pre_activations` holds the raw
/// sums afterwards (populated only when an activation function is set).
/// `errors` is meaningful only after a backward pass targeting this array.

use crate::activation::Activation;

#[derive(Clone, Debug)]
pub struct ActivableArray {
    pub values: Vec<f32>,
    pub pre_activations: Option<Vec<f32>>,
    pub activation: Option<Activation>,
    pub errors: Vec<f32>,
}

impl ActivableArray {
    pub fn new(size: usize, activation: Option<Activation>) -> Self {
        ActivableArray {
            values: vec![0.0; size],
            pre_activations: None,
            activation,
            errors: vec![0.0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy `src` into `values`.
    pub fn assign(&mut self, src: &[f32]) {
        debug_assert_eq!(src.len(), self.values.len());
        self.values.copy_from_slice(src);
    }

    /// Snapshot `values` into `pre_activations` and apply the activation in
    /// place. No-op when no activation function is set.
    pub fn activate(&mut self) {
        let act = match self.activation {
            Some(a) => a,
            None => return,
        };
        match &mut self.pre_activations {
            Some(pre) => pre.copy_from_slice(&self.values),
            None => self.pre_activations = Some(self.values.clone()),
        }
        act.apply_slice(&mut self.values);
    }

    /// Raw (pre-activation) values; equals `values` when no activation is set.
    pub fn pre(&self) -> &[f32] {
        match &self.pre_activations {
            Some(pre) => pre,
            None => &self.values,
        }
    }

    /// Activation derivative at element `i`, expressed from the activated
    /// output; 1.0 when no activation function is set.
    pub fn grad_at(&self, i: usize) -> f32 {
        match self.activation {
            Some(a) => a.grad_from_output(self.values[i]),
            None => 1.0,
        }
    }

    pub fn zero_errors(&mut self) {
        for e in self.errors.iter_mut() {
            *e = 0.0;
        }
    }

    pub fn set_errors(&mut self, src: &[f32]) {
        debug_assert_eq!(src.len(), self.errors.len());
        self.errors.copy_from_slice(src);
    }

    pub fn add_errors(&mut self, src: &[f32]) {
        debug_assert_eq!(src.len(), self.errors.len());
        for (e, s) in self.errors.iter_mut().zip(src.iter()) {
            *e += s;
        }
    }
}
