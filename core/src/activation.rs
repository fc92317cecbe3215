/// Activation functions and their derivatives.
///
/// The derivative is expressed in terms of the activated output wherever the
/// function admits it (tanh' = 1 - y², sigmoid' = y(1-y)), so backward passes
/// never need to retain pre-activation values for these functions.

use serde::{Deserialize, Serialize};

use crate::tensor::sigmoid_f32;

/// Closed set of supported activation functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Identity,
    Sigmoid,
    Tanh,
    ReLU,
    Softsign,
}

impl Activation {
    /// Evaluate the function at `x`.
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Identity => x,
            Activation::Sigmoid => sigmoid_f32(x),
            Activation::Tanh => x.tanh(),
            Activation::ReLU => x.max(0.0),
            Activation::Softsign => x / (1.0 + x.abs()),
        }
    }

    /// Derivative evaluated at the *activated* value `y = f(x)`.
    ///
    /// ReLU uses the y > 0 convention at the kink; Softsign uses
    /// f'(x) = (1 - |y|)², valid because |y| = |x| / (1 + |x|).
    pub fn grad_from_output(self, y: f32) -> f32 {
        match self {
            Activation::Identity => 1.0,
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
            Activation::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Softsign => {
                let t = 1.0 - y.abs();
                t * t
            }
        }
    }

    /// Apply in place over a slice.
    pub fn apply_slice(self, xs: &mut [f32]) {
        for v in xs.iter_mut() {
            *v = self.apply(*v);
        }
    }
}
