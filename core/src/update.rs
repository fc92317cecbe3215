/// Weight-update strategies.
///
/// An update method consumes the engine's averaged gradient output and
/// mutates the parameter set in place. Strategies are swappable without
/// touching the engine; moment state is shaped from the parameter set at
/// construction and indexed by the stable buffer order of `LayerParams`.
/// The scheduling hooks are optional capabilities; the defaults are no-ops.

use crate::model::NetworkParams;

pub trait UpdateMethod {
    /// Apply one gradient step: mutates `params` in place using `grads`.
    fn update(&mut self, params: &mut NetworkParams, grads: &NetworkParams);

    fn on_new_epoch(&mut self) {}
    fn on_new_batch(&mut self) {}
    fn on_new_example(&mut self) {}
}

/// Learning-rate decay schedules, advanced once per epoch.
#[derive(Clone, Copy, Debug)]
pub enum LearningRateDecay {
    None,
    /// lr = lr0 * rate^epoch
    Exponential { rate: f32 },
    /// lr = lr0 / (1 + decay * epoch)
    Hyperbolic { decay: f32 },
}

impl LearningRateDecay {
    pub fn decayed(self, lr0: f32, epoch: u32) -> f32 {
        match self {
            LearningRateDecay::None => lr0,
            LearningRateDecay::Exponential { rate } => lr0 * rate.powi(epoch as i32),
            LearningRateDecay::Hyperbolic { decay } => lr0 / (1.0 + decay * epoch as f32),
        }
    }
}

// ── Plain SGD ────────────────────────────────────────────────────────

pub struct Sgd {
    lr0: f32,
    lr: f32,
    decay: LearningRateDecay,
    epoch: u32,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Sgd {
            lr0: lr,
            lr,
            decay: LearningRateDecay::None,
            epoch: 0,
        }
    }

    pub fn with_decay(lr: f32, decay: LearningRateDecay) -> Self {
        Sgd {
            lr0: lr,
            lr,
            decay,
            epoch: 0,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.lr
    }
}

impl UpdateMethod for Sgd {
    fn update(&mut self, params: &mut NetworkParams, grads: &NetworkParams) {
        params.apply_gradients(grads, self.lr);
    }

    fn on_new_epoch(&mut self) {
        self.epoch += 1;
        self.lr = self.decay.decayed(self.lr0, self.epoch);
    }
}

// ── Momentum ─────────────────────────────────────────────────────────

/// Classical momentum: v = momentum * v + lr * g; param -= v.
pub struct Momentum {
    lr: f32,
    momentum: f32,
    velocity: NetworkParams,
}

impl Momentum {
    pub fn new(params: &NetworkParams, lr: f32, momentum: f32) -> Self {
        Momentum {
            lr,
            momentum,
            velocity: params.zeros_like(),
        }
    }
}

impl UpdateMethod for Momentum {
    fn update(&mut self, params: &mut NetworkParams, grads: &NetworkParams) {
        let (lr, mu) = (self.lr, self.momentum);
        for (li, lp) in params.layers.iter_mut().enumerate() {
            let lg = &grads.layers[li];
            let lv = &mut self.velocity.layers[li];
            for ((p, g), v) in lp
                .buffers_mut()
                .into_iter()
                .zip(lg.buffers().into_iter())
                .zip(lv.buffers_mut().into_iter())
            {
                debug_assert_eq!(p.len(), g.len());
                for i in 0..p.len() {
                    v[i] = mu * v[i] + lr * g[i];
                    p[i] -= v[i];
                }
            }
        }
    }
}

// ── AdaGrad ──────────────────────────────────────────────────────────

/// AdaGrad: accumulates squared gradients, scales each step by their
/// running root: param -= lr * g / (sqrt(G) + eps).
pub struct AdaGrad {
    lr: f32,
    eps: f32,
    squares: NetworkParams,
}

impl AdaGrad {
    pub fn new(params: &NetworkParams, lr: f32) -> Self {
        AdaGrad {
            lr,
            eps: 1e-8,
            squares: params.zeros_like(),
        }
    }
}

impl UpdateMethod for AdaGrad {
    fn update(&mut self, params: &mut NetworkParams, grads: &NetworkParams) {
        let (lr, eps) = (self.lr, self.eps);
        for (li, lp) in params.layers.iter_mut().enumerate() {
            let lg = &grads.layers[li];
            let ls = &mut self.squares.layers[li];
            for ((p, g), s) in lp
                .buffers_mut()
                .into_iter()
                .zip(lg.buffers().into_iter())
                .zip(ls.buffers_mut().into_iter())
            {
                for i in 0..p.len() {
                    let gi = g[i];
                    s[i] += gi * gi;
                    p[i] -= lr * gi / (s[i].sqrt() + eps);
                }
            }
        }
    }
}

// ── ADAM ─────────────────────────────────────────────────────────────

/// ADAM with bias correction (Kingma & Ba 2015). Bias correction inverses
/// are computed once per step from the step counter.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: u32,
    m: NetworkParams,
    v: NetworkParams,
}

impl Adam {
    pub fn new(params: &NetworkParams, lr: f32) -> Self {
        Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            m: params.zeros_like(),
            v: params.zeros_like(),
        }
    }

    pub fn step_count(&self) -> u32 {
        self.step
    }
}

/// Core ADAM step on a single (params, grads, m, v) group; modifies
/// params, m and v in place.
#[inline]
fn adam_step_buf(
    params: &mut [f32],
    grads: &[f32],
    m: &mut [f32],
    v: &mut [f32],
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    bc1_inv: f32,
    bc2_inv: f32,
) {
    debug_assert_eq!(params.len(), grads.len());
    for i in 0..params.len() {
        let g = grads[i];
        m[i] = beta1 * m[i] + (1.0 - beta1) * g;
        v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
        let m_hat = m[i] * bc1_inv;
        let v_hat = v[i] * bc2_inv;
        params[i] -= lr * m_hat / (v_hat.sqrt() + eps);
    }
}

impl UpdateMethod for Adam {
    fn update(&mut self, params: &mut NetworkParams, grads: &NetworkParams) {
        self.step += 1;
        let t = self.step as f32;
        let bc1_inv = 1.0 / (1.0 - self.beta1.powf(t));
        let bc2_inv = 1.0 / (1.0 - self.beta2.powf(t));

        for (li, lp) in params.layers.iter_mut().enumerate() {
            let lg = &grads.layers[li];
            let lm = &mut self.m.layers[li];
            let lv = &mut self.v.layers[li];
            for (((p, g), m), v) in lp
                .buffers_mut()
                .into_iter()
                .zip(lg.buffers().into_iter())
                .zip(lm.buffers_mut().into_iter())
                .zip(lv.buffers_mut().into_iter())
            {
                adam_step_buf(
                    p, g, m, v, self.lr, self.beta1, self.beta2, self.eps, bc1_inv, bc2_inv,
                );
            }
        }
    }
}
