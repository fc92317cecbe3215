/// Network configuration and trainable parameters.
///
/// Parameters live in flat Vec<f32> buffers, row-major. A network owns one
/// `LayerParams` per layer index; per-timestep layer structures borrow them
/// read-only during forward/backward. Only an update method mutates them,
/// and only with an externally supplied gradient.

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::tensor::SimpleRng;

/// How a layer connects to its predecessor timestep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionKind {
    Feedforward,
    SimpleRecurrent,
    Gru,
    Lstm,
    Cfn,
    DeltaRnn,
}

impl ConnectionKind {
    pub fn is_recurrent(self) -> bool {
        !matches!(self, ConnectionKind::Feedforward)
    }
}

/// One layer of the network as configured by the caller.
///
/// Consumed once when allocating parameters; not re-read afterwards.
/// `dropout` is the probability of zeroing an input unit of this layer when
/// the owning processor runs in training mode. `sparse_input` marks layers
/// whose inputs arrive as one-hot style encodings; the flag is carried for
/// callers and allocators, the dense math in this crate is unaffected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    pub activation: Activation,
    pub connection: ConnectionKind,
    pub dropout: f32,
    pub sparse_input: bool,
}

impl LayerSpec {
    pub fn new(size: usize, activation: Activation, connection: ConnectionKind) -> Self {
        LayerSpec {
            size,
            activation,
            connection,
            dropout: 0.0,
            sparse_input: false,
        }
    }
}

/// Ordered layer specifications; entry 0 describes the input layer (its
/// activation and connection fields are ignored).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub layers: Vec<LayerSpec>,
}

impl NetworkConfig {
    pub fn new(layers: Vec<LayerSpec>) -> Self {
        assert!(
            layers.len() >= 2,
            "a network needs an input layer and at least one computed layer, got {}",
            layers.len()
        );
        NetworkConfig { layers }
    }

    pub fn input_size(&self) -> usize {
        self.layers[0].size
    }

    pub fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].size
    }

    /// Number of computed layers (everything after the input entry).
    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// Tiny two-layer tanh network used across the test suite.
    pub fn test_config(connection: ConnectionKind) -> Self {
        NetworkConfig::new(vec![
            LayerSpec::new(3, Activation::Identity, ConnectionKind::Feedforward),
            LayerSpec::new(2, Activation::Tanh, connection),
        ])
    }
}

// ── Parameter units ──────────────────────────────────────────────────

/// One gate unit: the {weights, recurrent weights, biases} triple behind a
/// single linear transform inside a layer.
///
/// Layout (row-major):
///   weights:   [output_size, input_size]
///   recurrent: [output_size, output_size], empty for non-recurrent transforms
///   biases:    [output_size], empty for bias-free transforms
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateParams {
    pub weights: Vec<f32>,
    pub recurrent: Vec<f32>,
    pub biases: Vec<f32>,
}

impl GateParams {
    fn zeros(out: usize, inp: usize, recurrent: bool, biased: bool) -> Self {
        GateParams {
            weights: vec![0.0; out * inp],
            recurrent: if recurrent { vec![0.0; out * out] } else { vec![] },
            biases: if biased { vec![0.0; out] } else { vec![] },
        }
    }

}

/// All trainable arrays of one layer index. Created once per network, shared
/// read-only by every timestep of a sequence.
///
/// Gate order by kind (stable; optimizer state and contribution buffers
/// index into it):
///   Feedforward:     [unit]                          (no recurrent)
///   SimpleRecurrent: [unit]
///   Gru:             [reset, partition, candidate]
///   Lstm:            [input, output, forget, candidate]
///   Cfn:             [input gate, forget gate, candidate]   (candidate: weights only)
///   DeltaRnn:        [candidate (W, Wrec, bc), partition (bp only)]
///
/// `alpha`, `beta1`, `beta2` are the DeltaRnn mixing vectors and stay empty
/// for every other kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerParams {
    pub kind: ConnectionKind,
    pub input_size: usize,
    pub output_size: usize,
    pub gates: Vec<GateParams>,
    pub alpha: Vec<f32>,
    pub beta1: Vec<f32>,
    pub beta2: Vec<f32>,
}

impl LayerParams {
    pub fn zeros(kind: ConnectionKind, input_size: usize, output_size: usize) -> Self {
        let (o, i) = (output_size, input_size);
        let gates = match kind {
            ConnectionKind::Feedforward => vec![GateParams::zeros(o, i, false, true)],
            ConnectionKind::SimpleRecurrent => vec![GateParams::zeros(o, i, true, true)],
            ConnectionKind::Gru => vec![
                GateParams::zeros(o, i, true, true),
                GateParams::zeros(o, i, true, true),
                GateParams::zeros(o, i, true, true),
            ],
            ConnectionKind::Lstm => vec![
                GateParams::zeros(o, i, true, true),
                GateParams::zeros(o, i, true, true),
                GateParams::zeros(o, i, true, true),
                GateParams::zeros(o, i, true, true),
            ],
            ConnectionKind::Cfn => vec![
                GateParams::zeros(o, i, true, true),
                GateParams::zeros(o, i, true, true),
                GateParams::zeros(o, i, false, false),
            ],
            ConnectionKind::DeltaRnn => vec![
                GateParams::zeros(o, i, true, true),
                GateParams {
                    weights: vec![],
                    recurrent: vec![],
                    biases: vec![0.0; o],
                },
            ],
        };
        let mixing = if kind == ConnectionKind::DeltaRnn {
            vec![0.0; o]
        } else {
            vec![]
        };
        LayerParams {
            kind,
            input_size,
            output_size,
            gates,
            alpha: mixing.clone(),
            beta1: mixing.clone(),
            beta2: mixing,
        }
    }

    pub fn init(kind: ConnectionKind, input_size: usize, output_size: usize, rng: &mut SimpleRng) -> Self {
        let mut p = LayerParams::zeros(kind, input_size, output_size);
        let w_scale = (2.0 / (input_size + output_size) as f32).sqrt();
        let u_scale = (1.0 / output_size as f32).sqrt();
        for g in p.gates.iter_mut() {
            rng.fill_uniform(&mut g.weights, w_scale);
            rng.fill_uniform(&mut g.recurrent, u_scale);
            // biases start at zero
        }
        let mix_scale = (1.0 / output_size as f32).sqrt();
        rng.fill_uniform(&mut p.alpha, mix_scale);
        rng.fill_uniform(&mut p.beta1, mix_scale);
        rng.fill_uniform(&mut p.beta2, mix_scale);
        p
    }

    /// Create a zero-initialized shadow for gradient accumulation.
    pub fn zeros_like(&self) -> Self {
        LayerParams::zeros(self.kind, self.input_size, self.output_size)
    }

    /// Every trainable buffer in a stable order: per gate (weights,
    /// recurrent, biases), then alpha, beta1, beta2. Empty buffers are
    /// included so indices line up across params, gradients and optimizer
    /// state.
    pub fn buffers(&self) -> Vec<&Vec<f32>> {
        let mut out = Vec::with_capacity(self.gates.len() * 3 + 3);
        for g in &self.gates {
            out.push(&g.weights);
            out.push(&g.recurrent);
            out.push(&g.biases);
        }
        out.push(&self.alpha);
        out.push(&self.beta1);
        out.push(&self.beta2);
        out
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut Vec<f32>> {
        let mut out = Vec::with_capacity(self.gates.len() * 3 + 3);
        for g in &mut self.gates {
            out.push(&mut g.weights);
            out.push(&mut g.recurrent);
            out.push(&mut g.biases);
        }
        out.push(&mut self.alpha);
        out.push(&mut self.beta1);
        out.push(&mut self.beta2);
        out
    }

    pub fn num_params(&self) -> usize {
        self.buffers().iter().map(|b| b.len()).sum()
    }
}

/// The full trainable parameter set: one `LayerParams` per layer index.
/// Also the shape of a structured gradient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkParams {
    pub layers: Vec<LayerParams>,
}

impl NetworkParams {
    /// Initialize from the configuration with Xavier-style scaling.
    pub fn init(cfg: &NetworkConfig, seed: u64) -> Self {
        let mut rng = SimpleRng::new(seed);
        let mut layers = Vec::with_capacity(cfg.depth());
        for l in 1..cfg.layers.len() {
            let spec = &cfg.layers[l];
            layers.push(LayerParams::init(
                spec.connection,
                cfg.layers[l - 1].size,
                spec.size,
                &mut rng,
            ));
        }
        NetworkParams { layers }
    }

    /// Zero parameters shaped from the configuration.
    pub fn zeros(cfg: &NetworkConfig) -> Self {
        let mut layers = Vec::with_capacity(cfg.depth());
        for l in 1..cfg.layers.len() {
            let spec = &cfg.layers[l];
            layers.push(LayerParams::zeros(
                spec.connection,
                cfg.layers[l - 1].size,
                spec.size,
            ));
        }
        NetworkParams { layers }
    }

    /// Create a zero-initialized shadow for gradient accumulation.
    pub fn zeros_like(&self) -> Self {
        NetworkParams {
            layers: self.layers.iter().map(|l| l.zeros_like()).collect(),
        }
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(|l| l.num_params()).sum()
    }

    /// Plain gradient step: param -= lr * grad for every buffer.
    pub fn apply_gradients(&mut self, grads: &NetworkParams, lr: f32) {
        debug_assert_eq!(self.layers.len(), grads.layers.len());
        for (lp, lg) in self.layers.iter_mut().zip(grads.layers.iter()) {
            for (p, g) in lp.buffers_mut().into_iter().zip(lg.buffers().into_iter()) {
                debug_assert_eq!(p.len(), g.len());
                for i in 0..p.len() {
                    p[i] -= lr * g[i];
                }
            }
        }
    }
}

// ── Checkpointing ────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    config: NetworkConfig,
    params: NetworkParams,
}

/// Persist the configuration and parameters as JSON.
pub fn save_checkpoint(
    path: &std::path::Path,
    config: &NetworkConfig,
    params: &NetworkParams,
) -> std::io::Result<()> {
    let checkpoint = Checkpoint {
        config: config.clone(),
        params: params.clone(),
    };
    let json = serde_json::to_string(&checkpoint)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}

/// Load a configuration/parameter pair saved by `save_checkpoint`.
pub fn load_checkpoint(path: &std::path::Path) -> std::io::Result<(NetworkConfig, NetworkParams)> {
    let json = std::fs::read_to_string(path)?;
    let checkpoint: Checkpoint = serde_json::from_str(&json)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok((checkpoint.config, checkpoint.params))
}
