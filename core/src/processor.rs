/// Recurrent processor: orchestrates forward over an input sequence and
/// backpropagation-through-time over an output-error sequence.
///
/// One processor drives one logical sequence at a time. Forward appends one
/// fresh per-timestep network instantiation per feature vector; backward
/// replays the stored timesteps strictly last-to-first, accumulating each
/// timestep's parameter gradients and finally averaging them over time.
/// Parameters are never owned here: every call borrows the network's
/// shared parameter set read-only and writes gradients into caller-visible
/// buffers only.

use crate::accumulator::GradientAccumulator;
use crate::error::EngineError;
use crate::model::{NetworkConfig, NetworkParams};
use crate::sequence::{Sequence, TimeState};
use crate::tensor::SimpleRng;

/// Processor lifecycle. Forwarding/Backwarding are the in-call phases;
/// since every call runs to completion they are visible only from within
/// the engine itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Forwarding,
    Forwarded,
    Backwarding,
    Backwarded,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Forwarding => "forwarding",
            Phase::Forwarded => "forwarded",
            Phase::Backwarding => "backwarding",
            Phase::Backwarded => "backwarded",
        }
    }
}

pub struct RecurrentProcessor {
    config: NetworkConfig,
    sequence: Sequence,
    accumulator: GradientAccumulator,
    phase: Phase,
    /// Dropout masks are drawn from here when training mode is on.
    dropout_rng: SimpleRng,
    training: bool,
}

impl RecurrentProcessor {
    pub fn new(config: NetworkConfig) -> Self {
        let accumulator = GradientAccumulator::new(&config);
        RecurrentProcessor {
            config,
            sequence: Sequence::new(),
            accumulator,
            phase: Phase::Idle,
            dropout_rng: SimpleRng::new(0x5eed),
            training: false,
        }
    }

    /// Enable or disable training mode (dropout masking), reseeding the mask
    /// source for reproducibility.
    pub fn set_training(&mut self, training: bool, seed: u64) {
        self.training = training;
        self.dropout_rng = SimpleRng::new(seed);
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn sequence_len(&self) -> usize {
        self.sequence.len()
    }

    /// Process a whole input sequence, returning the final output. The first
    /// element starts a new sequence. Identical numerics to calling
    /// `forward_step` once per element.
    pub fn forward(
        &mut self,
        params: &NetworkParams,
        inputs: &[Vec<f32>],
    ) -> Result<Vec<f32>, EngineError> {
        if inputs.is_empty() {
            return Err(EngineError::EmptySequence);
        }
        let mut last = Vec::new();
        for (i, x) in inputs.iter().enumerate() {
            last = self.forward_step(params, x, i == 0)?;
        }
        Ok(last)
    }

    /// Process one timestep, returning its output. `first` is the explicit
    /// new-sequence signal: it resets the stored sequence and the gradient
    /// accumulator.
    pub fn forward_step(
        &mut self,
        params: &NetworkParams,
        input: &[f32],
        first: bool,
    ) -> Result<Vec<f32>, EngineError> {
        self.step(params, input, first, None)
    }

    /// Same computation as `forward_step`, additionally recording the
    /// unactivated per-source weight contributions of this timestep into
    /// `contribs` (shaped like the parameter set). The returned output is
    /// identical to the plain path's.
    pub fn forward_step_with_contributions(
        &mut self,
        params: &NetworkParams,
        input: &[f32],
        first: bool,
        contribs: &mut NetworkParams,
    ) -> Result<Vec<f32>, EngineError> {
        self.step(params, input, first, Some(contribs))
    }

    fn step(
        &mut self,
        params: &NetworkParams,
        input: &[f32],
        first: bool,
        contribs: Option<&mut NetworkParams>,
    ) -> Result<Vec<f32>, EngineError> {
        let in_size = self.config.input_size();
        if input.len() != in_size {
            return Err(EngineError::ShapeMismatch {
                what: "input features",
                expected: in_size,
                got: input.len(),
            });
        }
        if first {
            self.sequence.reset();
            self.accumulator.reset();
        }
        self.phase = Phase::Forwarding;

        self.sequence.push(TimeState::new(params, &self.config));
        let t = self.sequence.last_index();
        let (current, prev) = self.sequence.current_and_prev(t);
        let dropout = if self.training {
            Some(&mut self.dropout_rng)
        } else {
            None
        };
        current.forward(
            params,
            &self.config,
            input,
            prev.map(|p| &*p),
            dropout,
            contribs,
        );
        let out = current.output().to_vec();
        self.phase = Phase::Forwarded;
        Ok(out)
    }

    /// Backpropagation-through-time over the stored sequence. Requires one
    /// output-error vector per forwarded timestep; iterates strictly from
    /// the last timestep to the first, accumulating each timestep's
    /// parameter gradients, then averages them over time. With
    /// `propagate_to_input`, per-timestep input gradients are computed too.
    pub fn backward(
        &mut self,
        params: &NetworkParams,
        output_errors: &[Vec<f32>],
        propagate_to_input: bool,
    ) -> Result<(), EngineError> {
        if self.phase != Phase::Forwarded {
            return Err(EngineError::InvalidPhase {
                op: "backward",
                phase: self.phase.name(),
            });
        }
        let len = self.sequence.len();
        if output_errors.len() != len {
            return Err(EngineError::SequenceLengthMismatch {
                expected: len,
                got: output_errors.len(),
            });
        }
        let out_size = self.config.output_size();
        for errs in output_errors {
            if errs.len() != out_size {
                return Err(EngineError::ShapeMismatch {
                    what: "output errors",
                    expected: out_size,
                    got: errs.len(),
                });
            }
        }
        self.phase = Phase::Backwarding;
        self.accumulator.reset();

        for t in (0..len).rev() {
            let mut step_grads = NetworkParams::zeros(&self.config);
            let (current, prev) = self.sequence.current_and_prev(t);
            current.backward(
                params,
                &mut step_grads,
                &output_errors[t],
                prev,
                propagate_to_input,
            );
            self.accumulator.accumulate(&step_grads);
        }
        self.accumulator.average()?;
        self.phase = Phase::Backwarded;
        Ok(())
    }

    /// Single-output convenience: the supplied error applies to the last
    /// timestep only, with zero error everywhere else. Equivalent to the
    /// general form.
    pub fn backward_last(
        &mut self,
        params: &NetworkParams,
        output_error: &[f32],
        propagate_to_input: bool,
    ) -> Result<(), EngineError> {
        if self.phase != Phase::Forwarded {
            return Err(EngineError::InvalidPhase {
                op: "backward",
                phase: self.phase.name(),
            });
        }
        let len = self.sequence.len();
        let mut errors = vec![vec![0.0; self.config.output_size()]; len];
        errors[len - 1] = output_error.to_vec();
        self.backward(params, &errors, propagate_to_input)
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// The network output of every stored timestep. A live view,
    /// invalidated by the next forward call.
    pub fn output_sequence(&self) -> Vec<&[f32]> {
        self.sequence.iter().map(|s| s.output()).collect()
    }

    /// An independent copy of every stored timestep's output.
    pub fn output_sequence_copied(&self) -> Vec<Vec<f32>> {
        self.sequence.iter().map(|s| s.output().to_vec()).collect()
    }

    /// The last timestep's output, if any.
    pub fn output(&self) -> Option<&[f32]> {
        if self.sequence.is_empty() {
            None
        } else {
            Some(self.sequence.get(self.sequence.last_index()).output())
        }
    }

    /// Per-timestep input-feature gradients. A live view, meaningful after
    /// a backward call with input propagation and invalidated by the next
    /// forward call.
    pub fn input_sequence_errors(&self) -> Vec<&[f32]> {
        self.sequence.iter().map(|s| s.input_errors()).collect()
    }

    /// An independent copy of the per-timestep input-feature gradients.
    pub fn input_sequence_errors_copied(&self) -> Vec<Vec<f32>> {
        self.sequence
            .iter()
            .map(|s| s.input_errors().to_vec())
            .collect()
    }

    /// The time-averaged parameter gradients of the last backward call.
    pub fn params_errors(&self) -> Option<&NetworkParams> {
        if self.phase == Phase::Backwarded {
            Some(self.accumulator.values())
        } else {
            None
        }
    }

    /// Return the processor to its idle state: sequence and accumulator
    /// cleared. Required before reuse from a pool.
    pub fn reset(&mut self) {
        self.sequence.reset();
        self.accumulator.reset();
        self.phase = Phase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionKind;

    fn setup(kind: ConnectionKind) -> (NetworkConfig, NetworkParams, RecurrentProcessor) {
        let cfg = NetworkConfig::test_config(kind);
        let params = NetworkParams::init(&cfg, 123);
        let proc_ = RecurrentProcessor::new(cfg.clone());
        (cfg, params, proc_)
    }

    fn inputs() -> Vec<Vec<f32>> {
        vec![
            vec![0.2, -0.6, 0.4],
            vec![0.9, 0.1, -0.3],
            vec![-0.5, 0.5, 0.0],
        ]
    }

    #[test]
    fn test_backward_before_forward_is_rejected() {
        let (_, params, mut proc_) = setup(ConnectionKind::SimpleRecurrent);
        let err = proc_.backward(&params, &[vec![0.0, 0.0]], false);
        assert!(matches!(err, Err(EngineError::InvalidPhase { .. })));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let (_, params, mut proc_) = setup(ConnectionKind::SimpleRecurrent);
        proc_.forward(&params, &inputs()).unwrap();
        let err = proc_.backward(&params, &[vec![0.0, 0.0], vec![0.0, 0.0]], false);
        assert_eq!(
            err,
            Err(EngineError::SequenceLengthMismatch {
                expected: 3,
                got: 2
            })
        );
    }

    #[test]
    fn test_input_shape_is_checked() {
        let (_, params, mut proc_) = setup(ConnectionKind::SimpleRecurrent);
        let err = proc_.forward_step(&params, &[1.0, 2.0], true);
        assert!(matches!(err, Err(EngineError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_first_flag_resets_sequence() {
        let (_, params, mut proc_) = setup(ConnectionKind::Gru);
        proc_.forward(&params, &inputs()).unwrap();
        assert_eq!(proc_.sequence_len(), 3);
        proc_.forward_step(&params, &[0.1, 0.1, 0.1], true).unwrap();
        assert_eq!(proc_.sequence_len(), 1);
    }

    #[test]
    fn test_backward_last_equals_general_form() {
        let (_, params, mut a) = setup(ConnectionKind::Lstm);
        let (_, _, mut b) = setup(ConnectionKind::Lstm);
        let xs = inputs();
        a.forward(&params, &xs).unwrap();
        b.forward(&params, &xs).unwrap();

        let e = vec![0.3f32, -0.8];
        a.backward_last(&params, &e, true).unwrap();
        let mut errors = vec![vec![0.0; 2]; 3];
        errors[2] = e.clone();
        b.backward(&params, &errors, true).unwrap();

        let ga = a.params_errors().unwrap();
        let gb = b.params_errors().unwrap();
        for (la, lb) in ga.layers.iter().zip(gb.layers.iter()) {
            for (ba, bb) in la.buffers().into_iter().zip(lb.buffers().into_iter()) {
                assert_eq!(ba, bb);
            }
        }
    }

    #[test]
    fn test_accessors_track_sequence() {
        let (_, params, mut proc_) = setup(ConnectionKind::Cfn);
        assert!(proc_.output().is_none());
        assert!(proc_.params_errors().is_none());
        let last = proc_.forward(&params, &inputs()).unwrap();
        assert_eq!(proc_.output().unwrap(), last.as_slice());
        assert_eq!(proc_.output_sequence().len(), 3);
        assert_eq!(proc_.output_sequence_copied()[2], last);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let (_, params, mut proc_) = setup(ConnectionKind::DeltaRnn);
        proc_.forward(&params, &inputs()).unwrap();
        proc_.reset();
        assert_eq!(proc_.sequence_len(), 0);
        assert!(proc_.output().is_none());
    }
}
