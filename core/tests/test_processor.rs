/// Processor contract tests: determinism, incremental vs. whole-sequence
/// equality, boundary behavior, accessor semantics, contribution recording.

use spindle_core::activation::Activation;
use spindle_core::error::EngineError;
use spindle_core::model::{ConnectionKind, LayerSpec, NetworkConfig, NetworkParams};
use spindle_core::processor::RecurrentProcessor;

const KINDS: [ConnectionKind; 6] = [
    ConnectionKind::Feedforward,
    ConnectionKind::SimpleRecurrent,
    ConnectionKind::Gru,
    ConnectionKind::Lstm,
    ConnectionKind::Cfn,
    ConnectionKind::DeltaRnn,
];

fn inputs() -> Vec<Vec<f32>> {
    vec![
        vec![0.3, -0.7, 0.2],
        vec![0.8, 0.1, -0.9],
        vec![-0.4, 0.6, 0.5],
        vec![0.0, -0.2, 0.9],
    ]
}

fn errors() -> Vec<Vec<f32>> {
    vec![
        vec![0.5, -0.1],
        vec![-0.3, 0.4],
        vec![0.2, 0.2],
        vec![-0.6, 0.7],
    ]
}

#[test]
fn test_repeated_forward_is_bit_identical() {
    for kind in KINDS {
        let cfg = NetworkConfig::test_config(kind);
        let params = NetworkParams::init(&cfg, 99);
        let mut a = RecurrentProcessor::new(cfg.clone());
        let mut b = RecurrentProcessor::new(cfg.clone());
        let ya = a.forward(&params, &inputs()).unwrap();
        let yb = b.forward(&params, &inputs()).unwrap();
        assert_eq!(ya, yb, "{kind:?} forward is not deterministic");
        assert_eq!(
            a.output_sequence_copied(),
            b.output_sequence_copied(),
            "{kind:?} intermediate outputs differ"
        );
    }
}

#[test]
fn test_incremental_equals_whole_sequence() {
    for kind in KINDS {
        let cfg = NetworkConfig::test_config(kind);
        let params = NetworkParams::init(&cfg, 7);
        let xs = inputs();

        let mut whole = RecurrentProcessor::new(cfg.clone());
        whole.forward(&params, &xs).unwrap();

        let mut stepped = RecurrentProcessor::new(cfg.clone());
        for (i, x) in xs.iter().enumerate() {
            stepped.forward_step(&params, x, i == 0).unwrap();
        }

        assert_eq!(
            whole.output_sequence_copied(),
            stepped.output_sequence_copied(),
            "{kind:?}: incremental and batch forwards disagree"
        );
    }
}

#[test]
fn test_first_timestep_has_no_recurrent_contribution() {
    // a single-step sequence must not read the recurrent weights at all:
    // rewriting them must leave the output unchanged
    for kind in KINDS {
        let cfg = NetworkConfig::test_config(kind);
        let mut params = NetworkParams::init(&cfg, 13);
        let mut p1 = RecurrentProcessor::new(cfg.clone());
        let y1 = p1.forward_step(&params, &inputs()[0], true).unwrap();

        for gate in params.layers[0].gates.iter_mut() {
            for u in gate.recurrent.iter_mut() {
                *u += 3.0;
            }
        }
        let mut p2 = RecurrentProcessor::new(cfg.clone());
        let y2 = p2.forward_step(&params, &inputs()[0], true).unwrap();
        assert_eq!(y1, y2, "{kind:?}: first timestep read recurrent weights");
    }
}

#[test]
fn test_length_mismatch_fails_without_accumulating() {
    let cfg = NetworkConfig::test_config(ConnectionKind::Gru);
    let params = NetworkParams::init(&cfg, 5);
    let mut processor = RecurrentProcessor::new(cfg);
    processor.forward(&params, &inputs()).unwrap();
    let err = processor.backward(&params, &errors()[..2], true);
    assert_eq!(
        err,
        Err(EngineError::SequenceLengthMismatch {
            expected: 4,
            got: 2
        })
    );
    assert!(processor.params_errors().is_none());
}

#[test]
fn test_output_error_shape_is_checked() {
    let cfg = NetworkConfig::test_config(ConnectionKind::Lstm);
    let params = NetworkParams::init(&cfg, 5);
    let mut processor = RecurrentProcessor::new(cfg);
    processor.forward(&params, &inputs()).unwrap();
    let bad = vec![vec![0.0; 3]; 4];
    assert!(matches!(
        processor.backward(&params, &bad, false),
        Err(EngineError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_live_view_matches_copy() {
    let cfg = NetworkConfig::test_config(ConnectionKind::Cfn);
    let params = NetworkParams::init(&cfg, 17);
    let mut processor = RecurrentProcessor::new(cfg);
    processor.forward(&params, &inputs()).unwrap();
    let copies = processor.output_sequence_copied();
    let views = processor.output_sequence();
    assert_eq!(views.len(), copies.len());
    for (v, c) in views.iter().zip(copies.iter()) {
        assert_eq!(*v, c.as_slice());
    }
}

#[test]
fn test_contribution_recording_keeps_outputs_identical() {
    for kind in KINDS {
        let cfg = NetworkConfig::test_config(kind);
        let params = NetworkParams::init(&cfg, 23);
        let xs = inputs();

        let mut plain = RecurrentProcessor::new(cfg.clone());
        let mut recording = RecurrentProcessor::new(cfg.clone());
        let mut contribs = params.zeros_like();

        for (i, x) in xs.iter().enumerate() {
            let a = plain.forward_step(&params, x, i == 0).unwrap();
            let b = recording
                .forward_step_with_contributions(&params, x, i == 0, &mut contribs)
                .unwrap();
            assert_eq!(a, b, "{kind:?}: contribution recording changed the output");
        }
        let recorded: f32 = contribs.layers[0].gates[0]
            .weights
            .iter()
            .map(|v| v.abs())
            .sum();
        assert!(recorded > 1e-8, "{kind:?}: nothing recorded");
    }
}

#[test]
fn test_backward_after_backward_is_rejected() {
    let cfg = NetworkConfig::test_config(ConnectionKind::SimpleRecurrent);
    let params = NetworkParams::init(&cfg, 29);
    let mut processor = RecurrentProcessor::new(cfg);
    processor.forward(&params, &inputs()).unwrap();
    processor.backward(&params, &errors(), false).unwrap();
    assert!(matches!(
        processor.backward(&params, &errors(), false),
        Err(EngineError::InvalidPhase { .. })
    ));
}

#[test]
fn test_input_errors_populated_only_when_requested() {
    let cfg = NetworkConfig::test_config(ConnectionKind::SimpleRecurrent);
    let params = NetworkParams::init(&cfg, 31);

    let mut without = RecurrentProcessor::new(cfg.clone());
    without.forward(&params, &inputs()).unwrap();
    without.backward(&params, &errors(), false).unwrap();
    for e in without.input_sequence_errors() {
        assert!(e.iter().all(|&v| v == 0.0));
    }

    let mut with = RecurrentProcessor::new(cfg.clone());
    with.forward(&params, &inputs()).unwrap();
    with.backward(&params, &errors(), true).unwrap();
    let any: f32 = with
        .input_sequence_errors()
        .iter()
        .flat_map(|e| e.iter())
        .map(|v| v.abs())
        .sum();
    assert!(any > 1e-8, "no input gradients were produced");
}

#[test]
fn test_training_mode_dropout_changes_values_and_zero_probability_does_not() {
    let mut spec_dropout = NetworkConfig::test_config(ConnectionKind::Feedforward);
    spec_dropout.layers[1].dropout = 0.5;
    let params = NetworkParams::init(&spec_dropout, 37);

    let mut inference = RecurrentProcessor::new(spec_dropout.clone());
    let clean = inference.forward(&params, &inputs()).unwrap();

    let mut training = RecurrentProcessor::new(spec_dropout.clone());
    training.set_training(true, 1234);
    let masked = training.forward(&params, &inputs()).unwrap();
    assert_ne!(clean, masked, "dropout had no effect in training mode");

    // zero probability leaves the numeric path untouched even in training
    let mut spec_zero = NetworkConfig::test_config(ConnectionKind::Feedforward);
    spec_zero.layers[1].dropout = 0.0;
    let params_zero = NetworkParams::init(&spec_zero, 37);
    let mut training_zero = RecurrentProcessor::new(spec_zero);
    training_zero.set_training(true, 1234);
    let untouched = training_zero.forward(&params_zero, &inputs()).unwrap();
    assert_eq!(clean, untouched);
}

#[test]
fn test_deep_stack_mixes_kinds() {
    let cfg = NetworkConfig::new(vec![
        LayerSpec::new(3, Activation::Identity, ConnectionKind::Feedforward),
        LayerSpec::new(5, Activation::Tanh, ConnectionKind::Gru),
        LayerSpec::new(2, Activation::Tanh, ConnectionKind::Feedforward),
    ]);
    let params = NetworkParams::init(&cfg, 41);
    let mut processor = RecurrentProcessor::new(cfg);
    let y = processor.forward(&params, &inputs()).unwrap();
    assert_eq!(y.len(), 2);
    processor.backward(&params, &errors(), true).unwrap();
    let grads = processor.params_errors().unwrap();
    assert_eq!(grads.layers.len(), 2);
    for layer in &grads.layers {
        let total: f32 = layer
            .buffers()
            .into_iter()
            .flat_map(|b| b.iter())
            .map(|v| v.abs())
            .sum();
        assert!(total > 1e-10, "a layer received no gradient");
    }
}
