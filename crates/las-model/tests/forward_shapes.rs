//! Integration tests: LAS forward pass with randomly initialised weights.

use candle_core::{DType, Device, Tensor, D};
use las_core::{AttentionConfig, DecodeMode, LasConfig, LasError, RnnUnit};
use las_model::{one_hot_sequence, Las};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn pick_test_device() -> Device {
    // По умолчанию CPU. Для проверки на CUDA: LAS_TEST_DEVICE=cuda cargo test -p las-model --features cuda
    match std::env::var("LAS_TEST_DEVICE").as_deref() {
        Ok("cuda") => Device::cuda_if_available(0).unwrap_or(Device::Cpu),
        _ => Device::Cpu,
    }
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_dtype(DType::F32)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap()
}

#[test]
fn test_demo_forward_shapes() {
    let device = pick_test_device();
    let config = LasConfig::demo();
    let (model, _varmap) = Las::with_random_weights(config, &device).unwrap();

    let features = Tensor::randn(0f32, 1., (1, 48, 80), &device).unwrap();
    let listener_feature = model.listener().forward(&features).unwrap();
    assert_eq!(listener_feature.dims(), &[1, 6, 320]);

    let mut rng = StdRng::seed_from_u64(0);
    let output = model.forward(&features, None, 0.0, &mut rng).unwrap();

    assert!(!output.teacher_forced);
    assert_eq!(output.log_probs.len(), 48);
    assert_eq!(output.attention.len(), 48);
    for (log_probs, scores) in output.log_probs.iter().zip(&output.attention) {
        assert_eq!(log_probs.dims(), &[1, 30]);
        let total = log_probs
            .exp()
            .unwrap()
            .sum(D::Minus1)
            .unwrap()
            .to_dtype(DType::F32)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((total[0] - 1.0).abs() < 1e-4, "sum = {}", total[0]);

        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].dims(), &[1, 6]);
    }
}

#[test]
fn test_teacher_forcing_follows_ground_truth_length() {
    let device = Device::Cpu;
    let config = LasConfig {
        listener_hidden_dim: 8,
        speller_hidden_dim: 16,
        ..LasConfig::demo()
    };
    let (model, _varmap) = Las::with_random_weights(config, &device).unwrap();

    let features = Tensor::randn(0f32, 1., (2, 16, 80), &device).unwrap();
    let truth = one_hot_sequence(&[vec![3, 1, 4, 1], vec![5, 9, 2, 6]], 30, &device).unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    let forced = model.forward(&features, Some(&truth), 1.0, &mut rng).unwrap();
    assert!(forced.teacher_forced);
    assert_eq!(forced.log_probs.len(), 4);
    assert_eq!(forced.log_probs[0].dims(), &[2, 30]);

    let free = model.forward(&features, Some(&truth), 0.0, &mut rng).unwrap();
    assert!(!free.teacher_forced);
    assert_eq!(free.log_probs.len(), 48);
}

#[test]
fn test_gru_multi_head_sampling() {
    let device = Device::Cpu;
    let config = LasConfig {
        listener_hidden_dim: 8,
        listener_layers: 2,
        speller_hidden_dim: 16,
        speller_rnn_layers: 2,
        max_label_len: 6,
        rnn_unit: RnnUnit::Gru,
        decode_mode: DecodeMode::Sample,
        attention: AttentionConfig {
            mlp_dim: 12,
            multi_head: 4,
            ..AttentionConfig::default()
        },
        ..LasConfig::demo()
    };
    let (model, _varmap) = Las::with_random_weights(config, &device).unwrap();

    let features = Tensor::randn(0f32, 1., (3, 12, 80), &device).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let output = model.forward(&features, None, 0.0, &mut rng).unwrap();

    assert_eq!(output.log_probs.len(), 6);
    for (scores, token) in output.attention.iter().zip(&output.tokens) {
        assert_eq!(scores.len(), 4);
        assert_eq!(scores[3].dims(), &[3, 3]);
        for row in token.to_vec2::<f32>().unwrap() {
            assert_eq!(row.iter().sum::<f32>(), 1.0);
        }
    }
}

#[test]
fn test_rejects_length_not_divisible_by_reduction() {
    let (model, _varmap) = Las::with_random_weights(LasConfig::demo(), &Device::Cpu).unwrap();
    let features = Tensor::zeros((1, 44, 80), DType::F32, &Device::Cpu).unwrap();
    let mut rng = StdRng::seed_from_u64(0);

    let err = model.forward(&features, None, 0.0, &mut rng);
    match err {
        Err(LasError::Shape { expected, actual, .. }) => {
            assert!(expected.contains('8'));
            assert_eq!(actual, "44");
        }
        Err(other) => panic!("expected shape error, got {other}"),
        Ok(_) => panic!("expected shape error"),
    }
}

#[test]
fn test_safetensors_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("las.safetensors");

    let config = LasConfig {
        listener_hidden_dim: 8,
        listener_layers: 2,
        speller_hidden_dim: 16,
        max_label_len: 5,
        ..LasConfig::demo()
    };
    let (model, varmap) = Las::with_random_weights(config.clone(), &Device::Cpu).unwrap();
    varmap.save(&path).unwrap();

    let loaded = Las::from_safetensors(config, &[&path], &Device::Cpu).unwrap();

    let features = Tensor::randn(0f32, 1., (1, 8, 80), &Device::Cpu).unwrap();
    let a = model
        .forward(&features, None, 0.0, &mut StdRng::seed_from_u64(1))
        .unwrap();
    let b = loaded
        .forward(&features, None, 0.0, &mut StdRng::seed_from_u64(1))
        .unwrap();

    for (x, y) in a.log_probs.iter().zip(&b.log_probs) {
        assert!(max_abs_diff(x, y) < 1e-6);
    }
}
