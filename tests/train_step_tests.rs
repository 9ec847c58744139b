/// Training Step Integration Tests
///
/// Drives the masked-reconstruction trainer end to end on the Autodiff
/// NdArray backend: reported metrics, parameter updates, custom optimizers
/// and metrics, the masked-only loss path, and rejection of empty batches.

use burn::optim::SgdConfig;
use burn::prelude::*;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;

use masked_tab_transformer::tabtransformer::architectures::fttransformer::loss_utils::{
    full_row_mse, masked_positions_mse,
};
use masked_tab_transformer::test_utils::{
    batch_from_columns, mask_from_bools, reference_from_columns, tensor_from_f32_vec,
};
use masked_tab_transformer::{
    loss_mask, AdamTrainer, FeatureBatch, LossMode, MaskedFTTransformer, MaskedReconstructionTrainer,
    MeanSquaredError, ModelConfig, ModelError, NumericalEmbeddingType, ReconstructionMetric,
    ReferenceFrame, TrainingConfig,
};

type TestBackend = Autodiff<NdArray<f32>>;

fn reference() -> ReferenceFrame {
    reference_from_columns(&[
        ("city", &[0.0, 1.0, 2.0]),
        ("age", &[0.2, 0.35, 0.5, 0.65]),
    ])
}

fn batch() -> FeatureBatch<TestBackend> {
    batch_from_columns(
        &[("city", &[0.0, 1.0, 2.0, 1.0]), ("age", &[0.25, 0.4, 0.61, 0.33])],
        &Default::default(),
    )
}

/// Small deterministic configuration (no dropout).
fn small_config() -> ModelConfig {
    ModelConfig::new(["city"], ["age"])
        .with_embedding_dim(8)
        .with_depth(1)
        .with_heads(2)
        .with_dropout(0.0, 0.0)
        .with_seed(11)
}

fn adam_trainer(config: &ModelConfig, learning_rate: f64) -> AdamTrainer<TestBackend> {
    let model = MaskedFTTransformer::new(config, &reference(), &Default::default()).unwrap();
    AdamTrainer::new(model, &TrainingConfig::new().with_learning_rate(learning_rate))
}

#[test]
fn test_city_age_train_step_reports_loss() {
    let reference = reference_from_columns(&[("city", &[0.0, 1.0]), ("age", &[25.0, 40.0])]);
    let config = ModelConfig::new(["city"], ["age"])
        .with_embedding_dim(4)
        .with_depth(1)
        .with_heads(2);
    let model = MaskedFTTransformer::<TestBackend>::new(&config, &reference, &Default::default()).unwrap();
    let mut trainer = AdamTrainer::new(model, &TrainingConfig::new());

    let batch = batch_from_columns(&[("city", &[0.0]), ("age", &[25.0])], &Default::default());
    let results = trainer.train_step(&batch).unwrap();

    let loss = results["loss"];
    assert!(loss.is_finite(), "loss should be finite, got {loss}");
    assert!(loss >= 0.0);
}

#[test]
fn test_two_steps_on_the_same_batch_report_different_losses() {
    let mut trainer = adam_trainer(&small_config(), 1e-2);
    let first = trainer.train_step(&batch()).unwrap()["loss"];
    trainer.reset_metrics();
    let second = trainer.train_step(&batch()).unwrap()["loss"];

    assert_ne!(first, second);
    assert_eq!(trainer.iteration(), 2);
}

#[test]
fn test_zero_learning_rate_reports_equal_losses() {
    let mut trainer = adam_trainer(&small_config(), 0.0);
    let first = trainer.train_step(&batch()).unwrap()["loss"];
    trainer.reset_metrics();
    let second = trainer.train_step(&batch()).unwrap()["loss"];

    assert_eq!(first, second);

    trainer.set_learning_rate(1e-2);
    trainer.train_step(&batch()).unwrap();
    let model = trainer.into_model();
    assert_eq!(model.num_features(), 2);
}

#[test]
fn test_repeated_steps_reduce_reconstruction_error() {
    for strategy in [NumericalEmbeddingType::Linear, NumericalEmbeddingType::PiecewiseLinear] {
        let config = small_config().with_numerical_embedding(strategy, Some(4));
        let mut trainer = adam_trainer(&config, 1e-2);
        let initial = trainer.evaluate(&batch()).unwrap();

        for _ in 0..40 {
            trainer.train_step(&batch()).unwrap();
        }

        let trained = trainer.evaluate(&batch()).unwrap();
        assert!(
            trained < initial,
            "{strategy:?}: loss should decrease, {initial} -> {trained}"
        );
    }
}

#[test]
fn test_evaluate_does_not_update_parameters() {
    let trainer = adam_trainer(&small_config(), 1e-2);
    let first = trainer.evaluate(&batch()).unwrap();
    let second = trainer.evaluate(&batch()).unwrap();

    assert_eq!(first, second);
    assert_eq!(trainer.iteration(), 0);
}

#[test]
fn test_custom_optimizer_and_metrics() {
    let model = MaskedFTTransformer::<TestBackend>::new(&small_config(), &reference(), &Default::default()).unwrap();
    let optimizer = SgdConfig::new().init::<TestBackend, MaskedFTTransformer<TestBackend>>();
    let metrics: Vec<Box<dyn ReconstructionMetric<TestBackend>>> = vec![Box::new(MeanSquaredError::new())];
    let mut trainer = MaskedReconstructionTrainer::with_optimizer(model, optimizer, 0.05).with_metrics(metrics);

    let results = trainer.train_step(&batch()).unwrap();
    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["loss", "mse"]);
    assert!((results["loss"] - results["mse"]).abs() < 1e-4);
    assert_eq!(trainer.learning_rate(), 0.05);
}

#[test]
fn test_masked_only_training_with_upstream_masking() {
    let config = small_config().with_loss_mode(LossMode::MaskedOnly);
    let mut trainer = adam_trainer(&config, 1e-2);
    let device = Default::default();

    let target = batch();
    let input = batch_from_columns::<TestBackend>(
        &[("city", &[0.0, -1.0, 2.0, 1.0]), ("age", &[-1.0, 0.4, 0.61, 0.33])],
        &device,
    );
    let mask = mask_from_bools(
        &[false, true, true, false, false, false, false, false],
        [4, 2],
        &device,
    );

    let results = trainer.train_step_with_target(&input, &target, Some(mask)).unwrap();
    assert!(results["loss"].is_finite());

    let err = trainer.train_step_with_target(&input, &target, None).unwrap_err();
    assert_eq!(err, ModelError::MissingMask);

    let wrong_shape = mask_from_bools(&[true, false], [1, 2], &device);
    let err = trainer
        .train_step_with_target(&input, &target, Some(wrong_shape))
        .unwrap_err();
    assert!(matches!(err, ModelError::MaskShapeMismatch { .. }));
    assert_eq!(trainer.iteration(), 1);
}

#[test]
fn test_perfect_reconstruction_has_zero_loss() {
    let device = Default::default();
    let values = tensor_from_f32_vec::<NdArray<f32>, 2>(&[0.1, 2.0, -3.5, 4.25], [2, 2], &device);

    let full = full_row_mse(values.clone(), values.clone()).into_scalar();
    assert_eq!(full, 0.0);

    let mask = mask_from_bools(&[true, false, true, true], [2, 2], &device);
    let masked = masked_positions_mse(values.clone(), values, mask).into_scalar();
    assert_eq!(masked, 0.0);
}

#[test]
fn test_construction_errors_are_reported_before_training() {
    let result = MaskedFTTransformer::<TestBackend>::new(
        &small_config().with_embedding_dim(10).with_heads(3),
        &reference(),
        &Default::default(),
    );
    assert!(matches!(result, Err(ModelError::HeadsDoNotDivide { .. })));

    let result = MaskedFTTransformer::<TestBackend>::new(
        &ModelConfig::new(["city"], ["city"]),
        &reference(),
        &Default::default(),
    );
    assert!(matches!(result, Err(ModelError::OverlappingFeature { .. })));
}

#[test]
fn test_zero_row_batch_fails_without_an_update() {
    let mut trainer = adam_trainer(&small_config(), 1e-2);
    let before = trainer.evaluate(&batch()).unwrap();

    let empty = batch_from_columns::<TestBackend>(&[("city", &[]), ("age", &[])], &Default::default());
    assert_eq!(trainer.train_step(&empty).unwrap_err(), ModelError::ZeroRows);
    assert_eq!(trainer.evaluate(&empty).unwrap_err(), ModelError::ZeroRows);

    assert_eq!(trainer.iteration(), 0);
    assert_eq!(trainer.evaluate(&batch()).unwrap(), before);
}

#[test]
fn test_model_loss_is_zero_for_a_perfect_reconstruction() {
    let device = Default::default();
    for mode in [LossMode::FullRow, LossMode::MaskedOnly] {
        let config = small_config().with_loss_mode(mode);
        let model = MaskedFTTransformer::<TestBackend>::new(&config, &reference(), &device).unwrap();

        let target = model.build_target(&batch()).unwrap();
        assert_eq!(model.forward(&batch()).unwrap().masked_preds.dims(), target.dims());

        let mask = loss_mask(&[true, false, true, true, false, true, true, false], [4, 2], &device).unwrap();
        let loss: f32 = model.loss(target.clone(), target, Some(mask)).unwrap().into_scalar();
        assert_eq!(loss, 0.0, "{mode:?}");
    }
}
