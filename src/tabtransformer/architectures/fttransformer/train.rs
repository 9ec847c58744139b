//! Masked-reconstruction training loop.

use burn::{
    config::Config,
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, decay::WeightDecayConfig, Adam, AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use std::collections::BTreeMap;

use super::batch::FeatureBatch;
use super::error::ModelError;
use super::metrics::{MeanAbsoluteError, MeanMetric, MeanSquaredError, ReconstructionMetric};
use super::model::MaskedFTTransformer;
use crate::tabtransformer::settings::settings;

/// Optimizer configuration of the default Adam trainer.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 0.9)]
    pub beta_1: f32,
    #[config(default = 0.999)]
    pub beta_2: f32,
    #[config(default = 1e-7)]
    pub epsilon: f32,
    /// L2 penalty; no weight decay when unset
    pub weight_decay: Option<f32>,
}

impl TrainingConfig {
    /// Defaults, with the learning rate taken from the process settings.
    pub fn from_settings() -> Self {
        Self::new().with_learning_rate(settings().training.learning_rate)
    }

    pub fn adam(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
            .with_weight_decay(self.weight_decay.map(WeightDecayConfig::new))
    }
}

/// Owns a [`MaskedFTTransformer`], its optimizer and the tracked metrics.
///
/// Steps are strictly sequential (`&mut self`). Every fallible part of a step
/// runs before the optimizer is called, so a step either updates all
/// parameters or none.
pub struct MaskedReconstructionTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MaskedFTTransformer<B>, B>,
{
    model: MaskedFTTransformer<B>,
    optimizer: O,
    learning_rate: f64,
    loss_tracker: MeanMetric,
    metrics: Vec<Box<dyn ReconstructionMetric<B>>>,
    iteration: usize,
}

/// Trainer with the default Adam optimizer.
pub type AdamTrainer<B> = MaskedReconstructionTrainer<B, OptimizerAdaptor<Adam, MaskedFTTransformer<B>, B>>;

impl<B: AutodiffBackend> AdamTrainer<B> {
    /// Adam trainer tracking "loss", "mse" and "mae".
    pub fn new(model: MaskedFTTransformer<B>, config: &TrainingConfig) -> Self {
        let optimizer = config.adam().init();
        Self::with_optimizer(model, optimizer, config.learning_rate)
    }
}

impl<B, O> MaskedReconstructionTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MaskedFTTransformer<B>, B>,
{
    pub fn with_optimizer(model: MaskedFTTransformer<B>, optimizer: O, learning_rate: f64) -> Self {
        Self {
            model,
            optimizer,
            learning_rate,
            loss_tracker: MeanMetric::new("loss"),
            metrics: vec![Box::new(MeanSquaredError::new()), Box::new(MeanAbsoluteError::new())],
            iteration: 0,
        }
    }

    /// Replace the tracked `(target, predictions)` metrics. The loss is
    /// always tracked.
    pub fn with_metrics(mut self, metrics: Vec<Box<dyn ReconstructionMetric<B>>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn model(&self) -> &MaskedFTTransformer<B> {
        &self.model
    }

    pub fn into_model(self) -> MaskedFTTransformer<B> {
        self.model
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Number of optimizer updates applied so far.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// One optimization step where the input batch is also the target.
    ///
    /// Returns the current value of every tracked metric keyed by name.
    pub fn train_step(&mut self, batch: &FeatureBatch<B>) -> Result<BTreeMap<String, f32>, ModelError> {
        self.train_step_with_target(batch, batch, None)
    }

    /// One optimization step reconstructing `target` from `input`.
    ///
    /// `mask` flags the positions `[batch, columns]` that contribute to the
    /// loss under `LossMode::MaskedOnly`.
    pub fn train_step_with_target(
        &mut self,
        input: &FeatureBatch<B>,
        target: &FeatureBatch<B>,
        mask: Option<Tensor<B, 2>>,
    ) -> Result<BTreeMap<String, f32>, ModelError> {
        let output = self.model.forward(input)?;
        let target = self.model.build_target(target)?;
        let loss = self.model.loss(output.masked_preds.clone(), target.clone(), mask)?;

        let loss_value = loss.clone().into_scalar().elem::<f32>();
        if !loss_value.is_finite() {
            log::warn!("Non-finite reconstruction loss at step {}: {}", self.iteration, loss_value);
        }

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);
        self.iteration += 1;

        self.loss_tracker.update_state(loss_value);
        let predictions = output.masked_preds.detach();
        for metric in self.metrics.iter_mut() {
            metric.update_state(target.clone(), predictions.clone());
        }

        log::debug!("step {} loss {:.6}", self.iteration, loss_value);
        Ok(self.results())
    }

    /// Loss of the current model on `batch` without dropout and without
    /// touching parameters or metrics.
    pub fn evaluate(&self, batch: &FeatureBatch<B>) -> Result<f32, ModelError> {
        self.evaluate_with_target(batch, batch, None)
    }

    pub fn evaluate_with_target(
        &self,
        input: &FeatureBatch<B>,
        target: &FeatureBatch<B>,
        mask: Option<Tensor<B, 2>>,
    ) -> Result<f32, ModelError> {
        let model = self.model.valid();
        let output = model.forward(&input.inner())?;
        let target = model.build_target(&target.inner())?;
        let loss = model.loss(output.masked_preds, target, mask.map(Tensor::inner))?;
        Ok(loss.into_scalar().elem::<f32>())
    }

    /// Current value of every tracked metric keyed by name.
    pub fn results(&self) -> BTreeMap<String, f32> {
        let mut results = BTreeMap::new();
        results.insert(self.loss_tracker.name().to_string(), self.loss_tracker.result());
        for metric in &self.metrics {
            results.insert(metric.name().to_string(), metric.result());
        }
        results
    }

    pub fn reset_metrics(&mut self) {
        self.loss_tracker.reset();
        for metric in self.metrics.iter_mut() {
            metric.reset();
        }
    }
}
