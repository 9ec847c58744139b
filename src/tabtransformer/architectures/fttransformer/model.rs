//! Masked-reconstruction model: encoder plus a scalar reconstruction head.

use burn::module::{Ignored, Module};
use burn::prelude::*;

use super::batch::{FeatureBatch, ReferenceFrame};
use super::config::{LossMode, ModelConfig};
use super::deterministic::{DeterministicLinear, DeterministicRngContext};
use super::encoder::FTTransformerEncoder;
use super::error::ModelError;
use super::loss_utils::reconstruction_loss;
use super::schema::FeatureSchema;

/// Output of [`MaskedFTTransformer::forward`].
#[derive(Debug, Clone)]
pub struct ReconstructionOutput<B: Backend> {
    /// [batch, num_features], one reconstructed scalar per column in schema order
    pub masked_preds: Tensor<B, 2>,
    /// [batch, num_features], present only in explainable mode
    pub importances: Option<Tensor<B, 2>>,
}

/// FT-Transformer trained to reconstruct every column of a masked row.
///
/// The encoded sequence is flattened to `num_features * embedding_dim` values
/// per example and projected to `num_features` scalars. Masking is applied
/// upstream: the model never hides values itself.
#[derive(Module, Debug)]
pub struct MaskedFTTransformer<B: Backend> {
    encoder: FTTransformerEncoder<B>,
    reconstruction_head: DeterministicLinear<B>,
    loss_mode: Ignored<LossMode>,
    verbose: bool,
}

impl<B: Backend> MaskedFTTransformer<B> {
    pub fn new(config: &ModelConfig, reference: &ReferenceFrame, device: &B::Device) -> Result<Self, ModelError> {
        let encoder = FTTransformerEncoder::new(config, reference, device)?;
        Self::with_encoder(encoder, config, device)
    }

    /// Wrap a pre-built encoder. `config` must describe the same feature
    /// lists, in the same order, as the encoder's schema.
    pub fn with_encoder(
        encoder: FTTransformerEncoder<B>,
        config: &ModelConfig,
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        let schema = FeatureSchema::new(
            config.categorical_features.clone(),
            config.numerical_features.clone(),
        )?;
        if &schema != encoder.schema() {
            return Err(ModelError::SchemaMismatch {
                expected: schema.ordered_names().map(str::to_string).collect(),
                actual: encoder.schema().ordered_names().map(str::to_string).collect(),
            });
        }

        let num_features = encoder.num_features();
        let rng_ctx = DeterministicRngContext::new(config.seed, device.clone());
        let reconstruction_head = rng_ctx.create_deterministic_linear(
            num_features * encoder.embedding_dim(),
            num_features,
            true,
            9000,
        );

        Ok(Self {
            encoder,
            reconstruction_head,
            loss_mode: Ignored(config.loss_mode),
            verbose: config.verbose,
        })
    }

    pub fn encoder(&self) -> &FTTransformerEncoder<B> {
        &self.encoder
    }

    pub fn schema(&self) -> &FeatureSchema {
        self.encoder.schema()
    }

    pub fn num_features(&self) -> usize {
        self.encoder.num_features()
    }

    pub fn loss_mode(&self) -> LossMode {
        *self.loss_mode
    }

    pub fn forward(&self, batch: &FeatureBatch<B>) -> Result<ReconstructionOutput<B>, ModelError> {
        let encoded = self.encoder.forward(batch)?;

        let [batch_size, num_features, embedding_dim] = encoded.sequence.dims();
        let flat = encoded.sequence.reshape([batch_size, num_features * embedding_dim]);
        let masked_preds = self.reconstruction_head.forward(flat);

        if self.verbose {
            log::debug!(
                "flattened sequence: [{batch_size}, {}], reconstruction: {:?}",
                num_features * embedding_dim,
                masked_preds.dims()
            );
        }

        Ok(ReconstructionOutput {
            masked_preds,
            importances: encoded.importances,
        })
    }

    /// Reconstruction target of `batch`: every column's value in schema order.
    pub fn build_target(&self, batch: &FeatureBatch<B>) -> Result<Tensor<B, 2>, ModelError> {
        self.schema().build_target(batch)
    }

    /// Loss under the configured [`LossMode`].
    pub fn loss(
        &self,
        predictions: Tensor<B, 2>,
        target: Tensor<B, 2>,
        mask: Option<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 1>, ModelError> {
        reconstruction_loss(*self.loss_mode, predictions, target, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn reference() -> ReferenceFrame {
        ReferenceFrame::new()
            .with_column("city", vec![0.0, 1.0])
            .with_column("age", vec![25.0, 40.0])
    }

    fn config() -> ModelConfig {
        ModelConfig::new(["city"], ["age"])
            .with_embedding_dim(4)
            .with_depth(1)
            .with_heads(2)
            .with_seed(7)
    }

    fn batch() -> FeatureBatch<TestBackend> {
        let mut batch = FeatureBatch::new();
        batch.insert_values("city", &[0.0], &Default::default());
        batch.insert_values("age", &[25.0], &Default::default());
        batch
    }

    #[test]
    fn test_forward_has_one_prediction_per_feature() {
        let model = MaskedFTTransformer::<TestBackend>::new(&config(), &reference(), &Default::default()).unwrap();
        let output = model.forward(&batch()).unwrap();
        assert_eq!(output.masked_preds.dims(), [1, 2]);
        assert!(output.importances.is_none());
    }

    #[test]
    fn test_with_encoder_rejects_other_schema() {
        let device = Default::default();
        let encoder = FTTransformerEncoder::<TestBackend>::new(&config(), &reference(), &device).unwrap();

        let swapped = ModelConfig::new(["age"], ["city"]).with_embedding_dim(4).with_heads(2);
        let err = MaskedFTTransformer::with_encoder(encoder, &swapped, &device).unwrap_err();
        assert!(matches!(err, ModelError::SchemaMismatch { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_loss_is_finite_and_non_negative() {
        let model = MaskedFTTransformer::<TestBackend>::new(&config(), &reference(), &Default::default()).unwrap();
        let batch = batch();
        let preds = model.forward(&batch).unwrap().masked_preds;
        let target = model.build_target(&batch).unwrap();

        let loss: f32 = model.loss(preds, target, None).unwrap().into_scalar();
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
    }

    #[test]
    fn test_masked_only_requires_mask() {
        let config = config().with_loss_mode(LossMode::MaskedOnly);
        let model = MaskedFTTransformer::<TestBackend>::new(&config, &reference(), &Default::default()).unwrap();
        let batch = batch();
        let preds = model.forward(&batch).unwrap().masked_preds;
        let target = model.build_target(&batch).unwrap();

        assert_eq!(model.loss(preds, target, None).unwrap_err(), ModelError::MissingMask);
    }
}
