//! masked-tab-transformer: self-supervised FT-Transformer for mixed
//! categorical/numerical tables, trained by reconstructing masked rows.

pub mod tabtransformer;

pub use tabtransformer::architectures::fttransformer::{
    batch::{FeatureBatch, ReferenceFrame},
    config::{BinningStrategy, ImportanceAnchor, LossMode, ModelConfig, NumericalEmbeddingType},
    encoder::{EncoderOutput, FTTransformerEncoder},
    error::ModelError,
    loss_utils::loss_mask,
    mlp::Activation,
    metrics::{MeanAbsoluteError, MeanMetric, MeanSquaredError, ReconstructionMetric},
    model::{MaskedFTTransformer, ReconstructionOutput},
    schema::FeatureSchema,
    train::{AdamTrainer, MaskedReconstructionTrainer, TrainingConfig},
};
pub use tabtransformer::settings::{settings, Settings};

/// Test utilities for building tensors and batches from host data
pub mod test_utils;
