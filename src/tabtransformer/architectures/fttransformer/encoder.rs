//! FT-Transformer encoder over mixed categorical and numerical columns.

use burn::module::{Ignored, Module, Param};
use burn::prelude::*;

use super::batch::{FeatureBatch, ReferenceFrame};
use super::config::{ImportanceAnchor, ModelConfig};
use super::deterministic::DeterministicRngContext;
use super::embeddings::{CategoricalEmbedding, ColumnEmbedding, NumericalEmbedding};
use super::error::ModelError;
use super::layer::TransformerBlock;
use super::schema::FeatureSchema;

/// Encoded sequence plus optional per-feature importances.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// [batch, num_features, embedding_dim], schema order
    pub sequence: Tensor<B, 3>,
    /// [batch, num_features], present only in explainable mode
    pub importances: Option<Tensor<B, 2>>,
}

/// Column embeddings followed by a stack of pre-norm transformer blocks.
///
/// The sequence is always the categorical block followed by the numerical
/// block, both in [`FeatureSchema`] order. With
/// [`ImportanceAnchor::ClsToken`] a learned token is prepended before the
/// first block and removed again from every output.
///
/// SEED OFFSETS: +100 categorical table, +200 numerical embedding,
/// +300 importance token, +1000 * (block + 1) per block.
#[derive(Module, Debug)]
pub struct FTTransformerEncoder<B: Backend> {
    categorical_embedding: Option<CategoricalEmbedding<B>>,
    numerical_embedding: Option<NumericalEmbedding<B>>,
    /// [1, embedding_dim]
    importance_token: Option<Param<Tensor<B, 2>>>,
    blocks: Vec<TransformerBlock<B>>,
    schema: Ignored<FeatureSchema>,
    importance_anchor: Ignored<ImportanceAnchor>,
    embedding_dim: usize,
    heads: usize,
    explainable: bool,
    verbose: bool,
}

impl<B: Backend> FTTransformerEncoder<B> {
    /// Build every component from `config`, fitting vocabularies and bins on
    /// `reference`.
    pub fn new(config: &ModelConfig, reference: &ReferenceFrame, device: &B::Device) -> Result<Self, ModelError> {
        let schema = config.validate()?;
        let rng_ctx = DeterministicRngContext::new(config.seed, device.clone());

        let categorical = if schema.categorical().is_empty() {
            None
        } else {
            Some(CategoricalEmbedding::new(
                schema.categorical(),
                reference,
                config.embedding_dim,
                &rng_ctx,
            )?)
        };

        let numerical = if schema.numerical().is_empty() {
            None
        } else {
            Some(NumericalEmbedding::new(config, schema.numerical(), reference, &rng_ctx)?)
        };

        Ok(Self::assemble(config, schema, categorical, numerical, &rng_ctx))
    }

    /// Build an encoder around pre-built column embeddings.
    ///
    /// The embedding width is taken from the embeddings themselves; both must
    /// agree, and each must cover exactly the schema columns of its kind.
    pub fn from_parts(
        config: &ModelConfig,
        categorical: Option<CategoricalEmbedding<B>>,
        numerical: Option<NumericalEmbedding<B>>,
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        let categorical_dim = categorical.as_ref().map(|e| e.embedding_dim());
        let numerical_dim = numerical.as_ref().map(|e| e.embedding_dim());
        if let (Some(categorical), Some(numerical)) = (categorical_dim, numerical_dim) {
            if categorical != numerical {
                return Err(ModelError::EmbeddingDimMismatch { categorical, numerical });
            }
        }

        let embedding_dim = categorical_dim.or(numerical_dim).unwrap_or(config.embedding_dim);
        let config = config.clone().with_embedding_dim(embedding_dim);
        let schema = config.validate()?;

        check_columns("categorical", schema.categorical().len(), categorical.as_ref().map(|e| e.num_columns()))?;
        check_columns("numerical", schema.numerical().len(), numerical.as_ref().map(|e| e.num_columns()))?;

        let rng_ctx = DeterministicRngContext::new(config.seed, device.clone());
        Ok(Self::assemble(&config, schema, categorical, numerical, &rng_ctx))
    }

    fn assemble(
        config: &ModelConfig,
        schema: FeatureSchema,
        categorical: Option<CategoricalEmbedding<B>>,
        numerical: Option<NumericalEmbedding<B>>,
        rng_ctx: &DeterministicRngContext<B>,
    ) -> Self {
        let importance_token = match config.importance_anchor {
            ImportanceAnchor::FirstColumn => None,
            ImportanceAnchor::ClsToken => {
                let mut rng = rng_ctx.rng(300);
                let token = rng_ctx.generate_normal_tensor([1, config.embedding_dim], &mut rng, 0.0, 0.02);
                Some(Param::from_tensor(token))
            }
        };

        let blocks = (0..config.depth)
            .map(|index| TransformerBlock::new(config, index, rng_ctx))
            .collect();

        Self {
            categorical_embedding: categorical,
            numerical_embedding: numerical,
            importance_token,
            blocks,
            schema: Ignored(schema),
            importance_anchor: Ignored(config.importance_anchor),
            embedding_dim: config.embedding_dim,
            heads: config.heads,
            explainable: config.explainable,
            verbose: config.verbose,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn num_features(&self) -> usize {
        self.schema.num_features()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn heads(&self) -> usize {
        self.heads
    }

    pub fn is_explainable(&self) -> bool {
        self.explainable
    }

    pub fn importance_anchor(&self) -> ImportanceAnchor {
        *self.importance_anchor
    }

    pub fn categorical_embedding(&self) -> Option<&CategoricalEmbedding<B>> {
        self.categorical_embedding.as_ref()
    }

    pub fn numerical_embedding(&self) -> Option<&NumericalEmbedding<B>> {
        self.numerical_embedding.as_ref()
    }

    /// Encode a batch. Columns are gathered by schema name, so the batch's
    /// own key order is irrelevant.
    pub fn forward(&self, batch: &FeatureBatch<B>) -> Result<EncoderOutput<B>, ModelError> {
        let batch_size = self.schema.batch_size(batch)?;
        let mut parts = Vec::with_capacity(3);

        if let Some(token) = &self.importance_token {
            parts.push(token.val().unsqueeze_dim::<3>(0).repeat_dim(0, batch_size));
        }
        if let Some(embedding) = &self.categorical_embedding {
            if let Some(raw) = self.schema.gather_categorical(batch)? {
                parts.push(embedding.embed(raw));
            }
        }
        if let Some(embedding) = &self.numerical_embedding {
            if let Some(raw) = self.schema.gather_numerical(batch)? {
                parts.push(embedding.embed(raw));
            }
        }

        let mut sequence = Tensor::cat(parts, 1);
        if self.verbose {
            log::debug!("embedded sequence shape: {:?}", sequence.dims());
        }

        let mut importances: Option<Tensor<B, 2>> = None;
        for block in &self.blocks {
            let output = block.transform(sequence);
            sequence = output.sequence;
            if let Some(weights) = output.weights {
                let row = anchor_row(weights);
                importances = Some(match importances {
                    Some(total) => total + row,
                    None => row,
                });
            }
        }

        let [batch_size, seq_len, embedding_dim] = sequence.dims();
        if self.importance_token.is_some() {
            sequence = sequence.slice([0..batch_size, 1..seq_len, 0..embedding_dim]);
            importances = importances.map(|total| total.slice([0..batch_size, 1..seq_len]));
        }

        let normalizer = (self.blocks.len() * self.heads) as f32;
        let importances = importances.map(|total| total.div_scalar(normalizer));

        if self.verbose {
            log::debug!(
                "encoded sequence shape: {:?}, importances: {:?}",
                sequence.dims(),
                importances.as_ref().map(|i| i.dims())
            );
        }

        Ok(EncoderOutput { sequence, importances })
    }
}

/// Attention paid from sequence position 0, summed over heads:
/// `[batch, heads, seq, seq] -> [batch, seq]`.
fn anchor_row<B: Backend>(weights: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, heads, seq, _] = weights.dims();
    weights
        .slice([0..batch, 0..heads, 0..1, 0..seq])
        .sum_dim(1)
        .reshape([batch, seq])
}

fn check_columns(kind: &'static str, expected: usize, actual: Option<usize>) -> Result<(), ModelError> {
    let actual = actual.unwrap_or(0);
    if expected != actual {
        return Err(ModelError::EmbeddingColumnMismatch { kind, expected, actual });
    }
    Ok(())
}
