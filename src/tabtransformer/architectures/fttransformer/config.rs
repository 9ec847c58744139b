//! Model configuration for the masked-reconstruction FT-Transformer.

use serde::{Deserialize, Serialize};

use super::error::ModelError;
use super::mlp::Activation;
use super::schema::FeatureSchema;
use crate::tabtransformer::settings::settings;

/// Numerical embedding strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericalEmbeddingType {
    /// Per-feature linear projection of the raw value.
    Linear,
    /// Piecewise linear encoding over fitted bins, then a dense projection.
    PiecewiseLinear,
    /// Sine/cosine features of learned frequencies, then a dense projection.
    Periodic,
}

impl Default for NumericalEmbeddingType {
    fn default() -> Self {
        Self::Linear
    }
}

/// How piecewise-linear bin edges are fitted from reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinningStrategy {
    Quantile,
    EqualWidth,
}

impl Default for BinningStrategy {
    fn default() -> Self {
        Self::Quantile
    }
}

/// Which sequence position's attention row feeds the importance scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceAnchor {
    /// Attention paid from the first feature column.
    FirstColumn,
    /// Attention paid from a dedicated learned token prepended to the
    /// sequence. The token is stripped from every output.
    ClsToken,
}

impl Default for ImportanceAnchor {
    fn default() -> Self {
        Self::FirstColumn
    }
}

/// Which positions contribute to the reconstruction loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossMode {
    /// Mean squared error over every column of every row.
    FullRow,
    /// Mean squared error over positions flagged by a caller-supplied mask.
    MaskedOnly,
}

impl Default for LossMode {
    fn default() -> Self {
        Self::FullRow
    }
}

/// Construction configuration of the encoder and reconstruction model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Categorical feature names, in sequence order
    #[serde(default)]
    pub categorical_features: Vec<String>,

    /// Numerical feature names, in sequence order after the categorical block
    #[serde(default)]
    pub numerical_features: Vec<String>,

    /// Width of every column embedding and of the attention stack
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Number of transformer blocks
    #[serde(default = "default_depth")]
    pub depth: usize,

    /// Attention heads per block; must divide `embedding_dim`
    #[serde(default = "default_heads")]
    pub heads: usize,

    #[serde(default = "default_dropout")]
    pub attn_dropout: f64,

    #[serde(default = "default_dropout")]
    pub ff_dropout: f64,

    /// Hidden width of the feed-forward sublayer is `embedding_dim * ff_hidden_factor`
    #[serde(default = "default_ff_hidden_factor")]
    pub ff_hidden_factor: usize,

    /// Activation between the two feed-forward layers
    #[serde(default)]
    pub ff_activation: Activation,

    #[serde(default)]
    pub numerical_embedding_type: NumericalEmbeddingType,

    /// Required by the piecewise-linear embedding
    #[serde(default)]
    pub numerical_bins: Option<usize>,

    #[serde(default)]
    pub binning_strategy: BinningStrategy,

    /// Standard deviation of the periodic embedding's initial frequencies
    #[serde(default = "default_periodic_sigma")]
    pub periodic_sigma: f64,

    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Return attention-derived importances alongside the reconstruction
    #[serde(default)]
    pub explainable: bool,

    #[serde(default)]
    pub importance_anchor: ImportanceAnchor,

    #[serde(default)]
    pub loss_mode: LossMode,

    /// Seed of the deterministic parameter initialization
    #[serde(default)]
    pub seed: u64,

    /// Log tensor shapes at debug level on every forward pass
    #[serde(default)]
    pub verbose: bool,
}

fn default_embedding_dim() -> usize { 32 }
fn default_depth() -> usize { 4 }
fn default_heads() -> usize { 8 }
fn default_dropout() -> f64 { 0.1 }
fn default_ff_hidden_factor() -> usize { 1 }
fn default_periodic_sigma() -> f64 { 1.0 }
fn default_layer_norm_eps() -> f64 { 1e-6 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            categorical_features: Vec::new(), // Must be set by user
            numerical_features: Vec::new(),   // Must be set by user
            embedding_dim: default_embedding_dim(),
            depth: default_depth(),
            heads: default_heads(),
            attn_dropout: default_dropout(),
            ff_dropout: default_dropout(),
            ff_hidden_factor: default_ff_hidden_factor(),
            ff_activation: Activation::default(),
            numerical_embedding_type: NumericalEmbeddingType::default(),
            numerical_bins: None,
            binning_strategy: BinningStrategy::default(),
            periodic_sigma: default_periodic_sigma(),
            layer_norm_eps: default_layer_norm_eps(),
            explainable: false,
            importance_anchor: ImportanceAnchor::default(),
            loss_mode: LossMode::default(),
            seed: 0,
            verbose: false,
        }
    }
}

impl ModelConfig {
    /// Config for the given feature lists. `seed` and `verbose` are taken from
    /// the process [`Settings`](crate::tabtransformer::settings::Settings).
    pub fn new<C, N, S1, S2>(categorical: C, numerical: N) -> Self
    where
        C: IntoIterator<Item = S1>,
        N: IntoIterator<Item = S2>,
        S1: Into<String>,
        S2: Into<String>,
    {
        let process = settings();
        Self {
            categorical_features: categorical.into_iter().map(Into::into).collect(),
            numerical_features: numerical.into_iter().map(Into::into).collect(),
            seed: process.training.seed,
            verbose: process.diagnostics.log_shapes,
            ..Self::default()
        }
    }

    pub fn with_embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    pub fn with_dropout(mut self, attn_dropout: f64, ff_dropout: f64) -> Self {
        self.attn_dropout = attn_dropout;
        self.ff_dropout = ff_dropout;
        self
    }

    pub fn with_ff_activation(mut self, activation: Activation) -> Self {
        self.ff_activation = activation;
        self
    }

    pub fn with_numerical_embedding(
        mut self,
        embedding_type: NumericalEmbeddingType,
        bins: Option<usize>,
    ) -> Self {
        self.numerical_embedding_type = embedding_type;
        self.numerical_bins = bins;
        self
    }

    pub fn with_binning_strategy(mut self, strategy: BinningStrategy) -> Self {
        self.binning_strategy = strategy;
        self
    }

    pub fn with_explainable(mut self, explainable: bool) -> Self {
        self.explainable = explainable;
        self
    }

    pub fn with_importance_anchor(mut self, anchor: ImportanceAnchor) -> Self {
        self.importance_anchor = anchor;
        self
    }

    pub fn with_loss_mode(mut self, loss_mode: LossMode) -> Self {
        self.loss_mode = loss_mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check every construction-time constraint and return the frozen schema.
    pub fn validate(&self) -> Result<FeatureSchema, ModelError> {
        let schema = FeatureSchema::new(
            self.categorical_features.clone(),
            self.numerical_features.clone(),
        )?;

        for (field, value) in [
            ("embedding_dim", self.embedding_dim),
            ("depth", self.depth),
            ("heads", self.heads),
            ("ff_hidden_factor", self.ff_hidden_factor),
        ] {
            if value == 0 {
                return Err(ModelError::ZeroDimension { field });
            }
        }

        if self.embedding_dim % self.heads != 0 {
            return Err(ModelError::HeadsDoNotDivide {
                embedding_dim: self.embedding_dim,
                heads: self.heads,
            });
        }

        for (field, value) in [("attn_dropout", self.attn_dropout), ("ff_dropout", self.ff_dropout)] {
            if !(0.0..1.0).contains(&value) {
                return Err(ModelError::InvalidDropout { field, value });
            }
        }

        match self.numerical_embedding_type {
            NumericalEmbeddingType::Linear => {}
            NumericalEmbeddingType::PiecewiseLinear => match self.numerical_bins {
                None => return Err(ModelError::MissingBins),
                Some(0) => return Err(ModelError::ZeroDimension { field: "numerical_bins" }),
                Some(_) => {}
            },
            NumericalEmbeddingType::Periodic => {
                if !(self.periodic_sigma.is_finite() && self.periodic_sigma > 0.0) {
                    return Err(ModelError::InvalidSigma { value: self.periodic_sigma });
                }
            }
        }

        Ok(schema)
    }
}
