//! Error types for model construction, forward passes and training steps.

use thiserror::Error;

/// Errors raised by the encoder, the reconstruction model and the trainer.
///
/// Variants fall in two families: configuration errors, raised while a model
/// is being built, and shape errors, raised when a call receives data that
/// does not match the model's feature schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Neither categorical nor numerical features were given.
    #[error("Empty schema: at least one categorical or numerical feature is required")]
    EmptySchema,

    /// A feature name appears twice in the same list.
    #[error("Duplicate feature name: {name}")]
    DuplicateFeature {
        /// The repeated feature name
        name: String,
    },

    /// A feature name appears in both the categorical and numerical lists.
    #[error("Feature {name} is listed as both categorical and numerical")]
    OverlappingFeature {
        /// The ambiguous feature name
        name: String,
    },

    /// A size parameter that must be positive was zero.
    #[error("Invalid dimension: {field} must be > 0")]
    ZeroDimension {
        /// Name of the offending configuration field
        field: &'static str,
    },

    /// The number of heads does not divide the embedding dimension.
    #[error("embedding_dim {embedding_dim} is not divisible by heads {heads}")]
    HeadsDoNotDivide {
        /// Configured embedding dimension
        embedding_dim: usize,
        /// Configured number of attention heads
        heads: usize,
    },

    /// A dropout rate lies outside `[0, 1)`.
    #[error("Invalid dropout: {field} = {value} is outside [0, 1)")]
    InvalidDropout {
        /// Name of the offending configuration field
        field: &'static str,
        /// Rejected value
        value: f64,
    },

    /// The piecewise-linear numerical embedding was selected without bins.
    #[error("numerical_bins is required for the piecewise_linear numerical embedding")]
    MissingBins,

    /// The periodic embedding needs a strictly positive, finite sigma.
    #[error("Invalid periodic_sigma: {value}")]
    InvalidSigma {
        /// Rejected value
        value: f64,
    },

    /// Categorical and numerical embeddings disagree on output width.
    #[error("Embedding dimension mismatch: categorical {categorical}, numerical {numerical}")]
    EmbeddingDimMismatch {
        /// Width of the categorical embeddings
        categorical: usize,
        /// Width of the numerical embeddings
        numerical: usize,
    },

    /// A pre-built embedding does not cover the schema it is paired with.
    #[error("{kind} embedding covers {actual} columns, schema has {expected}")]
    EmbeddingColumnMismatch {
        /// "categorical" or "numerical"
        kind: &'static str,
        /// Number of schema columns of that kind
        expected: usize,
        /// Number of columns the embedding was fitted on
        actual: usize,
    },

    /// A pre-built encoder was paired with a configuration for other features.
    #[error("Encoder schema {actual:?} does not match configured schema {expected:?}")]
    SchemaMismatch {
        /// Feature names of the configuration, in schema order
        expected: Vec<String>,
        /// Feature names of the encoder, in schema order
        actual: Vec<String>,
    },

    /// Construction needs reference data for a column that was not supplied.
    #[error("Reference data is missing column {name}")]
    MissingReferenceColumn {
        /// Missing column name
        name: String,
    },

    /// A batch lacks a column named by the schema.
    #[error("Batch is missing schema column {name}")]
    MissingColumn {
        /// Missing column name
        name: String,
    },

    /// Batch columns have different lengths.
    #[error("Column {name} has {actual} values, expected {expected}")]
    ColumnLengthMismatch {
        /// Offending column name
        name: String,
        /// Batch size inferred from the other columns
        expected: usize,
        /// Length of this column
        actual: usize,
    },

    /// A batch without any columns was supplied.
    #[error("Batch has no columns")]
    EmptyBatch,

    /// The schema columns of a batch hold no rows.
    #[error("Batch has no rows")]
    ZeroRows,

    /// Reconstruction and target disagree in shape.
    #[error("Reconstruction shape {reconstruction:?} does not match target shape {target:?}")]
    ReconstructionMismatch {
        /// `[batch, columns]` of the model output
        reconstruction: [usize; 2],
        /// `[batch, columns]` of the concatenated target
        target: [usize; 2],
    },

    /// `LossMode::MaskedOnly` was requested without a mask.
    #[error("Masked-only loss requires a reconstruction mask")]
    MissingMask,

    /// Mask flags do not fill the requested `[batch, columns]` shape.
    #[error("{flags} mask flags cannot fill shape {shape:?}")]
    MaskLengthMismatch {
        /// Number of flags supplied
        flags: usize,
        /// Requested `[batch, columns]`
        shape: [usize; 2],
    },

    /// The supplied mask does not match the reconstruction shape.
    #[error("Mask shape {mask:?} does not match reconstruction shape {expected:?}")]
    MaskShapeMismatch {
        /// Shape of the supplied mask
        mask: [usize; 2],
        /// Expected `[batch, columns]`
        expected: [usize; 2],
    },
}

impl ModelError {
    /// True for errors raised while building a model.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptySchema
                | Self::DuplicateFeature { .. }
                | Self::OverlappingFeature { .. }
                | Self::ZeroDimension { .. }
                | Self::HeadsDoNotDivide { .. }
                | Self::InvalidDropout { .. }
                | Self::MissingBins
                | Self::InvalidSigma { .. }
                | Self::EmbeddingDimMismatch { .. }
                | Self::EmbeddingColumnMismatch { .. }
                | Self::SchemaMismatch { .. }
                | Self::MissingReferenceColumn { .. }
        )
    }

    /// True for errors raised when call-time data does not fit the schema.
    pub fn is_shape(&self) -> bool {
        !self.is_configuration()
    }

    pub fn missing_column(name: impl Into<String>) -> Self {
        Self::MissingColumn { name: name.into() }
    }

    pub fn missing_reference_column(name: impl Into<String>) -> Self {
        Self::MissingReferenceColumn { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let config_errors = vec![
            ModelError::EmptySchema,
            ModelError::OverlappingFeature { name: "age".into() },
            ModelError::HeadsDoNotDivide { embedding_dim: 10, heads: 3 },
            ModelError::MissingBins,
            ModelError::EmbeddingDimMismatch { categorical: 8, numerical: 4 },
        ];
        for err in config_errors {
            assert!(err.is_configuration(), "{err} should be a configuration error");
            assert!(!err.is_shape());
        }

        let shape_errors = vec![
            ModelError::missing_column("city"),
            ModelError::ReconstructionMismatch { reconstruction: [2, 3], target: [2, 4] },
            ModelError::MissingMask,
            ModelError::ZeroRows,
        ];
        for err in shape_errors {
            assert!(err.is_shape(), "{err} should be a shape error");
        }
    }

    #[test]
    fn test_error_messages_name_the_culprit() {
        let err = ModelError::OverlappingFeature { name: "age".into() };
        assert!(err.to_string().contains("age"));

        let err = ModelError::HeadsDoNotDivide { embedding_dim: 10, heads: 3 };
        assert_eq!(err.to_string(), "embedding_dim 10 is not divisible by heads 3");
    }
}
