//! Feature schema: the single authoritative column order of the model.
//!
//! Categorical features come first, numerical features second. The encoder
//! gathers its inputs through this type and the reconstruction target is
//! built through it too, so sequence position `i`, reconstruction index `i`
//! and target index `i` always refer to the same feature.

use burn::prelude::*;
use std::collections::HashSet;

use super::batch::FeatureBatch;
use super::error::ModelError;

/// Ordered, disjoint lists of categorical and numerical feature names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    categorical: Vec<String>,
    numerical: Vec<String>,
}

impl FeatureSchema {
    /// Validate and freeze a schema.
    ///
    /// Fails when both lists are empty, when a list repeats a name, or when
    /// a name appears in both lists.
    pub fn new(categorical: Vec<String>, numerical: Vec<String>) -> Result<Self, ModelError> {
        if categorical.is_empty() && numerical.is_empty() {
            return Err(ModelError::EmptySchema);
        }

        let mut seen_categorical = HashSet::with_capacity(categorical.len());
        for name in &categorical {
            if !seen_categorical.insert(name.as_str()) {
                return Err(ModelError::DuplicateFeature { name: name.clone() });
            }
        }

        let mut seen_numerical = HashSet::with_capacity(numerical.len());
        for name in &numerical {
            if seen_categorical.contains(name.as_str()) {
                return Err(ModelError::OverlappingFeature { name: name.clone() });
            }
            if !seen_numerical.insert(name.as_str()) {
                return Err(ModelError::DuplicateFeature { name: name.clone() });
            }
        }

        Ok(Self { categorical, numerical })
    }

    pub fn categorical(&self) -> &[String] {
        &self.categorical
    }

    pub fn numerical(&self) -> &[String] {
        &self.numerical
    }

    /// Total number of columns, i.e. the reconstruction width.
    pub fn num_features(&self) -> usize {
        self.categorical.len() + self.numerical.len()
    }

    /// All names in sequence order: categorical block, then numerical block.
    pub fn ordered_names(&self) -> impl Iterator<Item = &str> {
        self.categorical
            .iter()
            .chain(self.numerical.iter())
            .map(String::as_str)
    }

    /// Reconstruction/importance index of a feature.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.ordered_names().position(|candidate| candidate == name)
    }

    /// Number of rows of `batch`, measured over the schema columns only.
    ///
    /// Columns outside the schema are ignored. Fails when a schema column is
    /// missing, when schema columns disagree in length, or when they hold no
    /// rows at all.
    pub fn batch_size<B: Backend>(&self, batch: &FeatureBatch<B>) -> Result<usize, ModelError> {
        let mut expected = None;
        for name in self.ordered_names() {
            let actual = batch.column(name)?.dims()[0];
            match expected {
                None => expected = Some(actual),
                Some(expected) if expected != actual => {
                    return Err(ModelError::ColumnLengthMismatch {
                        name: name.to_string(),
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
            }
        }
        match expected {
            Some(0) | None => Err(ModelError::ZeroRows),
            Some(rows) => Ok(rows),
        }
    }

    /// Raw categorical values as `[batch, n_categorical]`, or `None` when the
    /// schema has no categorical features.
    pub fn gather_categorical<B: Backend>(
        &self,
        batch: &FeatureBatch<B>,
    ) -> Result<Option<Tensor<B, 2>>, ModelError> {
        self.batch_size(batch)?;
        Self::gather(&self.categorical, batch)
    }

    /// Raw numerical values as `[batch, n_numerical]`, or `None` when the
    /// schema has no numerical features.
    pub fn gather_numerical<B: Backend>(
        &self,
        batch: &FeatureBatch<B>,
    ) -> Result<Option<Tensor<B, 2>>, ModelError> {
        self.batch_size(batch)?;
        Self::gather(&self.numerical, batch)
    }

    /// Reconstruction target: every column's true value in schema order,
    /// `[batch, num_features]`.
    pub fn build_target<B: Backend>(&self, batch: &FeatureBatch<B>) -> Result<Tensor<B, 2>, ModelError> {
        let names: Vec<&str> = self.ordered_names().collect();
        let batch_size = self.batch_size(batch)?;
        let columns = names
            .into_iter()
            .map(|name| batch.column(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let target = Tensor::stack::<2>(columns, 1);
        debug_assert_eq!(target.dims(), [batch_size, self.num_features()]);
        Ok(target)
    }

    fn gather<B: Backend>(
        names: &[String],
        batch: &FeatureBatch<B>,
    ) -> Result<Option<Tensor<B, 2>>, ModelError> {
        if names.is_empty() {
            return Ok(None);
        }
        let columns = names
            .iter()
            .map(|name| batch.column(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Tensor::stack::<2>(columns, 1)))
    }
}
