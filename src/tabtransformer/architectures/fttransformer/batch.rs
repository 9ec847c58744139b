//! Input batches and host-side reference data.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;
use std::collections::HashMap;

use super::error::ModelError;

/// A batch of raw column values keyed by feature name.
///
/// Every column holds one scalar per example. Masked entries are expected to
/// be replaced by a sentinel upstream; columns are never omitted. The map is
/// unordered on purpose: the model gathers columns through
/// [`FeatureSchema`](super::schema::FeatureSchema), never by iteration order.
#[derive(Debug, Clone)]
pub struct FeatureBatch<B: Backend> {
    columns: HashMap<String, Tensor<B, 1>>,
}

impl<B: Backend> Default for FeatureBatch<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> FeatureBatch<B> {
    pub fn new() -> Self {
        Self {
            columns: HashMap::new(),
        }
    }

    pub fn from_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, Tensor<B, 1>)>,
        S: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, values)| (name.into(), values))
                .collect(),
        }
    }

    /// Insert or replace a column.
    pub fn insert(&mut self, name: impl Into<String>, values: Tensor<B, 1>) {
        self.columns.insert(name.into(), values);
    }

    /// Insert a column from host values.
    pub fn insert_values(&mut self, name: impl Into<String>, values: &[f32], device: &B::Device) {
        let data = TensorData::new(values.to_vec(), [values.len()]);
        self.insert(name, Tensor::from_data(data, device));
    }

    pub fn column(&self, name: &str) -> Result<&Tensor<B, 1>, ModelError> {
        self.columns
            .get(name)
            .ok_or_else(|| ModelError::missing_column(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Number of examples over every column in the batch. All columns must
    /// agree. Model calls use [`FeatureSchema::batch_size`], which only looks
    /// at schema columns.
    ///
    /// [`FeatureSchema::batch_size`]: super::schema::FeatureSchema::batch_size
    pub fn batch_size(&self) -> Result<usize, ModelError> {
        let mut sizes = self.columns.iter().map(|(name, values)| (name, values.dims()[0]));
        let (_, expected) = sizes.next().ok_or(ModelError::EmptyBatch)?;
        for (name, actual) in sizes {
            if actual != expected {
                return Err(ModelError::ColumnLengthMismatch {
                    name: name.clone(),
                    expected,
                    actual,
                });
            }
        }
        Ok(expected)
    }
}

impl<B: AutodiffBackend> FeatureBatch<B> {
    /// The same columns on the inner backend, detached from the graph.
    pub fn inner(&self) -> FeatureBatch<B::InnerBackend> {
        FeatureBatch {
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), values.clone().inner()))
                .collect(),
        }
    }
}

/// Host-side column data used once at construction to fit categorical
/// vocabularies and numerical bin edges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceFrame {
    columns: HashMap<String, Vec<f32>>,
}

impl ReferenceFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f32>) {
        self.columns.insert(name.into(), values);
    }

    pub fn column(&self, name: &str) -> Result<&[f32], ModelError> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::missing_reference_column(name))
    }

    /// Upload every column to `device` as a [`FeatureBatch`].
    pub fn to_batch<B: Backend>(&self, device: &B::Device) -> FeatureBatch<B> {
        let mut batch = FeatureBatch::new();
        for (name, values) in &self.columns {
            batch.insert_values(name.clone(), values, device);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_batch_size_requires_consistent_columns() {
        let device = Default::default();
        let mut batch = FeatureBatch::<TestBackend>::new();
        assert_eq!(batch.batch_size(), Err(ModelError::EmptyBatch));

        batch.insert_values("a", &[1.0, 2.0, 3.0], &device);
        assert_eq!(batch.batch_size(), Ok(3));

        batch.insert_values("b", &[1.0, 2.0], &device);
        match batch.batch_size() {
            Err(ModelError::ColumnLengthMismatch { expected, actual, .. }) => {
                assert_ne!(expected, actual);
            }
            other => panic!("expected a length mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_frame_to_batch() {
        let device = Default::default();
        let frame = ReferenceFrame::new()
            .with_column("city", vec![0.0, 1.0])
            .with_column("age", vec![25.0, 31.0]);

        let batch = frame.to_batch::<TestBackend>(&device);
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.batch_size(), Ok(2));
        assert!(frame.column("missing").is_err());
    }

    #[test]
    fn test_from_columns() {
        let device = Default::default();
        let batch = FeatureBatch::<TestBackend>::from_columns([
            ("city", Tensor::from_floats([0.0, 2.0], &device)),
            ("age", Tensor::from_floats([25.0, 31.0], &device)),
        ]);

        assert!(batch.contains("city"));
        assert_eq!(batch.batch_size(), Ok(2));
        assert_eq!(batch.column("zip").unwrap_err(), ModelError::missing_column("zip"));
    }
}
