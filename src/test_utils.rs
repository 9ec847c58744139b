// Test utilities for building tensors, batches and reference data from host
// values. Used by unit tests, integration tests and the benchmark.

use burn::{
    prelude::*,
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::tabtransformer::architectures::fttransformer::batch::{FeatureBatch, ReferenceFrame};
use crate::tabtransformer::architectures::fttransformer::loss_utils::loss_mask;

/// Create f32 tensor from data slice with specified shape
pub fn tensor_from_f32_vec<B: Backend, const D: usize>(
    data: &[f32],
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(data.len(), expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(), shape, expected_size);

    Tensor::from_data(TensorData::new(data.to_vec(), shape), device)
}

/// Float `[batch, columns]` loss mask: 1.0 where `flags` is true.
/// Panics when `flags` does not fill `shape`.
pub fn mask_from_bools<B: Backend>(flags: &[bool], shape: [usize; 2], device: &B::Device) -> Tensor<B, 2> {
    match loss_mask(flags, shape, device) {
        Ok(mask) => mask,
        Err(err) => panic!("{err}"),
    }
}

/// Batch with one column per `(name, values)` pair.
pub fn batch_from_columns<B: Backend>(columns: &[(&str, &[f32])], device: &B::Device) -> FeatureBatch<B> {
    let mut batch = FeatureBatch::new();
    for (name, values) in columns {
        batch.insert_values(*name, values, device);
    }
    batch
}

/// Reference data with one column per `(name, values)` pair.
pub fn reference_from_columns(columns: &[(&str, &[f32])]) -> ReferenceFrame {
    columns
        .iter()
        .fold(ReferenceFrame::new(), |frame, (name, values)| frame.with_column(*name, values.to_vec()))
}

/// Host copy of any float tensor, row-major.
pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}
