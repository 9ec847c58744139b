//! Reconstruction losses.
//!
//! Non-finite values are propagated, never sanitized.

use burn::tensor::{backend::Backend, Tensor, TensorData};

use super::config::LossMode;
use super::error::ModelError;

/// Float `[batch, columns]` loss mask from row-major flags: 1.0 where a
/// position was masked upstream.
pub fn loss_mask<B: Backend>(
    flags: &[bool],
    shape: [usize; 2],
    device: &B::Device,
) -> Result<Tensor<B, 2>, ModelError> {
    if flags.len() != shape[0] * shape[1] {
        return Err(ModelError::MaskLengthMismatch {
            flags: flags.len(),
            shape,
        });
    }
    let values: Vec<f32> = flags.iter().map(|&flag| if flag { 1.0 } else { 0.0 }).collect();
    Ok(Tensor::from_data(TensorData::new(values, shape), device))
}

/// Mean squared error over every element of `[batch, columns]` tensors.
pub fn full_row_mse<B: Backend>(predictions: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    (predictions - target).powf_scalar(2.0).mean()
}

/// Mean squared error over the positions where `mask` is 1.
///
/// An all-zero mask yields a zero loss.
pub fn masked_positions_mse<B: Backend>(
    predictions: Tensor<B, 2>,
    target: Tensor<B, 2>,
    mask: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let squared = (predictions - target).powf_scalar(2.0) * mask.clone();
    squared.sum() / mask.sum().clamp_min(1.0)
}

/// Loss of `predictions` against `target` under `mode`, after checking
/// shapes.
///
/// `mask` is ignored in [`LossMode::FullRow`] and required in
/// [`LossMode::MaskedOnly`].
pub fn reconstruction_loss<B: Backend>(
    mode: LossMode,
    predictions: Tensor<B, 2>,
    target: Tensor<B, 2>,
    mask: Option<Tensor<B, 2>>,
) -> Result<Tensor<B, 1>, ModelError> {
    let expected = predictions.dims();
    let target_dims = target.dims();
    if expected != target_dims {
        return Err(ModelError::ReconstructionMismatch {
            reconstruction: expected,
            target: target_dims,
        });
    }

    match mode {
        LossMode::FullRow => Ok(full_row_mse(predictions, target)),
        LossMode::MaskedOnly => {
            let mask = mask.ok_or(ModelError::MissingMask)?;
            let mask_dims = mask.dims();
            if mask_dims != expected {
                return Err(ModelError::MaskShapeMismatch { mask: mask_dims, expected });
            }
            Ok(masked_positions_mse(predictions, target, mask))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tensor(values: Vec<f32>, shape: [usize; 2]) -> Tensor<TestBackend, 2> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn scalar(loss: Tensor<TestBackend, 1>) -> f32 {
        loss.into_scalar()
    }

    #[test]
    fn test_identical_inputs_have_zero_loss() {
        let x = tensor(vec![1.0, 2.0, 3.0, 4.0], [2, 2]);
        assert_eq!(scalar(full_row_mse(x.clone(), x)), 0.0);
    }

    #[test]
    fn test_loss_mask_from_flags() {
        let device = Default::default();
        let mask = loss_mask::<TestBackend>(&[true, false, false, true], [2, 2], &device).unwrap();
        let values: Vec<f32> = mask.into_data().iter::<f32>().collect();
        assert_eq!(values, vec![1.0, 0.0, 0.0, 1.0]);

        let err = loss_mask::<TestBackend>(&[true, false, true], [2, 2], &device).unwrap_err();
        assert_eq!(err, ModelError::MaskLengthMismatch { flags: 3, shape: [2, 2] });
        assert!(err.is_shape());
    }

    #[test]
    fn test_full_row_mse() {
        let predictions = tensor(vec![1.0, 2.0, 3.0, 4.0], [2, 2]);
        let target = tensor(vec![1.0, 0.0, 3.0, 0.0], [2, 2]);
        // (0 + 4 + 0 + 16) / 4
        assert_eq!(scalar(full_row_mse(predictions, target)), 5.0);
    }

    #[test]
    fn test_masked_positions_mse() {
        let predictions = tensor(vec![1.0, 2.0, 3.0, 4.0], [2, 2]);
        let target = tensor(vec![1.0, 0.0, 3.0, 0.0], [2, 2]);
        let mask = tensor(vec![0.0, 1.0, 1.0, 0.0], [2, 2]);
        // (4 + 0) / 2
        assert_eq!(scalar(masked_positions_mse(predictions.clone(), target.clone(), mask)), 2.0);

        let empty = tensor(vec![0.0; 4], [2, 2]);
        assert_eq!(scalar(masked_positions_mse(predictions, target, empty)), 0.0);
    }

    #[test]
    fn test_reconstruction_loss_checks_shapes() {
        let predictions = tensor(vec![0.0; 4], [2, 2]);
        let err = reconstruction_loss(LossMode::FullRow, predictions.clone(), tensor(vec![0.0; 6], [2, 3]), None)
            .unwrap_err();
        assert_eq!(err, ModelError::ReconstructionMismatch { reconstruction: [2, 2], target: [2, 3] });

        let err = reconstruction_loss(LossMode::MaskedOnly, predictions.clone(), predictions.clone(), None)
            .unwrap_err();
        assert_eq!(err, ModelError::MissingMask);

        let err = reconstruction_loss(
            LossMode::MaskedOnly,
            predictions.clone(),
            predictions.clone(),
            Some(tensor(vec![1.0; 2], [1, 2])),
        )
        .unwrap_err();
        assert_eq!(err, ModelError::MaskShapeMismatch { mask: [1, 2], expected: [2, 2] });
    }

    #[test]
    fn test_non_finite_loss_is_propagated() {
        let predictions = tensor(vec![f32::NAN, 0.0], [1, 2]);
        let target = tensor(vec![0.0, 0.0], [1, 2]);
        let loss = reconstruction_loss(LossMode::FullRow, predictions, target, None).unwrap();
        assert!(scalar(loss).is_nan());
    }
}
