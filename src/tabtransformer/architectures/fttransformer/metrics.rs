//! Running metrics tracked across training steps.

use burn::prelude::*;
use burn::tensor::ElementConversion;

/// Stateful metric over `(target, predictions)` pairs of `[batch, columns]`
/// tensors in schema order.
pub trait ReconstructionMetric<B: Backend>: Send {
    fn name(&self) -> &str;

    fn update_state(&mut self, target: Tensor<B, 2>, predictions: Tensor<B, 2>);

    /// Current value; 0 before the first update.
    fn result(&self) -> f32;

    fn reset(&mut self);
}

/// Running sum and element count.
#[derive(Debug, Clone, Default, PartialEq)]
struct RunningMean {
    total: f64,
    count: usize,
}

impl RunningMean {
    fn add(&mut self, total: f64, count: usize) {
        self.total += total;
        self.count += count;
    }

    fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.total / self.count as f64) as f32
        }
    }
}

fn sum_of<B: Backend>(values: Tensor<B, 2>) -> (f64, usize) {
    let count = values.dims().iter().product();
    (values.sum().into_scalar().elem::<f64>(), count)
}

/// Mean squared error over every element seen since the last reset.
#[derive(Debug, Clone, Default)]
pub struct MeanSquaredError {
    state: RunningMean,
}

impl MeanSquaredError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> ReconstructionMetric<B> for MeanSquaredError {
    fn name(&self) -> &str {
        "mse"
    }

    fn update_state(&mut self, target: Tensor<B, 2>, predictions: Tensor<B, 2>) {
        let (total, count) = sum_of((predictions - target).powf_scalar(2.0));
        self.state.add(total, count);
    }

    fn result(&self) -> f32 {
        self.state.mean()
    }

    fn reset(&mut self) {
        self.state = RunningMean::default();
    }
}

/// Mean absolute error over every element seen since the last reset.
#[derive(Debug, Clone, Default)]
pub struct MeanAbsoluteError {
    state: RunningMean,
}

impl MeanAbsoluteError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> ReconstructionMetric<B> for MeanAbsoluteError {
    fn name(&self) -> &str {
        "mae"
    }

    fn update_state(&mut self, target: Tensor<B, 2>, predictions: Tensor<B, 2>) {
        let (total, count) = sum_of((predictions - target).abs());
        self.state.add(total, count);
    }

    fn result(&self) -> f32 {
        self.state.mean()
    }

    fn reset(&mut self) {
        self.state = RunningMean::default();
    }
}

/// Running mean of scalar values, used for the step loss.
#[derive(Debug, Clone)]
pub struct MeanMetric {
    name: String,
    state: RunningMean,
}

impl MeanMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RunningMean::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_state(&mut self, value: f32) {
        self.state.add(value as f64, 1);
    }

    pub fn result(&self) -> f32 {
        self.state.mean()
    }

    pub fn reset(&mut self) {
        self.state = RunningMean::default();
    }
}
