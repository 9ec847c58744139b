//! Attention trait and implementations

use burn::prelude::*;

/// Result of one attention pass.
///
/// `weights` is `[batch, heads, seq, seq]` and present only when the caller
/// asked for it.
#[derive(Debug, Clone)]
pub struct AttentionOutput<B: Backend> {
    pub sequence: Tensor<B, 3>,
    pub weights: Option<Tensor<B, 4>>,
}

impl<B: Backend> AttentionOutput<B> {
    pub fn new(sequence: Tensor<B, 3>, weights: Option<Tensor<B, 4>>) -> Self {
        Self { sequence, weights }
    }
}

/// Base trait for self-attention layers over a `[batch, seq, dim]` sequence
pub trait Attention<B: Backend> {
    /// Performs the attention computation.
    ///
    /// # Arguments
    /// * `x` - [batch, seq, dim] input sequence
    /// * `return_weights` - also return the softmax attention probabilities
    fn forward(&self, x: Tensor<B, 3>, return_weights: bool) -> AttentionOutput<B>;
}

pub mod full_attention;
