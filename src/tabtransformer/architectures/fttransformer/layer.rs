//! Pre-norm transformer block.

use burn::module::Module;
use burn::nn::LayerNorm;
use burn::prelude::*;

use super::attention::full_attention::MultiHeadAttention;
use super::attention::{Attention, AttentionOutput};
use super::config::ModelConfig;
use super::deterministic::DeterministicRngContext;
use super::mlp::MLP;

/// Transformer encoder block with pre-normalization:
///
/// ```text
/// x = x + attention(norm(x))
/// x = x + feed_forward(norm(x))
/// ```
///
/// In explainable mode the block also returns the attention probabilities of
/// its attention sublayer. The sequence is identical in both modes.
#[derive(Module, Debug)]
pub struct TransformerBlock<B: Backend> {
    attention_norm: LayerNorm<B>,
    attention: MultiHeadAttention<B>,
    feed_forward_norm: LayerNorm<B>,
    feed_forward: MLP<B>,
    explainable: bool,
}

impl<B: Backend> TransformerBlock<B> {
    /// Block `index` of the stack, seeded at offset `1000 * (index + 1)`.
    pub fn new(config: &ModelConfig, index: usize, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let dim = config.embedding_dim;
        let base_offset = 1000 * (index as u64 + 1);

        Self {
            attention_norm: rng_ctx.create_layer_norm(dim, config.layer_norm_eps),
            attention: MultiHeadAttention::new(dim, config.heads, config.attn_dropout, rng_ctx, base_offset),
            feed_forward_norm: rng_ctx.create_layer_norm(dim, config.layer_norm_eps),
            feed_forward: MLP::new(
                dim,
                dim * config.ff_hidden_factor,
                config.ff_activation,
                config.ff_dropout,
                rng_ctx,
                base_offset + 100,
            ),
            explainable: config.explainable,
        }
    }

    pub fn is_explainable(&self) -> bool {
        self.explainable
    }

    pub fn heads(&self) -> usize {
        self.attention.heads()
    }

    /// `[batch, seq, dim]` to `[batch, seq, dim]`; `weights` is
    /// `[batch, heads, seq, seq]` when the block is explainable.
    pub fn transform(&self, x: Tensor<B, 3>) -> AttentionOutput<B> {
        let attended = self
            .attention
            .forward(self.attention_norm.forward(x.clone()), self.explainable);
        let x = x + attended.sequence;

        let x = x.clone() + self.feed_forward.forward(self.feed_forward_norm.forward(x));

        AttentionOutput::new(x, attended.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn config(explainable: bool) -> ModelConfig {
        ModelConfig::new(["city"], ["age"])
            .with_embedding_dim(4)
            .with_heads(2)
            .with_dropout(0.0, 0.0)
            .with_explainable(explainable)
    }

    fn input() -> Tensor<TestBackend, 3> {
        let values: Vec<f32> = (0..2 * 3 * 4).map(|i| i as f32 / 10.0).collect();
        Tensor::from_data(burn::tensor::TensorData::new(values, [2, 3, 4]), &Default::default())
    }

    #[test]
    fn test_block_shapes() {
        let ctx = DeterministicRngContext::new(1, Default::default());
        let block = TransformerBlock::<TestBackend>::new(&config(true), 0, &ctx);

        let out = block.transform(input());
        assert_eq!(out.sequence.dims(), [2, 3, 4]);
        assert_eq!(out.weights.map(|w| w.dims()), Some([2, 2, 3, 3]));
    }

    #[test]
    fn test_explainable_flag_only_adds_weights() {
        let ctx = DeterministicRngContext::new(1, Default::default());
        let plain = TransformerBlock::<TestBackend>::new(&config(false), 0, &ctx);
        let explained = TransformerBlock::<TestBackend>::new(&config(true), 0, &ctx);

        let a = plain.transform(input());
        let b = explained.transform(input());
        assert!(a.weights.is_none());
        assert!(b.weights.is_some());

        let a: Vec<f32> = a.sequence.into_data().iter::<f32>().collect();
        let b: Vec<f32> = b.sequence.into_data().iter::<f32>().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_feed_forward_activation_follows_config() {
        use crate::tabtransformer::architectures::fttransformer::mlp::Activation;

        let ctx = DeterministicRngContext::new(1, Default::default());
        let gelu = TransformerBlock::<TestBackend>::new(&config(false), 0, &ctx);
        let relu =
            TransformerBlock::<TestBackend>::new(&config(false).with_ff_activation(Activation::RELU), 0, &ctx);
        assert_eq!(gelu.feed_forward.activation(), Activation::GELU);
        assert_eq!(relu.feed_forward.activation(), Activation::RELU);

        let a: Vec<f32> = gelu.transform(input()).sequence.into_data().iter::<f32>().collect();
        let b: Vec<f32> = relu.transform(input()).sequence.into_data().iter::<f32>().collect();
        assert_ne!(a, b);
    }
}
