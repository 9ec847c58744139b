//! Standard quadratic multi-head self-attention.

use burn::module::{Module, Param};
use burn::nn::Dropout;
use burn::prelude::*;
use burn::tensor::activation;

use super::{Attention, AttentionOutput};
use crate::tabtransformer::architectures::fttransformer::deterministic::DeterministicRngContext;

/// Multi-head attention with a packed query/key/value projection.
#[derive(Module, Debug)]
pub struct MultiHeadAttention<B: Backend> {
    embedding_dim: usize,
    heads: usize,
    head_dim: usize,

    w_qkv: Param<Tensor<B, 4>>, // [3, heads, head_dim, embedding_dim]
    w_out: Param<Tensor<B, 3>>, // [heads, head_dim, embedding_dim]

    dropout: Dropout,
}

impl<B: Backend> MultiHeadAttention<B> {
    /// `heads` must divide `embedding_dim`; callers validate this through
    /// `ModelConfig::validate`.
    pub fn new(
        embedding_dim: usize,
        heads: usize,
        dropout: f64,
        rng_ctx: &DeterministicRngContext<B>,
        init_seed_offset: u64,
    ) -> Self {
        let head_dim = embedding_dim / heads;
        let mut rng = rng_ctx.rng(init_seed_offset);

        let qkv_std = (2.0 / (heads * head_dim + embedding_dim) as f32).sqrt();
        let w_qkv =
            rng_ctx.generate_normal_tensor([3, heads, head_dim, embedding_dim], &mut rng, 0.0, qkv_std);
        let out_std = (2.0 / (head_dim + embedding_dim) as f32).sqrt();
        let w_out = rng_ctx.generate_normal_tensor([heads, head_dim, embedding_dim], &mut rng, 0.0, out_std);

        Self {
            embedding_dim,
            heads,
            head_dim,
            w_qkv: Param::from_tensor(w_qkv),
            w_out: Param::from_tensor(w_out),
            dropout: rng_ctx.create_dropout(dropout),
        }
    }

    pub fn heads(&self) -> usize {
        self.heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn w_qkv(&self) -> Tensor<B, 4> {
        self.w_qkv.val()
    }

    pub fn w_out(&self) -> Tensor<B, 3> {
        self.w_out.val()
    }

    fn einsum_qkv(&self, x: Tensor<B, 3>) -> Tensor<B, 5> {
        // "b s e, j h d e -> b s j h d"
        let [batch, seq, _] = x.dims();
        let x_flat = x.reshape([batch * seq, self.embedding_dim]);
        let w_flat = self.w_qkv.val().reshape([3 * self.heads * self.head_dim, self.embedding_dim]);
        x_flat
            .matmul(w_flat.transpose())
            .reshape([batch, seq, 3, self.heads, self.head_dim])
    }

    /// One of q, k, v as `[batch, heads, seq, head_dim]`.
    fn select_projection(&self, qkv: Tensor<B, 5>, index: usize) -> Tensor<B, 4> {
        let [batch, seq, _, heads, head_dim] = qkv.dims();
        qkv.slice([0..batch, 0..seq, index..index + 1, 0..heads, 0..head_dim])
            .squeeze::<4>(2)
            .swap_dims(1, 2)
    }
}

impl<B: Backend> Attention<B> for MultiHeadAttention<B> {
    fn forward(&self, x: Tensor<B, 3>, return_weights: bool) -> AttentionOutput<B> {
        let [batch, seq, _] = x.dims();

        let qkv = self.einsum_qkv(x);
        let q = self.select_projection(qkv.clone(), 0);
        let k = self.select_projection(qkv.clone(), 1);
        let v = self.select_projection(qkv, 2);

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let logits = q.matmul(k.swap_dims(2, 3)) * scale; // [batch, heads, seq, seq]
        let weights = activation::softmax(logits, 3);

        let context = self.dropout.forward(weights.clone()).matmul(v); // [batch, heads, seq, head_dim]
        let context = context
            .swap_dims(1, 2)
            .reshape([batch * seq, self.heads * self.head_dim]);

        let w_out = self.w_out.val().reshape([self.heads * self.head_dim, self.embedding_dim]);
        let sequence = context.matmul(w_out).reshape([batch, seq, self.embedding_dim]);

        AttentionOutput::new(sequence, return_weights.then_some(weights))
    }
}
