//! Feed-forward sublayer of the transformer blocks.

use burn::module::{Ignored, Module};
use burn::nn::Dropout;
use burn::prelude::*;
use burn::tensor::activation;

use super::deterministic::{DeterministicLinear, DeterministicRngContext};

/// Activation function between the two linear layers, selected by
/// `ModelConfig::ff_activation`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    GELU,
    RELU,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::GELU => activation::gelu(x),
            Activation::RELU => activation::relu(x),
        }
    }
}

/// Two linear layers with an activation and dropout in between.
///
/// `linear1: size -> hidden_size`, `linear2: hidden_size -> size`, both with
/// bias.
#[derive(Module, Debug)]
pub struct MLP<B: Backend> {
    pub linear1: DeterministicLinear<B>,
    pub linear2: DeterministicLinear<B>,
    dropout: Dropout,
    activation: Ignored<Activation>,
}

impl<B: Backend> MLP<B> {
    /// # Arguments
    /// * `size` - The input and output size of the MLP
    /// * `hidden_size` - The size of the hidden layer
    /// * `activation` - The activation function to use
    /// * `dropout` - Dropout applied to the hidden activations
    /// * `rng_ctx` - The deterministic RNG context for parameter initialization
    /// * `init_seed_offset` - Seed offset for deterministic initialization
    pub fn new(
        size: usize,
        hidden_size: usize,
        activation: Activation,
        dropout: f64,
        rng_ctx: &DeterministicRngContext<B>,
        init_seed_offset: u64,
    ) -> Self {
        let linear1 = rng_ctx.create_deterministic_linear(size, hidden_size, true, init_seed_offset);
        let linear2 = rng_ctx.create_deterministic_linear(hidden_size, size, true, init_seed_offset + 1);

        Self {
            linear1,
            linear2,
            dropout: rng_ctx.create_dropout(dropout),
            activation: Ignored(activation),
        }
    }

    pub fn activation(&self) -> Activation {
        *self.activation
    }

    pub fn hidden_size(&self) -> usize {
        self.linear1.output_dim()
    }

    /// `[batch, seq, size] -> [batch, seq, size]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = self.activation.apply(self.linear1.forward_3d(x));
        self.linear2.forward_3d(self.dropout.forward(hidden))
    }
}
