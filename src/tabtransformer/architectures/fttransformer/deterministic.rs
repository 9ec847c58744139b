//! Deterministically initialized parameter primitives.
//!
//! SEED OFFSET POLICY (relative to `ModelConfig::seed`):
//! - +100 series: categorical embedding table
//! - +200 series: numerical embedding parameters
//! - +300 series: importance token
//! - +1000 * (block + 1) series: transformer block `block`
//! - +9000: reconstruction head
//!
//! Two models built from the same config and seed hold bitwise identical
//! parameters. Never seed from entropy here.

use burn::module::{Module, Param};
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig};
use burn::prelude::*;
use burn::tensor::{Int, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Linear layer with pre-initialized weights.
///
/// Same interface as `burn::nn::Linear`, but the weights are supplied by a
/// [`DeterministicRngContext`] instead of the backend RNG.
#[derive(Module, Debug)]
pub struct DeterministicLinear<B: Backend> {
    /// Weight matrix of shape [output_dim, input_dim]
    pub weight: Param<Tensor<B, 2>>,
    /// Optional bias vector of shape [output_dim]
    pub bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> DeterministicLinear<B> {
    pub fn new(weight: Tensor<B, 2>, bias: Option<Tensor<B, 1>>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
            bias: bias.map(Param::from_tensor),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.val().dims()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.weight.val().dims()[0]
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = input.matmul(self.weight.val().transpose());
        match &self.bias {
            Some(bias) => output + bias.val().unsqueeze_dim::<2>(0),
            None => output,
        }
    }

    /// Applies the layer to the last dimension of a 3D tensor.
    pub fn forward_3d(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, seq, input_dim] = input.dims();
        let output = self.forward(input.reshape([batch * seq, input_dim]));
        output.reshape([batch, seq, self.output_dim()])
    }
}

/// Embedding table with pre-initialized weights.
#[derive(Module, Debug)]
pub struct DeterministicEmbedding<B: Backend> {
    /// Embedding weight matrix of shape [vocab_size, embedding_dim]
    weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> DeterministicEmbedding<B> {
    pub fn new(weight: Tensor<B, 2>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.val().dims()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.val().dims()[1]
    }

    /// `[batch, columns]` indices to `[batch, columns, embedding_dim]` vectors.
    pub fn forward_2d(&self, indices: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch, columns] = indices.dims();
        let embedding_dim = self.embedding_dim();

        if batch == 0 || columns == 0 {
            return Tensor::zeros([batch, columns, embedding_dim], &self.weight.val().device());
        }

        self.weight
            .val()
            .select(0, indices.flatten::<1>(0, 1))
            .reshape([batch, columns, embedding_dim])
    }
}

/// Deterministic RNG context that owns the device and the base seed.
///
/// Every parameter is drawn from a `StdRng` seeded with `seed + offset`, so
/// adding a component never shifts the initialization of the others.
#[derive(Debug, Clone)]
pub struct DeterministicRngContext<B: Backend> {
    pub seed: u64,
    device: B::Device,
}

impl<B: Backend> DeterministicRngContext<B> {
    pub fn new(seed: u64, device: B::Device) -> Self {
        Self { seed, device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Fork the context: the new base seed is `seed + offset`.
    pub fn fork(&self, offset: u64) -> Self {
        Self::new(self.seed.wrapping_add(offset), self.device.clone())
    }

    /// `StdRng` seeded with `seed + offset`.
    pub fn rng(&self, offset: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(offset))
    }

    /// Linear layer with Xavier/Glorot normal weights and a small normal bias.
    pub fn create_deterministic_linear(
        &self,
        input_dim: usize,
        output_dim: usize,
        bias: bool,
        offset: u64,
    ) -> DeterministicLinear<B> {
        let mut rng = self.rng(offset);
        let std = (2.0 / (input_dim + output_dim) as f32).sqrt();
        let weight = self.generate_normal_tensor([output_dim, input_dim], &mut rng, 0.0, std);
        let bias = bias.then(|| self.generate_normal_tensor([output_dim], &mut rng, 0.0, 0.01));
        DeterministicLinear::new(weight, bias)
    }

    pub fn create_deterministic_embedding(
        &self,
        vocab_size: usize,
        embedding_dim: usize,
        offset: u64,
    ) -> DeterministicEmbedding<B> {
        let mut rng = self.rng(offset);
        let std = (1.0 / embedding_dim as f32).sqrt();
        let weight = self.generate_normal_tensor([vocab_size, embedding_dim], &mut rng, 0.0, std);
        DeterministicEmbedding::new(weight)
    }

    /// Normal `N(mean, std)` f32 tensor on the context's device.
    pub fn generate_normal_tensor<const D: usize>(
        &self,
        shape: [usize; D],
        rng: &mut StdRng,
        mean: f32,
        std: f32,
    ) -> Tensor<B, D> {
        let total: usize = shape.iter().product();
        let data: Vec<f32> = (0..total)
            .map(|_| {
                let z: f32 = rng.sample(StandardNormal);
                mean + std * z
            })
            .collect();
        Tensor::from_data(TensorData::new(data, shape), &self.device)
    }

    /// LayerNorm needs no randomness: weight 1, bias 0.
    pub fn create_layer_norm(&self, d_model: usize, eps: f64) -> LayerNorm<B> {
        LayerNormConfig::new(d_model).with_epsilon(eps).init(&self.device)
    }

    pub fn create_dropout(&self, prob: f64) -> Dropout {
        DropoutConfig::new(prob).init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn to_vec<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_same_seed_same_weights() {
        let ctx = DeterministicRngContext::<TestBackend>::new(7, Default::default());
        let a = ctx.create_deterministic_linear(4, 3, true, 100);
        let b = ctx.create_deterministic_linear(4, 3, true, 100);
        assert_eq!(to_vec(a.weight.val()), to_vec(b.weight.val()));

        let c = ctx.create_deterministic_linear(4, 3, true, 101);
        assert_ne!(to_vec(a.weight.val()), to_vec(c.weight.val()));
    }

    #[test]
    fn test_fork_matches_offset() {
        let ctx = DeterministicRngContext::<TestBackend>::new(7, Default::default());
        let forked = ctx.fork(5);
        let a = forked.create_deterministic_embedding(3, 2, 0);
        let b = ctx.create_deterministic_embedding(3, 2, 5);
        assert_eq!(to_vec(a.weight.val()), to_vec(b.weight.val()));
    }

    #[test]
    fn test_linear_shapes() {
        let ctx = DeterministicRngContext::<TestBackend>::new(1, Default::default());
        let linear = ctx.create_deterministic_linear(4, 3, true, 0);
        let x = Tensor::<TestBackend, 3>::ones([2, 5, 4], ctx.device());
        assert_eq!(linear.forward_3d(x).dims(), [2, 5, 3]);
        assert_eq!((linear.input_dim(), linear.output_dim()), (4, 3));
    }

    #[test]
    fn test_embedding_lookup() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 1.0, 1.0, 2.0, 2.0], [3, 2]),
            &device,
        );
        let embedding = DeterministicEmbedding::new(weight);
        let ids = Tensor::<TestBackend, 2, Int>::from_data(TensorData::new(vec![2i64, 0], [1, 2]), &device);
        let out = embedding.forward_2d(ids);
        assert_eq!(out.dims(), [1, 2, 2]);
        assert_eq!(to_vec(out), vec![2.0, 2.0, 0.0, 0.0]);
    }
}
