//! Column embedding layers.
//!
//! Every layer maps a `[batch, columns]` tensor of raw scalars to a
//! `[batch, columns, embedding_dim]` sequence, one independent mapping per
//! column. Categorical columns use a lookup table fitted on reference data;
//! numerical columns use one of the [`NumericalEmbedding`] strategies.

use burn::module::{Ignored, Module, Param};
use burn::prelude::*;
use burn::tensor::{activation, Int, TensorData};
use std::f32::consts::PI;

use super::batch::ReferenceFrame;
use super::config::{BinningStrategy, ModelConfig, NumericalEmbeddingType};
use super::deterministic::{DeterministicEmbedding, DeterministicRngContext};
use super::error::ModelError;

/// Uniform contract of every column embedding strategy.
pub trait ColumnEmbedding<B: Backend> {
    /// `[batch, columns]` raw values to `[batch, columns, embedding_dim]`.
    fn embed(&self, raw: Tensor<B, 2>) -> Tensor<B, 3>;

    fn embedding_dim(&self) -> usize;

    fn num_columns(&self) -> usize;
}

/// Lookup-table embedding for categorical columns.
///
/// Each column gets its own vocabulary of the distinct values seen in the
/// reference data. Slot 0 of every column is the out-of-vocabulary bucket,
/// so mask sentinels and unseen categories share one learned vector per
/// column. All per-column tables live in a single packed matrix.
#[derive(Module, Debug)]
pub struct CategoricalEmbedding<B: Backend> {
    table: DeterministicEmbedding<B>,
    vocabularies: Ignored<Vec<Vec<f32>>>,
    offsets: Ignored<Vec<usize>>,
}

impl<B: Backend> CategoricalEmbedding<B> {
    pub fn new(
        feature_names: &[String],
        reference: &ReferenceFrame,
        embedding_dim: usize,
        rng_ctx: &DeterministicRngContext<B>,
    ) -> Result<Self, ModelError> {
        let mut vocabularies = Vec::with_capacity(feature_names.len());
        let mut offsets = Vec::with_capacity(feature_names.len());
        let mut total = 0;

        for name in feature_names {
            let vocabulary = fit_vocabulary(reference.column(name)?);
            offsets.push(total);
            total += vocabulary.len() + 1;
            vocabularies.push(vocabulary);
        }

        let table = rng_ctx.create_deterministic_embedding(total, embedding_dim, 100);

        Ok(Self {
            table,
            vocabularies: Ignored(vocabularies),
            offsets: Ignored(offsets),
        })
    }

    /// Number of known categories of every column, out-of-vocabulary slot excluded.
    pub fn vocabulary_sizes(&self) -> Vec<usize> {
        self.vocabularies.iter().map(Vec::len).collect()
    }

    /// Packed table row of `value` in column `column`.
    fn lookup(&self, column: usize, value: f32) -> i64 {
        let offset = self.offsets[column];
        let index = self.vocabularies[column]
            .binary_search_by(|known| known.total_cmp(&value))
            .map(|position| position + 1)
            .unwrap_or(0);
        (offset + index) as i64
    }
}

impl<B: Backend> ColumnEmbedding<B> for CategoricalEmbedding<B> {
    fn embed(&self, raw: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, columns] = raw.dims();
        let device = raw.device();
        let data = raw.into_data();

        let ids: Vec<i64> = data
            .iter::<f32>()
            .enumerate()
            .map(|(i, value)| self.lookup(i % columns, value))
            .collect();
        let ids = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [batch, columns]), &device);

        self.table.forward_2d(ids)
    }

    fn embedding_dim(&self) -> usize {
        self.table.embedding_dim()
    }

    fn num_columns(&self) -> usize {
        self.vocabularies.len()
    }
}

/// Sorted distinct finite values of a reference column.
fn fit_vocabulary(values: &[f32]) -> Vec<f32> {
    let mut vocabulary: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    vocabulary.sort_by(f32::total_cmp);
    vocabulary.dedup();
    vocabulary
}

/// Numerical embedding strategy, fixed at construction.
#[derive(Module, Debug)]
pub enum NumericalEmbedding<B: Backend> {
    Linear(LinearNumericalEmbedding<B>),
    PiecewiseLinear(PiecewiseLinearEmbedding<B>),
    Periodic(PeriodicEmbedding<B>),
}

impl<B: Backend> NumericalEmbedding<B> {
    /// Build the strategy selected by `config` for `feature_names`.
    ///
    /// `config` must already be validated.
    pub fn new(
        config: &ModelConfig,
        feature_names: &[String],
        reference: &ReferenceFrame,
        rng_ctx: &DeterministicRngContext<B>,
    ) -> Result<Self, ModelError> {
        let embedding_dim = config.embedding_dim;
        let rng_ctx = rng_ctx.fork(200);

        match config.numerical_embedding_type {
            NumericalEmbeddingType::Linear => Ok(Self::Linear(LinearNumericalEmbedding::new(
                feature_names.len(),
                embedding_dim,
                &rng_ctx,
            ))),
            NumericalEmbeddingType::PiecewiseLinear => {
                let n_bins = config.numerical_bins.ok_or(ModelError::MissingBins)?;
                let bins = PiecewiseBins::fit(feature_names, reference, n_bins, config.binning_strategy)?;
                Ok(Self::PiecewiseLinear(PiecewiseLinearEmbedding::new(
                    bins,
                    embedding_dim,
                    &rng_ctx,
                )))
            }
            NumericalEmbeddingType::Periodic => Ok(Self::Periodic(PeriodicEmbedding::new(
                feature_names.len(),
                embedding_dim,
                config.periodic_sigma as f32,
                &rng_ctx,
            ))),
        }
    }

    pub fn kind(&self) -> NumericalEmbeddingType {
        match self {
            Self::Linear(_) => NumericalEmbeddingType::Linear,
            Self::PiecewiseLinear(_) => NumericalEmbeddingType::PiecewiseLinear,
            Self::Periodic(_) => NumericalEmbeddingType::Periodic,
        }
    }
}

impl<B: Backend> ColumnEmbedding<B> for NumericalEmbedding<B> {
    fn embed(&self, raw: Tensor<B, 2>) -> Tensor<B, 3> {
        match self {
            Self::Linear(embedding) => embedding.embed(raw),
            Self::PiecewiseLinear(embedding) => embedding.embed(raw),
            Self::Periodic(embedding) => embedding.embed(raw),
        }
    }

    fn embedding_dim(&self) -> usize {
        match self {
            Self::Linear(embedding) => embedding.embedding_dim(),
            Self::PiecewiseLinear(embedding) => embedding.embedding_dim(),
            Self::Periodic(embedding) => embedding.embedding_dim(),
        }
    }

    fn num_columns(&self) -> usize {
        match self {
            Self::Linear(embedding) => embedding.num_columns(),
            Self::PiecewiseLinear(embedding) => embedding.num_columns(),
            Self::Periodic(embedding) => embedding.num_columns(),
        }
    }
}

/// `relu(x_f * w_f + b_f)` with one weight and bias vector per column.
#[derive(Module, Debug)]
pub struct LinearNumericalEmbedding<B: Backend> {
    /// [columns, embedding_dim]
    weight: Param<Tensor<B, 2>>,
    /// [columns, embedding_dim]
    bias: Param<Tensor<B, 2>>,
}

impl<B: Backend> LinearNumericalEmbedding<B> {
    pub fn new(columns: usize, embedding_dim: usize, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let mut rng = rng_ctx.rng(0);
        let std = (2.0 / (1 + embedding_dim) as f32).sqrt();
        let weight = rng_ctx.generate_normal_tensor([columns, embedding_dim], &mut rng, 0.0, std);
        let bias = rng_ctx.generate_normal_tensor([columns, embedding_dim], &mut rng, 0.0, 0.01);
        Self {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
        }
    }
}

impl<B: Backend> ColumnEmbedding<B> for LinearNumericalEmbedding<B> {
    fn embed(&self, raw: Tensor<B, 2>) -> Tensor<B, 3> {
        let x = raw.unsqueeze_dim::<3>(2);
        let embedded = x * self.weight.val().unsqueeze_dim::<3>(0) + self.bias.val().unsqueeze_dim::<3>(0);
        activation::relu(embedded)
    }

    fn embedding_dim(&self) -> usize {
        self.weight.val().dims()[1]
    }

    fn num_columns(&self) -> usize {
        self.weight.val().dims()[0]
    }
}

/// Bin edges of every numerical column, padded to a common bin count.
///
/// Columns whose fitted edges collapse (constant or near-constant data) keep
/// fewer valid bins; padded bins always encode to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseBins {
    n_bins: usize,
    /// Per column, `valid + 1` strictly increasing edges
    edges: Vec<Vec<f32>>,
}

impl PiecewiseBins {
    pub fn fit(
        feature_names: &[String],
        reference: &ReferenceFrame,
        n_bins: usize,
        strategy: BinningStrategy,
    ) -> Result<Self, ModelError> {
        if n_bins == 0 {
            return Err(ModelError::ZeroDimension { field: "numerical_bins" });
        }
        let edges = feature_names
            .iter()
            .map(|name| Ok(fit_edges(reference.column(name)?, n_bins, strategy)))
            .collect::<Result<Vec<_>, ModelError>>()?;
        Ok(Self { n_bins, edges })
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn num_columns(&self) -> usize {
        self.edges.len()
    }

    /// Edges of one column.
    pub fn edges(&self, column: usize) -> &[f32] {
        &self.edges[column]
    }

    /// Host encoding tables, each flattened `[columns, n_bins]`:
    /// lower edge, bin width, validity, left clamp, right clamp.
    fn tables(&self) -> [Vec<f32>; 5] {
        let size = self.edges.len() * self.n_bins;
        let mut lower = vec![0.0; size];
        let mut width = vec![1.0; size];
        let mut valid = vec![0.0; size];
        let mut left_clamp = vec![0.0; size];
        let mut right_clamp = vec![0.0; size];

        for (column, edges) in self.edges.iter().enumerate() {
            let n_valid = edges.len() - 1;
            for bin in 0..n_valid {
                let i = column * self.n_bins + bin;
                lower[i] = edges[bin];
                width[i] = edges[bin + 1] - edges[bin];
                valid[i] = 1.0;
                // The first bin extrapolates below its left edge and the last
                // bin extrapolates above its right edge.
                left_clamp[i] = if bin > 0 { 1.0 } else { 0.0 };
                right_clamp[i] = if bin + 1 < n_valid { 1.0 } else { 0.0 };
            }
        }

        [lower, width, valid, left_clamp, right_clamp]
    }
}

fn fit_edges(values: &[f32], n_bins: usize, strategy: BinningStrategy) -> Vec<f32> {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f32::total_cmp);

    let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
        return vec![0.0, 1.0];
    };

    let candidates: Vec<f32> = match strategy {
        BinningStrategy::Quantile => (0..=n_bins)
            .map(|i| quantile(&sorted, i as f32 / n_bins as f32))
            .collect(),
        BinningStrategy::EqualWidth => (0..=n_bins)
            .map(|i| min + (max - min) * i as f32 / n_bins as f32)
            .collect(),
    };

    let mut edges: Vec<f32> = Vec::with_capacity(candidates.len());
    for edge in candidates {
        if edges.last().map_or(true, |&last| edge > last) {
            edges.push(edge);
        }
    }
    if edges.len() < 2 {
        edges = vec![min, min + 1.0];
    }
    edges
}

/// Linear-interpolation quantile of sorted, non-empty data.
fn quantile(sorted: &[f32], q: f32) -> f32 {
    let position = q * (sorted.len() - 1) as f32;
    let below = position.floor() as usize;
    let above = position.ceil() as usize;
    let fraction = position - below as f32;
    sorted[below] + (sorted[above] - sorted[below]) * fraction
}

/// `[b, f, t] x [f, t, e] + [f, e] -> relu [b, f, e]`: one dense layer per column.
fn per_column_projection<B: Backend>(
    encoded: Tensor<B, 3>,
    weight: Tensor<B, 3>,
    bias: Tensor<B, 2>,
) -> Tensor<B, 3> {
    let projected = encoded.swap_dims(0, 1).matmul(weight).swap_dims(0, 1);
    activation::relu(projected + bias.unsqueeze_dim::<3>(0))
}

/// Piecewise linear encoding followed by a per-column dense projection.
#[derive(Module, Debug)]
pub struct PiecewiseLinearEmbedding<B: Backend> {
    bins: Ignored<PiecewiseBins>,
    /// [columns, n_bins, embedding_dim]
    weight: Param<Tensor<B, 3>>,
    /// [columns, embedding_dim]
    bias: Param<Tensor<B, 2>>,
}

impl<B: Backend> PiecewiseLinearEmbedding<B> {
    pub fn new(bins: PiecewiseBins, embedding_dim: usize, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let columns = bins.num_columns();
        let n_bins = bins.n_bins();
        let mut rng = rng_ctx.rng(1);
        let std = (2.0 / (n_bins + embedding_dim) as f32).sqrt();
        let weight = rng_ctx.generate_normal_tensor([columns, n_bins, embedding_dim], &mut rng, 0.0, std);
        let bias = rng_ctx.generate_normal_tensor([columns, embedding_dim], &mut rng, 0.0, 0.01);
        Self {
            bins: Ignored(bins),
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
        }
    }

    pub fn bins(&self) -> &PiecewiseBins {
        &self.bins
    }

    /// `[batch, columns]` to `[batch, columns, n_bins]` piecewise linear codes.
    pub fn encode(&self, raw: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, columns] = raw.dims();
        let n_bins = self.bins.n_bins();
        let device = raw.device();

        let table = |values: Vec<f32>| {
            Tensor::<B, 2>::from_data(TensorData::new(values, [columns, n_bins]), &device)
                .unsqueeze_dim::<3>(0)
                .repeat_dim(0, batch)
        };
        let [lower, width, valid, left_clamp, right_clamp] = self.bins.tables().map(table);
        let upper = lower.clone() + width.clone();

        let x = raw.unsqueeze_dim::<3>(2).repeat_dim(2, n_bins);
        let ramp = (x.clone() - lower.clone()) / width;
        let below = x.clone().lower(lower).float() * left_clamp;
        let above = x.greater_equal(upper).float() * right_clamp;

        let keep = below.neg().add_scalar(1.0) * above.clone().neg().add_scalar(1.0);
        (ramp * keep + above) * valid
    }
}

impl<B: Backend> ColumnEmbedding<B> for PiecewiseLinearEmbedding<B> {
    fn embed(&self, raw: Tensor<B, 2>) -> Tensor<B, 3> {
        let encoded = self.encode(raw);
        per_column_projection(encoded, self.weight.val(), self.bias.val())
    }

    fn embedding_dim(&self) -> usize {
        self.weight.val().dims()[2]
    }

    fn num_columns(&self) -> usize {
        self.bins.num_columns()
    }
}

/// `[sin(2 pi c x), cos(2 pi c x)]` over learned frequencies `c`, followed by
/// a per-column dense projection.
#[derive(Module, Debug)]
pub struct PeriodicEmbedding<B: Backend> {
    /// [columns, frequencies]
    coefficients: Param<Tensor<B, 2>>,
    /// [columns, 2 * frequencies, embedding_dim]
    weight: Param<Tensor<B, 3>>,
    /// [columns, embedding_dim]
    bias: Param<Tensor<B, 2>>,
}

impl<B: Backend> PeriodicEmbedding<B> {
    pub fn new(columns: usize, embedding_dim: usize, sigma: f32, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let frequencies = embedding_dim;
        let mut rng = rng_ctx.rng(2);
        let coefficients = rng_ctx.generate_normal_tensor([columns, frequencies], &mut rng, 0.0, sigma);
        let std = (2.0 / (2 * frequencies + embedding_dim) as f32).sqrt();
        let weight =
            rng_ctx.generate_normal_tensor([columns, 2 * frequencies, embedding_dim], &mut rng, 0.0, std);
        let bias = rng_ctx.generate_normal_tensor([columns, embedding_dim], &mut rng, 0.0, 0.01);
        Self {
            coefficients: Param::from_tensor(coefficients),
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
        }
    }
}

impl<B: Backend> ColumnEmbedding<B> for PeriodicEmbedding<B> {
    fn embed(&self, raw: Tensor<B, 2>) -> Tensor<B, 3> {
        let phase = raw.unsqueeze_dim::<3>(2) * self.coefficients.val().unsqueeze_dim::<3>(0) * (2.0 * PI);
        let encoded = Tensor::cat(vec![phase.clone().sin(), phase.cos()], 2);
        per_column_projection(encoded, self.weight.val(), self.bias.val())
    }

    fn embedding_dim(&self) -> usize {
        self.weight.val().dims()[2]
    }

    fn num_columns(&self) -> usize {
        self.coefficients.val().dims()[0]
    }
}
