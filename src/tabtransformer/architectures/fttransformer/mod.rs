//! FT-Transformer encoder with a masked-reconstruction objective

pub mod attention;
pub mod batch;
pub mod config;
pub mod deterministic;
pub mod embeddings;
pub mod encoder;
pub mod error;
pub mod layer;
pub mod loss_utils;
pub mod metrics;
pub mod mlp;
pub mod model;
pub mod schema;
pub mod train;
