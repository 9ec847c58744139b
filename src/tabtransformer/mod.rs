pub mod architectures;
pub mod settings;
