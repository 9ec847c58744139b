pub mod fttransformer;
