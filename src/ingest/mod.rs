pub mod batch;
pub mod chunker;
pub mod processor;
