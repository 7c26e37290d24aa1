//! The RAG request path: retrieval, context assembly, answer composition.

pub mod answer;
pub mod context;
pub mod retrieval;
