//! Declaration graph extraction, indexing and semantic retrieval for TypeScript/JavaScript.

pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod git;
pub mod graph;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod retrieval;
pub mod store;
pub mod walker;
