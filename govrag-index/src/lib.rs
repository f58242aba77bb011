//! # govrag-index
//!
//! Policy retrieval for govrag: chunking, embedding, and a persistent vector
//! index that knows when it is stale.
//!
//! ## Overview
//!
//! - [`ChunkStore`] splits a policy document into overlapping chunks that
//!   remember their byte offset and policy section label
//! - [`EmbeddingProvider`] abstracts the embedding model; [`HashingEmbedder`]
//!   is a deterministic local implementation
//! - [`PolicyIndex`] embeds chunks, persists them with an [`IndexManifest`],
//!   detects staleness by content fingerprint, rebuilds atomically, and
//!   answers top-k cosine similarity queries
//!
//! ## Features
//!
//! - `openai`: [`openai::OpenAiEmbedder`] for OpenAI-compatible embedding servers

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod manifest;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{ChunkStore, split};
pub use config::{IndexConfig, IndexConfigBuilder};
pub use document::{PolicyChunk, RetrievedClause, VectorIndexRecord};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use error::{IndexError, Result};
pub use index::{Freshness, PolicyIndex, StaleReason};
pub use manifest::{IndexManifest, fingerprint};
