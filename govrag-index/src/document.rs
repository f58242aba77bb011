//! Data types for policy chunks, index records, and retrieved clauses.

use serde::{Deserialize, Serialize};

/// A contiguous span of policy text, the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyChunk {
    /// Identifier, unique within one index generation.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Byte offset of the chunk start within the source document.
    pub source_offset: usize,
    /// Policy section label the chunk belongs to, e.g. `Data Storage Policy Section 1.1`.
    pub reference: String,
}

/// A [`PolicyChunk`] with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndexRecord {
    /// The embedded chunk.
    pub chunk: PolicyChunk,
    /// The vector embedding of the chunk text.
    pub embedding: Vec<f32>,
}

/// A chunk returned by a query, paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedClause {
    /// The id of the matching chunk.
    pub chunk_id: String,
    /// Policy section label of the chunk.
    pub reference: String,
    /// The chunk text.
    pub text: String,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
    /// Byte offset of the chunk within the source document.
    pub source_offset: usize,
}

impl RetrievedClause {
    /// Whether the clause scored strictly above the acceptance threshold.
    pub fn is_accepted(&self, threshold: f32) -> bool {
        self.score > threshold
    }
}

impl From<(&PolicyChunk, f32)> for RetrievedClause {
    fn from((chunk, score): (&PolicyChunk, f32)) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            reference: chunk.reference.clone(),
            text: chunk.text.clone(),
            score,
            source_offset: chunk.source_offset,
        }
    }
}
