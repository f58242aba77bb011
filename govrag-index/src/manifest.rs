//! Index manifest and document fingerprinting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata describing one persisted index generation.
///
/// The manifest is written last during a rebuild, so a manifest on disk always
/// refers to a complete records file. `records_digest` lets a reader confirm
/// that the records file is the one the manifest was written for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// Fingerprint of the policy document the generation was built from.
    pub source_document_fingerprint: String,
    /// Number of records in the generation.
    pub chunk_count: usize,
    /// Length of every embedding vector.
    pub embedding_dim: usize,
    /// Identity of the embedding model used for the records.
    pub embedding_model: String,
    /// Chunk size the document was split with.
    pub chunk_size: usize,
    /// Chunk overlap the document was split with.
    pub chunk_overlap: usize,
    /// Name of the generation; the records live in `records-{generation}.json`.
    pub generation: String,
    /// SHA-256 of the records file.
    pub records_digest: String,
    /// When the generation was built.
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    /// File name of the records belonging to this generation.
    pub fn records_file_name(&self) -> String {
        records_file_name(&self.generation)
    }
}

pub(crate) fn records_file_name(generation: &str) -> String {
    format!("records-{generation}.json")
}

/// Content fingerprint of a policy document (`sha256:<hex>`).
pub fn fingerprint(document_text: &str) -> String {
    format!("sha256:{}", sha256_hex(document_text.as_bytes()))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
