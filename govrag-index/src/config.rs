//! Configuration for the policy index.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between consecutive chunks in bytes.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Default number of clauses retrieved per query.
pub const DEFAULT_TOP_K: usize = 4;

/// Default acceptance threshold for treating a clause as cited policy.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.2;

/// Configuration parameters for the policy index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the manifest and the records of the current generation.
    pub index_dir: PathBuf,
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
    /// Number of overlapping bytes between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of top clauses to return from a query.
    pub top_k: usize,
    /// A retrieved clause counts as cited policy when its similarity is
    /// strictly above this value.
    pub similarity_threshold: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("data/policy_index"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl IndexConfig {
    /// Create a new builder for constructing an [`IndexConfig`].
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::default()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ConfigError`] if:
    /// - `chunk_size == 0`
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `similarity_threshold` is outside `[-1.0, 1.0]`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IndexError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IndexError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(IndexError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(IndexError::ConfigError(format!(
                "similarity_threshold ({}) must be within [-1.0, 1.0]",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`IndexConfig`].
#[derive(Debug, Clone, Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    /// Set the directory the index is persisted to.
    pub fn index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.index_dir = dir.into();
        self
    }

    /// Set the maximum chunk size in bytes.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in bytes.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of top clauses to return from a query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the acceptance threshold for cited clauses.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Build the [`IndexConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`IndexConfig::validate`].
    pub fn build(self) -> Result<IndexConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(IndexConfig::default().validate().is_ok());
        assert_eq!(IndexConfig::default().top_k, 4);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let err = IndexConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, IndexError::ConfigError(msg) if msg.contains("chunk_overlap")));
    }

    #[test]
    fn rejects_zero_top_k_and_out_of_range_threshold() {
        assert!(IndexConfig::builder().top_k(0).build().is_err());
        assert!(IndexConfig::builder().similarity_threshold(1.5).build().is_err());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: IndexConfig = serde_json::from_str(r#"{"top_k": 6}"#).unwrap();
        assert_eq!(config.top_k, 6);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
