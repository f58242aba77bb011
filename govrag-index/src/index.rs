//! Persistent, staleness-aware policy vector index.
//!
//! The [`PolicyIndex`] owns the embedded chunks of one policy document and
//! keeps them on disk under `index_dir`:
//!
//! - `manifest.json`: the [`IndexManifest`] of the current generation
//! - `records-{generation}.json`: the [`VectorIndexRecord`]s of that generation
//!
//! A rebuild writes the new records under a fresh generation name, then
//! swaps the manifest in with a rename, then removes older record files. A
//! reader therefore sees either the previous generation or the new one in
//! full, never a manifest pointing at incomplete records.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use govrag_index::{HashingEmbedder, IndexConfig, PolicyIndex};
//!
//! let index = PolicyIndex::new(IndexConfig::default(), Arc::new(HashingEmbedder::default()))?;
//! index.ensure_fresh(&policy_text).await?;
//! let clauses = index.query("Action: store user data on an analytics server", 4).await?;
//! ```

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunking::ChunkStore;
use crate::config::IndexConfig;
use crate::document::{PolicyChunk, RetrievedClause, VectorIndexRecord};
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexError, Result};
use crate::manifest::{IndexManifest, fingerprint, sha256_hex};

const MANIFEST_FILE: &str = "manifest.json";

/// What [`PolicyIndex::ensure_fresh`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The loaded generation already matched the document.
    Current,
    /// A matching generation was loaded from disk.
    Loaded,
    /// The index was stale and has been rebuilt.
    Rebuilt,
}

/// Why a persisted generation cannot be used for the current document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// No manifest has been written yet.
    MissingManifest,
    /// The document changed since the generation was built.
    FingerprintChanged,
    /// The embedding model or chunking parameters changed.
    SettingsChanged(String),
    /// The manifest or records file is unreadable or inconsistent.
    Corrupt(String),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingManifest => write!(f, "no manifest"),
            Self::FingerprintChanged => write!(f, "policy document changed"),
            Self::SettingsChanged(what) => write!(f, "{what} changed"),
            Self::Corrupt(detail) => write!(f, "corrupt index: {detail}"),
        }
    }
}

#[derive(Debug)]
struct Generation {
    manifest: IndexManifest,
    records: Vec<VectorIndexRecord>,
}

/// A persistent vector index over the chunks of one policy document.
///
/// Rebuilds are serialized by an internal mutex; the loaded generation is
/// swapped under a write lock, so concurrent queries see a whole generation.
pub struct PolicyIndex {
    config: IndexConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    chunk_store: ChunkStore,
    current: RwLock<Option<Arc<Generation>>>,
    rebuild_lock: Mutex<()>,
}

impl PolicyIndex {
    /// Create an index persisted under `config.index_dir`.
    ///
    /// Nothing is read from disk until [`ensure_fresh`](Self::ensure_fresh).
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ConfigError`] if the configuration is invalid.
    pub fn new(config: IndexConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let chunk_store = ChunkStore::new(config.chunk_size, config.chunk_overlap);
        Ok(Self {
            config,
            embedder,
            chunk_store,
            current: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        })
    }

    /// Return a reference to the index configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The manifest of the loaded generation, if any.
    pub async fn manifest(&self) -> Option<IndexManifest> {
        self.current.read().await.as_ref().map(|generation| generation.manifest.clone())
    }

    /// Embed `chunks` and persist them as a new generation built from the
    /// document with fingerprint `source_fingerprint`.
    ///
    /// Replaces any prior generation and makes the new one the loaded one.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EmbeddingError`] if embedding fails and
    /// [`IndexError::StorageError`] if the generation cannot be written.
    pub async fn build(
        &self,
        chunks: Vec<PolicyChunk>,
        source_fingerprint: &str,
    ) -> Result<IndexManifest> {
        let _guard = self.rebuild_lock.lock().await;
        self.build_locked(chunks, source_fingerprint).await
    }

    /// Whether the persisted index cannot serve the document with fingerprint
    /// `current_fingerprint`.
    pub async fn is_stale(&self, current_fingerprint: &str) -> bool {
        self.staleness(current_fingerprint).await.is_some()
    }

    /// The reason the persisted index is stale, or `None` if it is usable.
    pub async fn staleness(&self, current_fingerprint: &str) -> Option<StaleReason> {
        self.load_persisted(current_fingerprint).await.err()
    }

    /// Make sure the loaded generation matches `document_text`, rebuilding
    /// it if the persisted index is stale.
    ///
    /// Calling this twice without a document change rebuilds at most once.
    ///
    /// # Errors
    ///
    /// Returns an error only if a needed rebuild fails.
    pub async fn ensure_fresh(&self, document_text: &str) -> Result<Freshness> {
        let fingerprint = fingerprint(document_text);
        let _guard = self.rebuild_lock.lock().await;

        if let Some(generation) = self.current.read().await.as_ref() {
            if generation.manifest.source_document_fingerprint == fingerprint {
                debug!(generation = %generation.manifest.generation, "policy index is current");
                return Ok(Freshness::Current);
            }
        }

        match self.load_persisted(&fingerprint).await {
            Ok(generation) => {
                info!(
                    generation = %generation.manifest.generation,
                    chunk_count = generation.manifest.chunk_count,
                    "loaded persisted policy index"
                );
                *self.current.write().await = Some(Arc::new(generation));
                Ok(Freshness::Loaded)
            }
            Err(reason) => {
                warn!(%reason, index_dir = %self.config.index_dir.display(), "policy index is stale, rebuilding");
                let chunks = self.chunk_store.split(document_text);
                self.build_locked(chunks, &fingerprint).await?;
                Ok(Freshness::Rebuilt)
            }
        }
    }

    /// Rebuild the index from `document_text` regardless of staleness.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub async fn rebuild(&self, document_text: &str) -> Result<IndexManifest> {
        let fingerprint = fingerprint(document_text);
        let _guard = self.rebuild_lock.lock().await;
        let chunks = self.chunk_store.split(document_text);
        self.build_locked(chunks, &fingerprint).await
    }

    /// Return the `k` clauses most similar to `query_text`.
    ///
    /// Results are ordered by descending cosine similarity; ties go to the
    /// chunk with the lower source offset. `k == 0` yields an empty result and
    /// a `k` larger than the index returns every chunk.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotReady`] if no generation has been loaded and
    /// [`IndexError::EmbeddingError`] if the query cannot be embedded.
    pub async fn query(&self, query_text: &str, k: usize) -> Result<Vec<RetrievedClause>> {
        let generation = self.current.read().await.clone().ok_or(IndexError::NotReady)?;
        if k == 0 || generation.records.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query_text).await.map_err(|e| {
            error!(error = %e, "embedding failed during query");
            e
        })?;
        if query_embedding.len() != generation.manifest.embedding_dim {
            return Err(IndexError::EmbeddingError {
                provider: self.embedder.model_id(),
                message: format!(
                    "query embedding has {} dimensions, index has {}",
                    query_embedding.len(),
                    generation.manifest.embedding_dim
                ),
            });
        }

        let records = &generation.records;
        let mut scored: Vec<(usize, f32)> = records
            .iter()
            .enumerate()
            .map(|(ordinal, record)| (ordinal, cosine_similarity(&record.embedding, &query_embedding)))
            .collect();

        scored.sort_by(|(a, a_score), (b, b_score)| {
            b_score
                .total_cmp(a_score)
                .then_with(|| records[*a].chunk.source_offset.cmp(&records[*b].chunk.source_offset))
                .then_with(|| a.cmp(b))
        });
        scored.truncate(k);

        let clauses: Vec<RetrievedClause> = scored
            .into_iter()
            .map(|(ordinal, score)| RetrievedClause::from((&records[ordinal].chunk, score)))
            .collect();

        debug!(k, result_count = clauses.len(), top_score = ?clauses.first().map(|c| c.score), "query completed");
        Ok(clauses)
    }

    async fn build_locked(
        &self,
        chunks: Vec<PolicyChunk>,
        source_fingerprint: &str,
    ) -> Result<IndexManifest> {
        let dimensions = self.embedder.dimensions();
        let model = self.embedder.model_id();

        let embeddings = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            self.embedder.embed_batch(&texts).await.map_err(|e| {
                error!(error = %e, chunk_count = chunks.len(), "embedding failed during index build");
                e
            })?
        };

        if embeddings.len() != chunks.len() {
            return Err(IndexError::EmbeddingError {
                provider: model,
                message: format!("expected {} embeddings, got {}", chunks.len(), embeddings.len()),
            });
        }

        let records = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                if embedding.len() == dimensions {
                    Ok(VectorIndexRecord { chunk, embedding })
                } else {
                    Err(IndexError::EmbeddingError {
                        provider: model.clone(),
                        message: format!(
                            "chunk '{}' embedded to {} dimensions, expected {dimensions}",
                            chunk.id,
                            embedding.len()
                        ),
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let records_bytes = serde_json::to_vec(&records)?;
        let manifest = IndexManifest {
            source_document_fingerprint: source_fingerprint.to_string(),
            chunk_count: records.len(),
            embedding_dim: dimensions,
            embedding_model: model,
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
            generation: Uuid::new_v4().simple().to_string(),
            records_digest: sha256_hex(&records_bytes),
            built_at: Utc::now(),
        };

        self.persist(&manifest, &records_bytes).await?;
        info!(
            generation = %manifest.generation,
            chunk_count = manifest.chunk_count,
            index_dir = %self.config.index_dir.display(),
            "policy index built"
        );

        *self.current.write().await =
            Some(Arc::new(Generation { manifest: manifest.clone(), records }));
        Ok(manifest)
    }

    async fn persist(&self, manifest: &IndexManifest, records_bytes: &[u8]) -> Result<()> {
        let dir = &self.config.index_dir;
        fs::create_dir_all(dir).await.map_err(|e| IndexError::storage(dir, e))?;

        write_atomic(&dir.join(manifest.records_file_name()), records_bytes).await?;
        let manifest_bytes = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&dir.join(MANIFEST_FILE), &manifest_bytes).await?;

        self.remove_old_generations(&manifest.records_file_name()).await;
        Ok(())
    }

    /// Best effort: unreferenced record files are harmless.
    async fn remove_old_generations(&self, keep: &str) {
        let dir = &self.config.index_dir;
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "could not list index directory for cleanup");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_records = name.starts_with("records-") && name.ends_with(".json");
            if (is_records && name != keep) || name.ends_with(".tmp") {
                if let Err(e) = fs::remove_file(entry.path()).await {
                    warn!(file = %name, error = %e, "could not remove old index file");
                }
            }
        }
    }

    async fn load_persisted(
        &self,
        fingerprint: &str,
    ) -> std::result::Result<Generation, StaleReason> {
        let dir = &self.config.index_dir;
        let manifest_bytes = match fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StaleReason::MissingManifest),
            Err(e) => return Err(StaleReason::Corrupt(format!("cannot read manifest: {e}"))),
        };
        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| StaleReason::Corrupt(format!("invalid manifest: {e}")))?;

        if manifest.source_document_fingerprint != fingerprint {
            return Err(StaleReason::FingerprintChanged);
        }
        self.check_settings(&manifest)?;

        let records_name = manifest.records_file_name();
        let records_bytes = fs::read(dir.join(&records_name))
            .await
            .map_err(|e| StaleReason::Corrupt(format!("cannot read {records_name}: {e}")))?;
        if sha256_hex(&records_bytes) != manifest.records_digest {
            return Err(StaleReason::Corrupt(format!("{records_name} does not match its digest")));
        }

        let records: Vec<VectorIndexRecord> = serde_json::from_slice(&records_bytes)
            .map_err(|e| StaleReason::Corrupt(format!("invalid records: {e}")))?;
        if records.len() != manifest.chunk_count {
            return Err(StaleReason::Corrupt(format!(
                "manifest lists {} chunks, records hold {}",
                manifest.chunk_count,
                records.len()
            )));
        }
        if records.iter().any(|record| record.embedding.len() != manifest.embedding_dim) {
            return Err(StaleReason::Corrupt("embedding dimension mismatch".to_string()));
        }

        Ok(Generation { manifest, records })
    }

    fn check_settings(&self, manifest: &IndexManifest) -> std::result::Result<(), StaleReason> {
        if manifest.embedding_model != self.embedder.model_id()
            || manifest.embedding_dim != self.embedder.dimensions()
        {
            return Err(StaleReason::SettingsChanged("embedding model".to_string()));
        }
        if manifest.chunk_size != self.config.chunk_size
            || manifest.chunk_overlap != self.config.chunk_overlap
        {
            return Err(StaleReason::SettingsChanged("chunking parameters".to_string()));
        }
        Ok(())
    }
}

/// Write `bytes` to a temporary sibling, sync it, then rename it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await.map_err(|e| IndexError::storage(&tmp, e))?;
    file.write_all(bytes).await.map_err(|e| IndexError::storage(&tmp, e))?;
    file.sync_all().await.map_err(|e| IndexError::storage(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).await.map_err(|e| IndexError::storage(path, e))
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
