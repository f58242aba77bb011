//! Lifecycle tests for the persistent policy index.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use govrag_index::{
    EmbeddingProvider, Freshness, HashingEmbedder, IndexConfig, IndexError, PolicyIndex,
    StaleReason, fingerprint,
};
use tempfile::TempDir;

const POLICY: &str = "Data Storage Policy Section 1.1: user data must not leave approved \
infrastructure.\n\nData Storage Policy Section 1.2: backups are encrypted at rest and in \
transit.\n\nAccess Policy Section 2.1: production access requires an approved ticket.\n\n\
Vendor Policy Section 3.1: third-party processors must sign a data processing agreement.";

/// Wraps the hashing embedder and counts batch calls, i.e. index builds.
struct CountingEmbedder {
    inner: HashingEmbedder,
    batches: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self { inner: HashingEmbedder::new(256).unwrap(), batches: AtomicUsize::new(0) }
    }

    fn builds(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, text: &str) -> govrag_index::Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> govrag_index::Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut out = Vec::new();
        for text in texts {
            out.push(self.inner.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> String {
        self.inner.model_id()
    }
}

/// An embedding backend that cannot be reached.
struct UnreachableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnreachableEmbedder {
    async fn embed(&self, _text: &str) -> govrag_index::Result<Vec<f32>> {
        Err(IndexError::EmbeddingError {
            provider: "unreachable".into(),
            message: "connection refused".into(),
        })
    }

    fn dimensions(&self) -> usize {
        256
    }

    fn model_id(&self) -> String {
        "unreachable".into()
    }
}

fn config(dir: &TempDir) -> IndexConfig {
    IndexConfig::builder()
        .index_dir(dir.path().join("index"))
        .chunk_size(120)
        .chunk_overlap(20)
        .build()
        .unwrap()
}

#[tokio::test]
async fn ensure_fresh_rebuilds_at_most_once() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(CountingEmbedder::new());
    let index = PolicyIndex::new(config(&dir), embedder.clone()).unwrap();

    assert_eq!(index.ensure_fresh(POLICY).await.unwrap(), Freshness::Rebuilt);
    assert_eq!(index.ensure_fresh(POLICY).await.unwrap(), Freshness::Current);
    assert_eq!(embedder.builds(), 1);

    let manifest = index.manifest().await.unwrap();
    assert_eq!(manifest.source_document_fingerprint, fingerprint(POLICY));
    assert_eq!(manifest.embedding_dim, 256);
    assert!(manifest.chunk_count >= 4);
}

#[tokio::test]
async fn persisted_index_survives_restart() {
    let dir = TempDir::new().unwrap();
    let query = "Action: copy user data to a partner\nContext: joint marketing";

    let first = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    first.ensure_fresh(POLICY).await.unwrap();
    let before = first.query(query, 3).await.unwrap();
    let manifest = first.manifest().await.unwrap();

    let embedder = Arc::new(CountingEmbedder::new());
    let second = PolicyIndex::new(config(&dir), embedder.clone()).unwrap();
    assert!(!second.is_stale(&fingerprint(POLICY)).await);
    assert_eq!(second.ensure_fresh(POLICY).await.unwrap(), Freshness::Loaded);
    assert_eq!(embedder.builds(), 0);
    assert_eq!(second.manifest().await.unwrap(), manifest);

    let after = second.query(query, 3).await.unwrap();
    let ids = |clauses: &[govrag_index::RetrievedClause]| {
        clauses.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&before), ids(&after));
    for (a, b) in before.iter().zip(&after) {
        assert!((a.score - b.score).abs() < 1e-6);
    }
}

#[tokio::test]
async fn edited_document_is_detected_and_rebuilt() {
    let dir = TempDir::new().unwrap();
    let index = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    index.ensure_fresh(POLICY).await.unwrap();

    let edited = format!("{POLICY}\n\nRetention Policy Section 4.1: logs are kept for ninety days.");
    let new_fingerprint = fingerprint(&edited);
    assert!(index.is_stale(&new_fingerprint).await);
    assert_eq!(index.staleness(&new_fingerprint).await, Some(StaleReason::FingerprintChanged));

    assert_eq!(index.ensure_fresh(&edited).await.unwrap(), Freshness::Rebuilt);
    let manifest = index.manifest().await.unwrap();
    assert_eq!(manifest.source_document_fingerprint, new_fingerprint);
    assert!(!index.is_stale(&new_fingerprint).await);
    assert!(index.is_stale(&fingerprint(POLICY)).await);
}

#[tokio::test]
async fn rebuild_leaves_a_single_generation_on_disk() {
    let dir = TempDir::new().unwrap();
    let index = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    index.ensure_fresh(POLICY).await.unwrap();
    index.rebuild(POLICY).await.unwrap();
    let manifest = index.manifest().await.unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path().join("index"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let records: Vec<&String> = names.iter().filter(|n| n.starts_with("records-")).collect();
    assert_eq!(records, vec![&manifest.records_file_name()]);
    assert!(names.contains(&"manifest.json".to_string()));
    assert!(!names.iter().any(|n| n.ends_with(".tmp")));
}

#[tokio::test]
async fn corrupted_records_are_detected_and_replaced() {
    let dir = TempDir::new().unwrap();
    let first = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    first.ensure_fresh(POLICY).await.unwrap();
    let manifest = first.manifest().await.unwrap();

    let records_path = dir.path().join("index").join(manifest.records_file_name());
    let mut bytes = std::fs::read(&records_path).unwrap();
    bytes.truncate(bytes.len() / 2);
    std::fs::write(&records_path, bytes).unwrap();

    let second = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    assert!(matches!(
        second.staleness(&fingerprint(POLICY)).await,
        Some(StaleReason::Corrupt(_))
    ));
    assert_eq!(second.ensure_fresh(POLICY).await.unwrap(), Freshness::Rebuilt);
    assert!(!second.is_stale(&fingerprint(POLICY)).await);
}

#[tokio::test]
async fn changed_chunking_parameters_make_the_index_stale() {
    let dir = TempDir::new().unwrap();
    let index = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    index.ensure_fresh(POLICY).await.unwrap();

    let wider = IndexConfig { chunk_size: 300, ..config(&dir) };
    let reopened = PolicyIndex::new(wider, Arc::new(CountingEmbedder::new())).unwrap();
    assert!(matches!(
        reopened.staleness(&fingerprint(POLICY)).await,
        Some(StaleReason::SettingsChanged(_))
    ));
}

#[tokio::test]
async fn missing_index_is_stale_and_query_before_load_is_an_error() {
    let dir = TempDir::new().unwrap();
    let index = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    assert_eq!(index.staleness(&fingerprint(POLICY)).await, Some(StaleReason::MissingManifest));
    assert!(matches!(index.query("anything", 3).await, Err(IndexError::NotReady)));
}

#[tokio::test]
async fn query_ranks_the_matching_clause_first() {
    let dir = TempDir::new().unwrap();
    let index = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    index.ensure_fresh(POLICY).await.unwrap();

    let query = "Action: Store user data on an analytics server\nContext: fast reporting";
    let clauses = index.query(query, 4).await.unwrap();
    assert_eq!(clauses[0].reference, "Data Storage Policy Section 1.1");
    assert!(clauses.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn k_bounds_the_result_size() {
    let dir = TempDir::new().unwrap();
    let index = PolicyIndex::new(config(&dir), Arc::new(CountingEmbedder::new())).unwrap();
    index.ensure_fresh(POLICY).await.unwrap();
    let total = index.manifest().await.unwrap().chunk_count;

    assert!(index.query("user data", 0).await.unwrap().is_empty());
    assert_eq!(index.query("user data", 2).await.unwrap().len(), 2);
    assert_eq!(index.query("user data", total + 10).await.unwrap().len(), total);
}

#[tokio::test]
async fn ties_are_broken_by_source_offset() {
    let dir = TempDir::new().unwrap();
    let narrow = IndexConfig { chunk_size: 30, chunk_overlap: 0, ..config(&dir) };
    let index = PolicyIndex::new(narrow, Arc::new(CountingEmbedder::new())).unwrap();
    let document = "Zeta rule one applies.\n\nZeta rule one applies.\n\nZeta rule one applies.";
    index.ensure_fresh(document).await.unwrap();

    let clauses = index.query("zeta rule", 3).await.unwrap();
    let offsets: Vec<usize> = clauses.iter().map(|c| c.source_offset).collect();
    assert_eq!(offsets, vec![0, 24, 48]);
}

#[tokio::test]
async fn empty_document_builds_an_empty_index() {
    let dir = TempDir::new().unwrap();
    let index = PolicyIndex::new(config(&dir), Arc::new(UnreachableEmbedder)).unwrap();

    // No chunks means nothing to embed, so even an unreachable backend is fine.
    assert_eq!(index.ensure_fresh("").await.unwrap(), Freshness::Rebuilt);
    assert_eq!(index.manifest().await.unwrap().chunk_count, 0);
    assert!(index.query("Action: anything", 4).await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_embedder_fails_the_build() {
    let dir = TempDir::new().unwrap();
    let index = PolicyIndex::new(config(&dir), Arc::new(UnreachableEmbedder)).unwrap();
    let err = index.ensure_fresh(POLICY).await.unwrap_err();
    assert!(matches!(err, IndexError::EmbeddingError { .. }));
    assert!(index.manifest().await.is_none());
    assert!(index.is_stale(&fingerprint(POLICY)).await);
}
