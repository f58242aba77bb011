//! End-to-end tests for the evaluation workflow.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use govrag_agent::{
    AgentConfig, Decision, DecisionKind, DecisionMemory, GenerationError, Stage, TextGenerator,
    WorkflowEngine, WorkflowError,
};
use govrag_index::{EmbeddingProvider, HashingEmbedder, IndexConfig, IndexError, PolicyIndex};
use tempfile::TempDir;

const POLICY: &str = "Data Storage Policy Section 1.1: user data must not leave approved \
infrastructure.\n\nData Storage Policy Section 1.2: backups are encrypted at rest and in \
transit.\n\nAccess Policy Section 2.1: production access requires an approved ticket.";

const SCENARIO_A_RESPONSE: &str = r#"Based on the clauses provided:
```json
{
  "decision": "Not Allowed",
  "reason": "User data must not leave approved infrastructure.",
  "suggested_changes": ["Run reporting on the approved warehouse."],
  "references": ["Data Storage Policy Section 1.1"]
}
```"#;

/// Replays a fixed response and counts prompts.
struct ScriptedGenerator {
    response: String,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(response: &str) -> Arc<Self> {
        Arc::new(Self { response: response.to_string(), calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        assert!(prompt.contains("ACTION:"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// A model backend that never loads.
struct UnavailableGenerator;

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable {
            backend: "unavailable".into(),
            message: "model files not found".into(),
        })
    }
}

/// Fails every embedding call while reporting `model_id`.
struct UnreachableEmbedder(&'static str);

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
        self.0.into()
    }
}

fn index(dir: &TempDir, embedder: Arc<dyn EmbeddingProvider>) -> Arc<PolicyIndex> {
    let config = IndexConfig::builder()
        .index_dir(dir.path().join("index"))
        .chunk_size(120)
        .chunk_overlap(20)
        .similarity_threshold(0.1)
        .build()
        .unwrap();
    Arc::new(PolicyIndex::new(config, embedder).unwrap())
}

fn hashing() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingEmbedder::new(256).unwrap())
}

#[tokio::test]
async fn scenario_a_violation_is_not_allowed_and_cites_the_clause() {
    let dir = TempDir::new().unwrap();
    let policy_path = dir.path().join("data_policy.txt");
    tokio::fs::write(&policy_path, POLICY).await.unwrap();
    let generator = ScriptedGenerator::new(SCENARIO_A_RESPONSE);

    let engine = WorkflowEngine::builder()
        .index(index(&dir, hashing()))
        .generator(generator.clone())
        .policy_file(&policy_path)
        .build()
        .unwrap();

    let state = engine.run("Store user data on an analytics server", "fast reporting").await;
    assert_eq!(state.stage(), Stage::Done);
    assert!(!state.used_fallback);
    assert!(
        state
            .retrieved_clauses
            .iter()
            .any(|c| c.reference == "Data Storage Policy Section 1.1"),
        "{:?}",
        state.retrieved_clauses
    );

    let decision = state.into_result().unwrap();
    assert_eq!(decision.decision, DecisionKind::NotAllowed);
    assert!(decision.references.contains(&"Data Storage Policy Section 1.1".to_string()));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_b_empty_policy_cites_nothing() {
    let dir = TempDir::new().unwrap();
    let policy_path = dir.path().join("empty_policy.txt");
    tokio::fs::write(&policy_path, "").await.unwrap();
    let generator = ScriptedGenerator::new(
        r#"{"decision": "Needs Review", "reason": "No policy applies.", "references": "Section 9"}"#,
    );

    let engine = WorkflowEngine::builder()
        .index(index(&dir, hashing()))
        .generator(generator)
        .policy_file(&policy_path)
        .build()
        .unwrap();

    let state = engine.run("Publish the quarterly roadmap", "Internal blog").await;
    assert_eq!(state.stage(), Stage::Done);
    assert!(state.retrieved_clauses.is_empty());

    let decision = state.into_result().unwrap();
    assert_eq!(decision.decision, DecisionKind::NeedsReview);
    assert!(decision.references.is_empty());
}

#[tokio::test]
async fn missing_policy_file_is_an_empty_policy() {
    let dir = TempDir::new().unwrap();
    let engine = WorkflowEngine::builder()
        .index(index(&dir, hashing()))
        .policy_file(dir.path().join("does_not_exist.txt"))
        .build()
        .unwrap();

    let state = engine.run("Publish the quarterly roadmap", "Internal blog").await;
    assert_eq!(state.stage(), Stage::Done);
    assert!(state.retrieved_clauses.is_empty());
}

#[tokio::test]
async fn scenario_c_unavailable_model_falls_back_and_completes() {
    let dir = TempDir::new().unwrap();
    let engine = WorkflowEngine::builder()
        .index(index(&dir, hashing()))
        .generator(Arc::new(UnavailableGenerator))
        .policy_text(POLICY)
        .build()
        .unwrap();

    let state = engine.run("Store user data on an analytics server", "fast reporting").await;
    assert_eq!(state.stage(), Stage::Done);
    assert!(state.used_fallback);
    assert_eq!(
        state.history(),
        &[Stage::Retrieve, Stage::Evaluate, Stage::Memory, Stage::Done]
    );

    let decision = state.into_result().unwrap();
    assert_eq!(decision.decision, DecisionKind::NeedsReview);
    assert_eq!(decision.suggested_changes, vec!["Manual review required"]);
}

#[tokio::test]
async fn no_generator_uses_fallback() {
    let dir = TempDir::new().unwrap();
    let engine = WorkflowEngine::builder()
        .index(index(&dir, hashing()))
        .policy_text(POLICY)
        .build()
        .unwrap();

    let decision = engine.evaluate("Rotate database credentials", "Quarterly hygiene").await.unwrap();
    assert_eq!(decision.decision, DecisionKind::NeedsReview);
}

#[tokio::test]
async fn empty_input_fails_before_evaluation() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new(SCENARIO_A_RESPONSE);
    let memory = Arc::new(DecisionMemory::in_memory());
    let engine = WorkflowEngine::builder()
        .index(index(&dir, hashing()))
        .memory(memory.clone())
        .generator(generator.clone())
        .policy_text(POLICY)
        .build()
        .unwrap();

    for (action, context) in [("", "ctx"), ("   ", "ctx"), ("Share data", "")] {
        let state = engine.run(action, context).await;
        assert_eq!(state.stage(), Stage::Failed);
        assert!(!state.history().contains(&Stage::Evaluate));
        let failure = state.error.as_ref().unwrap();
        assert_eq!(failure.stage, Stage::Retrieve);
        assert!(matches!(failure.error, WorkflowError::InvalidInput(_)));
    }
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(memory.is_empty().await);
}

#[tokio::test]
async fn unreachable_embedder_fails_in_retrieve() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(DecisionMemory::in_memory());
    let engine = WorkflowEngine::builder()
        .index(index(&dir, Arc::new(UnreachableEmbedder("unreachable"))))
        .memory(memory.clone())
        .policy_text(POLICY)
        .build()
        .unwrap();

    let state = engine.run("Store user data on an analytics server", "fast reporting").await;
    assert_eq!(state.stage(), Stage::Failed);
    assert_eq!(state.history(), &[Stage::Retrieve, Stage::Failed]);
    assert!(matches!(
        state.into_result(),
        Err(WorkflowError::Index(IndexError::EmbeddingError { .. }))
    ));
    assert!(memory.is_empty().await);
}

#[tokio::test]
async fn query_embedding_failure_with_a_stored_index_continues_without_clauses() {
    let dir = TempDir::new().unwrap();
    let warm = WorkflowEngine::builder()
        .index(index(&dir, hashing()))
        .policy_text(POLICY)
        .build()
        .unwrap();
    assert_eq!(warm.run("Grant prod access", "On-call incident").await.stage(), Stage::Done);

    // Same model id and dimensions as the stored generation, so it loads from disk.
    let generator = ScriptedGenerator::new(
        r#"{"decision": "Allowed", "reason": "No restriction found.", "references": ["Section 9"]}"#,
    );
    let memory = Arc::new(DecisionMemory::in_memory());
    let engine = WorkflowEngine::builder()
        .index(index(&dir, Arc::new(UnreachableEmbedder("hashing-fnv1a-256"))))
        .generator(generator.clone())
        .memory(memory.clone())
        .policy_text(POLICY)
        .build()
        .unwrap();

    let state = engine.run("Store user data on an analytics server", "fast reporting").await;
    assert_eq!(state.stage(), Stage::Done, "{:?}", state.error);
    assert_eq!(
        state.history(),
        &[Stage::Retrieve, Stage::Evaluate, Stage::Memory, Stage::Done]
    );
    assert!(state.retrieved_clauses.is_empty());

    let decision = state.into_result().unwrap();
    assert!(decision.references.is_empty());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(memory.len().await, 1);
}

#[tokio::test]
async fn decisions_are_archived_and_fed_back() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("memory").join("decisions.jsonl");
    let memory = Arc::new(DecisionMemory::open(&log).await.unwrap());
    let engine = WorkflowEngine::builder()
        .index(index(&dir, hashing()))
        .memory(memory.clone())
        .generator(ScriptedGenerator::new(SCENARIO_A_RESPONSE))
        .policy_text(POLICY)
        .config(AgentConfig::builder().memory_window(2).build().unwrap())
        .build()
        .unwrap();

    for i in 0..3 {
        engine.evaluate(&format!("Store user data batch {i}"), "fast reporting").await.unwrap();
    }

    let entries = memory.entries().await;
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].action, "Store user data batch 2");
    assert_eq!(entries[2].decision.decision, DecisionKind::NotAllowed);

    let reopened = DecisionMemory::open(&log).await.unwrap();
    assert_eq!(reopened.len().await, 3);
}

#[tokio::test]
async fn index_is_built_once_across_runs() {
    let dir = TempDir::new().unwrap();
    let index = index(&dir, hashing());
    let engine = WorkflowEngine::builder()
        .index(index.clone())
        .policy_text(POLICY)
        .build()
        .unwrap();

    engine.evaluate("Share data", "Vendor onboarding").await.unwrap();
    let first = index.manifest().await.unwrap();
    engine.evaluate("Share data again", "Vendor onboarding").await.unwrap();
    let second = index.manifest().await.unwrap();
    assert_eq!(first.generation, second.generation);
}

#[test]
fn builder_requires_index_and_policy() {
    assert!(WorkflowEngine::builder().policy_text(POLICY).build().is_err());
}

#[allow(dead_code)]
fn assert_send_sync() {
    fn check<T: Send + Sync>() {}
    check::<WorkflowEngine>();
    check::<DecisionMemory>();
    check::<Decision>();
}
