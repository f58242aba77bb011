//! The evaluation workflow: an explicit state machine over one decision.
//!
//! A run moves a [`WorkflowState`] through `Retrieve → Evaluate → Memory →
//! Done`. Each stage takes the state by value and hands it back, either
//! advanced to the next stage or moved to `Failed` with the stage and error
//! that stopped it. There are no retries; recoverable faults are handled
//! inside the stage that meets them.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use govrag_agent::WorkflowEngine;
//!
//! let engine = WorkflowEngine::builder()
//!     .index(index)
//!     .memory(Arc::new(memory))
//!     .policy_file("data/data_policy.txt")
//!     .build()?;
//!
//! let decision = engine.evaluate("Store user data on an analytics server", "fast reporting").await?;
//! println!("{}: {}", decision.decision, decision.reason);
//! ```

use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use govrag_index::{Freshness, IndexError, PolicyIndex, RetrievedClause};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::decision::Decision;
use crate::error::{ConfigError, Result, WorkflowError};
use crate::generation::{FallbackGenerator, TextGenerator};
use crate::memory::DecisionMemory;
use crate::parser::DecisionParser;
use crate::prompt::PromptBuilder;

/// A workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Refresh the index and retrieve clauses.
    Retrieve,
    /// Prompt the model and parse its decision.
    Evaluate,
    /// Archive the decision.
    Memory,
    /// The run completed.
    Done,
    /// The run stopped on an error.
    Failed,
}

impl Stage {
    /// Whether no further stage runs after this one.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Retrieve => "RETRIEVE",
            Self::Evaluate => "EVALUATE",
            Self::Memory => "MEMORY",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// The stage a run failed in and the error that stopped it.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: WorkflowError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// The state threaded through one run.
#[derive(Debug)]
pub struct WorkflowState {
    pub action: String,
    pub context: String,
    pub retrieved_clauses: Vec<RetrievedClause>,
    pub decision: Option<Decision>,
    pub error: Option<StageFailure>,
    /// Whether the placeholder generator produced the model text.
    pub used_fallback: bool,
    stage: Stage,
    history: Vec<Stage>,
}

impl WorkflowState {
    /// A fresh state at [`Stage::Retrieve`].
    pub fn new(action: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            context: context.into(),
            retrieved_clauses: Vec::new(),
            decision: None,
            error: None,
            used_fallback: false,
            stage: Stage::Retrieve,
            history: vec![Stage::Retrieve],
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage entered so far, in order.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Move to `next`.
    pub fn advance(mut self, next: Stage) -> Self {
        debug!(from = %self.stage, to = %next, "workflow stage transition");
        self.stage = next;
        self.history.push(next);
        self
    }

    /// Stop the run in the current stage with `error`.
    pub fn fail(mut self, error: WorkflowError) -> Self {
        warn!(stage = %self.stage, error = %error, "workflow failed");
        self.error = Some(StageFailure { stage: self.stage, error });
        self.stage = Stage::Failed;
        self.history.push(Stage::Failed);
        self
    }

    /// The decision of a completed run, or the error of a failed one.
    pub fn into_result(self) -> Result<Decision> {
        match (self.error, self.decision) {
            (Some(failure), _) => Err(failure.error),
            (None, Some(decision)) if self.stage == Stage::Done => Ok(decision),
            _ => Err(WorkflowError::MissingDecision),
        }
    }
}

/// Where the policy document comes from on each run.
#[derive(Debug, Clone)]
pub enum PolicySource {
    /// Read from this path on every run; a missing file is an empty policy.
    File(PathBuf),
    /// A fixed document held in memory.
    Inline(String),
}

impl PolicySource {
    async fn load(&self) -> Result<String> {
        match self {
            Self::Inline(text) => Ok(text.clone()),
            Self::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => Ok(text),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(path = %path.display(), "policy document not found, treating it as empty");
                    Ok(String::new())
                }
                Err(source) => Err(WorkflowError::PolicyDocument { path: path.clone(), source }),
            },
        }
    }
}

/// Runs the evaluation workflow against a policy index and decision memory.
///
/// The engine is `Send + Sync`; share it through `Arc` to serve concurrent
/// callers. Each run is sequential.
pub struct WorkflowEngine {
    index: Arc<PolicyIndex>,
    memory: Arc<DecisionMemory>,
    generator: Option<Arc<dyn TextGenerator>>,
    policy: PolicySource,
    config: AgentConfig,
    prompt: PromptBuilder,
    parser: DecisionParser,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    pub fn index(&self) -> &Arc<PolicyIndex> {
        &self.index
    }

    pub fn memory(&self) -> &Arc<DecisionMemory> {
        &self.memory
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Evaluate one action and return its decision.
    ///
    /// # Errors
    ///
    /// Returns the error of the stage that failed: invalid input, a policy
    /// document that cannot be read, an index or embedding failure, or a
    /// memory log write failure. Model unavailability and malformed model
    /// output are not errors.
    pub async fn evaluate(&self, action: &str, context: &str) -> Result<Decision> {
        self.run(action, context).await.into_result()
    }

    /// Run the workflow to a terminal stage and return the final state.
    pub async fn run(&self, action: &str, context: &str) -> WorkflowState {
        let mut state = WorkflowState::new(action.trim(), context.trim());

        if let Err(error) = validate_input(&state.action, &state.context) {
            return state.fail(error);
        }

        info!(action = %state.action, "evaluating action");
        while !state.is_terminal() {
            state = self.step(state).await;
        }
        match &state.error {
            None => info!(
                decision = %state.decision.as_ref().map(|d| d.decision.label()).unwrap_or("none"),
                used_fallback = state.used_fallback,
                "evaluation complete"
            ),
            Some(failure) => warn!(%failure, "evaluation failed"),
        }
        state
    }

    async fn step(&self, state: WorkflowState) -> WorkflowState {
        match state.stage {
            Stage::Retrieve => self.retrieve(state).await,
            Stage::Evaluate => self.judge(state).await,
            Stage::Memory => self.archive(state).await,
            Stage::Done | Stage::Failed => state,
        }
    }

    async fn retrieve(&self, mut state: WorkflowState) -> WorkflowState {
        match self.retrieve_clauses(&state.action, &state.context).await {
            Ok(clauses) => {
                state.retrieved_clauses = clauses;
                state.advance(Stage::Evaluate)
            }
            Err(error) => state.fail(error),
        }
    }

    async fn retrieve_clauses(&self, action: &str, context: &str) -> Result<Vec<RetrievedClause>> {
        let document = self.policy.load().await?;
        let freshness = self.index.ensure_fresh(&document).await?;
        let query = format!("Action: {action}\nContext: {context}");
        let clauses = match self.index.query(&query, self.index.config().top_k).await {
            Ok(clauses) => clauses,
            // A usable index was already on hand; evaluate without retrieved policy.
            Err(e @ IndexError::EmbeddingError { .. })
                if matches!(freshness, Freshness::Current | Freshness::Loaded) =>
            {
                warn!(error = %e, "query embedding failed, continuing without policy clauses");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(
            ?freshness,
            clauses = clauses.len(),
            top_score = clauses.first().map(|c| c.score),
            "retrieved policy clauses"
        );
        Ok(clauses)
    }

    async fn judge(&self, mut state: WorkflowState) -> WorkflowState {
        let history = self.memory.recent(self.config.memory_window).await;
        let prompt =
            self.prompt.build(&state.action, &state.context, &state.retrieved_clauses, &history);

        let raw = match &self.generator {
            Some(generator) => match generator.generate(&prompt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(backend = generator.name(), error = %e, "generation failed, using fallback generator");
                    state.used_fallback = true;
                    FallbackGenerator::placeholder()
                }
            },
            None => {
                state.used_fallback = true;
                FallbackGenerator::placeholder()
            }
        };

        let outcome = self.parser.parse_with_outcome(&raw);
        debug!(strategy = outcome.strategy, "model output parsed");

        let mut decision = outcome.decision;
        reconcile_references(
            &mut decision,
            &state.retrieved_clauses,
            self.index.config().similarity_threshold,
        );
        state.decision = Some(decision);
        state.advance(Stage::Memory)
    }

    async fn archive(&self, state: WorkflowState) -> WorkflowState {
        let Some(decision) = state.decision.as_ref() else {
            return state.fail(WorkflowError::MissingDecision);
        };
        match self.memory.record(&state.action, &state.context, decision).await {
            Ok(_) => state.advance(Stage::Done),
            Err(e) => state.fail(e.into()),
        }
    }
}

fn validate_input(action: &str, context: &str) -> Result<()> {
    if action.is_empty() {
        return Err(WorkflowError::InvalidInput("action must not be empty".to_string()));
    }
    if context.is_empty() {
        return Err(WorkflowError::InvalidInput("context must not be empty".to_string()));
    }
    Ok(())
}

/// Keep citations consistent with what retrieval actually supports.
///
/// With no clause scoring above `threshold` the decision cites nothing. With
/// accepted clauses but no citations from the model, the accepted clause
/// references are cited in ranking order.
fn reconcile_references(decision: &mut Decision, clauses: &[RetrievedClause], threshold: f32) {
    let mut accepted: Vec<String> = Vec::new();
    for clause in clauses.iter().filter(|c| c.is_accepted(threshold)) {
        if !accepted.contains(&clause.reference) {
            accepted.push(clause.reference.clone());
        }
    }

    if accepted.is_empty() {
        if !decision.references.is_empty() {
            debug!(dropped = decision.references.len(), "no accepted clauses, clearing references");
        }
        decision.references.clear();
    } else if decision.references.is_empty() {
        decision.references = accepted;
    }
}

/// Builder for [`WorkflowEngine`].
#[derive(Default)]
pub struct WorkflowEngineBuilder {
    index: Option<Arc<PolicyIndex>>,
    memory: Option<Arc<DecisionMemory>>,
    generator: Option<Arc<dyn TextGenerator>>,
    policy: Option<PolicySource>,
    config: AgentConfig,
}

impl WorkflowEngineBuilder {
    /// The policy index to retrieve from. Required.
    pub fn index(mut self, index: Arc<PolicyIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// The decision memory. Defaults to an ephemeral in-memory log.
    pub fn memory(mut self, memory: Arc<DecisionMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// The language model. Without one every run uses the fallback generator.
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Read the policy document from `path` on every run.
    pub fn policy_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy = Some(PolicySource::File(path.into()));
        self
    }

    /// Use `text` as the policy document.
    pub fn policy_text(mut self, text: impl Into<String>) -> Self {
        self.policy = Some(PolicySource::Inline(text.into()));
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the index or policy source is missing or the
    /// agent configuration is invalid.
    pub fn build(self) -> std::result::Result<WorkflowEngine, ConfigError> {
        self.config.validate()?;
        let index = self.index.ok_or_else(|| ConfigError("a policy index is required".into()))?;
        let policy =
            self.policy.ok_or_else(|| ConfigError("a policy document source is required".into()))?;
        let memory = self.memory.unwrap_or_else(|| {
            Arc::new(DecisionMemory::in_memory().with_window(self.config.memory_window))
        });

        Ok(WorkflowEngine {
            index,
            memory,
            generator: self.generator,
            policy,
            prompt: PromptBuilder::new(self.config.chat_template),
            parser: DecisionParser::default(),
            config: self.config,
        })
    }
}
