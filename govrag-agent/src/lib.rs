//! # govrag-agent
//!
//! The retrieval-augmented compliance workflow: retrieve policy clauses,
//! prompt a language model, force its output into a [`Decision`], and archive
//! the result in a rolling [`DecisionMemory`].
//!
//! ## Overview
//!
//! - [`WorkflowEngine`] runs `Retrieve → Evaluate → Memory → Done` over a
//!   [`WorkflowState`], stopping in `Failed` on unrecoverable errors
//! - [`DecisionParser`] turns arbitrary model text into a valid [`Decision`]
//! - [`PromptBuilder`] assembles the evaluation prompt
//! - [`TextGenerator`] abstracts the language model; [`FallbackGenerator`]
//!   stands in when it is unavailable
//!
//! ## Features
//!
//! - `openai`: [`openai::OpenAiGenerator`] for OpenAI-compatible chat servers

pub mod config;
pub mod decision;
pub mod error;
pub mod generation;
pub mod memory;
pub mod parser;
pub mod prompt;
pub mod workflow;

#[cfg(feature = "openai")]
pub mod openai;

pub use config::{AgentConfig, AgentConfigBuilder};
pub use decision::{Decision, DecisionKind};
pub use error::{ConfigError, GenerationError, MemoryError, Result, WorkflowError};
pub use generation::{FallbackGenerator, TextGenerator};
pub use memory::{DecisionMemory, MemoryEntry, format_for_prompt};
pub use parser::{DecisionParser, ParseOutcome, RecoveryStrategy, parse_decision};
pub use prompt::{ChatTemplate, PromptBuilder};
pub use workflow::{PolicySource, Stage, StageFailure, WorkflowEngine, WorkflowState};
