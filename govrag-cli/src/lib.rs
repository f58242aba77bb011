//! Support code for the `govrag` binary: configuration file, engine
//! assembly, and interactive input parsing.

pub mod config;
pub mod engine;
pub mod input;

pub use config::{EmbeddingBackend, EmbeddingSettings, GovragConfig, LlmSettings};
pub use engine::build_engine;
pub use input::{ActionInput, join_lines, parse_input};
