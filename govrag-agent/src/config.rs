//! Configuration for the evaluation workflow.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::memory::DEFAULT_MEMORY_WINDOW;
use crate::prompt::ChatTemplate;

/// Workflow parameters that are not owned by the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Number of recent decisions included in each prompt.
    pub memory_window: usize,
    /// Prompt wrapping for the language model.
    pub chat_template: ChatTemplate,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { memory_window: DEFAULT_MEMORY_WINDOW, chat_template: ChatTemplate::default() }
    }
}

impl AgentConfig {
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Reject a zero memory window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_window == 0 {
            return Err(ConfigError("memory_window must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for a validated [`AgentConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn memory_window(mut self, window: usize) -> Self {
        self.config.memory_window = window;
        self
    }

    pub fn chat_template(mut self, template: ChatTemplate) -> Self {
        self.config.chat_template = template;
        self
    }

    pub fn build(self) -> Result<AgentConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
