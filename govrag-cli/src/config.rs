//! The `govrag.yaml` configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use govrag_agent::AgentConfig;
use govrag_index::IndexConfig;
use serde::{Deserialize, Serialize};

/// Default location of the policy document.
pub const DEFAULT_POLICY_PATH: &str = "data/data_policy.txt";

/// Default location of the decision log.
pub const DEFAULT_MEMORY_PATH: &str = "data/decisions.jsonl";

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local feature hashing, no network.
    #[default]
    Hashing,
    /// An OpenAI-compatible embeddings endpoint.
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingBackend,
    pub dimensions: usize,
    /// Model name for the `openai` provider.
    pub model: String,
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hashing,
            dimensions: 384,
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// The language model. Without a `base_url` every evaluation uses the
/// fallback generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: Option<String>,
    pub model: String,
    pub api_key_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gemma2:2b".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Everything the binary needs to assemble a workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovragConfig {
    pub policy_path: PathBuf,
    pub memory_path: PathBuf,
    pub index: IndexConfig,
    pub agent: AgentConfig,
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
}

impl Default for GovragConfig {
    fn default() -> Self {
        Self {
            policy_path: PathBuf::from(DEFAULT_POLICY_PATH),
            memory_path: PathBuf::from(DEFAULT_MEMORY_PATH),
            index: IndexConfig::default(),
            agent: AgentConfig::default(),
            embedding: EmbeddingSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

impl GovragConfig {
    /// Load `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read config file {}", path.display()))?;
                Self::from_yaml(&text)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.index.validate()?;
        self.agent.validate()?;
        if self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be greater than zero");
        }
        if self.embedding.provider == EmbeddingBackend::OpenAi && self.embedding.base_url.is_none()
        {
            bail!("embedding.base_url is required for the openai provider");
        }
        Ok(())
    }
}
