//! Assembling a [`WorkflowEngine`] from a [`GovragConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};
use govrag_agent::{DecisionMemory, TextGenerator, WorkflowEngine};
use govrag_index::{EmbeddingProvider, HashingEmbedder, PolicyIndex};
use tracing::info;

use crate::config::{EmbeddingBackend, EmbeddingSettings, GovragConfig, LlmSettings};

/// Build the embedding provider named by `settings`.
pub fn embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.provider {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(settings.dimensions)?)),
        #[cfg(feature = "openai")]
        EmbeddingBackend::OpenAi => {
            use govrag_index::openai::{OPENAI_BASE_URL, OpenAiEmbedder};
            let base_url = settings.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
            let api_key = std::env::var(&settings.api_key_env).unwrap_or_default();
            Ok(Arc::new(
                OpenAiEmbedder::new(base_url, &settings.model, settings.dimensions)
                    .with_api_key(api_key),
            ))
        }
        #[cfg(not(feature = "openai"))]
        EmbeddingBackend::OpenAi => {
            anyhow::bail!("the openai embedding provider requires the `openai` feature")
        }
    }
}

/// Build the language model named by `settings`, if any.
#[cfg(feature = "openai")]
pub fn generator(settings: &LlmSettings) -> Option<Arc<dyn TextGenerator>> {
    use govrag_agent::openai::OpenAiGenerator;

    let base_url = settings.base_url.as_deref()?;
    let api_key = std::env::var(&settings.api_key_env).unwrap_or_default();
    info!(%base_url, model = %settings.model, "using OpenAI-compatible language model");
    Some(Arc::new(OpenAiGenerator::new(base_url, &settings.model).with_api_key(api_key)))
}

/// Build the language model named by `settings`, if any.
#[cfg(not(feature = "openai"))]
pub fn generator(settings: &LlmSettings) -> Option<Arc<dyn TextGenerator>> {
    if let Some(base_url) = settings.base_url.as_deref() {
        tracing::warn!(%base_url, "built without the `openai` feature, using fallback generator");
    }
    None
}

/// Open the index and memory and assemble the engine.
pub async fn build_engine(config: &GovragConfig) -> Result<WorkflowEngine> {
    let index = PolicyIndex::new(config.index.clone(), embedder(&config.embedding)?)?;
    let memory = DecisionMemory::open(&config.memory_path)
        .await
        .with_context(|| format!("cannot open decision memory {}", config.memory_path.display()))?
        .with_window(config.agent.memory_window);

    let mut builder = WorkflowEngine::builder()
        .index(Arc::new(index))
        .memory(Arc::new(memory))
        .policy_file(&config.policy_path)
        .config(config.agent.clone());
    match generator(&config.llm) {
        Some(generator) => builder = builder.generator(generator),
        None => info!("no language model configured, decisions will need review"),
    }
    Ok(builder.build()?)
}
