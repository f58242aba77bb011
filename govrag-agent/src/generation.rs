//! The text-generation capability.

use async_trait::async_trait;

use crate::decision::Decision;
use crate::error::GenerationError;

/// Reason carried by the placeholder decision.
pub const FALLBACK_REASON: &str =
    "Language model unavailable; the action could not be evaluated automatically.";

/// A causal language model: prompt in, text out.
///
/// Implementations are black boxes to the workflow. Output is raw text and is
/// never trusted to be well formed; the parser handles that.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// The generator used when no model is configured or the model fails.
///
/// Always succeeds with a well-formed `Needs Review` decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackGenerator;

impl FallbackGenerator {
    /// The placeholder output, without going through the trait.
    pub fn placeholder() -> String {
        let decision = Decision {
            suggested_changes: vec!["Manual review required".to_string()],
            ..Decision::needs_review(FALLBACK_REASON)
        };
        serde_json::to_string_pretty(&decision).unwrap_or_else(|_| {
            format!(r#"{{"decision": "Needs Review", "reason": "{FALLBACK_REASON}"}}"#)
        })
    }
}

#[async_trait]
impl TextGenerator for FallbackGenerator {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Ok(Self::placeholder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionKind;
    use crate::parser::DecisionParser;

    #[tokio::test]
    async fn placeholder_parses_strictly() {
        let raw = FallbackGenerator.generate("anything").await.unwrap();
        let outcome = DecisionParser::new().parse_with_outcome(&raw);
        assert_eq!(outcome.strategy, "strict_json");
        assert_eq!(outcome.decision.decision, DecisionKind::NeedsReview);
        assert_eq!(outcome.decision.reason, FALLBACK_REASON);
        assert_eq!(outcome.decision.suggested_changes, vec!["Manual review required"]);
        assert!(outcome.decision.references.is_empty());
    }
}
