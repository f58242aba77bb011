//! Structured-output parsing for model responses.
//!
//! [`DecisionParser`] turns raw model text into a [`Decision`] by trying an
//! ordered list of [`RecoveryStrategy`]s and, when none applies, returning a
//! fixed `Needs Review` decision. Every step is total, so [`DecisionParser::parse`]
//! cannot fail.
//!
//! Schema rules shared by all strategies:
//! - `decision` and `reason` are required strings
//! - an unrecognised `decision` label becomes `Needs Review`, with a note in `reason`
//! - `suggested_changes` / `references` may be missing or `null` (empty), a
//!   single string (wrapped), or an array of strings; blank items are dropped

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::decision::{Decision, DecisionKind};

/// Reason given when no strategy could recover a decision.
pub const UNPARSABLE_REASON: &str =
    "The model response could not be parsed into a structured decision; manual review required.";

/// One way of recovering a [`Decision`] from raw model text.
pub trait RecoveryStrategy: Send + Sync {
    /// Short name used in logs and [`ParseOutcome`].
    fn name(&self) -> &'static str;

    /// Try to recover a decision. Must not panic; `None` passes to the next strategy.
    fn attempt(&self, raw: &str) -> Option<Decision>;
}

/// The whole (trimmed) output is one JSON object matching the schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictJson;

impl RecoveryStrategy for StrictJson {
    fn name(&self) -> &'static str {
        "strict_json"
    }

    fn attempt(&self, raw: &str) -> Option<Decision> {
        let value: Value = serde_json::from_str(raw.trim()).ok()?;
        validate(&value).map_err(|violation| debug!(%violation, "strict parse rejected")).ok()
    }
}

/// The first syntactically valid JSON object embedded in the output, e.g.
/// after commentary or inside a markdown fence.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedJson;

impl RecoveryStrategy for EmbeddedJson {
    fn name(&self) -> &'static str {
        "embedded_json"
    }

    fn attempt(&self, raw: &str) -> Option<Decision> {
        let object = first_json_object(raw)?;
        validate(&object).map_err(|violation| debug!(%violation, "embedded object rejected")).ok()
    }
}

/// Which step of the chain produced a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    /// The recovered (or synthesized) decision.
    pub decision: Decision,
    /// Name of the successful strategy, `"fallback"` for the terminal step.
    pub strategy: &'static str,
}

impl ParseOutcome {
    /// Whether the decision was synthesized rather than parsed.
    pub fn is_fallback(&self) -> bool {
        self.strategy == FALLBACK_STRATEGY
    }
}

const FALLBACK_STRATEGY: &str = "fallback";

/// Parses model output into a [`Decision`] through an ordered recovery chain.
pub struct DecisionParser {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Default for DecisionParser {
    fn default() -> Self {
        Self { strategies: vec![Box::new(StrictJson), Box::new(EmbeddedJson)] }
    }
}

impl DecisionParser {
    /// A parser with the standard chain: strict JSON, then embedded JSON.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy, tried after the existing ones.
    pub fn with_strategy(mut self, strategy: impl RecoveryStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Parse `raw`, never failing.
    pub fn parse(&self, raw: &str) -> Decision {
        self.parse_with_outcome(raw).decision
    }

    /// Parse `raw` and report which step succeeded.
    pub fn parse_with_outcome(&self, raw: &str) -> ParseOutcome {
        for (position, strategy) in self.strategies.iter().enumerate() {
            if let Some(decision) = strategy.attempt(raw) {
                if position > 0 {
                    warn!(strategy = strategy.name(), "model output needed recovery");
                }
                return ParseOutcome { decision, strategy: strategy.name() };
            }
        }
        warn!(output_len = raw.len(), "model output unparsable, using fallback decision");
        ParseOutcome { decision: fallback_decision(), strategy: FALLBACK_STRATEGY }
    }
}

/// Parse with the default chain.
pub fn parse_decision(raw: &str) -> Decision {
    DecisionParser::default().parse(raw)
}

/// The terminal step of the chain.
pub fn fallback_decision() -> Decision {
    Decision::needs_review(UNPARSABLE_REASON)
}

/// Check a JSON value against the decision schema.
fn validate(value: &Value) -> Result<Decision, String> {
    let object = value.as_object().ok_or("not a JSON object")?;

    let label = match object.get("decision") {
        Some(Value::String(label)) => label.trim(),
        Some(_) => return Err("`decision` is not a string".to_string()),
        None => return Err("missing `decision`".to_string()),
    };
    let mut reason = match object.get("reason") {
        Some(Value::String(reason)) => reason.trim().to_string(),
        Some(_) => return Err("`reason` is not a string".to_string()),
        None => return Err("missing `reason`".to_string()),
    };

    let decision = match DecisionKind::from_label(label) {
        Some(kind) => kind,
        None => {
            let note = format!(
                "(Note: unrecognized decision value \"{label}\" was coerced to {}.)",
                DecisionKind::NeedsReview
            );
            reason = if reason.is_empty() { note } else { format!("{reason} {note}") };
            DecisionKind::NeedsReview
        }
    };

    Ok(Decision {
        decision,
        reason,
        suggested_changes: string_list(object, "suggested_changes")?,
        references: string_list(object, "references")?,
    })
}

fn string_list(object: &Map<String, Value>, field: &str) -> Result<Vec<String>, String> {
    let items = match object.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(single)) => vec![single.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(|| format!("`{field}` holds a non-string item")))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(format!("`{field}` is not a list of strings")),
    };
    Ok(items
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect())
}

/// The first `{` that starts a syntactically valid JSON object.
fn first_json_object(raw: &str) -> Option<Value> {
    raw.match_indices('{').find_map(|(start, _)| {
        let mut values = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(value @ Value::Object(_))) => Some(value),
            _ => None,
        }
    })
}
