//! Parsing of interactive input into an action and its context.
//!
//! Two forms are accepted:
//!
//! - JSON: `{"action": "...", "context": "..."}`
//! - Plain text: `Action description [Context description]`; without
//!   brackets the whole text is the action
//!
//! An input without context is incomplete: the interactive loop asks for the
//! context on a follow-up line before evaluating.

use serde::Deserialize;

/// An action to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ActionInput {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub context: String,
}

impl ActionInput {
    /// Whether there is nothing to evaluate.
    pub fn is_empty(&self) -> bool {
        self.action.is_empty()
    }

    /// Whether the action still lacks its context.
    pub fn needs_context(&self) -> bool {
        !self.action.is_empty() && self.context.is_empty()
    }

    /// Fill in the context from a follow-up line.
    pub fn with_context(mut self, context: &str) -> Self {
        self.context = context.trim().to_string();
        self
    }
}

/// Parse one block of user input.
pub fn parse_input(raw: &str) -> ActionInput {
    let raw = raw.trim();
    if let Ok(input) = serde_json::from_str::<ActionInput>(raw) {
        return ActionInput {
            action: input.action.trim().to_string(),
            context: input.context.trim().to_string(),
        };
    }

    match (raw.find('['), raw.rfind(']')) {
        (Some(open), Some(close)) if open < close => ActionInput {
            action: raw[..open].trim().to_string(),
            context: raw[open + 1..close].trim().to_string(),
        },
        _ => ActionInput { action: raw.to_string(), context: String::new() },
    }
}

/// Join interactive lines, dropping blank ones.
pub fn join_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    lines.into_iter().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join("\n")
}
