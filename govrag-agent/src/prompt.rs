//! Evaluation prompt assembly.

use std::fmt::Write as _;

use govrag_index::RetrievedClause;
use serde::{Deserialize, Serialize};

use crate::decision::DecisionKind;
use crate::memory::{MemoryEntry, format_for_prompt};

/// How the assembled prompt is wrapped for the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    /// The prompt text as is, for chat APIs that apply their own template.
    #[default]
    Plain,
    /// Gemma turn markers around a single user turn, leaving the model turn open.
    Gemma,
}

/// Builds the evaluation prompt from the action, retrieved clauses, and memory.
///
/// Sections always appear in the same order: instructions, output schema,
/// action, context, policy clauses, prior decisions, output rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder {
    chat_template: ChatTemplate,
}

impl PromptBuilder {
    /// A builder wrapping its output with `chat_template`.
    pub fn new(chat_template: ChatTemplate) -> Self {
        Self { chat_template }
    }

    /// Assemble the prompt.
    pub fn build(
        &self,
        action: &str,
        context: &str,
        clauses: &[RetrievedClause],
        memory_entries: &[MemoryEntry],
    ) -> String {
        let mut body = String::new();

        body.push_str(
            "You are a compliance governance agent. Decide whether the proposed action \
             complies with the policy clauses below.\n\n",
        );

        let labels: Vec<&str> = DecisionKind::ALL.iter().map(|kind| kind.label()).collect();
        body.push_str("Respond with exactly one JSON object of this form:\n");
        let _ = writeln!(
            body,
            "{{\n  \"decision\": \"{}\",\n  \"reason\": \"string\",\n  \
             \"suggested_changes\": [\"string\"],\n  \"references\": [\"string\"]\n}}\n",
            labels.join("|")
        );

        let _ = writeln!(body, "ACTION: {}", action.trim());
        let _ = writeln!(body, "CONTEXT: {}\n", context.trim());

        body.push_str("POLICY CLAUSES:\n");
        if clauses.is_empty() {
            body.push_str("No policy clauses were retrieved.\n");
        }
        for (i, clause) in clauses.iter().enumerate() {
            let _ = writeln!(
                body,
                "[{}] {} (score {:.3})\n{}",
                i + 1,
                clause.reference,
                clause.score,
                clause.text.trim()
            );
        }

        body.push_str("\nPRIOR DECISIONS:\n");
        body.push_str(&format_for_prompt(memory_entries));
        body.push('\n');

        let _ = write!(
            body,
            "\nRULES:\n\
             - \"decision\" must be one of: {}\n\
             - Keep \"reason\" to one or two sentences that reference specific policy\n\
             - \"suggested_changes\" must be an array of specific, actionable items\n\
             - \"references\" must be an array of policy sections taken from the clauses above\n\
             - If no clause applies, answer \"{}\" with empty references\n\
             - Output the JSON object only, with no additional text",
            labels.join(", "),
            DecisionKind::NeedsReview
        );

        match self.chat_template {
            ChatTemplate::Plain => body,
            ChatTemplate::Gemma => {
                format!("<start_of_turn>user\n{body}<end_of_turn>\n<start_of_turn>model\n")
            }
        }
    }
}
