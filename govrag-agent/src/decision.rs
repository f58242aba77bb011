//! The structured compliance decision.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The verdict on a proposed action. Closed: there is no free-text variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionKind {
    /// The action complies with the retrieved policy.
    #[serde(rename = "Allowed")]
    Allowed,
    /// The action violates the retrieved policy.
    #[serde(rename = "Not Allowed")]
    NotAllowed,
    /// The action needs a human decision.
    #[serde(rename = "Needs Review")]
    NeedsReview,
}

impl DecisionKind {
    /// Every variant, in the order shown to the model.
    pub const ALL: [DecisionKind; 3] = [Self::Allowed, Self::NotAllowed, Self::NeedsReview];

    /// The wire label, e.g. `"Not Allowed"`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Allowed => "Allowed",
            Self::NotAllowed => "Not Allowed",
            Self::NeedsReview => "Needs Review",
        }
    }

    /// Match a label ignoring case, spaces, underscores, and hyphens, so that
    /// `"Not Allowed"`, `"not_allowed"`, and `"NotAllowed"` all resolve.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "allowed" => Some(Self::Allowed),
            "notallowed" => Some(Self::NotAllowed),
            "needsreview" => Some(Self::NeedsReview),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated compliance decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The verdict.
    pub decision: DecisionKind,
    /// Short rationale referencing the policy.
    pub reason: String,
    /// Concrete changes that would make the action compliant.
    #[serde(default)]
    pub suggested_changes: Vec<String>,
    /// Policy sections the decision relies on.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Decision {
    /// A `Needs Review` decision with the given reason and no citations.
    pub fn needs_review(reason: impl Into<String>) -> Self {
        Self {
            decision: DecisionKind::NeedsReview,
            reason: reason.into(),
            suggested_changes: Vec::new(),
            references: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_serde() {
        for kind in DecisionKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.label()));
            assert_eq!(serde_json::from_str::<DecisionKind>(&json).unwrap(), kind);
        }
    }

    #[test]
    fn label_matching_is_lenient_about_spelling() {
        assert_eq!(DecisionKind::from_label("Not Allowed"), Some(DecisionKind::NotAllowed));
        assert_eq!(DecisionKind::from_label("not_allowed"), Some(DecisionKind::NotAllowed));
        assert_eq!(DecisionKind::from_label("NEEDS-REVIEW"), Some(DecisionKind::NeedsReview));
        assert_eq!(DecisionKind::from_label("allowed"), Some(DecisionKind::Allowed));
        assert_eq!(DecisionKind::from_label("Error"), None);
        assert_eq!(DecisionKind::from_label("Allowed|Not Allowed"), None);
    }

    #[test]
    fn missing_lists_deserialize_as_empty() {
        let decision: Decision =
            serde_json::from_str(r#"{"decision": "Allowed", "reason": "fine"}"#).unwrap();
        assert!(decision.suggested_changes.is_empty());
        assert!(decision.references.is_empty());
    }
}
