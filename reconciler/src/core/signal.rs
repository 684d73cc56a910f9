//! External trigger events, one per loop pass.

use serde::{Deserialize, Serialize};

use crate::core::types::{CiResult, ReviewDecision};

/// Event that triggers one pass of the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signal {
    /// Automation was assigned to the item.
    Assigned,
    /// The item body or metadata was edited.
    Edited,
    /// The item was opened or explicitly queued for triage.
    Triage,
    /// Someone mentioned the automation in a comment.
    Comment { author: String, body: String },
    /// A CI run finished on the item's pull request.
    CiCompleted {
        result: CiResult,
        #[serde(default)]
        run_url: Option<String>,
    },
    /// A review was submitted on the item's pull request.
    ReviewSubmitted {
        decision: ReviewDecision,
        reviewer: String,
    },
    /// The item's pull request was merged.
    PrMerged,
    /// The previous pass's effects did not match any predicted outcome.
    VerificationFailed { summary: String },
}

impl Signal {
    pub const fn tag(&self) -> &'static str {
        match self {
            Signal::Assigned => "assigned",
            Signal::Edited => "edited",
            Signal::Triage => "triage",
            Signal::Comment { .. } => "comment",
            Signal::CiCompleted { .. } => "ci-completed",
            Signal::ReviewSubmitted { .. } => "review-submitted",
            Signal::PrMerged => "pr-merged",
            Signal::VerificationFailed { .. } => "verification-failed",
        }
    }

    /// Signals that count against the failure budget.
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Signal::CiCompleted {
                result: CiResult::Failure,
                ..
            } | Signal::VerificationFailed { .. }
        )
    }

    /// Shape errors in the payload (empty required strings).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            Signal::Comment { author, .. } if author.trim().is_empty() => {
                errors.push("comment signal has empty author".to_string());
            }
            Signal::ReviewSubmitted { reviewer, .. } if reviewer.trim().is_empty() => {
                errors.push("review-submitted signal has empty reviewer".to_string());
            }
            Signal::VerificationFailed { summary } if summary.trim().is_empty() => {
                errors.push("verification-failed signal has empty summary".to_string());
            }
            _ => {}
        }
        errors
    }
}
