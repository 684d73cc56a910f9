//! Outcome verification: compare an observed tree against a recorded
//! [`OutcomeSet`].
//!
//! Comparison is per field and lenient where agents or humans
//! legitimately add state (extra labels, more history, more checked todos).
//! Verification passes when any predicted outcome passes.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::predict::OutcomeSet;
use crate::core::snapshot::HistoryEntry;
use crate::core::tree::{ItemTree, PredictableTree};
use crate::core::types::{Target, VOCABULARY_VERSION};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("outcome set for #{0} has no outcomes")]
    EmptyOutcomeSet(u64),
    #[error("outcome set uses vocabulary version {found}, expected {expected}")]
    VocabularyMismatch { found: u32, expected: u32 },
}

/// Which comparison rule produced a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareRule {
    Exact,
    AtLeast,
    EqualOrZero,
    Superset,
    Present,
    HistoryPrefix,
    PhasePresent,
}

/// One field that did not satisfy its rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diff {
    pub path: String,
    pub rule: CompareRule,
    pub expected: Value,
    pub actual: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestMatch {
    pub outcome_index: usize,
    pub diffs: Vec<Diff>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub pass: bool,
    pub matched_outcome_index: Option<usize>,
    pub best_match: BestMatch,
}

/// Compare `actual` against every outcome in `set`.
///
/// The first passing outcome wins; otherwise the outcome with the fewest
/// diffs (lowest index on ties) is reported as the best match.
pub fn compare(set: &OutcomeSet, actual: &PredictableTree) -> Result<Verification, VerifyError> {
    if set.vocabulary_version != VOCABULARY_VERSION {
        return Err(VerifyError::VocabularyMismatch {
            found: set.vocabulary_version,
            expected: VOCABULARY_VERSION,
        });
    }
    if set.outcomes.is_empty() {
        return Err(VerifyError::EmptyOutcomeSet(set.item));
    }

    let mut best: Option<BestMatch> = None;
    for (index, expected) in set.outcomes.iter().enumerate() {
        let diffs = compare_tree(expected, actual);
        if diffs.is_empty() {
            return Ok(Verification {
                pass: true,
                matched_outcome_index: Some(index),
                best_match: BestMatch {
                    outcome_index: index,
                    diffs,
                },
            });
        }
        if best.as_ref().is_none_or(|b| diffs.len() < b.diffs.len()) {
            best = Some(BestMatch {
                outcome_index: index,
                diffs,
            });
        }
    }

    Ok(Verification {
        pass: false,
        matched_outcome_index: None,
        best_match: best.ok_or(VerifyError::EmptyOutcomeSet(set.item))?,
    })
}

/// Diffs between one expected tree and the observed tree.
pub fn compare_tree(expected: &PredictableTree, actual: &PredictableTree) -> Vec<Diff> {
    let mut diffs = Vec::new();
    compare_item("issue", &expected.issue, &actual.issue, &mut diffs);
    for phase in &expected.phases {
        let path = format!("phases[{}]", phase.phase);
        match actual.phases.iter().find(|p| p.phase == phase.phase) {
            Some(found) => compare_item(&path, &phase.item, &found.item, &mut diffs),
            None => diffs.push(Diff {
                path,
                rule: CompareRule::PhasePresent,
                expected: Value::from(phase.item.number),
                actual: Value::Null,
            }),
        }
    }
    diffs
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn exact<T: PartialEq + Serialize>(path: String, expected: &T, actual: &T, diffs: &mut Vec<Diff>) {
    if expected != actual {
        diffs.push(Diff {
            path,
            rule: CompareRule::Exact,
            expected: to_value(expected),
            actual: to_value(actual),
        });
    }
}

fn at_least(path: String, expected: u32, actual: u32, diffs: &mut Vec<Diff>) {
    if actual < expected {
        diffs.push(Diff {
            path,
            rule: CompareRule::AtLeast,
            expected: Value::from(expected),
            actual: Value::from(actual),
        });
    }
}

fn present(path: String, expected: bool, actual: bool, diffs: &mut Vec<Diff>) {
    if expected && !actual {
        diffs.push(Diff {
            path,
            rule: CompareRule::Present,
            expected: Value::Bool(true),
            actual: Value::Bool(false),
        });
    }
}

fn superset(path: String, expected: &[String], actual: &[String], diffs: &mut Vec<Diff>) {
    let missing: Vec<&String> = expected.iter().filter(|e| !actual.contains(e)).collect();
    if !missing.is_empty() {
        diffs.push(Diff {
            path,
            rule: CompareRule::Superset,
            expected: to_value(&missing),
            actual: to_value(&actual),
        });
    }
}

fn compare_item(prefix: &str, expected: &ItemTree, actual: &ItemTree, diffs: &mut Vec<Diff>) {
    let path = |field: &str| format!("{prefix}.{field}");

    exact(path("number"), &expected.number, &actual.number, diffs);
    exact(path("state"), &expected.state, &actual.state, diffs);
    exact(path("status"), &expected.status, &actual.status, diffs);
    at_least(path("iteration"), expected.iteration, actual.iteration, diffs);
    // A human may reset the counter between passes.
    if actual.failures != expected.failures && actual.failures != 0 {
        diffs.push(Diff {
            path: path("failures"),
            rule: CompareRule::EqualOrZero,
            expected: Value::from(expected.failures),
            actual: Value::from(actual.failures),
        });
    }
    superset(path("labels"), &expected.labels, &actual.labels, diffs);
    superset(path("assignees"), &expected.assignees, &actual.assignees, diffs);
    present(path("has_branch"), expected.has_branch, actual.has_branch, diffs);
    present(path("has_pr"), expected.has_pr, actual.has_pr, diffs);
    if let Some(expected_pr) = &expected.pr {
        match &actual.pr {
            Some(actual_pr) => {
                exact(path("pr.is_draft"), &expected_pr.is_draft, &actual_pr.is_draft, diffs);
                exact(path("pr.state"), &expected_pr.state, &actual_pr.state, diffs);
            }
            None => diffs.push(Diff {
                path: path("pr"),
                rule: CompareRule::Present,
                expected: to_value(expected_pr),
                actual: Value::Null,
            }),
        }
    }

    let (eb, ab) = (&expected.body, &actual.body);
    present(path("body.has_description"), eb.has_description, ab.has_description, diffs);
    present(path("body.has_agent_notes"), eb.has_agent_notes, ab.has_agent_notes, diffs);
    at_least(path("body.todo_total"), eb.todo_total, ab.todo_total, diffs);
    at_least(path("body.todo_completed"), eb.todo_completed, ab.todo_completed, diffs);
    at_least(path("body.question_total"), eb.question_total, ab.question_total, diffs);
    at_least(path("body.question_answered"), eb.question_answered, ab.question_answered, diffs);

    for entry in &eb.history {
        if !ab.history.iter().any(|candidate| history_matches(entry, candidate)) {
            diffs.push(Diff {
                path: path(&format!(
                    "body.history[iteration={},phase={}]",
                    entry.iteration, entry.phase
                )),
                rule: CompareRule::HistoryPrefix,
                expected: Value::from(entry.action.clone()),
                actual: to_value(
                    &ab.history
                        .iter()
                        .filter(|c| c.iteration == entry.iteration && c.phase == entry.phase)
                        .map(|c| c.action.as_str())
                        .collect::<Vec<_>>(),
                ),
            });
        }
    }
}

/// Same `(iteration, phase)` key and the expected text is a prefix of the
/// actual text once leading emoji and punctuation are stripped.
pub fn history_matches(expected: &HistoryEntry, actual: &HistoryEntry) -> bool {
    expected.iteration == actual.iteration
        && expected.phase == actual.phase
        && strip_decoration(&actual.action).starts_with(strip_decoration(&expected.action))
}

fn strip_decoration(text: &str) -> &str {
    text.trim_start_matches(|c: char| !c.is_alphanumeric()).trim_end()
}

/// Operator-facing record of a failed verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    pub item: u64,
    pub target: Target,
    pub rule: String,
    pub signal: String,
    pub outcomes_considered: usize,
    pub best_match: BestMatch,
}

impl DiffReport {
    pub fn new(set: &OutcomeSet, verification: &Verification) -> Self {
        Self {
            item: set.item,
            target: set.target,
            rule: set.rule.clone(),
            signal: set.signal.clone(),
            outcomes_considered: set.outcomes.len(),
            best_match: verification.best_match.clone(),
        }
    }

    /// One line per diff, used as the `verification-failed` signal summary.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "#{} after {} ({}): {} mismatch(es) against outcome {} of {}",
            self.item,
            self.target,
            self.rule,
            self.best_match.diffs.len(),
            self.best_match.outcome_index,
            self.outcomes_considered
        );
        for diff in &self.best_match.diffs {
            let _ = write!(
                out,
                "\n- {}: expected {} ({:?}), got {}",
                diff.path, diff.expected, diff.rule, diff.actual
            );
        }
        out
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "### Verification failed for #{}\n\nTarget `{}` via rule `{}` (signal `{}`); best match is outcome {} of {}.\n\n",
            self.item,
            self.target,
            self.rule,
            self.signal,
            self.best_match.outcome_index,
            self.outcomes_considered
        );
        out.push_str("| Field | Rule | Expected | Actual |\n|---|---|---|---|\n");
        for diff in &self.best_match.diffs {
            let _ = writeln!(
                out,
                "| `{}` | {:?} | `{}` | `{}` |",
                diff.path, diff.rule, diff.expected, diff.actual
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::predict::{PredictMeta, predict};
    use crate::core::action::Action;
    use crate::core::types::Status;
    use crate::test_support::{phase, snapshot, snapshot_with_phases, working_item};

    fn set_of(outcomes: Vec<PredictableTree>) -> OutcomeSet {
        OutcomeSet {
            vocabulary_version: VOCABULARY_VERSION,
            item: 7,
            target: Target::Iterating,
            rule: "iterate.continue".to_string(),
            signal: "assigned".to_string(),
            actions: Vec::new(),
            outcomes,
        }
    }

    fn tree() -> PredictableTree {
        PredictableTree::from_snapshot(&snapshot(working_item(7)))
    }

    #[test]
    fn empty_set_is_an_error() {
        assert_eq!(
            compare(&set_of(Vec::new()), &tree()),
            Err(VerifyError::EmptyOutcomeSet(7))
        );
    }

    #[test]
    fn extra_labels_are_accepted_missing_labels_are_not() {
        let mut expected = tree();
        expected.issue.labels = vec!["a".to_string()];
        let mut actual = tree();
        actual.issue.labels = vec!["a".to_string(), "b".to_string()];
        assert!(compare(&set_of(vec![expected.clone()]), &actual).expect("compare").pass);

        actual.issue.labels = vec!["b".to_string()];
        let verification = compare(&set_of(vec![expected]), &actual).expect("compare");
        assert!(!verification.pass);
        assert_eq!(verification.best_match.diffs[0].path, "issue.labels");
        assert_eq!(verification.best_match.diffs[0].rule, CompareRule::Superset);
    }

    #[test]
    fn history_prefix_ignores_leading_emoji() {
        let expected = HistoryEntry::new(1, "-", "Opened PR");
        let actual = HistoryEntry::new(1, "-", "✅ Opened PR #42");
        assert!(history_matches(&expected, &actual));
        assert!(!history_matches(
            &expected,
            &HistoryEntry::new(2, "-", "✅ Opened PR #42")
        ));
        assert!(!history_matches(
            &expected,
            &HistoryEntry::new(1, "-", "🔄 Updated PR #42")
        ));
    }

    #[test]
    fn passes_if_any_outcome_passes() {
        let mut wrong = tree();
        wrong.issue.status = Some(Status::Done);
        let right = tree();
        let verification = compare(&set_of(vec![wrong, right]), &tree()).expect("compare");
        assert!(verification.pass);
        assert_eq!(verification.matched_outcome_index, Some(1));
    }

    #[test]
    fn best_match_has_fewest_diffs() {
        let mut two_off = tree();
        two_off.issue.status = Some(Status::Done);
        two_off.issue.iteration = 9;
        let mut one_off = tree();
        one_off.issue.status = Some(Status::Done);
        let verification =
            compare(&set_of(vec![two_off, one_off]), &tree()).expect("compare");
        assert!(!verification.pass);
        assert_eq!(verification.best_match.outcome_index, 1);
        assert_eq!(verification.best_match.diffs.len(), 1);
    }

    #[test]
    fn failures_reset_to_zero_is_accepted() {
        let mut expected = tree();
        expected.issue.failures = 3;
        let mut actual = tree();
        actual.issue.failures = 0;
        assert!(compare(&set_of(vec![expected.clone()]), &actual).expect("compare").pass);
        actual.issue.failures = 2;
        assert!(!compare(&set_of(vec![expected]), &actual).expect("compare").pass);
    }

    #[test]
    fn counters_accept_progress_beyond_expected() {
        let mut expected = tree();
        expected.issue.iteration = 2;
        expected.issue.body.todo_completed = 1;
        let mut actual = tree();
        actual.issue.iteration = 3;
        actual.issue.body.todo_completed = 4;
        assert!(compare(&set_of(vec![expected]), &actual).expect("compare").pass);
    }

    #[test]
    fn missing_phase_fails() {
        let with_phase = snapshot_with_phases(working_item(7), vec![phase(1, 8, None)]);
        let expected = PredictableTree::from_snapshot(&with_phase);
        let verification = compare(&set_of(vec![expected]), &tree()).expect("compare");
        assert!(!verification.pass);
        assert_eq!(verification.best_match.diffs[0].path, "phases[1]");
    }

    #[test]
    fn predicted_pr_outcomes_verify_against_executor_history() {
        let snap = snapshot(working_item(7));
        let set = predict(
            &[Action::CreateOrUpdatePr {
                issue: 7,
                branch: "claude/issue/7".to_string(),
                title: "Item 7".to_string(),
                draft: true,
            }],
            &PredictableTree::from_snapshot(&snap),
            &snap,
            &PredictMeta {
                target: Target::Iterating,
                rule: "iterate.continue".to_string(),
                signal: "assigned".to_string(),
            },
        );
        let mut actual = set.outcomes[0].clone();
        actual.issue.body.history = vec![HistoryEntry::new(0, "-", "🔄 Updated PR #70")];
        let verification = compare(&set, &actual).expect("compare");
        assert_eq!(verification.matched_outcome_index, Some(1));
    }

    #[test]
    fn report_summary_lists_each_diff() {
        let mut expected = tree();
        expected.issue.status = Some(Status::InReview);
        let set = set_of(vec![expected]);
        let verification = compare(&set, &tree()).expect("compare");
        let report = DiffReport::new(&set, &verification);
        let summary = report.summary();
        assert!(summary.contains("issue.status"));
        assert!(report.to_markdown().contains("| `issue.status` |"));
    }
}
