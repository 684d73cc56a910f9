//! Contract checks on snapshots before derivation.
//!
//! These catch snapshots the collaborator layer should never produce; any
//! violation makes `derive` fail instead of guessing.

use std::collections::HashSet;

use crate::core::snapshot::{Snapshot, WorkItem};
use crate::core::types::Status;

/// Check structural invariants of a snapshot:
/// - item numbers and phase numbers are non-zero and unique
/// - todo and question completion counts do not exceed their totals
/// - no phase is done or in progress while an earlier phase is still open
///
/// Returns a list of stable error messages (empty on success).
pub fn validate_snapshot(snapshot: &Snapshot) -> Vec<String> {
    let mut errors = Vec::new();
    validate_item("item", &snapshot.item, &mut errors);

    let mut numbers = HashSet::new();
    numbers.insert(snapshot.item.number);
    let mut phase_numbers = HashSet::new();
    for phase in &snapshot.phases {
        let path = format!("phase {}", phase.phase);
        if phase.phase == 0 {
            errors.push(format!("{path}: phase number must be > 0"));
        }
        if !phase_numbers.insert(phase.phase) {
            errors.push(format!("{path}: duplicate phase number"));
        }
        if !numbers.insert(phase.item.number) {
            errors.push(format!(
                "{path}: duplicate item number {}",
                phase.item.number
            ));
        }
        validate_item(&path, &phase.item, &mut errors);
    }

    validate_phase_order(snapshot, &mut errors);
    errors
}

fn validate_item(path: &str, item: &WorkItem, errors: &mut Vec<String>) {
    if item.number == 0 {
        errors.push(format!("{path}: item number must be > 0"));
    }
    let todos = item.body.todos;
    if todos.completed > todos.total {
        errors.push(format!(
            "{path}: completed todos {} exceed total {}",
            todos.completed, todos.total
        ));
    }
    let questions = item.body.questions;
    if questions.answered > questions.total {
        errors.push(format!(
            "{path}: answered questions {} exceed total {}",
            questions.answered, questions.total
        ));
    }
}

fn validate_phase_order(snapshot: &Snapshot, errors: &mut Vec<String>) {
    let mut phases: Vec<_> = snapshot.phases.iter().collect();
    phases.sort_by_key(|phase| phase.phase);

    let Some(current) = phases.iter().position(|phase| !phase.item.is_done()) else {
        return;
    };
    for later in phases.iter().skip(current + 1) {
        let touched = later.item.is_done() || later.item.status == Some(Status::InProgress);
        if touched {
            errors.push(format!(
                "phase {}: started before current phase {}",
                later.phase, phases[current].phase
            ));
        }
    }
}
