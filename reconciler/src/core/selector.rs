//! Current-phase selection for multi-phase items.

use crate::core::snapshot::{Phase, Snapshot};

/// First phase (ascending phase number) that is neither done nor closed.
///
/// Returns `None` when the item has no phases or every phase is done.
pub fn current_phase(snapshot: &Snapshot) -> Option<&Phase> {
    snapshot
        .phases
        .iter()
        .filter(|phase| !phase.item.is_done())
        .min_by_key(|phase| phase.phase)
}

/// True if the item has phases and all of them are done or closed.
pub fn all_phases_done(snapshot: &Snapshot) -> bool {
    snapshot.has_phases() && snapshot.phases.iter().all(|phase| phase.item.is_done())
}

/// History label for the phase containing `issue` (`"-"` outside phases).
pub fn phase_label(snapshot: &Snapshot, issue: u64) -> String {
    snapshot
        .phase_by_item(issue)
        .map_or_else(|| "-".to_string(), |phase| phase.phase.to_string())
}
