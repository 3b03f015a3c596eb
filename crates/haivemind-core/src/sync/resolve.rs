//! Conflict resolution for concurrently-updated memories.
//!
//! Grounded in last-writer-wins register semantics (see
//! `cortex-crdt`'s `lww_register.rs`): a component wins by
//! `(vector_clock dominance, wall-clock, machine_id)` in that priority
//! order, generalized here from a single scalar field to a whole-record
//! decision per the rule order in SPEC_FULL.md §4.3.

use chrono::{DateTime, Utc};

use crate::clock::{ClockOrdering, VectorClock};

/// The facts `resolve` needs about one side of a concurrent pair. Deletion
/// is represented as `is_deletion = true`; the content fields are
/// irrelevant for a pure deletion record.
#[derive(Debug, Clone)]
pub struct ConflictSide<'a> {
    pub id: &'a str,
    pub machine_id: &'a str,
    pub vector_clock: VectorClock,
    pub updated_at: DateTime<Utc>,
    pub is_deletion: bool,
    pub source_credibility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Local,
    Remote,
}

/// Resolve a concurrent write between the locally-held version (`local`)
/// and an incoming remote version (`remote`). Only called when
/// `local.vector_clock.compare(&remote.vector_clock) == Concurrent`;
/// dominance cases are handled by the caller before reaching here.
pub fn resolve(local: &ConflictSide, remote: &ConflictSide) -> Resolution {
    debug_assert_eq!(
        local.vector_clock.compare(&remote.vector_clock),
        ClockOrdering::Concurrent
    );

    // (a) non-deletion beats deletion only if it is strictly newer by
    // wall-clock AND its own vector-clock component is ahead of what the
    // deletion side has recorded for that machine.
    if local.is_deletion != remote.is_deletion {
        let (deletion, non_deletion, deletion_is_local) = if local.is_deletion {
            (local, remote, true)
        } else {
            (remote, local, false)
        };
        let non_deletion_newer = non_deletion.updated_at > deletion.updated_at;
        let non_deletion_component_ahead = non_deletion.vector_clock.get(non_deletion.machine_id)
            > deletion.vector_clock.get(non_deletion.machine_id);
        if non_deletion_newer && non_deletion_component_ahead {
            return if deletion_is_local { Resolution::Remote } else { Resolution::Local };
        }
        // (b) otherwise deletion wins.
        return if deletion_is_local { Resolution::Local } else { Resolution::Remote };
    }

    // (c) higher source_agent credibility.
    if (local.source_credibility - remote.source_credibility).abs() > f64::EPSILON {
        return if local.source_credibility > remote.source_credibility {
            Resolution::Local
        } else {
            Resolution::Remote
        };
    }

    // (d) lexicographically larger id, deterministic tie-break.
    if local.id >= remote.id {
        Resolution::Local
    } else {
        Resolution::Remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side<'a>(
        id: &'a str,
        machine: &'a str,
        clock: VectorClock,
        is_deletion: bool,
        credibility: f64,
        minutes_ago: i64,
    ) -> ConflictSide<'a> {
        ConflictSide {
            id,
            machine_id: machine,
            vector_clock: clock,
            updated_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            is_deletion,
            source_credibility: credibility,
        }
    }

    #[test]
    fn newer_non_deletion_with_ahead_component_beats_older_deletion() {
        let local = side("m1", "a", VectorClock::origin("a"), false, 0.5, 0);
        let remote = side("m1", "b", VectorClock::origin("b"), true, 0.5, 10);
        assert_eq!(resolve(&local, &remote), Resolution::Local);
    }

    #[test]
    fn older_non_deletion_loses_to_newer_deletion() {
        let local = side("m1", "a", VectorClock::origin("a"), false, 0.5, 10);
        let remote = side("m1", "b", VectorClock::origin("b"), true, 0.5, 0);
        assert_eq!(resolve(&local, &remote), Resolution::Remote);
    }

    #[test]
    fn newer_non_deletion_without_ahead_component_still_loses_to_deletion() {
        // `local` is wall-clock newer, but the deletion side's clock already
        // reflects local's own ("a") component (e.g. it saw this write
        // before deleting), so the "AND by its component" half of the rule
        // fails even though the clocks are still concurrent overall (each
        // side has an unrelated component the other hasn't seen).
        let mut local_clock = VectorClock::origin("a");
        local_clock.merge(&VectorClock::origin("c"));
        let mut deletion_clock = VectorClock::origin("b");
        deletion_clock.merge(&VectorClock::origin("a"));
        let local = side("m1", "a", local_clock, false, 0.5, 0);
        let remote = side("m1", "b", deletion_clock, true, 0.5, 10);
        assert_eq!(resolve(&local, &remote), Resolution::Remote);
    }

    #[test]
    fn higher_credibility_breaks_ties_between_non_deletions() {
        let local = side("m1", "a", VectorClock::origin("a"), false, 0.9, 0);
        let remote = side("m1", "b", VectorClock::origin("b"), false, 0.3, 0);
        assert_eq!(resolve(&local, &remote), Resolution::Local);
    }

    #[test]
    fn lexicographic_id_is_the_last_resort() {
        let local = side("aaa", "a", VectorClock::origin("a"), false, 0.5, 0);
        let remote = side("zzz", "b", VectorClock::origin("b"), false, 0.5, 0);
        assert_eq!(resolve(&local, &remote), Resolution::Remote);
    }
}
