//! Vector Clock Algebra
//!
//! Causal ordering primitive shared by the Memory Engine and Sync Service.
//! Every memory carries a `machine_id -> counter` map; a node increments its
//! own component on every local write and takes the elementwise maximum when
//! merging a remote clock in.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How two vector clocks relate to one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// `self` happened-before `other`.
    Before,
    /// `self` happened-after `other`.
    After,
    /// Clocks are identical.
    Equal,
    /// Neither dominates: concurrent writes, needs conflict resolution.
    Concurrent,
}

/// A vector clock: one counter per machine that has ever touched the record.
///
/// Uses a `BTreeMap` so serialization and iteration order are deterministic,
/// which matters for the `(id, vector_clock_snapshot)` idempotency key used
/// by the sync journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    /// An empty clock, as assigned to a brand-new memory before its first write.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a clock with a single machine already incremented once.
    pub fn origin(machine_id: &str) -> Self {
        let mut clock = Self::new();
        clock.increment(machine_id);
        clock
    }

    /// Current counter for a machine (0 if it has never written this record).
    pub fn get(&self, machine_id: &str) -> u64 {
        self.0.get(machine_id).copied().unwrap_or(0)
    }

    /// Increment this node's own component. Called on every local
    /// `store`/`update`/`delete`; the Memory Engine invariant is that this
    /// strictly increases after any of those operations complete.
    pub fn increment(&mut self, machine_id: &str) -> u64 {
        let counter = self.0.entry(machine_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Merge another clock into this one by taking the elementwise maximum.
    /// This is the operation applied when a sync event is received: it
    /// never decreases any component, so repeated merges are idempotent.
    pub fn merge(&mut self, other: &VectorClock) {
        for (machine, counter) in &other.0 {
            let entry = self.0.entry(machine.clone()).or_insert(0);
            if *counter > *entry {
                *entry = *counter;
            }
        }
    }

    /// Returns a clock that is the elementwise maximum of `self` and `other`,
    /// without mutating either.
    pub fn merged_with(&self, other: &VectorClock) -> VectorClock {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Compare two clocks for causal ordering.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        if self == other {
            return ClockOrdering::Equal;
        }

        let mut self_ahead = false;
        let mut other_ahead = false;

        let machines = self.0.keys().chain(other.0.keys());
        for machine in machines {
            let a = self.get(machine);
            let b = other.get(machine);
            match a.cmp(&b) {
                Ordering::Greater => self_ahead = true,
                Ordering::Less => other_ahead = true,
                Ordering::Equal => {}
            }
        }

        match (self_ahead, other_ahead) {
            (true, false) => ClockOrdering::After,
            (false, true) => ClockOrdering::Before,
            (false, false) => ClockOrdering::Equal,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Convenience: does `self` dominate (is causally after or equal to) `other`?
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(self.compare(other), ClockOrdering::After | ClockOrdering::Equal)
    }

    /// True if this clock has never recorded a write (fresh memory placeholder).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(machine_id, counter)` pairs, sorted by machine_id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_is_monotonic() {
        let mut clock = VectorClock::new();
        assert_eq!(clock.get("m1"), 0);
        clock.increment("m1");
        clock.increment("m1");
        assert_eq!(clock.get("m1"), 2);
    }

    #[test]
    fn merge_takes_elementwise_max() {
        let mut a = VectorClock::new();
        a.increment("m1");
        a.increment("m1");

        let mut b = VectorClock::new();
        b.increment("m1");
        b.increment("m2");

        a.merge(&b);
        assert_eq!(a.get("m1"), 2);
        assert_eq!(a.get("m2"), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = VectorClock::new();
        a.increment("m1");
        let b = a.clone();

        a.merge(&b);
        a.merge(&b);
        assert_eq!(a, b);
    }

    #[test]
    fn detects_concurrent_writes() {
        let mut a = VectorClock::new();
        a.increment("m1");

        let mut b = VectorClock::new();
        b.increment("m2");

        assert_eq!(a.compare(&b), ClockOrdering::Concurrent);
        assert_eq!(b.compare(&a), ClockOrdering::Concurrent);
    }

    #[test]
    fn detects_before_after() {
        let mut a = VectorClock::new();
        a.increment("m1");

        let mut b = a.clone();
        b.increment("m1");

        assert_eq!(a.compare(&b), ClockOrdering::Before);
        assert_eq!(b.compare(&a), ClockOrdering::After);
        assert!(b.dominates(&a));
        assert!(!a.dominates(&b));
    }

    #[test]
    fn equal_clocks_both_dominate() {
        let mut a = VectorClock::new();
        a.increment("m1");
        let b = a.clone();

        assert_eq!(a.compare(&b), ClockOrdering::Equal);
        assert!(a.dominates(&b));
        assert!(b.dominates(&a));
    }
}
