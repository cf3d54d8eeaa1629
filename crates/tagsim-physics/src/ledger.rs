//! Pending arrivals at one receiver.
//!
//! Each transmission leaves one [`Arrival`] per receiver in that receiver's
//! ledger together with a scheduled arrival event. When the first of several
//! near-simultaneous events fires, the ledger hands back every arrival inside
//! the resolution window so they can be superposed; the events of the
//! arrivals it consumed later find nothing and are skipped.
//!
//! The window looks ahead. An arrival at `t` takes everything pending in
//! `[t, t + window]`, including arrivals whose own events are still queued
//! for a later time. The reception is therefore delivered at the earliest
//! arrival's time and reports that arrival's sender and distance; the later
//! arrivals only contribute their phasors. Windows are anchored on whichever
//! arrival fires first, so a chain spaced just under the window apart is
//! split into consecutive receptions rather than merged end to end.

use crate::Arrival;
use std::collections::{BTreeMap, HashMap};
use tagsim_common::{ArrivalId, SimTime};

/// Arrivals waiting to be delivered to one receiver, ordered by time.
#[derive(Debug, Default)]
pub struct ReceptionLedger {
    pending: BTreeMap<(SimTime, ArrivalId), Arrival>,
    index: HashMap<ArrivalId, SimTime>,
}

impl ReceptionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arrival.
    pub fn insert(&mut self, arrival: Arrival) {
        self.index.insert(arrival.id, arrival.time);
        self.pending.insert((arrival.time, arrival.id), arrival);
    }

    /// Whether an arrival is still pending.
    pub fn contains(&self, id: ArrivalId) -> bool {
        self.index.contains_key(&id)
    }

    /// Number of pending arrivals.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove and return every pending arrival up to `window` after arrival `id`.
    ///
    /// Returns `None` if `id` was already consumed by an earlier window.
    /// Arrivals come back in time order, earliest first.
    pub fn take_window(&mut self, id: ArrivalId, window: SimTime) -> Option<Vec<Arrival>> {
        let start = *self.index.get(&id)?;
        let end = (start + window, ArrivalId(u64::MAX));

        let keys: Vec<(SimTime, ArrivalId)> =
            self.pending.range(..=end).map(|(key, _)| *key).collect();

        let mut taken = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(arrival) = self.pending.remove(&key) {
                self.index.remove(&key.1);
                taken.push(arrival);
            }
        }
        Some(taken)
    }
}
