pub mod snapshot;

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use thiserror::Error;

use crate::registry::{MetricId, MetricKind, METRIC_CARDINALITY};

use self::snapshot::{DropCounts, Snapshot};

/// Slot has never been written.
const SLOT_EMPTY: u8 = 0;
/// A writer holds the slot and is applying the first value.
const SLOT_RESERVED: u8 = 1;
/// Slot is published and visible to snapshots.
const SLOT_LIVE: u8 = 2;

/// Store accepts updates.
const STORE_ATTACHED: u8 = 0;
/// Store has been detached; all updates fail with `Detached`.
const STORE_DETACHED: u8 = 1;

/// A single update operation at the producer→store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Atomically add a delta (counter semantics, saturating).
    Increment(u64),
    /// Atomically replace the value (gauge semantics, last-write-wins).
    Set(u64),
}

/// Non-fatal update failures. The offending update is dropped; store state
/// is never altered by a failed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// The id has no slot yet and the store is at capacity.
    #[error("metric store at capacity")]
    CapacityExceeded,
    /// The update arrived after the store left the active state.
    #[error("metric store detached")]
    Detached,
}

struct Slot {
    state: AtomicU8,
    value: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SLOT_EMPTY),
            value: AtomicU64::new(0),
        }
    }
}

/// Lock-free fixed-capacity metric store.
///
/// One slot per registry id, indexed by the id's ordinal, so first-write
/// admission degenerates to direct indexing with no collision handling.
/// Every write on a live slot is a single atomic read-modify-write; writers
/// never take a lock, allocate, or wait on the snapshot reader. Capacity
/// bounds the number of *admitted* (distinct, ever-written) ids, which lets
/// small-capacity configurations exercise the refusal path while the slot
/// array stays statically sized.
pub struct MetricStore {
    slots: [Slot; METRIC_CARDINALITY],
    capacity: usize,
    admitted: AtomicUsize,
    lifecycle: AtomicU8,
    dropped_capacity: AtomicU64,
    dropped_detached: AtomicU64,
}

impl MetricStore {
    /// Creates an attached store admitting at most `capacity` distinct ids.
    /// A zero capacity is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::new()),
            capacity: capacity.max(1),
            admitted: AtomicUsize::new(0),
            lifecycle: AtomicU8::new(STORE_ATTACHED),
            dropped_capacity: AtomicU64::new(0),
            dropped_detached: AtomicU64::new(0),
        }
    }

    /// Maximum number of distinct ids this store will admit.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of distinct ids admitted so far.
    pub fn len(&self) -> usize {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Whether no id has been admitted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically adds `delta` to the entry for `id`, creating it with
    /// initial value `delta` if absent.
    pub fn increment(&self, id: MetricId, delta: u64) -> Result<(), UpdateError> {
        self.update(id, Operation::Increment(delta))
    }

    /// Atomically replaces the entry for `id` with `value`, creating it if
    /// absent.
    pub fn set(&self, id: MetricId, value: u64) -> Result<(), UpdateError> {
        self.update(id, Operation::Set(value))
    }

    /// The producer→store call boundary: applies one operation.
    ///
    /// Safe under arbitrary concurrency, including re-entrant callers on the
    /// same logical processor. The only fallible path is first-write
    /// admission; on failure the store is unchanged (no partial insert).
    pub fn update(&self, id: MetricId, op: Operation) -> Result<(), UpdateError> {
        if self.lifecycle.load(Ordering::Acquire) != STORE_ATTACHED {
            self.dropped_detached.fetch_add(1, Ordering::Relaxed);
            return Err(UpdateError::Detached);
        }

        let slot = &self.slots[id.index()];

        loop {
            match slot.state.load(Ordering::Acquire) {
                // A RESERVED slot already consumed a capacity unit; applying
                // directly is safe: concurrent adds accumulate on the zeroed
                // value, concurrent sets are last-write-wins.
                SLOT_LIVE | SLOT_RESERVED => {
                    Self::apply(slot, op);
                    return Ok(());
                }
                _ => {
                    // Reserve a capacity unit before touching the slot so a
                    // refused insert leaves no trace.
                    let reserved = self
                        .admitted
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                            (n < self.capacity).then_some(n + 1)
                        })
                        .is_ok();

                    if !reserved {
                        // The slot may have been claimed by a racing writer
                        // between our two loads; if so the id is admitted and
                        // the update must not be refused.
                        if slot.state.load(Ordering::Acquire) != SLOT_EMPTY {
                            Self::apply(slot, op);
                            return Ok(());
                        }
                        self.dropped_capacity.fetch_add(1, Ordering::Relaxed);
                        return Err(UpdateError::CapacityExceeded);
                    }

                    match slot.state.compare_exchange(
                        SLOT_EMPTY,
                        SLOT_RESERVED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            Self::apply(slot, op);
                            slot.state.store(SLOT_LIVE, Ordering::Release);
                            return Ok(());
                        }
                        Err(_) => {
                            // Lost the claim race; return the unused
                            // reservation. The next iteration observes the
                            // slot as claimed, so the retry is bounded.
                            self.admitted.fetch_sub(1, Ordering::AcqRel);
                        }
                    }
                }
            }
        }
    }

    /// Applies an operation to a claimed slot. Counters saturate at
    /// `u64::MAX` rather than wrapping.
    fn apply(slot: &Slot, op: Operation) {
        match op {
            Operation::Increment(delta) => {
                // Closure always returns Some, so fetch_update cannot fail.
                let _ = slot
                    .value
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                        Some(v.saturating_add(delta))
                    });
            }
            Operation::Set(value) => {
                slot.value.store(value, Ordering::Relaxed);
            }
        }
    }

    /// Produces a point-in-time copy of all admitted entries, in registry
    /// order. Never blocks writers; each entry is independently consistent,
    /// but entries are not guaranteed to reflect one common instant.
    pub fn snapshot(&self) -> Snapshot {
        let mut entries = Vec::with_capacity(self.len());

        for id in MetricId::all() {
            let slot = &self.slots[id.index()];
            if slot.state.load(Ordering::Acquire) == SLOT_LIVE {
                entries.push((*id, slot.value.load(Ordering::Relaxed)));
            }
        }

        Snapshot::new(entries)
    }

    /// Rejects all further updates with `Detached`. One-way; part of the
    /// ACTIVE → DRAINING lifecycle transition.
    pub fn detach(&self) {
        self.lifecycle.store(STORE_DETACHED, Ordering::Release);
    }

    /// Whether the store still accepts updates.
    pub fn is_attached(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == STORE_ATTACHED
    }

    /// Clears all entries and the admission count. Session-boundary only:
    /// callers must guarantee no producer is concurrently updating.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.value.store(0, Ordering::Relaxed);
            slot.state.store(SLOT_EMPTY, Ordering::Release);
        }
        self.admitted.store(0, Ordering::Release);
    }

    /// Atomically reads and resets the dropped-update counters, for the
    /// export-time "N updates dropped" diagnostic.
    pub fn take_drop_counts(&self) -> DropCounts {
        DropCounts {
            capacity: self.dropped_capacity.swap(0, Ordering::Relaxed),
            detached: self.dropped_detached.swap(0, Ordering::Relaxed),
        }
    }

    /// The operation a producer should use for `id`, per its registry kind.
    pub fn operation_for(id: MetricId, value: u64) -> Operation {
        match id.kind() {
            MetricKind::Counter => Operation::Increment(value),
            MetricKind::Gauge => Operation::Set(value),
        }
    }
}
