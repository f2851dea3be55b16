use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::MetricId;

/// Updates dropped since the last export, by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    /// Updates refused because the store was at capacity.
    pub capacity: u64,
    /// Updates refused after the store was detached.
    pub detached: u64,
}

impl DropCounts {
    /// Total dropped updates.
    pub fn total(&self) -> u64 {
        self.capacity + self.detached
    }
}

/// One consumer-facing export record: `(name, kind, value)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportRecord {
    pub name: &'static str,
    pub kind: &'static str,
    pub value: u64,
}

/// An immutable point-in-time copy of all admitted metric values.
///
/// Entries are in registry-declaration order. Owned solely by the caller
/// once produced; never mutated after creation. Equality is structural over
/// the entries, so two exports without intervening updates compare equal
/// even though their capture times differ.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Vec<(MetricId, u64)>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub(crate) fn new(entries: Vec<(MetricId, u64)>) -> Self {
        Self {
            entries,
            taken_at: Utc::now(),
        }
    }

    /// All entries in registry order.
    pub fn entries(&self) -> &[(MetricId, u64)] {
        &self.entries
    }

    /// The value for `id`, if it was admitted when the snapshot was taken.
    pub fn get(&self, id: MetricId) -> Option<u64> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, v)| *v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When this snapshot was captured.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Projects the entries into export records, registry order preserved.
    pub fn records(&self) -> Vec<ExportRecord> {
        self.entries
            .iter()
            .map(|(id, value)| ExportRecord {
                name: id.as_str(),
                kind: id.kind().as_str(),
                value: *value,
            })
            .collect()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Snapshot {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_preserve_order_and_kind() {
        let snap = Snapshot::new(vec![
            (MetricId::RunQueueLatency, 150),
            (MetricId::SchedMigrations, 42),
        ]);

        let records = snap.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "run_queue_latency_ns");
        assert_eq!(records[0].kind, "gauge");
        assert_eq!(records[0].value, 150);
        assert_eq!(records[1].name, "sched_migrations_count");
        assert_eq!(records[1].kind, "counter");
        assert_eq!(records[1].value, 42);
    }

    #[test]
    fn test_equality_ignores_capture_time() {
        let a = Snapshot::new(vec![(MetricId::OomKills, 1)]);
        let b = Snapshot::new(vec![(MetricId::OomKills, 1)]);
        let c = Snapshot::new(vec![(MetricId::OomKills, 2)]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_get_missing_entry() {
        let snap = Snapshot::new(vec![(MetricId::PageAllocs, 5)]);
        assert_eq!(snap.get(MetricId::PageAllocs), Some(5));
        assert_eq!(snap.get(MetricId::PageFrees), None);
    }
}
