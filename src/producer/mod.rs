pub mod synthetic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::registry::MetricId;
use crate::store::{MetricStore, Operation, UpdateError};

/// A raw kernel event notification, as delivered by an external hook
/// dispatcher. The hook mechanism itself (tracepoint/kprobe attachment) is
/// an external collaborator; this is the boundary it calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventData {
    /// Scheduler switched tasks on a CPU.
    SchedSwitch {
        /// Whether the outgoing task yielded voluntarily.
        voluntary: bool,
        /// Time the incoming task spent waiting on the run queue.
        runqueue_latency_ns: u64,
    },
    /// A task migrated between CPUs.
    SchedMigration,
    /// A page fault was taken.
    PageFault { major: bool },
    /// Pages were allocated from the kernel allocator.
    PageAlloc { pages: u64 },
    /// Pages were returned to the kernel allocator.
    PageFree { pages: u64 },
    /// Pages were swapped in.
    SwapIn { pages: u64 },
    /// Pages were swapped out.
    SwapOut { pages: u64 },
    /// The OOM killer terminated a process.
    OomKill { victim_pid: u32 },
}

/// Callback handed to the external hook dispatcher, one invocation per
/// kernel event.
pub type EventHandler = Box<dyn Fn(RawEventData) + Send + Sync>;

/// Translates kernel events into store updates.
///
/// Runs in producer context: bounded time, no allocation, no blocking, no
/// error propagation. Both failure modes are swallowed (metrics are
/// best-effort); `CapacityExceeded` drops are counted by the store and
/// `Detached` is additionally logged once per session.
pub struct ProducerAdapter {
    store: Arc<MetricStore>,
    detached_logged: AtomicBool,
}

impl ProducerAdapter {
    /// Creates an adapter writing to `store`.
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self {
            store,
            detached_logged: AtomicBool::new(false),
        }
    }

    /// Receives one kernel event and applies the corresponding updates.
    pub fn on_event(&self, event: RawEventData) {
        match event {
            RawEventData::SchedSwitch {
                voluntary,
                runqueue_latency_ns,
            } => {
                self.apply(MetricId::SchedSwitches, 1);
                if voluntary {
                    self.apply(MetricId::SchedSwitchesVoluntary, 1);
                }
                self.apply(MetricId::RunQueueLatency, runqueue_latency_ns);
            }
            RawEventData::SchedMigration => {
                self.apply(MetricId::SchedMigrations, 1);
            }
            RawEventData::PageFault { major } => {
                let id = if major {
                    MetricId::PageFaultsMajor
                } else {
                    MetricId::PageFaultsMinor
                };
                self.apply(id, 1);
            }
            RawEventData::PageAlloc { pages } => {
                self.apply(MetricId::PageAllocs, pages);
            }
            RawEventData::PageFree { pages } => {
                self.apply(MetricId::PageFrees, pages);
            }
            RawEventData::SwapIn { pages } => {
                self.apply(MetricId::SwapInPages, pages);
            }
            RawEventData::SwapOut { pages } => {
                self.apply(MetricId::SwapOutPages, pages);
            }
            RawEventData::OomKill { victim_pid } => {
                self.apply(MetricId::OomKills, 1);
                self.apply(MetricId::LastOomVictimPid, u64::from(victim_pid));
            }
        }
    }

    /// Applies one update using the operation dictated by the registry kind,
    /// dropping failures.
    fn apply(&self, id: MetricId, value: u64) {
        let op = MetricStore::operation_for(id, value);
        match self.store.update(id, op) {
            Ok(()) => {}
            Err(UpdateError::CapacityExceeded) => {
                // Counted by the store; surfaced in export diagnostics.
            }
            Err(UpdateError::Detached) => {
                if self
                    .detached_logged
                    .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    warn!("update after detach, dropping events for the rest of the session");
                }
            }
        }
    }

    /// Builds the boxed callback handed to the hook dispatcher.
    pub fn handler(self: &Arc<Self>) -> EventHandler {
        let adapter = Arc::clone(self);
        Box::new(move |event| adapter.on_event(event))
    }

    /// Direct access to the backing store, for the lifecycle controller.
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }
}

/// Exposes the raw operation boundary for callers that already computed an
/// id and operation (the `update(MetricId, Operation)` contract).
pub fn update(store: &MetricStore, id: MetricId, op: Operation) -> Result<(), UpdateError> {
    store.update(id, op)
}
