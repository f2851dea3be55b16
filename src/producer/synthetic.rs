use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{EventHandler, RawEventData};

/// Synthetic kernel-event source for demo runs and pipeline exercising.
///
/// Emits a deterministic rotation of scheduler and memory events through the
/// same `EventHandler` boundary a real hook dispatcher would use. Real
/// probe attachment is an external collaborator; this source stands in for
/// it when no probes are wired up.
pub struct SyntheticProducer {
    interval: Duration,
    handler: EventHandler,
}

impl SyntheticProducer {
    /// Creates a producer firing one event burst per `interval`.
    pub fn new(interval: Duration, handler: EventHandler) -> Self {
        Self { interval, handler }
    }

    /// Spawns the event loop, stopping when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "synthetic producer started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut tick: u64 = 0;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("synthetic producer stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        for event in Self::events_for_tick(tick) {
                            (self.handler)(event);
                        }
                        tick = tick.wrapping_add(1);
                    }
                }
            }
        })
    }

    /// Deterministic event burst for one tick.
    fn events_for_tick(tick: u64) -> Vec<RawEventData> {
        let mut events = vec![
            RawEventData::SchedSwitch {
                voluntary: tick % 2 == 0,
                runqueue_latency_ns: 50_000 + (tick % 17) * 10_000,
            },
            RawEventData::PageFault {
                major: tick % 8 == 0,
            },
            RawEventData::PageAlloc {
                pages: 1 + tick % 4,
            },
        ];

        if tick % 3 == 0 {
            events.push(RawEventData::SchedMigration);
        }
        if tick % 5 == 0 {
            events.push(RawEventData::PageFree { pages: 1 + tick % 3 });
        }
        if tick % 32 == 0 {
            events.push(RawEventData::SwapOut { pages: 2 });
            events.push(RawEventData::SwapIn { pages: 1 });
        }

        events
    }
}
