use std::sync::Arc;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::export::server::SnapshotServer;
use crate::export::{ExportBatch, Exporter, HttpExporter, StdoutExporter};
use crate::producer::synthetic::SyntheticProducer;
use crate::producer::{EventHandler, ProducerAdapter};
use crate::store::MetricStore;

/// Collection-session lifecycle states. Transitions are one-directional;
/// there is no resurrection from Terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    Active,
    Draining,
    Terminated,
}

/// Agent owns the store and orchestrates producers and exporters around one
/// collection session.
pub struct Agent {
    cfg: Config,
    state: AgentState,
    store: Option<Arc<MetricStore>>,
    adapter: Option<Arc<ProducerAdapter>>,
    exporters: Arc<tokio::sync::Mutex<Vec<Exporter>>>,
    server: Option<SnapshotServer>,
    cancel: CancellationToken,
    export_task: Option<tokio::task::JoinHandle<()>>,
    synthetic_task: Option<tokio::task::JoinHandle<()>>,
}

impl Agent {
    /// Creates a new agent. Nothing is allocated until `start`.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            state: AgentState::Uninitialized,
            store: None,
            adapter: None,
            exporters: Arc::new(tokio::sync::Mutex::new(Vec::with_capacity(2))),
            server: None,
            cancel: CancellationToken::new(),
            export_task: None,
            synthetic_task: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Allocates the store and starts exporters, the snapshot server, the
    /// export ticker, and the optional synthetic producer. No producer may
    /// run before this completes.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != AgentState::Uninitialized {
            bail!("agent cannot start from state {:?}", self.state);
        }

        // 1. Allocate the store at the declared capacity.
        let store = Arc::new(MetricStore::new(self.cfg.capacity));
        info!(capacity = store.capacity(), "metric store allocated");

        // 2. Build the producer adapter.
        let adapter = Arc::new(ProducerAdapter::new(Arc::clone(&store)));

        // 3. Configure and start exporters.
        {
            let mut exporters = self.exporters.lock().await;

            if self.cfg.export.stdout.enabled {
                exporters.push(Exporter::Stdout(StdoutExporter::new()));
            }

            if self.cfg.export.http.enabled {
                exporters.push(Exporter::Http(HttpExporter::new(
                    self.cfg.export.http.clone(),
                )));
            }

            for exporter in exporters.iter_mut() {
                exporter.start(self.cancel.child_token()).await?;
                info!(exporter = exporter.name(), "exporter started");
            }
        }

        // 4. Start the pull-style snapshot server if enabled.
        if self.cfg.export.server.enabled {
            let server = SnapshotServer::new(Arc::clone(&store), &self.cfg.export.server.addr);
            server.start().await?;
            self.server = Some(server);
        }

        // 5. Spawn the scheduled export ticker.
        self.export_task = Some(Self::spawn_export_ticker(
            Arc::clone(&store),
            Arc::clone(&self.exporters),
            self.cfg.export.interval,
            self.cancel.child_token(),
        ));

        // 6. Spawn the synthetic event source if enabled.
        if self.cfg.synthetic.enabled {
            let producer = SyntheticProducer::new(self.cfg.synthetic.interval, adapter.handler());
            self.synthetic_task = Some(producer.spawn(self.cancel.child_token()));
        }

        self.store = Some(store);
        self.adapter = Some(adapter);
        self.state = AgentState::Active;

        info!("agent active");

        Ok(())
    }

    /// Returns a fresh event callback for an external hook dispatcher, only
    /// while the session is active.
    pub fn handler(&self) -> Option<EventHandler> {
        if self.state != AgentState::Active {
            return None;
        }
        self.adapter.as_ref().map(ProducerAdapter::handler)
    }

    /// Drains and terminates the session: detaches the store (further
    /// updates fail with `Detached`), stops background tasks, performs one
    /// final export, then releases all resources. Safe to call repeatedly.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != AgentState::Active {
            debug!(state = ?self.state, "stop ignored");
            return Ok(());
        }

        // ACTIVE -> DRAINING: no further updates are accepted. Updates
        // racing the detach either complete first or are rejected whole.
        self.state = AgentState::Draining;
        if let Some(store) = &self.store {
            store.detach();
        }

        // Stop the ticker and synthetic producer before the final export so
        // the drain snapshot is the last one.
        self.cancel.cancel();

        if let Some(task) = self.export_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "export task join failed");
            }
        }
        if let Some(task) = self.synthetic_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "synthetic producer join failed");
            }
        }

        // Final snapshot export.
        if let Some(store) = &self.store {
            let batch = ExportBatch {
                snapshot: store.snapshot(),
                drops: store.take_drop_counts(),
            };
            Self::export_batch(&self.exporters, &batch).await;
        }

        // Shut down exporters and the snapshot server.
        {
            let mut exporters = self.exporters.lock().await;
            for exporter in exporters.iter_mut() {
                if let Err(e) = exporter.stop().await {
                    warn!(exporter = exporter.name(), error = %e, "exporter stop failed");
                }
            }
            exporters.clear();
        }

        if let Some(server) = self.server.take() {
            server.stop().await?;
        }

        // DRAINING -> TERMINATED: release the store.
        self.adapter.take();
        self.store.take();
        self.state = AgentState::Terminated;

        info!("agent terminated");

        Ok(())
    }

    /// Administrative session-boundary reset. Must not race active
    /// producers; callers detach or pause event sources first.
    pub fn reset(&self) {
        if let Some(store) = &self.store {
            store.reset();
            info!("metric store reset");
        }
    }

    /// Performs one on-demand export outside the ticker schedule.
    pub async fn export_once(&self) -> Result<()> {
        let store = match &self.store {
            Some(store) => store,
            None => bail!("agent has no active store"),
        };

        let batch = ExportBatch {
            snapshot: store.snapshot(),
            drops: store.take_drop_counts(),
        };
        Self::export_batch(&self.exporters, &batch).await;

        Ok(())
    }

    /// Spawns the scheduled export loop.
    fn spawn_export_ticker(
        store: Arc<MetricStore>,
        exporters: Arc<tokio::sync::Mutex<Vec<Exporter>>>,
        interval: std::time::Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let batch = ExportBatch {
                            snapshot: store.snapshot(),
                            drops: store.take_drop_counts(),
                        };

                        if batch.drops.capacity > 0 {
                            warn!(
                                dropped = batch.drops.capacity,
                                "metric store at capacity, updates dropped since last export",
                            );
                        }

                        Self::export_batch(&exporters, &batch).await;
                    }
                }
            }
        })
    }

    /// Delivers one batch to every exporter. A failed delivery discards the
    /// batch for that exporter; the next scheduled export retries fresh.
    async fn export_batch(exporters: &tokio::sync::Mutex<Vec<Exporter>>, batch: &ExportBatch) {
        let exporters = exporters.lock().await;
        for exporter in exporters.iter() {
            if let Err(e) = exporter.export(batch).await {
                warn!(exporter = exporter.name(), error = %e, "export failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::RawEventData;
    use crate::registry::MetricId;

    fn quiet_config() -> Config {
        let mut cfg = Config::default();
        cfg.export.stdout.enabled = true;
        cfg.export.interval = std::time::Duration::from_secs(3600);
        cfg
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let mut agent = Agent::new(quiet_config());
        assert_eq!(agent.state(), AgentState::Uninitialized);
        assert!(agent.handler().is_none());

        agent.start().await.unwrap();
        assert_eq!(agent.state(), AgentState::Active);
        assert!(agent.handler().is_some());

        agent.stop().await.unwrap();
        assert_eq!(agent.state(), AgentState::Terminated);
        assert!(agent.handler().is_none());
    }

    #[tokio::test]
    async fn test_no_restart_after_terminated() {
        let mut agent = Agent::new(quiet_config());
        agent.start().await.unwrap();
        agent.stop().await.unwrap();

        let err = agent.start().await.unwrap_err();
        assert!(err.to_string().contains("Terminated"));
    }

    #[tokio::test]
    async fn test_double_start_refused() {
        let mut agent = Agent::new(quiet_config());
        agent.start().await.unwrap();
        assert!(agent.start().await.is_err());
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_stop_is_noop() {
        let mut agent = Agent::new(quiet_config());
        agent.start().await.unwrap();
        agent.stop().await.unwrap();
        agent.stop().await.unwrap();
        assert_eq!(agent.state(), AgentState::Terminated);
    }

    #[tokio::test]
    async fn test_events_rejected_after_stop() {
        let mut agent = Agent::new(quiet_config());
        agent.start().await.unwrap();

        let handler = agent.handler().unwrap();
        handler(RawEventData::SchedMigration);

        // Snapshot the value before the drain discards the store.
        let store = Arc::clone(agent.store.as_ref().unwrap());
        assert_eq!(store.snapshot().get(MetricId::SchedMigrations), Some(1));

        agent.stop().await.unwrap();

        // The handler outlives the agent but every update is now dropped.
        handler(RawEventData::SchedMigration);
        assert_eq!(store.snapshot().get(MetricId::SchedMigrations), Some(1));
    }

    #[tokio::test]
    async fn test_export_once_requires_store() {
        let agent = Agent::new(quiet_config());
        assert!(agent.export_once().await.is_err());
    }

    #[tokio::test]
    async fn test_reset_clears_session_values() {
        let mut agent = Agent::new(quiet_config());
        agent.start().await.unwrap();

        let handler = agent.handler().unwrap();
        handler(RawEventData::PageFault { major: true });

        let store = Arc::clone(agent.store.as_ref().unwrap());
        assert_eq!(store.snapshot().len(), 1);

        agent.reset();
        assert!(store.snapshot().is_empty());

        agent.stop().await.unwrap();
    }
}
