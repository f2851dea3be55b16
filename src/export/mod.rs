pub mod http;
pub mod server;

use std::io::Write;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::store::snapshot::{DropCounts, Snapshot};

pub use self::http::HttpExporter;

/// A snapshot paired with the drop diagnostics accumulated since the
/// previous export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBatch {
    pub snapshot: Snapshot,
    pub drops: DropCounts,
}

/// Renders a batch in the line-oriented text format:
/// one `name kind value` row per populated metric, registry order,
/// preceded by drop diagnostics when any updates were lost.
pub fn render_text(batch: &ExportBatch) -> String {
    let records = batch.snapshot.records();
    let mut out = String::with_capacity(records.len() * 40 + 80);

    if batch.drops.capacity > 0 {
        out.push_str(&format!(
            "# metric store at capacity, {} updates dropped since last export\n",
            batch.drops.capacity
        ));
    }
    if batch.drops.detached > 0 {
        out.push_str(&format!(
            "# store detached, {} updates dropped since last export\n",
            batch.drops.detached
        ));
    }

    for record in &records {
        out.push_str(record.name);
        out.push(' ');
        out.push_str(record.kind);
        out.push(' ');
        out.push_str(&record.value.to_string());
        out.push('\n');
    }

    out
}

/// Exporter dispatches snapshot batches to stdout or HTTP backends.
///
/// Uses enum dispatch rather than trait objects for zero-cost async dispatch
/// (avoids `Pin<Box<dyn Future>>` overhead on every export call).
pub enum Exporter {
    Stdout(StdoutExporter),
    Http(HttpExporter),
}

impl Exporter {
    /// Returns the exporter name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Stdout(e) => e.name(),
            Self::Http(e) => e.name(),
        }
    }

    /// Initialize the exporter.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        match self {
            Self::Stdout(e) => e.start(ctx).await,
            Self::Http(e) => e.start(ctx).await,
        }
    }

    /// Export one batch. A failure is recoverable: the caller logs it,
    /// discards the batch, and retries on the next scheduled export.
    pub async fn export(&self, batch: &ExportBatch) -> Result<()> {
        match self {
            Self::Stdout(e) => e.export(batch).await,
            Self::Http(e) => e.export(batch).await,
        }
    }

    /// Shut down the exporter.
    pub async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Stdout(e) => e.stop(),
            Self::Http(e) => e.stop().await,
        }
    }
}

/// Writes the text rendering to stdout, one block per export.
#[derive(Default)]
pub struct StdoutExporter;

impl StdoutExporter {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "stdout"
    }

    pub async fn start(&mut self, _ctx: CancellationToken) -> Result<()> {
        Ok(())
    }

    pub async fn export(&self, batch: &ExportBatch) -> Result<()> {
        let text = render_text(batch);
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(text.as_bytes())
            .context("writing snapshot to stdout")?;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricId;
    use crate::store::MetricStore;

    fn batch(store: &MetricStore) -> ExportBatch {
        ExportBatch {
            snapshot: store.snapshot(),
            drops: store.take_drop_counts(),
        }
    }

    #[test]
    fn test_render_text_rows() {
        let store = MetricStore::new(16);
        store.set(MetricId::RunQueueLatency, 150_000_000).unwrap();
        store.increment(MetricId::SchedMigrations, 42).unwrap();

        let text = render_text(&batch(&store));
        assert_eq!(
            text,
            "run_queue_latency_ns gauge 150000000\nsched_migrations_count counter 42\n"
        );
    }

    #[test]
    fn test_render_text_empty_store() {
        let store = MetricStore::new(16);
        assert_eq!(render_text(&batch(&store)), "");
    }

    #[test]
    fn test_render_text_capacity_diagnostic() {
        let store = MetricStore::new(1);
        store.increment(MetricId::SchedMigrations, 1).unwrap();
        let _ = store.increment(MetricId::OomKills, 1);
        let _ = store.increment(MetricId::OomKills, 1);

        let text = render_text(&batch(&store));
        assert!(text
            .starts_with("# metric store at capacity, 2 updates dropped since last export\n"));
        assert!(text.ends_with("sched_migrations_count counter 1\n"));
    }

    #[test]
    fn test_render_text_detached_diagnostic() {
        let store = MetricStore::new(4);
        store.increment(MetricId::OomKills, 1).unwrap();
        store.detach();
        let _ = store.increment(MetricId::OomKills, 1);

        let text = render_text(&batch(&store));
        assert!(text.contains("# store detached, 1 updates dropped since last export\n"));
    }

    #[test]
    fn test_render_identical_without_updates() {
        let store = MetricStore::new(16);
        store.increment(MetricId::PageAllocs, 9).unwrap();

        let a = render_text(&batch(&store));
        let b = render_text(&batch(&store));
        assert_eq!(a, b);
    }
}
