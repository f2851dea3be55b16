use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::HttpExportConfig;

use super::ExportBatch;

/// One NDJSON row of the HTTP export payload.
#[derive(Debug, Clone, Serialize)]
struct SnapshotRowJson {
    name: &'static str,
    kind: &'static str,
    value: u64,
    taken_at: String,
    #[serde(skip_serializing_if = "is_zero_u64")]
    dropped_capacity: u64,
    #[serde(skip_serializing_if = "is_zero_u64")]
    dropped_detached: u64,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// HTTP NDJSON push exporter.
///
/// Converts each snapshot into newline-delimited JSON and POSTs it to the
/// configured address. One snapshot is one small request, so there is no
/// batching queue; a failed delivery is logged by the caller, the snapshot
/// discarded, and the next scheduled export retried fresh.
pub struct HttpExporter {
    cfg: HttpExportConfig,
    client: Option<reqwest::Client>,
}

impl HttpExporter {
    /// Creates a new HTTP exporter with the given configuration.
    pub fn new(cfg: HttpExportConfig) -> Self {
        Self { cfg, client: None }
    }

    /// Returns the exporter name for logging.
    pub fn name(&self) -> &str {
        "http"
    }

    /// Builds the HTTP client.
    pub async fn start(&mut self, _ctx: CancellationToken) -> Result<()> {
        if self.cfg.address.is_empty() {
            bail!("http exporter address is empty");
        }

        let mut client_builder = reqwest::Client::builder().timeout(self.cfg.export_timeout);

        if !self.cfg.keep_alive {
            client_builder = client_builder.pool_max_idle_per_host(0);
        }

        let client = client_builder.build().context("building HTTP client")?;
        self.client = Some(client);

        tracing::info!(address = %self.cfg.address, "HTTP exporter started");

        Ok(())
    }

    /// POSTs the batch as NDJSON. Errors are recoverable export failures.
    pub async fn export(&self, batch: &ExportBatch) -> Result<()> {
        let client = match &self.client {
            Some(client) => client,
            None => return Ok(()),
        };

        if batch.snapshot.is_empty() && batch.drops.total() == 0 {
            return Ok(());
        }

        let body = Self::render_ndjson(batch)?;

        let mut request = client
            .post(&self.cfg.address)
            .header("Content-Type", "application/x-ndjson")
            .body(body);

        for (key, value) in &self.cfg.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("POST {}", self.cfg.address))?;

        let status = response.status();
        if !status.is_success() {
            bail!("snapshot delivery refused with status {status}");
        }

        Ok(())
    }

    /// Drops the client; in-flight requests are abandoned with the runtime.
    pub async fn stop(&mut self) -> Result<()> {
        self.client.take();
        Ok(())
    }

    /// Serializes one batch to newline-delimited JSON. Drop diagnostics ride
    /// on the first row only.
    fn render_ndjson(batch: &ExportBatch) -> Result<String> {
        let taken_at = batch.snapshot.taken_at().to_rfc3339();
        let mut body = String::new();

        for (i, record) in batch.snapshot.records().iter().enumerate() {
            let row = SnapshotRowJson {
                name: record.name,
                kind: record.kind,
                value: record.value,
                taken_at: taken_at.clone(),
                dropped_capacity: if i == 0 { batch.drops.capacity } else { 0 },
                dropped_detached: if i == 0 { batch.drops.detached } else { 0 },
            };
            body.push_str(&serde_json::to_string(&row).context("serializing snapshot row")?);
            body.push('\n');
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricId;
    use crate::store::snapshot::DropCounts;
    use crate::store::MetricStore;

    fn sample_batch() -> ExportBatch {
        let store = MetricStore::new(16);
        store.set(MetricId::RunQueueLatency, 150).unwrap();
        store.increment(MetricId::SchedMigrations, 7).unwrap();
        ExportBatch {
            snapshot: store.snapshot(),
            drops: DropCounts {
                capacity: 3,
                detached: 0,
            },
        }
    }

    #[test]
    fn test_render_ndjson_rows() {
        let body = HttpExporter::render_ndjson(&sample_batch()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["name"], "run_queue_latency_ns");
        assert_eq!(first["kind"], "gauge");
        assert_eq!(first["value"], 150);
        assert_eq!(first["dropped_capacity"], 3);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["name"], "sched_migrations_count");
        assert_eq!(second["kind"], "counter");
        assert_eq!(second["value"], 7);
        // Diagnostics appear on the first row only.
        assert!(second.get("dropped_capacity").is_none());
    }

    #[test]
    fn test_export_without_start_is_noop() {
        let exporter = HttpExporter::new(HttpExportConfig::default());
        let batch = sample_batch();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async { exporter.export(&batch).await }).unwrap();
    }

    #[test]
    fn test_start_requires_address() {
        let mut exporter = HttpExporter::new(HttpExportConfig::default());
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let err = rt
            .block_on(async { exporter.start(CancellationToken::new()).await })
            .unwrap_err();
        assert!(err.to_string().contains("address"));
    }
}
