use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::store::snapshot::DropCounts;
use crate::store::MetricStore;

use super::{render_text, ExportBatch};

/// Pull-style snapshot server.
///
/// Serves the current store contents in the line-oriented text format at
/// `GET /snapshot`, plus a `GET /healthz` liveness probe. Each request takes
/// a fresh snapshot; the interval exporter's drop diagnostics are not
/// drained here, so pulling never perturbs the push path.
pub struct SnapshotServer {
    store: Arc<MetricStore>,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

impl SnapshotServer {
    /// Creates a server reading from `store`, bound to `addr` on start.
    pub fn new(store: Arc<MetricStore>, addr: &str) -> Self {
        Self {
            store,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Starts serving. Accepts the ":port" shorthand for all-interfaces.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9464"
        } else {
            &self.addr
        };

        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::clone(&self.store);

        let app = Router::new()
            .route("/snapshot", get(snapshot_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "snapshot server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "snapshot server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// GET /snapshot - current metric values, text format.
async fn snapshot_handler(State(store): State<Arc<MetricStore>>) -> String {
    let batch = ExportBatch {
        snapshot: store.snapshot(),
        drops: DropCounts::default(),
    };
    render_text(&batch)
}

/// GET /healthz - simple liveness check.
async fn healthz_handler() -> &'static str {
    "ok"
}
