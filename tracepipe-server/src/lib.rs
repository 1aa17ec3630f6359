// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! HTTP server binary library: wires configuration, storage, the grouping
//! worker and the axum router together (§6, §9 redesign flag against a
//! process-global queue).

pub mod error;
pub mod grading;
pub mod ingest;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tracepipe_core::config::TracepipeConfig;
use tracepipe_core::store::{SqliteStore, TraceStore};
use tracepipe_grouping::GroupingWorker;
use tracepipe_parsers::ParserRegistry;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use state::AppState;

pub async fn run(config: TracepipeConfig) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracepipe_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(?config, "starting tracepipe server");

    let store: Arc<dyn TraceStore> = Arc::new(SqliteStore::open_in_dir(&config.storage.data_dir).await?);
    let parsers = Arc::new(ParserRegistry::new());
    let (grouping, consumer) = tracepipe_grouping::channel(config.grouping.queue_capacity);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = GroupingWorker::new(store.clone(), config.grouping.clone(), consumer);
    let worker_handle = worker.spawn(shutdown_rx);

    let state = AppState {
        store,
        parsers,
        grouping,
    };
    let app = routes::router(state, config.server.enable_cors);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!(addr = %config.server.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let shutdown_timeout = Duration::from_millis(config.grouping.worker_shutdown_timeout_ms);
    if tokio::time::timeout(shutdown_timeout, worker_handle).await.is_err() {
        tracing::warn!("grouping worker did not shut down within the configured timeout");
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
