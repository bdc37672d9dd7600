//! Binary entrypoint: wires Config, the Upstream Client, the Record
//! Store, the job registry, and the Orchestrator into a running axum
//! server plus a cron Scheduler.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campsync_core::domains::jobs;
use campsync_core::kernel::orchestrator::Orchestrator;
use campsync_core::kernel::record_store::SqliteRecordStore;
use campsync_core::kernel::scheduler;
use campsync_core::kernel::upstream_client::UpstreamClient;
use campsync_core::server::build_app;
use campsync_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,campsync_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting campsync-server");

    let config = Config::from_env().context("failed to load configuration")?;

    let store: Arc<dyn campsync_core::kernel::record_store::RecordStore> =
        Arc::new(SqliteRecordStore::open(&config.record_store_path).context("failed to open record store")?);

    let client = UpstreamClient::new(
        config.upstream_api_key.clone(),
        config.upstream_subscription_key.clone(),
        config.upstream_client_id.clone(),
        config.upstream_season_id,
    );

    let jobs = jobs::registry(store.clone());
    let orchestrator = Arc::new(Orchestrator::new(jobs, store, client));

    let _scheduler = scheduler::start_scheduler(orchestrator.clone())
        .await
        .context("failed to start scheduler")?;

    let app = build_app(orchestrator);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
