use std::sync::Arc;

use anyhow::Context;

use stockledger_infra::{EngineConfig, InMemoryLedgerStore, PostgresLedgerStore};
use stockledger_observability::LogFormat;

use stockledger_api::app::{self, AppServices, SharedStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::load().context("failed to load configuration")?;
    let format = config.log.format.parse::<LogFormat>().unwrap_or_default();
    stockledger_observability::init_with(format, &config.log.filter);

    let store: SharedStore = match (&config.database_url, &config.snapshot_path) {
        (Some(url), _) => {
            let store = PostgresLedgerStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to postgres")?;
            store.migrate().await.context("failed to create ledger tables")?;
            tracing::info!("ledger backed by postgres");
            Arc::new(store)
        }
        (None, Some(path)) => {
            let store = InMemoryLedgerStore::open(path)
                .with_context(|| format!("failed to open snapshot {}", path.display()))?;
            tracing::info!(path = %path.display(), "ledger restored from snapshot");
            Arc::new(store)
        }
        (None, None) => Arc::new(InMemoryLedgerStore::new()),
    };

    let services = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || AppServices::new(store, config))
            .await
            .context("ledger startup task failed")??
    };
    let services = Arc::new(services);
    let router = app::build_app(services.clone());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Postgres commits as it goes; only the in-memory store needs a snapshot.
    if let (None, Some(path)) = (&config.database_url, &config.snapshot_path) {
        services
            .save_snapshot(path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), "ledger snapshot written");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
