//! shuttle-server - task-lease scheduler の HTTP サーバ
//!
//! 起動順:
//! 1. `.env` + 環境変数 + フラグから設定を読む
//! 2. store を選ぶ（`DATABASE_URL` があれば PostgreSQL、無ければ in-memory）
//! 3. Runtime を組み立て、reaper / liveness sync を起動
//! 4. ctrl-c で HTTP を止め、バックグラウンドループを join する

mod api;
mod config;

use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use shuttle_core::app::RuntimeBuilder;
use shuttle_core::impls::PostgresTaskStore;
use shuttle_core::ports::TaskStore;
use shuttle_core::upstream::{UpstreamClient, UpstreamSettings};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::load().context("invalid configuration")?;
    config.log_summary();

    let upstream = Arc::new(
        UpstreamClient::new(UpstreamSettings::new(
            config.membridge_server_url.trim(),
            config.membridge_admin_key.clone(),
        ))
        .with_defaults(config.upstream_retries, config.upstream_timeout()),
    );

    let mut builder = RuntimeBuilder::new()
        .upstream(upstream)
        .lease_ttl_secs(config.lease_ttl_seconds)
        .reaper_interval(config.reaper_interval())
        .sync_interval(config.sync_interval())
        .stale_after(config.stale_after());

    if let Some(url) = &config.database_url {
        let store = PostgresTaskStore::connect(url)
            .await
            .context("failed to connect to PostgreSQL")?;
        info!("PostgreSQL store ready (migrations applied)");
        let store: Arc<dyn TaskStore> = Arc::new(store);
        builder = builder.store(store);
    } else {
        info!("DATABASE_URL not set, using in-memory store");
    }

    let runtime = Arc::new(builder.build().context("failed to build runtime")?);
    let loops = runtime.spawn_background();

    let app = api::build_router(runtime.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, waiting for background loops");
    loops.shutdown_and_join().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
