//! The three run modes: controllers, webhook, or both over one store.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use loops_client::LoopsClient;
use loops_controller::{Manager, register_indexes};
use loops_storage::DynStore;
use loops_webhook::{WEBHOOK_PATH, WebhookState, build_router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::seed::load_seed;

/// Create the shared store, register indexes and apply the seed file.
pub async fn prepare_store(cfg: &AppConfig) -> anyhow::Result<DynStore> {
    let store = loops_db_memory::create_store();
    register_indexes(&store).context("failed to register indexes")?;
    if let Some(path) = cfg.store.seed_file.as_deref() {
        let created = load_seed(&store, Path::new(path)).await?;
        info!(path, created, "store seeded");
    }
    Ok(store)
}

/// Run both controllers until `shutdown` is cancelled.
pub async fn run_manager(
    cfg: &AppConfig,
    store: DynStore,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let client = LoopsClient::new(cfg.client_config()?).context("failed to create Loops client")?;
    info!(base_url = client.base_url(), "starting controllers");
    Manager::new(store, Arc::new(client), cfg.manager_config())
        .run(shutdown)
        .await?;
    Ok(())
}

/// Serve the webhook on `listener` until `shutdown` is cancelled.
pub async fn serve_webhook(
    cfg: &AppConfig,
    store: DynStore,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let state = WebhookState::new(store, cfg.signing_secret()?);
    let app = build_router(state, cfg.server.body_limit_bytes);

    info!(addr = %listener.local_addr()?, path = WEBHOOK_PATH, "webhook listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("webhook stopped");
    Ok(())
}

pub async fn bind(cfg: &AppConfig) -> anyhow::Result<TcpListener> {
    let addr = cfg.addr();
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Run controllers and webhook together; the first to fail stops the other.
pub async fn run_all(cfg: &AppConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    // Check both secrets before starting either half.
    cfg.client_config()?;
    cfg.signing_secret()?;

    let store = prepare_store(cfg).await?;
    let listener = bind(cfg).await?;
    let stop = shutdown.child_token();

    let manager = async {
        let result = run_manager(cfg, store.clone(), stop.clone()).await;
        stop.cancel();
        result
    };
    let webhook = async {
        let result = serve_webhook(cfg, store.clone(), listener, stop.clone()).await;
        stop.cancel();
        result
    };
    let (manager, webhook) = tokio::join!(manager, webhook);
    manager.and(webhook)
}

/// Cancel `shutdown` on Ctrl+C.
pub fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });
}
