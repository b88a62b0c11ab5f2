use std::path::PathBuf;
use std::sync::Arc;

use rand::RngCore;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use statrelay_hub::{spawn_idle_sweeper, SessionRegistry, SubscriptionHub};
use statrelay_server::auth::SessionTokens;
use statrelay_server::config::ServerConfig;
use statrelay_server::http_server::{build_router, AppState};
use statrelay_server::store::UserStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ServerConfig::new(config_path)?;

    let signing_key = match &config.jwt_signing_key {
        Some(key) => key.clone().into_bytes(),
        None => {
            let mut raw = [0_u8; 32];
            rand::thread_rng().fill_bytes(&mut raw);
            tracing::warn!(
                "no jwt_signing_key configured, using an ephemeral key; session tokens will not survive a restart"
            );
            raw.to_vec()
        }
    };

    let store = Arc::new(UserStore::open(&config.db_path)?);
    let registry = Arc::new(SessionRegistry::new());
    let hub = Arc::new(SubscriptionHub::new(config.max_idle));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_idle_sweeper(Arc::clone(&hub), Arc::clone(&registry), shutdown_rx);

    let state = AppState {
        store,
        registry,
        hub,
        tokens: Arc::new(SessionTokens::new(&signing_key)),
    };
    let router = build_router(state, config.request_timeout);

    let listener = tokio::net::TcpListener::bind(&config.serve_addr).await?;
    tracing::info!("listening on {}", config.serve_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
