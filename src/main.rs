use dav_gate::clock::{Clock, SystemClock};
use dav_gate::config::{self, GateConfig};
use dav_gate::routes;
use dav_gate::state::GateState;
use dav_gate::storage::create_storage_backend;
use dav_gate::sweep::spawn_sweeper;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dav_gate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match config::load_config_with_fallback() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                "Failed to load configuration: {}. Running with defaults; the admin API stays closed.",
                e
            );
            Arc::new(GateConfig::default())
        }
    };

    let storage = create_storage_backend(&config.storage).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = GateState::new(config.clone(), storage, clock);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = (config.sweep.interval_secs > 0).then(|| {
        spawn_sweeper(
            state.blocks.clone(),
            state.sessions.clone(),
            state.directory.clone(),
            Duration::from_secs(config.sweep.interval_secs),
            shutdown_rx,
        )
    });

    let app = routes::router(state);

    tracing::info!("Starting dav-gate on {}", config.listen_addr);
    tracing::info!(
        "Idle timeout {}s, {} principal(s) configured",
        config.session.idle_timeout_secs,
        config.principals.len()
    );

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
