mod api;
mod app_state;
mod config;
mod router;
mod vault;

use app_state::AppState;
use config::Config;
use tokio::{net::TcpListener, signal};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("shutdown signal received via Ctrl+C"),
        _ = terminate => tracing::info!("shutdown signal received via SIGTERM"),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();
    Registry::default().with(filter).with(fmt_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::load().map_err(|e| {
        tracing::error!(error = %e, "failed to load configuration");
        e
    })?;

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let addr = format!("{host}:{port}");

    let state = AppState::new(&config);

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false) // local development; set to true in prod behind HTTPS
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(30)));

    let router = router::get_router(state.clone()).layer(session_layer);

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(error = %e, %addr, "failed to bind listener");
        e
    })?;

    tracing::info!(%addr, "listening");

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        return Err(e.into());
    }

    state.vault.lock();

    Ok(())
}
