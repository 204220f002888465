//! Axum server setup
//!
//! - Routes nested under `API_V0_STR`
//! - Request tracing
//! - Graceful shutdown on SIGTERM/Ctrl+C

use std::net::SocketAddr;

use axum::Router;
use pgsession_core::Settings;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::routes;
use crate::db::SessionProvider;
use crate::error::ServerError;
use crate::state::AppState;

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    let prefix = api_prefix(&state.settings().api_v0_str);
    let api = routes::health::router();

    let router = match prefix {
        Some(prefix) => Router::new().nest(&prefix, api),
        None => Router::new().merge(api),
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Normalize the API prefix; `None` means mount at the root.
fn api_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{}", trimmed))
    }
}

/// Run the HTTP server until a shutdown signal arrives.
///
/// Must be called inside a tokio runtime; the session provider is built
/// here, once, from `settings`.
pub async fn serve(settings: Settings, bind_addr: SocketAddr) -> Result<(), ServerError> {
    let sessions = SessionProvider::from_settings(&settings)?;
    let state = AppState::new(settings, sessions);
    let app = build_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting shutdown");
        }
    }
}
