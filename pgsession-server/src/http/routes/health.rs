//! Health check endpoints

use std::time::Instant;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::http::error::ApiError;
use crate::state::AppState;

/// Liveness response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Database round-trip response
#[derive(Serialize)]
pub struct DatabaseHealth {
    pub status: &'static str,
    pub database: String,
    pub latency_ms: u128,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /health/db - runs `SELECT 1` inside a request-scoped session
async fn database_health(State(state): State<AppState>) -> Result<Json<DatabaseHealth>, ApiError> {
    let started = Instant::now();

    state
        .sessions()
        .async_session(|session| {
            Box::pin(async move {
                let conn = session.conn()?;
                let (one,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(conn).await?;
                if one != 1 {
                    return Err(ApiError::internal(format!("SELECT 1 returned {}", one)));
                }
                Ok::<_, ApiError>(())
            })
        })
        .await?;

    Ok(Json(DatabaseHealth {
        status: "ok",
        database: state.settings().pg_db.clone(),
        latency_ms: started.elapsed().as_millis(),
    }))
}

/// Health routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/db", get(database_health))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }
}
