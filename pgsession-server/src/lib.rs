//! pgsession-server: request-scoped Postgres sessions for a web backend
//!
//! Builds one blocking and one async session factory from `Settings` and
//! hands out sessions that commit when the caller's scope succeeds, roll
//! back on database or boundary errors, and always close. The HTTP layer
//! wires the provider into axum state.

pub mod db;
pub mod error;
pub mod http;
pub mod state;

pub use db::{SessionProvider, SessionState};
pub use error::ServerError;
pub use http::{build_router, serve, ApiError, HttpError};
pub use state::AppState;
