//! Database layer - request-scoped sessions
//!
//! - [`session`]: lifecycle traits and the commit/rollback/close protocol
//! - [`pg`]: sqlx Postgres sessions and factories (blocking and async)
//! - [`provider`]: the pair of factories built from `Settings` at startup

pub mod pg;
pub mod provider;
pub mod session;

pub use pg::{PgAsyncSession, PgAsyncSessionFactory, PgSessionFactory, PgSyncSession};
pub use provider::{ProviderError, SessionProvider};
pub use session::{
    with_async_session, with_session, AsyncSession, AsyncSessionFactory, AsyncSessionScope,
    ScopeError, Session, SessionFactory, SessionScope, SessionState,
};
