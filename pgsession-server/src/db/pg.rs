//! Postgres-backed sessions over sqlx pools
//!
//! Each session is one sqlx transaction checked out from a pool. Dropping
//! an open transaction makes sqlx roll it back and return the connection,
//! which is what `close` and `release` rely on.
//!
//! The blocking factory owns a small dedicated runtime that drives its own
//! pool; its sessions must be used from blocking threads, never from inside
//! an async task.

use std::io;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgConnection, PgPool, Postgres, Transaction};
use pgsession_core::Settings;
use tokio::runtime::{Handle, Runtime};
use tracing::debug;

use super::session::{AsyncSession, AsyncSessionFactory, Session, SessionFactory};

/// Default maximum connections per pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

fn finished() -> sqlx::Error {
    sqlx::Error::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "session transaction already finished",
    ))
}

fn with_echo(options: PgConnectOptions, echo: bool) -> PgConnectOptions {
    if echo {
        options
    } else {
        options.disable_statement_logging()
    }
}

fn connect_options(url: &str, echo: bool) -> Result<PgConnectOptions, sqlx::Error> {
    Ok(with_echo(PgConnectOptions::from_str(url)?, echo))
}

/// Connect options for `database` built field by field from `settings`.
///
/// Credentials never pass through URL parsing, so reserved characters in
/// the user or password are taken literally. Statement logging follows
/// `DEBUG`.
pub fn settings_options(settings: &Settings, database: &str) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&settings.pg_host)
        .port(settings.pg_port)
        .username(&settings.pg_user)
        .password(&settings.pg_pass)
        .database(database);
    with_echo(options, settings.debug)
}

// ============================================================================
// Async
// ============================================================================

/// Async session: one open transaction
pub struct PgAsyncSession {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgAsyncSession {
    /// Connection to run queries on, inside the session's transaction.
    pub fn conn(&mut self) -> Result<&mut PgConnection, sqlx::Error> {
        self.tx.as_deref_mut().ok_or_else(finished)
    }

    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }
}

#[async_trait]
impl AsyncSession for PgAsyncSession {
    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        match self.tx.take() {
            Some(tx) => tx.commit().await,
            None => Err(finished()),
        }
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if self.tx.take().is_some() {
            debug!("discarding uncommitted transaction");
        }
    }
}

/// Async session factory bound to one lazily-connecting pool
#[derive(Clone)]
pub struct PgAsyncSessionFactory {
    pool: PgPool,
}

impl PgAsyncSessionFactory {
    /// Bind to `url` without connecting. Must be called inside a tokio runtime.
    pub fn connect_lazy(url: &str, echo: bool) -> Result<Self, sqlx::Error> {
        let options = connect_options(url, echo)?;
        Ok(Self::connect_lazy_with(options, DEFAULT_MAX_CONNECTIONS))
    }

    pub fn connect_lazy_with(options: PgConnectOptions, max_connections: u32) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(options);
        Self { pool }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AsyncSessionFactory for PgAsyncSessionFactory {
    type Session = PgAsyncSession;

    async fn create(&self) -> Result<PgAsyncSession, sqlx::Error> {
        let tx = self.pool.begin().await?;
        Ok(PgAsyncSession { tx: Some(tx) })
    }
}

// ============================================================================
// Blocking
// ============================================================================

/// Blocking session: one open transaction driven by the factory's runtime
pub struct PgSyncSession {
    tx: Option<Transaction<'static, Postgres>>,
    engine: Arc<SyncEngine>,
}

impl PgSyncSession {
    /// Run async sqlx work against the session's connection, blocking until
    /// it completes.
    ///
    /// ```ignore
    /// let name: String = session.run(|conn| Box::pin(async move {
    ///     sqlx::query_scalar("SELECT name FROM users WHERE id = $1")
    ///         .bind(id)
    ///         .fetch_one(conn)
    ///         .await
    /// }))?;
    /// ```
    pub fn run<'s, T, F>(&'s mut self, f: F) -> Result<T, sqlx::Error>
    where
        F: FnOnce(&'s mut PgConnection) -> BoxFuture<'s, Result<T, sqlx::Error>>,
    {
        let handle = self.engine.handle.clone();
        let conn = self.tx.as_deref_mut().ok_or_else(finished)?;
        handle.block_on(f(conn))
    }

    /// Execute a statement, returning the affected row count.
    pub fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        let handle = self.engine.handle.clone();
        let conn = self.tx.as_deref_mut().ok_or_else(finished)?;
        handle.block_on(async move {
            let result = sqlx::query(sql).execute(conn).await?;
            Ok::<_, sqlx::Error>(result.rows_affected())
        })
    }

    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    fn discard(&mut self) {
        if let Some(tx) = self.tx.take() {
            // Returning the connection spawns onto the pool's runtime.
            let _guard = self.engine.handle.enter();
            debug!("discarding uncommitted transaction");
            drop(tx);
        }
    }
}

impl Session for PgSyncSession {
    fn commit(&mut self) -> Result<(), sqlx::Error> {
        match self.tx.take() {
            Some(tx) => self.engine.handle.block_on(tx.commit()),
            None => Err(finished()),
        }
    }

    fn rollback(&mut self) -> Result<(), sqlx::Error> {
        match self.tx.take() {
            Some(tx) => self.engine.handle.block_on(tx.rollback()),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), sqlx::Error> {
        self.discard();
        Ok(())
    }
}

impl Drop for PgSyncSession {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Runtime and pool behind the blocking factory.
struct SyncEngine {
    pool: PgPool,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        // Blocking shutdown panics inside an async context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Blocking session factory bound to its own lazily-connecting pool
#[derive(Clone)]
pub struct PgSessionFactory {
    engine: Arc<SyncEngine>,
}

impl PgSessionFactory {
    /// Bind to `url` without connecting. Starts the factory's runtime.
    pub fn connect_lazy(url: &str, echo: bool) -> Result<Self, sqlx::Error> {
        let options = connect_options(url, echo)?;
        Self::connect_lazy_with(options, DEFAULT_MAX_CONNECTIONS)
    }

    pub fn connect_lazy_with(
        options: PgConnectOptions,
        max_connections: u32,
    ) -> Result<Self, sqlx::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pgsession-sync")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let pool = {
            let _guard = handle.enter();
            PgPoolOptions::new()
                .max_connections(max_connections)
                .connect_lazy_with(options)
        };

        Ok(Self {
            engine: Arc::new(SyncEngine {
                pool,
                handle,
                runtime: Some(runtime),
            }),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.engine.pool
    }
}

impl SessionFactory for PgSessionFactory {
    type Session = PgSyncSession;

    fn create(&self) -> Result<PgSyncSession, sqlx::Error> {
        let tx = self.engine.handle.block_on(self.engine.pool.begin())?;
        Ok(PgSyncSession {
            tx: Some(tx),
            engine: self.engine.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::session::{with_async_session, with_session};

    const LOCAL_URL: &str = "postgresql://app:pw@localhost:5432/app";

    #[test]
    fn malformed_url_is_rejected() {
        assert!(PgSessionFactory::connect_lazy("not a url", false).is_err());
    }

    #[test]
    fn sync_factory_binds_without_connecting() {
        let factory = PgSessionFactory::connect_lazy(LOCAL_URL, false).unwrap();
        assert_eq!(factory.pool().size(), 0);
    }

    #[tokio::test]
    async fn async_factory_binds_without_connecting() {
        let factory = PgAsyncSessionFactory::connect_lazy(LOCAL_URL, true).unwrap();
        assert_eq!(factory.pool().size(), 0);
    }

    #[test]
    fn settings_options_take_credentials_literally() {
        let settings = Settings::from_lookup(|name| match name {
            "POSTGRES_HOST" => Some("db.internal".into()),
            "POSTGRES_PORT" => Some("5433".into()),
            "POSTGRES_USER" => Some("app".into()),
            "POSTGRES_PASSWORD" => Some("p@ss/w#rd?%".into()),
            "POSTGRES_DB" => Some("main".into()),
            _ => None,
        })
        .unwrap();

        let options = settings_options(&settings, "main");
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("main"));
    }

    #[tokio::test]
    async fn sync_factory_can_be_dropped_inside_runtime() {
        let factory = PgSessionFactory::connect_lazy(LOCAL_URL, false).unwrap();
        drop(factory);
    }

    // Integration tests require a real database
    // Run with: DATABASE_URL=postgres://... cargo test -p pgsession-server -- --ignored

    fn database_url() -> String {
        std::env::var("DATABASE_URL").expect("DATABASE_URL required")
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn async_session_commits() {
        let factory = PgAsyncSessionFactory::connect_lazy(&database_url(), false).unwrap();

        let value: i32 = with_async_session(&factory, |session| {
            Box::pin(async move {
                let conn = session.conn()?;
                let (v,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(conn).await?;
                Ok::<_, sqlx::Error>(v)
            })
        })
        .await
        .expect("session failed");

        assert_eq!(value, 1);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn async_rollback_discards_writes() {
        let factory = PgAsyncSessionFactory::connect_lazy(&database_url(), false).unwrap();
        sqlx::query("CREATE TABLE IF NOT EXISTS pgsession_probe (id INT PRIMARY KEY)")
            .execute(factory.pool())
            .await
            .unwrap();
        sqlx::query("DELETE FROM pgsession_probe WHERE id = 1")
            .execute(factory.pool())
            .await
            .unwrap();

        let result: Result<(), sqlx::Error> = with_async_session(&factory, |session| {
            Box::pin(async move {
                let conn = session.conn()?;
                sqlx::query("INSERT INTO pgsession_probe (id) VALUES (1)")
                    .execute(&mut *conn)
                    .await?;
                // Duplicate key aborts the transaction.
                sqlx::query("INSERT INTO pgsession_probe (id) VALUES (1)")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .await;
        assert!(result.is_err());

        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM pgsession_probe WHERE id = 1")
            .fetch_one(factory.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    #[ignore = "requires database"]
    fn sync_session_commits() {
        let factory = PgSessionFactory::connect_lazy(&database_url(), false).unwrap();

        let affected = with_session(&factory, |session| session.execute("SELECT 1"));
        assert_eq!(affected.expect("session failed"), 1);

        let value: Result<i32, sqlx::Error> = with_session(&factory, |session| {
            session.run(|conn| {
                Box::pin(async move {
                    let (v,): (i32,) = sqlx::query_as("SELECT 7").fetch_one(conn).await?;
                    Ok::<_, sqlx::Error>(v)
                })
            })
        });
        assert_eq!(value.unwrap(), 7);
    }
}
