//! Session provider built once at startup from `Settings`
//!
//! Holds one blocking and one async factory, each with its own pool. Both
//! pools connect lazily, so construction does no I/O; it must still happen
//! inside a tokio runtime because the async pool spawns its maintenance
//! task on the current one.

use futures::future::BoxFuture;
use pgsession_core::Settings;
use thiserror::Error;
use tracing::info;

use super::pg::{
    settings_options, PgAsyncSession, PgAsyncSessionFactory, PgSessionFactory, PgSyncSession,
    DEFAULT_MAX_CONNECTIONS,
};
use super::session::{
    with_async_session, with_session, AsyncSessionFactory, AsyncSessionScope, ScopeError,
    SessionFactory, SessionScope,
};

/// Provider construction error
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid connection settings for {database}: {source}")]
    Connect {
        database: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Process-wide source of request-scoped sessions
#[derive(Clone)]
pub struct SessionProvider {
    sync: PgSessionFactory,
    async_: PgAsyncSessionFactory,
}

impl SessionProvider {
    /// Bind both factories to the primary database.
    pub fn from_settings(settings: &Settings) -> Result<Self, ProviderError> {
        Self::bind(settings, &settings.pg_db)
    }

    /// Bind both factories to the test database.
    pub fn for_tests(settings: &Settings) -> Result<Self, ProviderError> {
        Self::bind(settings, &settings.pg_db_test)
    }

    fn bind(settings: &Settings, database: &str) -> Result<Self, ProviderError> {
        let connect_err = |source| ProviderError::Connect {
            database: database.to_string(),
            source,
        };

        let options = settings_options(settings, database);
        let sync = PgSessionFactory::connect_lazy_with(options.clone(), DEFAULT_MAX_CONNECTIONS)
            .map_err(connect_err)?;
        let async_ = PgAsyncSessionFactory::connect_lazy_with(options, DEFAULT_MAX_CONNECTIONS);

        info!(
            host = %settings.pg_host,
            port = settings.pg_port,
            database,
            echo = settings.debug,
            "session factories configured"
        );

        Ok(Self { sync, async_ })
    }

    pub fn sync_factory(&self) -> &PgSessionFactory {
        &self.sync
    }

    pub fn async_factory(&self) -> &PgAsyncSessionFactory {
        &self.async_
    }

    /// Acquire a blocking session scope. Finish it with `scope.finish(result)`.
    pub fn get_sync_db(&self) -> Result<SessionScope<PgSyncSession>, sqlx::Error> {
        self.sync.scope()
    }

    /// Acquire an async session scope. Finish it with `scope.finish(result).await`.
    pub async fn get_async_db(&self) -> Result<AsyncSessionScope<PgAsyncSession>, sqlx::Error> {
        self.async_.scope().await
    }

    /// Run `f` inside a blocking session scope.
    pub fn sync_session<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: ScopeError,
        F: FnOnce(&mut PgSyncSession) -> Result<T, E>,
    {
        with_session(&self.sync, f)
    }

    /// Run `f` inside an async session scope.
    pub async fn async_session<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: ScopeError,
        F: for<'s> FnOnce(&'s mut PgAsyncSession) -> BoxFuture<'s, Result<T, E>>,
    {
        with_async_session(&self.async_, f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_password(password: &str) -> Settings {
        Settings::from_lookup(|name| match name {
            "POSTGRES_HOST" => Some("localhost".into()),
            "POSTGRES_PORT" => Some("5432".into()),
            "POSTGRES_USER" => Some("app".into()),
            "POSTGRES_PASSWORD" => Some(password.into()),
            "POSTGRES_DB" => Some("main".into()),
            _ => None,
        })
        .unwrap()
    }

    fn settings() -> Settings {
        settings_with_password("pw")
    }

    #[tokio::test]
    async fn builds_without_touching_the_database() {
        let provider = SessionProvider::from_settings(&settings()).unwrap();
        assert_eq!(provider.async_factory().pool().size(), 0);
        assert_eq!(provider.sync_factory().pool().size(), 0);
    }

    #[tokio::test]
    async fn test_provider_targets_test_database() {
        let provider = SessionProvider::for_tests(&settings()).unwrap();
        let options = provider.async_factory().pool().connect_options();
        assert_eq!(options.get_database(), Some("test"));
    }

    #[tokio::test]
    async fn separate_pools_per_flavour() {
        let provider = SessionProvider::from_settings(&settings()).unwrap();
        let options = provider.sync_factory().pool().connect_options();
        assert_eq!(options.get_database(), Some("main"));
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
    }

    #[tokio::test]
    async fn reserved_characters_in_password_keep_host_and_database() {
        let provider = SessionProvider::from_settings(&settings_with_password("p@ss/w#rd")).unwrap();

        for options in [
            provider.sync_factory().pool().connect_options(),
            provider.async_factory().pool().connect_options(),
        ] {
            assert_eq!(options.get_host(), "localhost");
            assert_eq!(options.get_port(), 5432);
            assert_eq!(options.get_username(), "app");
            assert_eq!(options.get_database(), Some("main"));
        }
    }
}
