//! Session lifecycle: acquire, hand out, commit or roll back, close
//!
//! Every acquisition follows the same state machine:
//!
//! ```text
//! Created -> InUse -> Committing  -> Closed
//!                  \-> RollingBack -> Closed
//! ```
//!
//! - `Ok` from the caller commits. A failed commit rolls back.
//! - Database and boundary errors roll back, are logged at debug level and
//!   returned unchanged.
//! - Any other error is returned without a rollback.
//! - Close always runs, including when the scope is dropped unfinished
//!   (panic or task cancellation).
//!
//! Two surfaces per flavour: the scope handle (`factory.scope()`, then
//! `scope.finish(result)`) and the closure wrappers [`with_session`] /
//! [`with_async_session`] built on top of it.

use std::fmt::Display;

use async_trait::async_trait;
use futures::future::BoxFuture;
use pgsession_core::ClassifyError;
use tracing::{debug, warn};

/// Where an acquisition is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    InUse,
    Committing,
    RollingBack,
    Closed,
}

/// Blocking unit-of-work handle
pub trait Session {
    fn commit(&mut self) -> Result<(), sqlx::Error>;
    fn rollback(&mut self) -> Result<(), sqlx::Error>;
    fn close(&mut self) -> Result<(), sqlx::Error>;
}

/// Produces one fresh [`Session`] per call.
pub trait SessionFactory {
    type Session: Session;

    fn create(&self) -> Result<Self::Session, sqlx::Error>;

    /// Acquire a session wrapped in its lifecycle scope.
    fn scope(&self) -> Result<SessionScope<Self::Session>, sqlx::Error> {
        Ok(SessionScope::new(self.create()?))
    }
}

/// Suspending unit-of-work handle
#[async_trait]
pub trait AsyncSession: Send {
    async fn commit(&mut self) -> Result<(), sqlx::Error>;
    async fn rollback(&mut self) -> Result<(), sqlx::Error>;
    async fn close(&mut self) -> Result<(), sqlx::Error>;

    /// Release without suspending. Called when a scope is dropped before it
    /// finished, e.g. because the owning task was cancelled.
    fn release(&mut self);
}

/// Produces one fresh [`AsyncSession`] per call.
#[async_trait]
pub trait AsyncSessionFactory: Send + Sync {
    type Session: AsyncSession;

    async fn create(&self) -> Result<Self::Session, sqlx::Error>;

    async fn scope(&self) -> Result<AsyncSessionScope<Self::Session>, sqlx::Error> {
        Ok(AsyncSessionScope::new(self.create().await?))
    }
}

/// Bound on errors that can leave a session scope
pub trait ScopeError: ClassifyError + From<sqlx::Error> + Display {}

impl<E> ScopeError for E where E: ClassifyError + From<sqlx::Error> + Display {}

/// One acquired session and the obligation to finish it.
pub struct SessionScope<S: Session> {
    session: S,
    state: SessionState,
    closed: bool,
}

impl<S: Session> SessionScope<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            state: SessionState::Created,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session. Moves the scope to `InUse`.
    pub fn session(&mut self) -> &mut S {
        if self.state == SessionState::Created {
            self.state = SessionState::InUse;
        }
        &mut self.session
    }

    /// Commit or roll back according to `outcome`, then close.
    pub fn finish<T, E: ScopeError>(mut self, outcome: Result<T, E>) -> Result<T, E> {
        let outcome = match outcome {
            Ok(value) => {
                self.state = SessionState::Committing;
                match self.session.commit() {
                    Ok(()) => Ok(value),
                    Err(err) => {
                        let err = E::from(err);
                        self.roll_back(&err);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                if err.class().rolls_back() {
                    self.roll_back(&err);
                }
                Err(err)
            }
        };

        self.closed = true;
        let closed = self.session.close();
        self.state = SessionState::Closed;
        merge_close(outcome, closed)
    }

    fn roll_back<E: ScopeError>(&mut self, err: &E) {
        self.state = SessionState::RollingBack;
        debug!("session rollback from {} error: {}", err.class(), err);
        if let Err(rollback_err) = self.session.rollback() {
            warn!(error = %rollback_err, "session rollback failed");
        }
    }
}

impl<S: Session> Drop for SessionScope<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!(state = ?self.state, "session scope dropped before finishing, closing");
        if let Err(err) = self.session.close() {
            warn!(error = %err, "session close failed");
        }
        self.state = SessionState::Closed;
    }
}

/// Async counterpart of [`SessionScope`].
pub struct AsyncSessionScope<S: AsyncSession> {
    session: S,
    state: SessionState,
    closed: bool,
}

impl<S: AsyncSession> AsyncSessionScope<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            state: SessionState::Created,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&mut self) -> &mut S {
        if self.state == SessionState::Created {
            self.state = SessionState::InUse;
        }
        &mut self.session
    }

    /// Commit or roll back according to `outcome`, then close.
    ///
    /// If this future is dropped part-way, the scope's `Drop` releases the
    /// session.
    pub async fn finish<T, E: ScopeError>(mut self, outcome: Result<T, E>) -> Result<T, E> {
        let outcome = match outcome {
            Ok(value) => {
                self.state = SessionState::Committing;
                match self.session.commit().await {
                    Ok(()) => Ok(value),
                    Err(err) => {
                        let err = E::from(err);
                        self.roll_back(&err).await;
                        Err(err)
                    }
                }
            }
            Err(err) => {
                if err.class().rolls_back() {
                    self.roll_back(&err).await;
                }
                Err(err)
            }
        };

        let closed = self.session.close().await;
        self.closed = true;
        self.state = SessionState::Closed;
        merge_close(outcome, closed)
    }

    async fn roll_back<E: ScopeError>(&mut self, err: &E) {
        self.state = SessionState::RollingBack;
        debug!("session rollback from {} error: {}", err.class(), err);
        if let Err(rollback_err) = self.session.rollback().await {
            warn!(error = %rollback_err, "session rollback failed");
        }
    }
}

impl<S: AsyncSession> Drop for AsyncSessionScope<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!(state = ?self.state, "async session scope dropped before finishing, releasing");
        self.session.release();
        self.state = SessionState::Closed;
    }
}

/// Close failures only surface when nothing else went wrong.
fn merge_close<T, E: ScopeError>(
    outcome: Result<T, E>,
    closed: Result<(), sqlx::Error>,
) -> Result<T, E> {
    match (outcome, closed) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(close_err)) => Err(E::from(close_err)),
        (Err(err), Err(close_err)) => {
            warn!(error = %close_err, "session close failed");
            Err(err)
        }
    }
}

/// Run `f` with a fresh session from `factory`, committing on `Ok`.
pub fn with_session<F, T, E, Func>(factory: &F, f: Func) -> Result<T, E>
where
    F: SessionFactory,
    E: ScopeError,
    Func: FnOnce(&mut F::Session) -> Result<T, E>,
{
    let mut scope = factory.scope()?;
    let outcome = f(scope.session());
    scope.finish(outcome)
}

/// Run `f` with a fresh async session from `factory`, committing on `Ok`.
///
/// ```ignore
/// let count = with_async_session(&factory, |session| Box::pin(async move {
///     let conn = session.conn()?;
///     let (n,): (i64,) = sqlx::query_as("SELECT count(*) FROM users").fetch_one(conn).await?;
///     Ok::<_, ApiError>(n)
/// }))
/// .await?;
/// ```
pub async fn with_async_session<F, T, E, Func>(factory: &F, f: Func) -> Result<T, E>
where
    F: AsyncSessionFactory,
    E: ScopeError,
    Func: for<'s> FnOnce(&'s mut F::Session) -> BoxFuture<'s, Result<T, E>>,
{
    let mut scope = factory.scope().await?;
    let outcome = f(scope.session()).await;
    scope.finish(outcome).await
}
