//! Application state shared across handlers

use std::sync::Arc;

use pgsession_core::Settings;

use crate::db::SessionProvider;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    settings: Settings,
    sessions: SessionProvider,
}

impl AppState {
    pub fn new(settings: Settings, sessions: SessionProvider) -> Self {
        Self {
            inner: Arc::new(AppStateInner { settings, sessions }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn sessions(&self) -> &SessionProvider {
        &self.inner.sessions
    }
}
