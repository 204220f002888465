//! pgsession-core: configuration and shared types
//!
//! Everything here is independent of the database driver:
//! - [`settings`]: environment-derived deployment settings and connection URLs
//! - [`logging`]: the process-wide logging table and tracing installation
//! - [`error`]: the error taxonomy the session layer uses to pick rollback
//! - [`record`]: state-excluding `Debug` rendering for model records

pub mod error;
pub mod logging;
pub mod record;
pub mod settings;

pub use error::{ClassifyError, ErrorClass};
pub use logging::{LoggingConfig, LoggingError};
pub use record::{render_record, Field, Record};
pub use settings::{load_dotenv, Driver, Settings, SettingsError};
