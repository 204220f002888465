//! Error taxonomy for session scopes
//!
//! The session layer only needs to know which bucket an error falls into:
//! database-layer failures and boundary (client-facing) failures roll the
//! transaction back, everything else passes through untouched.

use std::fmt;

/// Bucket an error falls into from the session layer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Raised by the data-access library (constraint violation, lost connection, timeout)
    Database,
    /// Request-facing error raised by handler code while a session is open
    Boundary,
    /// Anything else
    Other,
}

impl ErrorClass {
    /// Whether an error of this class rolls back the open transaction.
    pub fn rolls_back(self) -> bool {
        matches!(self, Self::Database | Self::Boundary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Boundary => "boundary",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can leave a session scope.
pub trait ClassifyError {
    fn class(&self) -> ErrorClass;
}

impl ClassifyError for std::io::Error {
    fn class(&self) -> ErrorClass {
        ErrorClass::Other
    }
}

#[cfg(feature = "sqlx")]
impl ClassifyError for sqlx::Error {
    fn class(&self) -> ErrorClass {
        ErrorClass::Database
    }
}
