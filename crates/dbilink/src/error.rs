//! Error types for the database interface.

use thiserror::Error;

use crate::descriptor::BackendFamily;

/// Main error type for database interface operations.
#[derive(Error, Debug)]
pub enum DbiError {
    /// The connection descriptor names a backend family this crate does not know.
    #[error(
        "Unsupported backend family: '{family}'. The only supported families are: \
         mssql, mysql, oracle, sqlite."
    )]
    UnsupportedBackend { family: String },

    /// The backend family is known, but its driver is not compiled into this build.
    #[error(
        "Backend '{family}' is supported, but its driver is not available in this \
         build. Enable the '{feature}' cargo feature."
    )]
    BackendUnavailable {
        family: BackendFamily,
        feature: &'static str,
    },

    /// SQLite database file missing on disk (SQLite has no server-side check).
    #[error("Database file not found: {path}")]
    DatabaseFileNotFound { path: String },

    /// Statement failed the injection safety filter.
    #[error("Suspected injection attempt: {reason}")]
    InjectionSuspected { reason: &'static str },

    /// Stored procedure parameter metadata could not be found.
    #[error("No parameters returned. The following procedure may not exist: {proc}")]
    ProcedureNotFound { proc: String },

    /// Operation not available on this backend family, decided at interface level.
    #[error("Operation '{operation}' is not supported for the {family} backend")]
    Unsupported {
        family: BackendFamily,
        operation: &'static str,
    },

    /// Malformed connection descriptor.
    #[error("Invalid connection descriptor: {0}")]
    Descriptor(String),

    /// Missing or mistyped statement/procedure parameter binding.
    #[error("Parameter binding error: {0}")]
    Parameter(String),

    /// Connection pool error with context about where it occurred.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// SQL Server driver error.
    #[cfg(feature = "mssql")]
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// MySQL driver error.
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// SQLite driver error.
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// ODBC driver error (Oracle backend).
    #[cfg(feature = "oracle")]
    #[error("ODBC error: {0}")]
    Odbc(#[from] odbc_api::Error),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbiError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        DbiError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// True if this error came from the safety filter.
    pub fn is_injection_suspected(&self) -> bool {
        matches!(self, DbiError::InjectionSuspected { .. })
    }
}

/// Result type alias for database interface operations.
pub type Result<T> = std::result::Result<T, DbiError>;
