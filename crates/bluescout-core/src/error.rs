//! Unified error type for the bluescout core library.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide operators toward resolution
//! - **Context preservation**: Wrapped errors maintain their original context

use thiserror::Error;

/// The unified error type for all bluescout operations.
#[derive(Debug, Error)]
pub enum Error {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    AdapterNotFound,

    /// The BLE stack reported a failure while scanning.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    // =========================================================================
    // SCAN EVENT ERRORS
    // =========================================================================
    /// The requested scan event does not exist.
    #[error("Scan event '{0}' not found")]
    EventNotFound(String),

    /// An event name failed validation.
    #[error("Invalid event name '{0}': must be 1-32 characters")]
    InvalidEventName(String),

    /// A polling interval failed validation.
    #[error("Invalid polling interval {0}: must be at least 1.0 seconds")]
    InvalidInterval(f64),

    /// Another event is already enabled; running two at once is refused.
    #[error("Scan event '{0}' is already enabled. Stop all events before starting a new one.")]
    AlreadyRunning(String),

    /// The process table could not report our own identity.
    #[error("Unable to determine own process identity")]
    ProcessIdentity,

    // =========================================================================
    // FILTER ERRORS
    // =========================================================================
    /// A stored filter rule carries a payload pattern that does not compile.
    #[error("Filter rule {rule_id} has an invalid payload regex: {source}")]
    InvalidFilterRegex {
        /// Row id of the offending rule.
        rule_id: i64,
        /// The regex compilation failure.
        source: regex::Error,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying schema migrations failed.
    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for bluescout operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` if this error is a configuration conflict reported to
    /// the caller before any state was mutated.
    #[inline]
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyRunning(_))
    }

    /// Returns `true` if this error came from the BLE stack.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(self, Self::AdapterNotFound | Self::ScanFailed(_))
    }

    /// Returns `true` if this error came from the persistence layer.
    #[inline]
    #[must_use]
    pub const fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Migration(_))
    }
}

#[cfg(feature = "bluetooth")]
impl From<bluer::Error> for Error {
    fn from(err: bluer::Error) -> Self {
        Self::ScanFailed(err.to_string())
    }
}
