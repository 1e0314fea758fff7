//! Error types for the message store

use resilience::{Classify, ErrorClass};
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// PostgreSQL SQLSTATE codes that indicate the server or link is temporarily unusable
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "53300", // too_many_connections
    "55P03", // lock_not_available
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
];

const UNIQUE_VIOLATION: &str = "23505";

/// Errors that can occur while persisting relayed messages
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Record failed validation before reaching the database
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The write did not finish within its deadline
    #[error("Store operation timed out: {0}")]
    Timeout(#[from] resilience::TimeoutError),
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            StoreError::Database(sqlx_err) => classify_sqlx(sqlx_err),
            StoreError::Timeout(_) => ErrorClass::Transient,
            StoreError::InvalidRecord(_) | StoreError::Migration(_) => ErrorClass::Fatal,
        }
    }
}

/// Map a driver error onto the relay's error taxonomy
pub fn classify_sqlx(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => ErrorClass::Duplicate,
            // Class 08: connection exception
            Some(code) if code.starts_with("08") => ErrorClass::Transient,
            Some(code) if TRANSIENT_SQLSTATES.contains(&code) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        },
        // PoolClosed means we are shutting down; retrying cannot help
        _ => ErrorClass::Fatal,
    }
}
