//! Error types and result handling for street-relay.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate. Every variant is a stable
//! error kind; the underlying cause, when there is one, is attached as the
//! error source.
//!
//! # Example
//!
//! ```rust
//! use street_relay::{Error, Result};
//!
//! fn connect_to_broker() -> Result<()> {
//!     Err(Error::connection("broker", "Failed to connect", None))
//! }
//!
//! match connect_to_broker() {
//!     Ok(()) => println!("Connected"),
//!     Err(e @ Error::Connection { .. }) => eprintln!("{}", e),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Boxed cause attached to wrapped errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for street-relay operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, from the config file, environment or validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input rejected before any I/O happened.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The broker or the store could not be reached.
    #[error("Connection error ({target}): {message}")]
    Connection {
        /// Which backend the connection was for (`broker`, `store`)
        target: &'static str,
        /// Connection stage that failed
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// An established connection or channel went away.
    #[error("Connection lost ({target}): {message}")]
    ConnectionLost {
        target: &'static str,
        message: String,
    },

    /// The reconnect ceiling was reached; the process cannot make progress.
    #[error("Reconnect failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of failed reconnect attempts
        attempts: u32,
    },

    /// Publish or consume was called without an open channel.
    #[error("Channel not initialized")]
    NotInitialized,

    /// A single record could not be handed to the broker.
    #[error("Failed to publish street {street_id}")]
    Publish {
        street_id: i64,
        #[source]
        source: BoxError,
    },

    /// A delivered message could not be processed.
    #[error("Processing error: {message}")]
    Processing {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The store rejected an operation.
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The record source returned something unusable.
    #[error("Source error: {0}")]
    Source(String),

    /// AMQP client or protocol error.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// PostgreSQL client or protocol error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// HTTP error while talking to the record source.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error when encoding or decoding messages.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Graceful shutdown was requested while an operation was in progress.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    pub fn connection(
        target: &'static str,
        message: impl Into<String>,
        source: Option<BoxError>,
    ) -> Self {
        Error::Connection {
            target,
            message: message.into(),
            source,
        }
    }

    pub fn store(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Store {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Error::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this error should terminate the process rather than be
    /// logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Connection { .. }
                | Error::ReconnectExhausted { .. }
        )
    }
}

/// A convenient Result type alias for street-relay operations.
///
/// This is equivalent to `std::result::Result<T, street_relay::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
