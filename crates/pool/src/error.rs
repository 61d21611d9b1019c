//! Error types for pool operations
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a connector.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Every way a pool operation can fail.
///
/// Acquire failures are split into [`PoolExhausted`](Error::PoolExhausted),
/// [`Timeout`](Error::Timeout), [`PoolClosed`](Error::PoolClosed) and
/// [`Interrupted`](Error::Interrupted) so callers can choose between retrying,
/// failing fast and shedding load.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool cannot be built from the supplied configuration.
    #[error("Configuration error: {message}")]
    ConfigurationInvalid {
        /// The error message
        message: String,
        /// The underlying parse or validation error (if available)
        #[source]
        source: Option<BoxError>,
    },

    /// The connector failed to open a new connection.
    #[error("Failed to open connection via '{connector}': {source}")]
    ResourceCreationFailed {
        /// Name of the connector that failed
        connector: String,
        /// The connector error
        #[source]
        source: BoxError,
    },

    /// Capacity is reached and the bounded wait produced no usable connection.
    #[error("Pool exhausted: {size}/{capacity} connections, none usable")]
    PoolExhausted {
        /// Connections owned by the pool when the acquire gave up
        size: usize,
        /// Hard capacity of the pool
        capacity: usize,
    },

    /// No connection became available within the wait budget.
    #[error("Timed out after {}ms waiting for a connection", waited.as_millis())]
    Timeout {
        /// The wait budget that was exhausted
        waited: Duration,
    },

    /// The pool has been shut down.
    #[error("Pool is closed")]
    PoolClosed,

    /// A connection was released to a pool that does not own it.
    #[error("Connection {id} does not belong to this pool")]
    ForeignResource {
        /// Identifier of the rejected loan
        id: Uuid,
    },

    /// The wait for a connection was cancelled externally.
    #[error("Wait for a connection was interrupted after {}ms", waited.as_millis())]
    Interrupted {
        /// How long the caller had waited before the interruption
        waited: Duration,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationInvalid {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error carrying its cause
    pub fn configuration_with<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::ConfigurationInvalid {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a creation error for the named connector
    pub fn creation<S, E>(connector: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::ResourceCreationFailed {
            connector: connector.into(),
            source: source.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Exhaustion, timeouts and creation failures may clear up on their own;
    /// a closed pool, bad configuration or a foreign release never will.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted { .. }
            | Self::Timeout { .. }
            | Self::ResourceCreationFailed { .. } => true,
            Self::ConfigurationInvalid { .. }
            | Self::PoolClosed
            | Self::ForeignResource { .. }
            | Self::Interrupted { .. } => false,
        }
    }
}
