//! # Error Handling
//!
//! Error types for the Keyplane data plane using `thiserror`.
//!
//! The taxonomy follows the failure domains of the engine: configuration
//! errors surface synchronously before any side effect, transient I/O errors
//! are retryable by the persistence workers, data errors degrade gracefully,
//! and unsupported backing stores fail loudly with their own variant.

/// Custom result type for Keyplane operations
pub type Result<T> = std::result::Result<T, KeyplaneError>;

/// Main error type for the Keyplane data plane
#[derive(thiserror::Error, Debug)]
pub enum KeyplaneError {
    /// Configuration errors (root key unset, malformed key material,
    /// invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cryptographic failures (key parse, seal/open failures)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Relational store errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Cluster object store errors
    #[error("Cluster store error: {0}")]
    Cluster(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// IV-throttle rejections from the symmetric codec
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Timeout errors
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// A backing store kind with no registered adapter was selected
    #[error("Unsupported backing store: {0}")]
    UnsupportedBackingStore(String),

    /// Internal invariant violations (closed queues, missing handles)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeyplaneError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new crypto error
    pub fn crypto<S: Into<String>>(message: S) -> Self {
        Self::Crypto(message.into())
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Create a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Create a cluster store error
    pub fn cluster<S: Into<String>>(message: S) -> Self {
        Self::Cluster(message.into())
    }

    /// Create a serialization error with context
    pub fn serialization<S: Into<String>>(source: serde_json::Error, context: S) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    /// Create a rate limit error
    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::RateLimited(message.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create an unsupported-backing-store error
    pub fn unsupported_backing_store<S: Into<String>>(kind: S) -> Self {
        Self::UnsupportedBackingStore(kind.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error should be retried by a persistence worker
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeyplaneError::Io { .. }
                | KeyplaneError::Database { .. }
                | KeyplaneError::Cluster(_)
                | KeyplaneError::RateLimited(_)
                | KeyplaneError::Timeout { .. }
        )
    }
}

// Error conversions for common external error types
impl From<std::io::Error> for KeyplaneError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<sqlx::Error> for KeyplaneError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<serde_json::Error> for KeyplaneError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for KeyplaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::config(format!("Validation failed: {}", message))
    }
}
