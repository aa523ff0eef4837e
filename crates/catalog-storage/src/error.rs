//! Record store error types.

/// Errors returned by a record store.
///
/// The cache layer propagates these to its caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The record to update does not exist.
    #[error("Record not found: {namespace}/{id}")]
    NotFound {
        /// Namespace of the record that was not found.
        namespace: String,
        /// Id of the record that was not found.
        id: String,
    },

    /// Attempted to create a record that already exists.
    #[error("Record already exists: {namespace}/{id}")]
    AlreadyExists {
        /// Namespace of the existing record.
        namespace: String,
        /// Id of the existing record.
        id: String,
    },

    /// The record data is invalid.
    #[error("Invalid record: {message}")]
    InvalidRecord {
        /// Description of why the record is invalid.
        message: String,
    },

    /// The record store could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// An internal store error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Creates a new `InvalidRecord` error.
    #[must_use]
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            StoreError::not_found("product", "42").to_string(),
            "Record not found: product/42"
        );
        assert_eq!(
            StoreError::connection("refused").to_string(),
            "Connection error: refused"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(StoreError::not_found("product", "1").is_not_found());
        assert!(!StoreError::internal("x").is_not_found());
    }
}
