//! Error types for kyronotify.
//!
//! All errors are strongly typed using thiserror. Leaf enums describe one
//! collaborator each (validation, connectors, listeners, the dispatch pool)
//! and roll up into [`NotifyError`].

use thiserror::Error;

/// Validation errors raised before any registry state is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Category identifier cannot be empty")]
    EmptyIdentifier,

    #[error("Category name cannot be empty")]
    EmptyCategory,

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors reported by a resource connector's open/close category callbacks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("Category '{category}' is not supported by this resource")]
    Unsupported {
        category: String,
    },

    #[error("Invalid option '{key}': {reason}")]
    InvalidOption {
        key: String,
        reason: String,
    },

    #[error("Connector backend error: {message}")]
    Backend {
        message: String,
    },
}

impl ConnectorError {
    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Failure of a single listener invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("listener failed: {reason}")]
    Failed {
        reason: String,
    },

    #[error("listener panicked: {message}")]
    Panicked {
        message: String,
    },

    #[error("delivery rejected: {reason}")]
    Rejected {
        reason: String,
    },
}

impl ListenerError {
    /// Creates a plain listener failure.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Errors from the task-submission layer used by parallel dispatch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatch queue '{pool}' is full (capacity {capacity})")]
    QueueFull {
        pool: String,
        capacity: usize,
    },

    #[error("Dispatch queue '{pool}' is disconnected")]
    Disconnected {
        pool: String,
    },
}

/// Top-level error type for kyronotify.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to enable category '{identifier}': {source}")]
    EnableFailure {
        identifier: String,
        #[source]
        source: ConnectorError,
    },

    #[error("Listener not found: {listener}")]
    ListenerNotFound {
        listener: String,
    },

    #[error("Listener '{listener}' failed during dispatch: {source}")]
    ListenerInvocation {
        listener: String,
        #[source]
        source: ListenerError,
    },

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Notification repository for '{resource}' is closed")]
    Closed {
        resource: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NotifyError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if a connector refused to open a category.
    #[must_use]
    pub const fn is_enable_failure(&self) -> bool {
        matches!(self, Self::EnableFailure { .. })
    }

    /// Returns true if an unsubscribe named an unknown listener.
    #[must_use]
    pub const fn is_listener_not_found(&self) -> bool {
        matches!(self, Self::ListenerNotFound { .. })
    }

    /// Returns true if a listener failed while a message was delivered.
    #[must_use]
    pub const fn is_listener_invocation(&self) -> bool {
        matches!(self, Self::ListenerInvocation { .. })
    }

    /// Returns true if the repository has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::ListenerNotFound { .. } | Self::Closed { .. } => false,
            Self::EnableFailure { source, .. } => matches!(source, ConnectorError::Backend { .. }),
            Self::Dispatch(e) => matches!(e, DispatchError::QueueFull { .. }),
            Self::ListenerInvocation { .. } | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for kyronotify operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_failure_names_category() {
        let err = NotifyError::EnableFailure {
            identifier: "cpu-alerts".to_string(),
            source: ConnectorError::Unsupported {
                category: "cpu.load".to_string(),
            },
        };
        let msg = format!("{err}");
        assert!(msg.contains("cpu-alerts"));
        assert!(msg.contains("cpu.load"));
        assert!(err.is_enable_failure());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_backend_enable_failure_is_retryable() {
        let err = NotifyError::EnableFailure {
            identifier: "disk".to_string(),
            source: ConnectorError::backend("timeout"),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_listener_not_found() {
        let err = NotifyError::ListenerNotFound {
            listener: "audit".to_string(),
        };
        assert!(err.is_listener_not_found());
        assert!(format!("{err}").contains("audit"));
    }

    #[test]
    fn test_listener_invocation_carries_source() {
        let err = NotifyError::ListenerInvocation {
            listener: "printer".to_string(),
            source: ListenerError::failed("broken pipe"),
        };
        assert!(err.is_listener_invocation());
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("listener failed: broken pipe"));
    }

    #[test]
    fn test_from_validation_and_dispatch() {
        let err: NotifyError = ValidationError::EmptyIdentifier.into();
        assert!(matches!(err, NotifyError::Validation(ValidationError::EmptyIdentifier)));

        let err: NotifyError = DispatchError::QueueFull {
            pool: "dispatch".to_string(),
            capacity: 8,
        }
        .into();
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("capacity 8"));
    }

    #[test]
    fn test_closed_and_internal() {
        let err = NotifyError::Closed {
            resource: "db-1".to_string(),
        };
        assert!(err.is_closed());
        assert!(!err.is_retryable());

        let err = NotifyError::internal("unexpected state");
        assert!(format!("{err}").contains("unexpected state"));
    }
}
