//! Error types for the secret reloader
//!
//! Errors carry the context needed to act on them from logs alone: which
//! queue operation failed, which workload could not be restarted. The
//! reconciler uses [`Error::is_transient`] to decide whether a failure only
//! delays the next cycle or needs operator attention.

use thiserror::Error;

/// Main error type for reloader operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed process configuration
    #[error("configuration error [{key}]: {message}")]
    Config {
        /// Environment variable or flag that is at fault
        key: String,
        /// Description of what's wrong
        message: String,
    },

    /// Invalid SQSSecret spec
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with the invalid spec
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Queue transport or authorization failure
    #[error("queue {operation} failed: {message}")]
    Queue {
        /// Queue operation that failed (receive, delete)
        operation: &'static str,
        /// Rendered error from the queue client
        message: String,
    },

    /// A workload named by an SQSSecret does not exist
    #[error("deployment {namespace}/{name} not found")]
    WorkloadNotFound {
        /// Deployment name
        name: String,
        /// Deployment namespace
        namespace: String,
    },

    /// Fetching or patching a workload failed
    #[error("deployment {namespace}/{name}: {message}")]
    Workload {
        /// Deployment name
        name: String,
        /// Deployment namespace
        namespace: String,
        /// Description of what failed
        message: String,
    },

    /// The SQSSecret has no namespace
    #[error("SQSSecret {0} has no namespace")]
    MissingNamespace(String),
}

impl Error {
    /// Create a configuration error for the given key
    pub fn config(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error for the given resource
    pub fn validation(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a queue error for the given operation
    pub fn queue(operation: &'static str, msg: impl Into<String>) -> Self {
        Self::Queue {
            operation,
            message: msg.into(),
        }
    }

    /// Create a workload error for the given deployment
    pub fn workload(
        name: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Workload {
            name: name.into(),
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Whether retrying the same cycle later can succeed without anyone
    /// changing configuration or the resource spec.
    ///
    /// A missing deployment counts as transient: it may simply not have been
    /// created yet.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube { .. }
            | Self::Queue { .. }
            | Self::WorkloadNotFound { .. }
            | Self::Workload { .. } => true,
            Self::Config { .. } | Self::Validation { .. } | Self::MissingNamespace(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::queue("receive", "dispatch failure");
        assert_eq!(err.to_string(), "queue receive failed: dispatch failure");

        let err = Error::WorkloadNotFound {
            name: "api".into(),
            namespace: "payments".into(),
        };
        assert_eq!(err.to_string(), "deployment payments/api not found");

        let err = Error::config("SECRETS_SQS_QUEUE_URL", "must be set");
        assert!(err.to_string().contains("SECRETS_SQS_QUEUE_URL"));
    }

    #[test]
    fn transport_and_target_errors_are_transient() {
        assert!(Error::queue("delete", "timeout").is_transient());
        assert!(Error::workload("api", "default", "conflict").is_transient());
        assert!(Error::WorkloadNotFound {
            name: "api".into(),
            namespace: "default".into()
        }
        .is_transient());
    }

    #[test]
    fn spec_and_config_errors_are_not_transient() {
        assert!(!Error::validation("s1", "secretId is empty").is_transient());
        assert!(!Error::config("AWS_DEFAULT_REGION", "must be set").is_transient());
        assert!(!Error::MissingNamespace("s1".into()).is_transient());
    }
}
