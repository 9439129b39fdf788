//! Error types for cluster operations

use thiserror::Error;

/// Errors raised by the cluster access layer
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A resource the operation expected does not exist
    #[error("{kind}/{name} not found in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// A resource manifest is unusable (e.g. missing metadata.name)
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// No pod matched a selector when one was required
    #[error("no pod matches selector '{0}'")]
    NoPodsFound(String),

    /// Port-forward setup or bridging failed
    #[error("port-forward failed: {0}")]
    PortForward(String),

    /// Operation timed out
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Local I/O error (port-forward listener)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    /// Whether this error means "already gone" - deletion treats that as
    /// success.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound { .. } => true,
            ClusterError::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err = ClusterError::NotFound {
            kind: "Service".to_string(),
            name: "pg".to_string(),
            namespace: "ws-1".to_string(),
        };
        assert!(err.is_not_found());

        let err = ClusterError::Timeout("readiness".to_string());
        assert!(!err.is_not_found());
    }
}
