//! Error types for worker operations

use caravel_cluster::ClusterError;
use caravel_engine::EngineError;
use thiserror::Error;

/// Errors raised while executing jobs. Anything that reaches the queue
/// triggers its retry/backoff policy.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Engine-level failure (store, rebuild, audit)
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Cluster access failure
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Helm subprocess failure on the legacy chart path
    #[error("helm: {0}")]
    Helm(String),

    /// Subprocess I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Helm output was not parseable
    #[error("unexpected helm output: {0}")]
    HelmOutput(#[from] serde_json::Error),
}

/// Result type for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;
