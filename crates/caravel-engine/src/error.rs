//! Error taxonomy for engine operations
//!
//! Engine errors are synchronous and surfaced directly to the caller with a
//! human-readable message; callers map them to user-facing text.

use caravel_cluster::ClusterError;
use caravel_recipe::RecipeError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// No recipe registered under the requested slug
    #[error("recipe '{0}' is not in the catalog")]
    RecipeNotFound(String),

    /// The workspace does not exist (or is not visible to the tenant)
    #[error("workspace '{0}' not found")]
    WorkspaceNotFound(String),

    /// The deployment does not exist (or is not visible to the tenant)
    #[error("deployment '{0}' not found")]
    DeploymentNotFound(Uuid),

    /// A non-stopped deployment with this name already exists
    #[error("'{name}' is already deployed in workspace '{workspace}'")]
    AlreadyDeployed { name: String, workspace: String },

    /// Config failed schema validation
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Removal refused: other deployments depend on this one
    #[error("'{name}' cannot be removed: {} depend(s) on it ({})", dependents.len(), dependents.join(", "))]
    HasDependents {
        name: String,
        dependents: Vec<String>,
    },

    /// A declared dependency's recipe is not registered
    #[error("dependency '{alias}' requires unregistered recipe '{recipe}'")]
    DependencyNotFound { alias: String, recipe: String },

    /// A dependency recipe exposes no connection info
    #[error("dependency '{alias}' ({recipe}) is not consumable: {reason}")]
    DependencyMisconfigured {
        alias: String,
        recipe: String,
        reason: String,
    },

    /// Cluster-level failure while applying resources, aggregated per resource
    #[error("apply failed: {}", failures.join("; "))]
    ApplyFailed { failures: Vec<String> },

    /// Cluster-level failure while deleting resources, aggregated per resource
    #[error("delete failed: {}", failures.join("; "))]
    DeleteFailed { failures: Vec<String> },

    /// A workspace snapshot failed validation
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Recipe machinery failure outside config validation
    #[error("recipe error: {0}")]
    Recipe(String),

    /// Cluster access failure
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Persistence failure
    #[error("store error: {0}")]
    Store(String),

    /// Job queue failure
    #[error("queue error: {0}")]
    Queue(String),

    /// Secret generation failure (system RNG unavailable)
    #[error("secret generation failed: {0}")]
    SecretGeneration(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RecipeError> for EngineError {
    fn from(err: RecipeError) -> Self {
        match err {
            RecipeError::InvalidConfig(message) => EngineError::InvalidConfiguration(message),
            other => EngineError::Recipe(other.to_string()),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_dependents_names_blockers() {
        let err = EngineError::HasDependents {
            name: "postgresql".to_string(),
            dependents: vec!["n8n".to_string(), "grafana".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("n8n"));
        assert!(message.contains("grafana"));
    }

    #[test]
    fn test_invalid_config_maps_from_recipe_error() {
        let err: EngineError =
            RecipeError::InvalidConfig("field 'storage' must be a quantity".to_string()).into();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }
}
