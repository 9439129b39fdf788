//! Error types for recipe definition, validation and resource building

use thiserror::Error;

/// Errors raised while defining, validating or building recipes
#[derive(Error, Debug)]
pub enum RecipeError {
    /// A user-supplied config value failed schema validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A recipe definition is structurally unusable
    #[error("invalid recipe definition: {0}")]
    InvalidDefinition(String),

    /// Two recipes were registered under the same slug
    #[error("recipe slug '{0}' is already registered")]
    DuplicateSlug(String),

    /// A dependency spec references a slug that is not in the registry
    #[error("recipe '{recipe}' depends on unregistered recipe '{dependency}'")]
    UnknownDependency { recipe: String, dependency: String },

    /// A build needed a secret value that was not supplied
    #[error("secret '{0}' was not provided to the build")]
    MissingSecret(String),

    /// A build needed connection info for an unresolved dependency alias
    #[error("no connection info resolved for dependency alias '{0}'")]
    MissingDependency(String),

    /// Serialization of a resource graph failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rendering a config-file payload failed
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for recipe operations
pub type Result<T> = std::result::Result<T, RecipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecipeError::UnknownDependency {
            recipe: "n8n".to_string(),
            dependency: "postgresql".to_string(),
        };
        assert!(err.to_string().contains("n8n"));
        assert!(err.to_string().contains("postgresql"));
    }
}
