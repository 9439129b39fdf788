//! The recipe registry
//!
//! An explicit catalog object constructed once at process start and passed
//! by reference to the engine and worker. Keeping it injectable (rather
//! than a module-level singleton) lets tests register fixtures freely.

use crate::definition::RecipeDefinition;
use crate::error::{RecipeError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory catalog mapping a slug to its recipe definition
#[derive(Debug, Default)]
pub struct RecipeRegistry {
    recipes: BTreeMap<String, Arc<RecipeDefinition>>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recipe.
    ///
    /// Rejects duplicate slugs and definitions missing required fields.
    pub fn register(&mut self, recipe: RecipeDefinition) -> Result<()> {
        let slug = recipe.meta.slug.clone();
        if slug.is_empty() || recipe.meta.name.is_empty() {
            return Err(RecipeError::InvalidDefinition(
                "slug and display name are required".to_string(),
            ));
        }
        crate::config::validate_name(&slug)?;
        if self.recipes.contains_key(&slug) {
            return Err(RecipeError::DuplicateSlug(slug));
        }
        debug!(slug = %slug, "Registered recipe");
        self.recipes.insert(slug, Arc::new(recipe));
        Ok(())
    }

    /// Look up a recipe by slug
    pub fn get(&self, slug: &str) -> Option<Arc<RecipeDefinition>> {
        self.recipes.get(slug).cloned()
    }

    /// Registered slugs, sorted
    pub fn slugs(&self) -> Vec<&str> {
        self.recipes.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RecipeDefinition>> {
        self.recipes.values()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Check cross-recipe invariants after all registrations.
    ///
    /// Every dependency slug must be registered and expose connection info,
    /// and dependency recipes must not declare dependencies of their own:
    /// resolution is one level deep by contract, so a deeper chain must be
    /// impossible to register rather than fail at build time.
    pub fn validate(&self) -> Result<()> {
        for recipe in self.recipes.values() {
            for dep in &recipe.dependencies {
                let target = self.recipes.get(&dep.recipe).ok_or_else(|| {
                    RecipeError::UnknownDependency {
                        recipe: recipe.meta.slug.clone(),
                        dependency: dep.recipe.clone(),
                    }
                })?;
                if !target.has_connection_info() {
                    return Err(RecipeError::InvalidDefinition(format!(
                        "recipe '{}' depends on '{}', which exposes no connection info",
                        recipe.meta.slug, dep.recipe
                    )));
                }
                if !target.dependencies.is_empty() {
                    return Err(RecipeError::InvalidDefinition(format!(
                        "recipe '{}' depends on '{}', which has dependencies of its own \
                         (resolution is one level deep)",
                        recipe.meta.slug, dep.recipe
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    #[test]
    fn test_builtins_register_and_validate() {
        let registry = catalog::builtin_registry().unwrap();
        assert!(registry.get("postgresql").is_some());
        assert!(registry.get("valkey").is_some());
        assert!(registry.get("minio").is_some());
        assert!(registry.get("n8n").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_slug_rejected() {
        let mut registry = RecipeRegistry::new();
        registry.register(catalog::postgresql()).unwrap();
        let err = registry.register(catalog::postgresql()).unwrap_err();
        assert!(matches!(err, RecipeError::DuplicateSlug(_)));
    }

    #[test]
    fn test_unregistered_dependency_rejected() {
        let mut registry = RecipeRegistry::new();
        // n8n depends on postgresql, which is absent
        registry.register(catalog::n8n()).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, RecipeError::UnknownDependency { .. }));
    }
}
