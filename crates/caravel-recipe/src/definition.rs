//! Recipe definitions and the contracts recipes expose to the engine

use crate::archetypes::{self, StatefulShape, WebAppShape};
use crate::config::ConfigSchema;
use crate::error::{RecipeError, Result};
use crate::graph::ResourceGraph;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Display metadata for a recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeMeta {
    /// Unique registry key, also the default instance name
    pub slug: String,
    /// Human-readable name
    pub name: String,
    pub description: String,
    /// Catalog grouping ("database", "cache", "automation", ...)
    pub category: String,
    /// Version of the packaged service
    pub version: String,
}

/// One named credential a recipe needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretField {
    pub name: String,
    /// Auto-generate a random value when none exists yet
    pub generate: bool,
    /// Length of generated values
    pub length: usize,
}

impl SecretField {
    /// A credential generated fresh on first deploy and reused afterwards
    pub fn generated(name: &str, length: usize) -> Self {
        Self {
            name: name.to_string(),
            generate: true,
            length,
        }
    }
}

/// The credentials a recipe declares
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsSpec {
    pub fields: Vec<SecretField>,
}

impl SecretsSpec {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(fields: Vec<SecretField>) -> Self {
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A declared dependency on another recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Alias the dependent recipe uses; also the instance name the resolver
    /// looks up (or creates) in the workspace
    pub alias: String,
    /// Slug of the recipe to find or auto-deploy
    pub recipe: String,
    /// Config used when auto-deploying the dependency
    pub default_config: Map<String, Value>,
}

impl DependencySpec {
    pub fn new(alias: &str, recipe: &str) -> Self {
        Self {
            alias: alias.to_string(),
            recipe: recipe.to_string(),
            default_config: Map::new(),
        }
    }
}

/// How pod health is probed for a recipe's workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthProbe {
    /// TCP connect to the given container port
    Tcp { port: u16 },
    /// HTTP GET expecting a 2xx
    Http { path: String, port: u16 },
}

/// Connection contract a recipe exposes to its dependents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// In-cluster DNS name of the client service
    pub host: String,
    pub port: u16,
    /// Additional fields (database name, credentials, ...)
    pub extra: BTreeMap<String, String>,
}

/// Reference to a value available at build time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRef {
    /// A fixed string
    Literal(String),
    /// A validated config field, rendered as a string
    Config(String),
    /// A secret value by name
    Secret(String),
}

/// Declares how a recipe's [`ConnectionInfo`] is assembled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Port dependents connect to
    pub port: u16,
    /// Extra fields (key, value reference)
    pub extra: Vec<(String, ValueRef)>,
}

/// Where an environment variable's value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSource {
    /// A fixed string
    Literal(String),
    /// A validated config field, rendered as a string
    Config(String),
    /// A `secretKeyRef` into the instance's secret object
    SecretRef(String),
    /// Host from a dependency's connection info
    DepHost(String),
    /// Port from a dependency's connection info
    DepPort(String),
    /// An extra field from a dependency's connection info
    DepExtra { alias: String, key: String },
}

/// One environment variable rule for a recipe's container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvRule {
    pub name: String,
    pub from: EnvSource,
}

impl EnvRule {
    pub fn new(name: &str, from: EnvSource) -> Self {
        Self {
            name: name.to_string(),
            from,
        }
    }
}

/// Cluster-routing context: present only when the platform exposes services
/// through an ingress controller. Local/dev deployments leave it unset and
/// rely on the worker's port-forward mechanism instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressContext {
    /// Domain instances are exposed under (`{name}.{base_domain}`)
    pub base_domain: String,
    /// Ingress class to request, when the cluster has several
    pub ingress_class: Option<String>,
    /// TLS secret for the wildcard certificate
    pub tls_secret: Option<String>,
}

/// Everything a build needs. Builds are pure: the same input always yields
/// the same graph.
#[derive(Debug, Clone)]
pub struct BuildInput {
    /// Instance name, unique within the workspace
    pub name: String,
    /// Namespace the workspace maps to
    pub namespace: String,
    /// Validated config with defaults filled in
    pub config: Map<String, Value>,
    /// Secret values by name
    pub secrets: BTreeMap<String, String>,
    /// Resolved dependency connections by alias
    pub connections: BTreeMap<String, ConnectionInfo>,
    /// Present in cluster-routed mode only
    pub ingress: Option<IngressContext>,
}

impl BuildInput {
    /// Render a config field as a string for env/connection wiring
    pub fn config_str(&self, key: &str) -> Result<String> {
        let value = self.config.get(key).ok_or_else(|| {
            RecipeError::InvalidConfig(format!("config field '{}' missing from build input", key))
        })?;
        Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Look up a secret value
    pub fn secret(&self, name: &str) -> Result<&str> {
        self.secrets
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| RecipeError::MissingSecret(name.to_string()))
    }

    /// Look up a resolved dependency connection
    pub fn connection(&self, alias: &str) -> Result<&ConnectionInfo> {
        self.connections
            .get(alias)
            .ok_or_else(|| RecipeError::MissingDependency(alias.to_string()))
    }

    pub(crate) fn resolve(&self, value: &ValueRef) -> Result<String> {
        Ok(match value {
            ValueRef::Literal(s) => s.clone(),
            ValueRef::Config(key) => self.config_str(key)?,
            ValueRef::Secret(name) => self.secret(name)?.to_string(),
        })
    }
}

/// Custom build functions for recipes outside the standard archetypes
#[derive(Clone)]
pub struct CustomRecipe {
    pub build: Arc<dyn Fn(&BuildInput) -> Result<ResourceGraph> + Send + Sync>,
    pub connection: Option<Arc<dyn Fn(&BuildInput) -> Result<ConnectionInfo> + Send + Sync>>,
}

/// The closed set of recipe shapes.
///
/// Modeled as a tagged union rather than trait objects: the set of shapes
/// is small and fixed, and matching keeps each graph layout in one place.
#[derive(Clone)]
pub enum Flavor {
    Database(StatefulShape),
    Cache(StatefulShape),
    ObjectStore(StatefulShape),
    WebApp(WebAppShape),
    Custom(CustomRecipe),
}

impl fmt::Debug for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flavor::Database(_) => "Database",
            Flavor::Cache(_) => "Cache",
            Flavor::ObjectStore(_) => "ObjectStore",
            Flavor::WebApp(_) => "WebApp",
            Flavor::Custom(_) => "Custom",
        })
    }
}

/// A registered, versionable template describing how to deploy one kind of
/// service. Immutable once registered.
#[derive(Debug, Clone)]
pub struct RecipeDefinition {
    pub meta: RecipeMeta,
    pub config: ConfigSchema,
    pub secrets: SecretsSpec,
    pub dependencies: Vec<DependencySpec>,
    pub health: HealthProbe,
    pub(crate) flavor: Flavor,
}

impl RecipeDefinition {
    /// Assemble the resource graph for one deployment instance.
    ///
    /// Deterministic and side-effect free; the engine persists the result.
    pub fn build(&self, input: &BuildInput) -> Result<ResourceGraph> {
        match &self.flavor {
            Flavor::Database(shape) | Flavor::Cache(shape) | Flavor::ObjectStore(shape) => {
                archetypes::build_stateful(&self.meta, shape, &self.health, input)
            }
            Flavor::WebApp(shape) => {
                archetypes::build_web_app(&self.meta, shape, &self.health, input)
            }
            Flavor::Custom(custom) => (custom.build)(input),
        }
    }

    /// Connection contract for dependents, when the recipe exposes one
    pub fn connection_info(&self, input: &BuildInput) -> Result<Option<ConnectionInfo>> {
        match &self.flavor {
            Flavor::Database(shape) | Flavor::Cache(shape) | Flavor::ObjectStore(shape) => {
                match &shape.connection {
                    Some(spec) => {
                        let mut extra = BTreeMap::new();
                        for (key, value) in &spec.extra {
                            extra.insert(key.clone(), input.resolve(value)?);
                        }
                        Ok(Some(ConnectionInfo {
                            host: service_host(&input.name, &input.namespace),
                            port: spec.port,
                            extra,
                        }))
                    }
                    None => Ok(None),
                }
            }
            Flavor::WebApp(_) => Ok(None),
            Flavor::Custom(custom) => match &custom.connection {
                Some(f) => f(input).map(Some),
                None => Ok(None),
            },
        }
    }

    /// Whether dependents can consume this recipe
    pub fn has_connection_info(&self) -> bool {
        match &self.flavor {
            Flavor::Database(shape) | Flavor::Cache(shape) | Flavor::ObjectStore(shape) => {
                shape.connection.is_some()
            }
            Flavor::WebApp(_) => false,
            Flavor::Custom(custom) => custom.connection.is_some(),
        }
    }
}

/// In-cluster DNS name of an instance's client service
pub fn service_host(name: &str, namespace: &str) -> String {
    format!("{}.{}.svc.cluster.local", name, namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_host() {
        assert_eq!(
            service_host("postgres", "ws-1"),
            "postgres.ws-1.svc.cluster.local"
        );
    }

    #[test]
    fn test_build_input_lookups() {
        let mut config = Map::new();
        config.insert("database".to_string(), Value::String("app".to_string()));
        config.insert("replicas".to_string(), Value::from(2));
        let input = BuildInput {
            name: "pg".to_string(),
            namespace: "default".to_string(),
            config,
            secrets: BTreeMap::from([("password".to_string(), "s3cret".to_string())]),
            connections: BTreeMap::new(),
            ingress: None,
        };

        assert_eq!(input.config_str("database").unwrap(), "app");
        assert_eq!(input.config_str("replicas").unwrap(), "2");
        assert_eq!(input.secret("password").unwrap(), "s3cret");
        assert!(matches!(
            input.secret("missing"),
            Err(RecipeError::MissingSecret(_))
        ));
        assert!(matches!(
            input.connection("db"),
            Err(RecipeError::MissingDependency(_))
        ));
    }
}
