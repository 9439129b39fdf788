//! Recipe archetypes
//!
//! Higher-order generators that turn a declarative descriptor (image, ports,
//! env rules, storage, probes) into a complete [`RecipeDefinition`]. The set
//! is closed: `database`, `cache` and `object_store` share the stateful
//! shape (StatefulSet + volume-claim template + headless and client
//! services), `web_app` produces a stateless Deployment with optional
//! persistence and ingress, and `custom` accepts caller-supplied build
//! functions for anything else.

use crate::builders::ResourceBuilder;
use crate::config::ConfigSchema;
use crate::definition::{
    BuildInput, ConnectionSpec, CustomRecipe, DependencySpec, EnvRule, Flavor, HealthProbe,
    RecipeDefinition, RecipeMeta, SecretsSpec, ValueRef,
};
use crate::error::Result;
use crate::graph::{Resource, ResourceGraph};
use std::collections::BTreeMap;

/// Workload shape shared by the stateful archetypes
#[derive(Debug, Clone)]
pub struct StatefulShape {
    /// Container image, fully pinned
    pub image: String,
    /// Container args, for images that need an explicit command line
    pub args: Vec<String>,
    /// Named container/service ports; the first is the primary
    pub ports: Vec<(String, u16)>,
    /// Environment rules for the container
    pub env: Vec<EnvRule>,
    /// Mount path for the per-replica data volume
    pub data_path: String,
    /// Config key holding the storage quantity
    pub storage_key: String,
    /// Config key holding the replica count, when tunable
    pub replicas_key: Option<String>,
    /// Settings rendered into a `config.yaml` ConfigMap mounted at
    /// `/etc/{slug}`; empty for images configured purely by env
    pub settings: Vec<(String, ValueRef)>,
    /// Connection contract for dependents
    pub connection: Option<ConnectionSpec>,
}

/// Workload shape for the web-app archetype
#[derive(Debug, Clone)]
pub struct WebAppShape {
    pub image: String,
    /// HTTP port the app serves on
    pub port: u16,
    pub env: Vec<EnvRule>,
    /// Mount path + storage config key, for apps that persist files
    pub storage: Option<(String, String)>,
}

/// Descriptor for the stateful archetypes
#[derive(Debug, Clone)]
pub struct StatefulDescriptor {
    pub meta: RecipeMeta,
    pub config: ConfigSchema,
    pub secrets: SecretsSpec,
    pub health: HealthProbe,
    pub shape: StatefulShape,
}

/// Descriptor for the web-app archetype
#[derive(Debug, Clone)]
pub struct WebAppDescriptor {
    pub meta: RecipeMeta,
    pub config: ConfigSchema,
    pub secrets: SecretsSpec,
    pub dependencies: Vec<DependencySpec>,
    pub health: HealthProbe,
    pub shape: WebAppShape,
}

/// A stateful database service (StatefulSet + headless/client services)
pub fn database(d: StatefulDescriptor) -> RecipeDefinition {
    stateful(d, Flavor::Database)
}

/// A stateful cache service
pub fn cache(d: StatefulDescriptor) -> RecipeDefinition {
    stateful(d, Flavor::Cache)
}

/// A stateful object store
pub fn object_store(d: StatefulDescriptor) -> RecipeDefinition {
    stateful(d, Flavor::ObjectStore)
}

fn stateful(d: StatefulDescriptor, variant: fn(StatefulShape) -> Flavor) -> RecipeDefinition {
    RecipeDefinition {
        meta: d.meta,
        config: d.config,
        secrets: d.secrets,
        // stateful services are leaves of the dependency graph
        dependencies: Vec::new(),
        health: d.health,
        flavor: variant(d.shape),
    }
}

/// A stateless web application with optional persistence and ingress
pub fn web_app(d: WebAppDescriptor) -> RecipeDefinition {
    RecipeDefinition {
        meta: d.meta,
        config: d.config,
        secrets: d.secrets,
        dependencies: d.dependencies,
        health: d.health,
        flavor: Flavor::WebApp(d.shape),
    }
}

/// A recipe with caller-supplied build/connection functions
pub fn custom(
    meta: RecipeMeta,
    config: ConfigSchema,
    secrets: SecretsSpec,
    dependencies: Vec<DependencySpec>,
    health: HealthProbe,
    functions: CustomRecipe,
) -> RecipeDefinition {
    RecipeDefinition {
        meta,
        config,
        secrets,
        dependencies,
        health,
        flavor: Flavor::Custom(functions),
    }
}

pub(crate) fn build_stateful(
    meta: &RecipeMeta,
    shape: &StatefulShape,
    health: &HealthProbe,
    input: &BuildInput,
) -> Result<ResourceGraph> {
    let builder = ResourceBuilder::new(input, &meta.slug);
    let mut graph = ResourceGraph::new();

    if !input.secrets.is_empty() {
        graph.push(Resource::Secret(builder.secret()));
    }

    let config_map = if shape.settings.is_empty() {
        None
    } else {
        let mut settings = BTreeMap::new();
        for (key, value) in &shape.settings {
            settings.insert(key.clone(), input.resolve(value)?);
        }
        let mut data = BTreeMap::new();
        data.insert("config.yaml".to_string(), serde_yaml::to_string(&settings)?);
        let cm = builder.config_map("config", data);
        let name = cm.metadata.name.clone().unwrap_or_default();
        graph.push(Resource::ConfigMap(cm));
        Some(name)
    };

    let replicas = match &shape.replicas_key {
        Some(key) => input
            .config
            .get(key)
            .and_then(|v| v.as_i64())
            .unwrap_or(1) as i32,
        None => 1,
    };
    let storage = input.config_str(&shape.storage_key)?;
    let env = builder.env(&shape.env)?;

    graph.push(Resource::StatefulSet(builder.stateful_set(
        &shape.image,
        &shape.args,
        replicas,
        &shape.ports,
        env,
        health,
        &shape.data_path,
        &storage,
        config_map.as_deref(),
    )));
    graph.push(Resource::Service(builder.headless_service(&shape.ports)));
    graph.push(Resource::Service(builder.client_service(&shape.ports)));

    Ok(graph)
}

pub(crate) fn build_web_app(
    meta: &RecipeMeta,
    shape: &WebAppShape,
    health: &HealthProbe,
    input: &BuildInput,
) -> Result<ResourceGraph> {
    let builder = ResourceBuilder::new(input, &meta.slug);
    let mut graph = ResourceGraph::new();

    if !input.secrets.is_empty() {
        graph.push(Resource::Secret(builder.secret()));
    }

    let storage = match &shape.storage {
        Some((path, size_key)) => {
            let size = input.config_str(size_key)?;
            graph.push(Resource::PersistentVolumeClaim(builder.volume_claim(&size)));
            Some((path.clone(), size))
        }
        None => None,
    };

    let env = builder.env(&shape.env)?;
    graph.push(Resource::Deployment(builder.deployment(
        &shape.image,
        shape.port,
        env,
        health,
        storage.as_ref().map(|(path, size)| (path.as_str(), size.as_str())),
    )));
    graph.push(Resource::Service(
        builder.client_service(&[("http".to_string(), shape.port)]),
    ));

    if let Some(ingress) = builder.ingress(shape.port) {
        graph.push(Resource::Ingress(ingress));
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::definition::IngressContext;
    use serde_json::Map;
    use std::collections::BTreeMap;

    fn postgres_input() -> BuildInput {
        let recipe = catalog::postgresql();
        BuildInput {
            name: "postgresql".to_string(),
            namespace: "ws-1".to_string(),
            config: recipe.config.validate(&Map::new()).unwrap(),
            secrets: BTreeMap::from([("password".to_string(), "p".repeat(32))]),
            connections: BTreeMap::new(),
            ingress: None,
        }
    }

    #[test]
    fn test_stateful_graph_order() {
        let recipe = catalog::postgresql();
        let graph = recipe.build(&postgres_input()).unwrap();
        let kinds: Vec<_> = graph.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec!["Secret", "StatefulSet", "Service", "Service"]
        );
    }

    #[test]
    fn test_build_is_pure() {
        let recipe = catalog::postgresql();
        let input = postgres_input();
        let first = recipe.build(&input).unwrap();
        let second = recipe.build(&input).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_web_app_ingress_gated_on_context() {
        let recipe = catalog::n8n();
        let mut input = BuildInput {
            name: "n8n".to_string(),
            namespace: "ws-1".to_string(),
            config: recipe.config.validate(&Map::new()).unwrap(),
            secrets: BTreeMap::from([("encryption-key".to_string(), "k".repeat(32))]),
            connections: BTreeMap::from([(
                "postgres".to_string(),
                crate::definition::ConnectionInfo {
                    host: "postgres.ws-1.svc.cluster.local".to_string(),
                    port: 5432,
                    extra: BTreeMap::from([
                        ("database".to_string(), "app".to_string()),
                        ("username".to_string(), "app".to_string()),
                        ("password".to_string(), "p".repeat(32)),
                    ]),
                },
            )]),
            ingress: None,
        };

        let dev = recipe.build(&input).unwrap();
        assert!(dev.ingress_host().is_none());

        input.ingress = Some(IngressContext {
            base_domain: "apps.example.com".to_string(),
            ingress_class: None,
            tls_secret: None,
        });
        let routed = recipe.build(&input).unwrap();
        assert_eq!(
            routed.ingress_host().as_deref(),
            Some("n8n.apps.example.com")
        );
    }

    #[test]
    fn test_settings_render_into_config_map() {
        use crate::config::ConfigField;

        let recipe = database(StatefulDescriptor {
            meta: RecipeMeta {
                slug: "mariadb".to_string(),
                name: "MariaDB".to_string(),
                description: "Relational database".to_string(),
                category: "database".to_string(),
                version: "11.4".to_string(),
            },
            config: ConfigSchema::new(vec![
                ConfigField::integer("max_connections", "Max connections", 100, 10, 1000),
                ConfigField::quantity("storage", "Storage size", "5Gi"),
            ]),
            secrets: SecretsSpec::empty(),
            health: HealthProbe::Tcp { port: 3306 },
            shape: StatefulShape {
                image: "mariadb:11.4".to_string(),
                args: vec![],
                ports: vec![("mysql".to_string(), 3306)],
                env: vec![],
                data_path: "/var/lib/mysql".to_string(),
                storage_key: "storage".to_string(),
                replicas_key: None,
                settings: vec![(
                    "max_connections".to_string(),
                    ValueRef::Config("max_connections".to_string()),
                )],
                connection: None,
            },
        });

        let input = BuildInput {
            name: "mariadb".to_string(),
            namespace: "ws-1".to_string(),
            config: recipe.config.validate(&Map::new()).unwrap(),
            secrets: BTreeMap::new(),
            connections: BTreeMap::new(),
            ingress: None,
        };
        let graph = recipe.build(&input).unwrap();
        let kinds: Vec<_> = graph.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["ConfigMap", "StatefulSet", "Service", "Service"]);

        let payload = graph
            .iter()
            .find_map(|r| match r {
                Resource::ConfigMap(cm) => cm.data.as_ref(),
                _ => None,
            })
            .unwrap();
        assert!(payload["config.yaml"].contains("max_connections"));
    }

    #[test]
    fn test_missing_dependency_fails_build() {
        let recipe = catalog::n8n();
        let input = BuildInput {
            name: "n8n".to_string(),
            namespace: "ws-1".to_string(),
            config: recipe.config.validate(&Map::new()).unwrap(),
            secrets: BTreeMap::new(),
            connections: BTreeMap::new(),
            ingress: None,
        };
        assert!(recipe.build(&input).is_err());
    }
}
