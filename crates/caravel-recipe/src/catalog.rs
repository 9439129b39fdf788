//! Built-in recipes
//!
//! The services Caravel ships out of the box. Images are pinned; version
//! bumps go through here so every new deployment picks them up while
//! existing instances keep their persisted graphs until upgraded.

use crate::archetypes::{
    self, StatefulDescriptor, StatefulShape, WebAppDescriptor, WebAppShape,
};
use crate::config::{ConfigField, ConfigSchema};
use crate::definition::{
    ConnectionSpec, DependencySpec, EnvRule, EnvSource, HealthProbe, RecipeMeta, SecretField,
    SecretsSpec, ValueRef,
};
use crate::error::Result;
use crate::registry::RecipeRegistry;

/// Registry preloaded with every built-in recipe
pub fn builtin_registry() -> Result<RecipeRegistry> {
    let mut registry = RecipeRegistry::new();
    registry.register(postgresql())?;
    registry.register(valkey())?;
    registry.register(minio())?;
    registry.register(n8n())?;
    registry.validate()?;
    Ok(registry)
}

/// PostgreSQL relational database
pub fn postgresql() -> crate::RecipeDefinition {
    archetypes::database(StatefulDescriptor {
        meta: RecipeMeta {
            slug: "postgresql".to_string(),
            name: "PostgreSQL".to_string(),
            description: "Relational database".to_string(),
            category: "database".to_string(),
            version: "16.4".to_string(),
        },
        config: ConfigSchema::new(vec![
            ConfigField::text("database", "Database name", "app"),
            ConfigField::text("username", "Username", "app"),
            ConfigField::quantity("storage", "Storage size", "10Gi"),
        ]),
        secrets: SecretsSpec::new(vec![SecretField::generated("password", 32)]),
        health: HealthProbe::Tcp { port: 5432 },
        shape: StatefulShape {
            image: "postgres:16.4".to_string(),
            args: vec![],
            ports: vec![("postgres".to_string(), 5432)],
            env: vec![
                EnvRule::new("POSTGRES_DB", EnvSource::Config("database".to_string())),
                EnvRule::new("POSTGRES_USER", EnvSource::Config("username".to_string())),
                EnvRule::new(
                    "POSTGRES_PASSWORD",
                    EnvSource::SecretRef("password".to_string()),
                ),
                // the mount point itself is not writable by postgres' initdb
                EnvRule::new(
                    "PGDATA",
                    EnvSource::Literal("/var/lib/postgresql/data/pgdata".to_string()),
                ),
            ],
            data_path: "/var/lib/postgresql/data".to_string(),
            storage_key: "storage".to_string(),
            replicas_key: None,
            settings: vec![],
            connection: Some(ConnectionSpec {
                port: 5432,
                extra: vec![
                    (
                        "database".to_string(),
                        ValueRef::Config("database".to_string()),
                    ),
                    (
                        "username".to_string(),
                        ValueRef::Config("username".to_string()),
                    ),
                    (
                        "password".to_string(),
                        ValueRef::Secret("password".to_string()),
                    ),
                ],
            }),
        },
    })
}

/// Valkey key-value cache
pub fn valkey() -> crate::RecipeDefinition {
    archetypes::cache(StatefulDescriptor {
        meta: RecipeMeta {
            slug: "valkey".to_string(),
            name: "Valkey".to_string(),
            description: "In-memory key-value cache".to_string(),
            category: "cache".to_string(),
            version: "8.0".to_string(),
        },
        config: ConfigSchema::new(vec![ConfigField::quantity(
            "storage",
            "Storage size",
            "5Gi",
        )]),
        secrets: SecretsSpec::new(vec![SecretField::generated("password", 24)]),
        health: HealthProbe::Tcp { port: 6379 },
        shape: StatefulShape {
            image: "bitnami/valkey:8.0".to_string(),
            args: vec![],
            ports: vec![("valkey".to_string(), 6379)],
            env: vec![EnvRule::new(
                "VALKEY_PASSWORD",
                EnvSource::SecretRef("password".to_string()),
            )],
            data_path: "/bitnami/valkey/data".to_string(),
            storage_key: "storage".to_string(),
            replicas_key: None,
            settings: vec![],
            connection: Some(ConnectionSpec {
                port: 6379,
                extra: vec![(
                    "password".to_string(),
                    ValueRef::Secret("password".to_string()),
                )],
            }),
        },
    })
}

/// MinIO S3-compatible object store
pub fn minio() -> crate::RecipeDefinition {
    archetypes::object_store(StatefulDescriptor {
        meta: RecipeMeta {
            slug: "minio".to_string(),
            name: "MinIO".to_string(),
            description: "S3-compatible object storage".to_string(),
            category: "storage".to_string(),
            version: "2024-10-02".to_string(),
        },
        config: ConfigSchema::new(vec![ConfigField::quantity(
            "storage",
            "Storage size",
            "20Gi",
        )]),
        secrets: SecretsSpec::new(vec![
            SecretField::generated("root-user", 16),
            SecretField::generated("root-password", 32),
        ]),
        health: HealthProbe::Http {
            path: "/minio/health/live".to_string(),
            port: 9000,
        },
        shape: StatefulShape {
            image: "minio/minio:RELEASE.2024-10-02T17-50-41Z".to_string(),
            args: vec![
                "server".to_string(),
                "/data".to_string(),
                "--console-address".to_string(),
                ":9001".to_string(),
            ],
            ports: vec![("api".to_string(), 9000), ("console".to_string(), 9001)],
            env: vec![
                EnvRule::new(
                    "MINIO_ROOT_USER",
                    EnvSource::SecretRef("root-user".to_string()),
                ),
                EnvRule::new(
                    "MINIO_ROOT_PASSWORD",
                    EnvSource::SecretRef("root-password".to_string()),
                ),
            ],
            data_path: "/data".to_string(),
            storage_key: "storage".to_string(),
            replicas_key: None,
            settings: vec![],
            connection: Some(ConnectionSpec {
                port: 9000,
                extra: vec![
                    (
                        "access-key".to_string(),
                        ValueRef::Secret("root-user".to_string()),
                    ),
                    (
                        "secret-key".to_string(),
                        ValueRef::Secret("root-password".to_string()),
                    ),
                ],
            }),
        },
    })
}

/// n8n workflow automation, backed by PostgreSQL
pub fn n8n() -> crate::RecipeDefinition {
    archetypes::web_app(WebAppDescriptor {
        meta: RecipeMeta {
            slug: "n8n".to_string(),
            name: "n8n".to_string(),
            description: "Workflow automation platform".to_string(),
            category: "automation".to_string(),
            version: "1.64".to_string(),
        },
        config: ConfigSchema::new(vec![
            ConfigField::text("timezone", "Timezone", "UTC"),
            ConfigField::quantity("storage", "Storage size", "5Gi"),
        ]),
        secrets: SecretsSpec::new(vec![SecretField::generated("encryption-key", 32)]),
        dependencies: vec![DependencySpec::new("postgres", "postgresql")],
        health: HealthProbe::Http {
            path: "/healthz".to_string(),
            port: 5678,
        },
        shape: WebAppShape {
            image: "n8nio/n8n:1.64.0".to_string(),
            port: 5678,
            env: vec![
                EnvRule::new("DB_TYPE", EnvSource::Literal("postgresdb".to_string())),
                EnvRule::new(
                    "DB_POSTGRESDB_HOST",
                    EnvSource::DepHost("postgres".to_string()),
                ),
                EnvRule::new(
                    "DB_POSTGRESDB_PORT",
                    EnvSource::DepPort("postgres".to_string()),
                ),
                EnvRule::new(
                    "DB_POSTGRESDB_DATABASE",
                    EnvSource::DepExtra {
                        alias: "postgres".to_string(),
                        key: "database".to_string(),
                    },
                ),
                EnvRule::new(
                    "DB_POSTGRESDB_USER",
                    EnvSource::DepExtra {
                        alias: "postgres".to_string(),
                        key: "username".to_string(),
                    },
                ),
                EnvRule::new(
                    "DB_POSTGRESDB_PASSWORD",
                    EnvSource::DepExtra {
                        alias: "postgres".to_string(),
                        key: "password".to_string(),
                    },
                ),
                EnvRule::new(
                    "N8N_ENCRYPTION_KEY",
                    EnvSource::SecretRef("encryption-key".to_string()),
                ),
                EnvRule::new("GENERIC_TIMEZONE", EnvSource::Config("timezone".to_string())),
            ],
            storage: Some(("/home/node/.n8n".to_string(), "storage".to_string())),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BuildInput;
    use serde_json::Map;
    use std::collections::BTreeMap;

    #[test]
    fn test_postgresql_connection_info() {
        let recipe = postgresql();
        let input = BuildInput {
            name: "postgresql".to_string(),
            namespace: "ws-1".to_string(),
            config: recipe.config.validate(&Map::new()).unwrap(),
            secrets: BTreeMap::from([("password".to_string(), "p".repeat(32))]),
            connections: BTreeMap::new(),
            ingress: None,
        };
        let info = recipe.connection_info(&input).unwrap().unwrap();
        assert_eq!(info.host, "postgresql.ws-1.svc.cluster.local");
        assert_eq!(info.port, 5432);
        assert_eq!(info.extra["database"], "app");
        assert_eq!(info.extra["username"], "app");
        assert_eq!(info.extra["password"].len(), 32);
    }

    #[test]
    fn test_minio_args_carried() {
        let recipe = minio();
        let input = BuildInput {
            name: "minio".to_string(),
            namespace: "ws-1".to_string(),
            config: recipe.config.validate(&Map::new()).unwrap(),
            secrets: BTreeMap::from([
                ("root-user".to_string(), "u".repeat(16)),
                ("root-password".to_string(), "p".repeat(32)),
            ]),
            connections: BTreeMap::new(),
            ingress: None,
        };
        let graph = recipe.build(&input).unwrap();
        let sts = graph
            .iter()
            .find_map(|r| match r {
                crate::Resource::StatefulSet(sts) => Some(sts),
                _ => None,
            })
            .unwrap();
        let container = &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.args.as_ref().unwrap()[0], "server");
    }

    #[test]
    fn test_web_apps_expose_no_connection_info() {
        assert!(!n8n().has_connection_info());
        assert!(postgresql().has_connection_info());
    }
}
