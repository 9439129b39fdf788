//! Kubernetes resource builders
//!
//! Builders assemble individual typed manifests for one deployment instance.
//! Every resource carries the standard label set (`app.kubernetes.io/name`,
//! `app.kubernetes.io/instance`, `app.kubernetes.io/managed-by`), so the
//! reconciler and the readiness waiter can select pods by instance without
//! per-recipe logic.

use crate::definition::{BuildInput, EnvRule, EnvSource, HealthProbe};
use crate::error::Result;
use crate::MANAGED_BY;
use k8s_openapi::api::apps::v1::{
    Deployment as AppDeployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Probe, Secret, SecretKeySelector, Service, ServicePort, ServiceSpec,
    TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Name of the per-instance secret object: the first canonical convention
/// the resolver tries when re-reading live credentials.
pub fn secret_name(instance: &str) -> String {
    format!("{}-secret", instance)
}

/// Name of the headless service backing a StatefulSet
pub fn headless_service_name(instance: &str) -> String {
    format!("{}-headless", instance)
}

/// Builder scoped to one deployment instance
pub struct ResourceBuilder<'a> {
    input: &'a BuildInput,
    recipe: &'a str,
}

impl<'a> ResourceBuilder<'a> {
    pub fn new(input: &'a BuildInput, recipe: &'a str) -> Self {
        Self { input, recipe }
    }

    /// Full label set applied to every resource
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels();
        labels.insert(
            "app.kubernetes.io/name".to_string(),
            self.recipe.to_string(),
        );
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        );
        labels
    }

    /// Minimal stable subset used for pod selection
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/instance".to_string(),
            self.input.name.clone(),
        );
        labels
    }

    fn metadata(&self, name: String) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.input.namespace.clone()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    /// Per-instance secret holding the generated credentials
    pub fn secret(&self) -> Secret {
        Secret {
            metadata: self.metadata(secret_name(&self.input.name)),
            string_data: if self.input.secrets.is_empty() {
                None
            } else {
                Some(self.input.secrets.clone().into_iter().collect())
            },
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    /// ConfigMap carrying arbitrary file payloads
    pub fn config_map(&self, suffix: &str, data: BTreeMap<String, String>) -> ConfigMap {
        ConfigMap {
            metadata: self.metadata(format!("{}-{}", self.input.name, suffix)),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Stateful workload with a per-replica volume-claim template.
    ///
    /// Storage is bound per replica through the template (never a
    /// free-standing claim), which is why deletion must clean claims up
    /// explicitly.
    #[allow(clippy::too_many_arguments)]
    pub fn stateful_set(
        &self,
        image: &str,
        args: &[String],
        replicas: i32,
        ports: &[(String, u16)],
        env: Vec<EnvVar>,
        probe: &HealthProbe,
        data_path: &str,
        storage_size: &str,
        config_map: Option<&str>,
    ) -> StatefulSet {
        let mut mounts = vec![VolumeMount {
            name: "data".to_string(),
            mount_path: data_path.to_string(),
            ..Default::default()
        }];
        let config_volume = config_map.map(|cm| {
            mounts.push(VolumeMount {
                name: "config".to_string(),
                mount_path: format!("/etc/{}", self.recipe),
                read_only: Some(true),
                ..Default::default()
            });
            Volume {
                name: "config".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: cm.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }
        });

        let container = Container {
            name: self.recipe.to_string(),
            image: Some(image.to_string()),
            args: if args.is_empty() {
                None
            } else {
                Some(args.to_vec())
            },
            env: Some(env),
            ports: Some(container_ports(ports)),
            readiness_probe: Some(build_probe(probe, 5, 10)),
            liveness_probe: Some(build_probe(probe, 30, 20)),
            volume_mounts: Some(mounts),
            ..Default::default()
        };

        StatefulSet {
            metadata: self.metadata(self.input.name.clone()),
            spec: Some(StatefulSetSpec {
                service_name: headless_service_name(&self.input.name),
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(self.selector_labels()),
                    ..Default::default()
                },
                template: self.pod_template(container, config_volume),
                volume_claim_templates: Some(vec![self.claim_template(storage_size)]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Stateless workload for web applications
    pub fn deployment(
        &self,
        image: &str,
        port: u16,
        env: Vec<EnvVar>,
        probe: &HealthProbe,
        storage: Option<(&str, &str)>,
    ) -> AppDeployment {
        let mut container = Container {
            name: self.recipe.to_string(),
            image: Some(image.to_string()),
            env: Some(env),
            ports: Some(container_ports(&[("http".to_string(), port)])),
            readiness_probe: Some(build_probe(probe, 10, 10)),
            liveness_probe: Some(build_probe(probe, 60, 20)),
            ..Default::default()
        };

        let volume = storage.map(|(path, _)| {
            container.volume_mounts = Some(vec![VolumeMount {
                name: "data".to_string(),
                mount_path: path.to_string(),
                ..Default::default()
            }]);
            Volume {
                name: "data".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: format!("{}-data", self.input.name),
                    ..Default::default()
                }),
                ..Default::default()
            }
        });

        AppDeployment {
            metadata: self.metadata(self.input.name.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(self.selector_labels()),
                    ..Default::default()
                },
                template: self.pod_template(container, volume),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_template(&self, container: Container, volume: Option<Volume>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.labels()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                volumes: volume.map(|v| vec![v]),
                ..Default::default()
            }),
        }
    }

    fn claim_template(&self, storage_size: &str) -> PersistentVolumeClaim {
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(storage_size.to_string()));
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Free-standing claim for web-app persistence
    pub fn volume_claim(&self, storage_size: &str) -> PersistentVolumeClaim {
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(storage_size.to_string()));
        PersistentVolumeClaim {
            metadata: self.metadata(format!("{}-data", self.input.name)),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Headless service for per-pod addressing of a StatefulSet
    pub fn headless_service(&self, ports: &[(String, u16)]) -> Service {
        Service {
            metadata: self.metadata(headless_service_name(&self.input.name)),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                selector: Some(self.selector_labels()),
                ports: Some(service_ports(ports)),
                publish_not_ready_addresses: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Client-facing ClusterIP service
    pub fn client_service(&self, ports: &[(String, u16)]) -> Service {
        Service {
            metadata: self.metadata(self.input.name.clone()),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(self.selector_labels()),
                ports: Some(service_ports(ports)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Ingress routing `{name}.{base_domain}` to the client service.
    ///
    /// Only built in cluster-routed mode; dev deployments rely on the
    /// worker's port-forward mechanism.
    pub fn ingress(&self, port: u16) -> Option<Ingress> {
        let ctx = self.input.ingress.as_ref()?;
        let host = format!("{}.{}", self.input.name, ctx.base_domain);

        Some(Ingress {
            metadata: self.metadata(self.input.name.clone()),
            spec: Some(IngressSpec {
                ingress_class_name: ctx.ingress_class.clone(),
                rules: Some(vec![IngressRule {
                    host: Some(host.clone()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: self.input.name.clone(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(port as i32),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                tls: ctx.tls_secret.as_ref().map(|secret| {
                    vec![IngressTLS {
                        hosts: Some(vec![host]),
                        secret_name: Some(secret.clone()),
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Render environment rules into container env vars.
    ///
    /// Secret references stay references (`secretKeyRef` into the instance
    /// secret); dependency connection values are embedded as literals, since
    /// the engine resolved them at build time.
    pub fn env(&self, rules: &[EnvRule]) -> Result<Vec<EnvVar>> {
        let secret = secret_name(&self.input.name);
        let mut env = Vec::with_capacity(rules.len());
        for rule in rules {
            let var = match &rule.from {
                EnvSource::Literal(value) => plain_env(&rule.name, value.clone()),
                EnvSource::Config(key) => plain_env(&rule.name, self.input.config_str(key)?),
                EnvSource::SecretRef(key) => {
                    // presence check: building a reference to a secret the
                    // engine never generated is a definition bug
                    self.input.secret(key)?;
                    EnvVar {
                        name: rule.name.clone(),
                        value_from: Some(EnvVarSource {
                            secret_key_ref: Some(SecretKeySelector {
                                name: secret.clone(),
                                key: key.clone(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }
                }
                EnvSource::DepHost(alias) => {
                    plain_env(&rule.name, self.input.connection(alias)?.host.clone())
                }
                EnvSource::DepPort(alias) => {
                    plain_env(&rule.name, self.input.connection(alias)?.port.to_string())
                }
                EnvSource::DepExtra { alias, key } => {
                    let conn = self.input.connection(alias)?;
                    let value = conn.extra.get(key).cloned().ok_or_else(|| {
                        crate::error::RecipeError::MissingDependency(format!(
                            "{} (no '{}' in connection info)",
                            alias, key
                        ))
                    })?;
                    plain_env(&rule.name, value)
                }
            };
            env.push(var);
        }
        Ok(env)
    }
}

fn plain_env(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

fn container_ports(ports: &[(String, u16)]) -> Vec<ContainerPort> {
    ports
        .iter()
        .map(|(name, port)| ContainerPort {
            name: Some(name.clone()),
            container_port: *port as i32,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect()
}

fn service_ports(ports: &[(String, u16)]) -> Vec<ServicePort> {
    ports
        .iter()
        .map(|(name, port)| ServicePort {
            name: Some(name.clone()),
            port: *port as i32,
            target_port: Some(IntOrString::Int(*port as i32)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect()
}

fn build_probe(probe: &HealthProbe, initial_delay: i32, period: i32) -> Probe {
    let mut built = Probe {
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    };
    match probe {
        HealthProbe::Tcp { port } => {
            built.tcp_socket = Some(TCPSocketAction {
                port: IntOrString::Int(*port as i32),
                ..Default::default()
            });
        }
        HealthProbe::Http { path, port } => {
            built.http_get = Some(k8s_openapi::api::core::v1::HTTPGetAction {
                path: Some(path.clone()),
                port: IntOrString::Int(*port as i32),
                scheme: Some("HTTP".to_string()),
                ..Default::default()
            });
        }
    }
    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ConnectionInfo, IngressContext};
    use serde_json::{Map, Value};

    fn input(ingress: bool) -> BuildInput {
        let mut config = Map::new();
        config.insert("database".to_string(), Value::String("app".to_string()));
        BuildInput {
            name: "pg".to_string(),
            namespace: "ws-1".to_string(),
            config,
            secrets: BTreeMap::from([("password".to_string(), "x".repeat(32))]),
            connections: BTreeMap::from([(
                "db".to_string(),
                ConnectionInfo {
                    host: "db.ws-1.svc.cluster.local".to_string(),
                    port: 5432,
                    extra: BTreeMap::from([("database".to_string(), "app".to_string())]),
                },
            )]),
            ingress: ingress.then(|| IngressContext {
                base_domain: "apps.example.com".to_string(),
                ingress_class: Some("nginx".to_string()),
                tls_secret: None,
            }),
        }
    }

    #[test]
    fn test_labels_include_managed_by() {
        let input = input(false);
        let builder = ResourceBuilder::new(&input, "postgresql");
        let labels = builder.labels();
        assert_eq!(labels["app.kubernetes.io/managed-by"], "caravel");
        assert_eq!(labels["app.kubernetes.io/name"], "postgresql");
        assert_eq!(labels["app.kubernetes.io/instance"], "pg");
    }

    #[test]
    fn test_statefulset_uses_claim_template() {
        let input = input(false);
        let builder = ResourceBuilder::new(&input, "postgresql");
        let sts = builder.stateful_set(
            "postgres:16",
            &[],
            1,
            &[("postgres".to_string(), 5432)],
            vec![],
            &HealthProbe::Tcp { port: 5432 },
            "/var/lib/postgresql/data",
            "10Gi",
            None,
        );
        let spec = sts.spec.unwrap();
        assert_eq!(spec.service_name, "pg-headless");
        let templates = spec.volume_claim_templates.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].metadata.name.as_deref(), Some("data"));
    }

    #[test]
    fn test_env_secret_stays_reference() {
        let input = input(false);
        let builder = ResourceBuilder::new(&input, "postgresql");
        let env = builder
            .env(&[EnvRule::new(
                "POSTGRES_PASSWORD",
                EnvSource::SecretRef("password".to_string()),
            )])
            .unwrap();
        assert!(env[0].value.is_none());
        let secret_ref = env[0]
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(secret_ref.name, "pg-secret");
        assert_eq!(secret_ref.key, "password");
    }

    #[test]
    fn test_env_dependency_values_embedded() {
        let input = input(false);
        let builder = ResourceBuilder::new(&input, "n8n");
        let env = builder
            .env(&[
                EnvRule::new("DB_HOST", EnvSource::DepHost("db".to_string())),
                EnvRule::new("DB_PORT", EnvSource::DepPort("db".to_string())),
                EnvRule::new(
                    "DB_NAME",
                    EnvSource::DepExtra {
                        alias: "db".to_string(),
                        key: "database".to_string(),
                    },
                ),
            ])
            .unwrap();
        assert_eq!(env[0].value.as_deref(), Some("db.ws-1.svc.cluster.local"));
        assert_eq!(env[1].value.as_deref(), Some("5432"));
        assert_eq!(env[2].value.as_deref(), Some("app"));
    }

    #[test]
    fn test_env_missing_dependency_fails() {
        let input = input(false);
        let builder = ResourceBuilder::new(&input, "n8n");
        let err = builder
            .env(&[EnvRule::new("X", EnvSource::DepHost("nope".to_string()))])
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_ingress_only_with_context() {
        let without = input(false);
        assert!(ResourceBuilder::new(&without, "n8n").ingress(80).is_none());

        let with = input(true);
        let ingress = ResourceBuilder::new(&with, "n8n").ingress(5678).unwrap();
        let rules = ingress.spec.unwrap().rules.unwrap();
        assert_eq!(rules[0].host.as_deref(), Some("pg.apps.example.com"));
    }
}
