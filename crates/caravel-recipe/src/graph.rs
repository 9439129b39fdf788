//! The ordered resource graph a recipe build produces
//!
//! A graph is an ordered list of typed Kubernetes objects. Order matters:
//! the reconciler applies in build order and deletes in reverse, so
//! dependents (ingress, services) are removed before the workload and its
//! storage.
//!
//! The engine persists a [`GraphSnapshot`] next to each deployment row as
//! the authoritative "last known good" output of the build - deletion and
//! rebuilds work from the snapshot, never from re-running current recipe
//! code, since recipe code may change between deploy and delete.

use k8s_openapi::api::apps::v1::{Deployment as AppDeployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version tag written into every persisted graph snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

/// One declarative Kubernetes object in a resource graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "manifest")]
pub enum Resource {
    Secret(Secret),
    ConfigMap(ConfigMap),
    PersistentVolumeClaim(PersistentVolumeClaim),
    StatefulSet(StatefulSet),
    Deployment(AppDeployment),
    Service(Service),
    Ingress(Ingress),
}

impl Resource {
    /// Kubernetes kind of the wrapped object
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Secret(_) => "Secret",
            Resource::ConfigMap(_) => "ConfigMap",
            Resource::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
            Resource::StatefulSet(_) => "StatefulSet",
            Resource::Deployment(_) => "Deployment",
            Resource::Service(_) => "Service",
            Resource::Ingress(_) => "Ingress",
        }
    }

    /// `metadata.namespace` of the wrapped object, when set
    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    /// `metadata.name` of the wrapped object (builders always set it)
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or("")
    }

    fn meta(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            Resource::Secret(r) => &r.metadata,
            Resource::ConfigMap(r) => &r.metadata,
            Resource::PersistentVolumeClaim(r) => &r.metadata,
            Resource::StatefulSet(r) => &r.metadata,
            Resource::Deployment(r) => &r.metadata,
            Resource::Service(r) => &r.metadata,
            Resource::Ingress(r) => &r.metadata,
        }
    }
}

/// Ordered list of resources produced by one build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    pub resources: Vec<Resource>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Label selector string for the graph's primary workload pods.
    ///
    /// Taken from the first StatefulSet or Deployment's
    /// `spec.selector.matchLabels`, rendered as `k=v,k=v` for pod listing.
    /// `None` for graphs without a workload (trivially ready).
    pub fn primary_selector(&self) -> Option<String> {
        for resource in &self.resources {
            let labels = match resource {
                Resource::StatefulSet(sts) => {
                    sts.spec.as_ref().and_then(|s| s.selector.match_labels.as_ref())
                }
                Resource::Deployment(dep) => {
                    dep.spec.as_ref().and_then(|s| s.selector.match_labels.as_ref())
                }
                _ => None,
            };
            if let Some(labels) = labels {
                return Some(render_selector(labels));
            }
        }
        None
    }

    /// Hostname of the first ingress rule, when the graph carries one
    pub fn ingress_host(&self) -> Option<String> {
        self.resources.iter().find_map(|r| match r {
            Resource::Ingress(ing) => ing
                .spec
                .as_ref()
                .and_then(|s| s.rules.as_ref())
                .and_then(|rules| rules.first())
                .and_then(|rule| rule.host.clone()),
            _ => None,
        })
    }

    /// First client-facing (non-headless) service port, for local access
    pub fn primary_port(&self) -> Option<u16> {
        self.resources.iter().find_map(|r| match r {
            Resource::Service(svc) => {
                let spec = svc.spec.as_ref()?;
                if spec.cluster_ip.as_deref() == Some("None") {
                    return None;
                }
                spec.ports
                    .as_ref()
                    .and_then(|ports| ports.first())
                    .map(|p| p.port as u16)
            }
            _ => None,
        })
    }

    /// Per-replica claim names that StatefulSet volume-claim templates will
    /// have created: `{template}-{workload}-{ordinal}`.
    ///
    /// The cluster does not garbage-collect these when the StatefulSet is
    /// deleted; the reconciler must remove them explicitly or a redeployed
    /// instance binds stale storage holding a previous generation's
    /// credentials.
    pub fn claim_names(&self) -> Vec<String> {
        let mut claims = Vec::new();
        for resource in &self.resources {
            if let Resource::StatefulSet(sts) = resource {
                let Some(spec) = sts.spec.as_ref() else { continue };
                let Some(workload) = sts.metadata.name.as_deref() else {
                    continue;
                };
                let replicas = spec.replicas.unwrap_or(1).max(0);
                for template in spec.volume_claim_templates.iter().flatten() {
                    let Some(template_name) = template.metadata.name.as_deref() else {
                        continue;
                    };
                    for ordinal in 0..replicas {
                        claims.push(format!("{}-{}-{}", template_name, workload, ordinal));
                    }
                }
            }
        }
        claims
    }

    /// Versioned snapshot of the exact build output, for persistence.
    ///
    /// The snapshot is the "last known good" contract: deletion and
    /// drift-free rebuilds work from it, never from re-running current
    /// recipe code.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            resources: self.resources.clone(),
        }
    }

    /// Secret values carried by the graph's secret object, keyed by name.
    ///
    /// Used as a fallback when a dependency's secret is not live in the
    /// cluster yet (its deploy job has not run).
    pub fn secret_values(&self) -> BTreeMap<String, String> {
        for resource in &self.resources {
            if let Resource::Secret(secret) = resource {
                return secret
                    .string_data
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
            }
        }
        BTreeMap::new()
    }
}

fn render_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// A versioned, persisted copy of a build's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Snapshot format version, for forward migration
    pub version: u32,
    pub resources: Vec<Resource>,
}

impl GraphSnapshot {
    /// Reconstruct a graph from the snapshot
    pub fn graph(&self) -> ResourceGraph {
        ResourceGraph {
            resources: self.resources.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    fn statefulset(name: &str, replicas: i32, templates: &[&str]) -> Resource {
        let mut match_labels = BTreeMap::new();
        match_labels.insert("app.kubernetes.io/instance".to_string(), name.to_string());
        Resource::StatefulSet(StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(match_labels),
                    ..Default::default()
                },
                volume_claim_templates: Some(
                    templates
                        .iter()
                        .map(|t| PersistentVolumeClaim {
                            metadata: ObjectMeta {
                                name: Some(t.to_string()),
                                ..Default::default()
                            },
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_claim_names_per_replica() {
        let mut graph = ResourceGraph::new();
        graph.push(statefulset("pg", 2, &["data"]));
        assert_eq!(graph.claim_names(), vec!["data-pg-0", "data-pg-1"]);
    }

    #[test]
    fn test_primary_selector() {
        let mut graph = ResourceGraph::new();
        graph.push(statefulset("pg", 1, &[]));
        assert_eq!(
            graph.primary_selector().as_deref(),
            Some("app.kubernetes.io/instance=pg")
        );
        assert!(ResourceGraph::new().primary_selector().is_none());
    }

    #[test]
    fn test_secret_values_recovered_from_graph() {
        let mut string_data = BTreeMap::new();
        string_data.insert("password".to_string(), "hunter2".to_string());
        let mut graph = ResourceGraph::new();
        graph.push(Resource::Secret(Secret {
            metadata: ObjectMeta {
                name: Some("pg-secret".to_string()),
                ..Default::default()
            },
            string_data: Some(string_data),
            ..Default::default()
        }));

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        let values = snapshot.graph().secret_values();
        assert_eq!(values["password"], "hunter2");
        assert!(ResourceGraph::new().secret_values().is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut graph = ResourceGraph::new();
        graph.push(statefulset("pg", 1, &["data"]));
        let snapshot = graph.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: GraphSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.graph(), graph);
    }
}
