//! Declarative apply/delete of whole resource graphs
//!
//! Apply never short-circuits: each resource is applied independently and
//! the outcomes are collected so callers can report partial failure
//! precisely. Delete walks the graph in reverse build order - dependents
//! (ingress, services) go before the workload and its storage - and then
//! removes the per-replica volume claims that StatefulSet templates leave
//! behind, since the cluster never garbage-collects those and a redeployed
//! instance must not bind a previous generation's storage.

use crate::error::Result;
use crate::ops::ClusterOps;
use caravel_recipe::ResourceGraph;
use tracing::{debug, warn};

/// Result of applying or deleting one resource
#[derive(Debug, Clone)]
pub struct ResourceOutcome {
    pub kind: String,
    pub name: String,
    pub error: Option<String>,
}

impl ResourceOutcome {
    fn ok(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            error: None,
        }
    }

    fn failed(kind: &str, name: &str, error: String) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            error: Some(error),
        }
    }
}

/// Render the failed outcomes as `kind/name: error` lines
pub fn failures(outcomes: &[ResourceOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter_map(|o| {
            o.error
                .as_ref()
                .map(|e| format!("{}/{}: {}", o.kind, o.name, e))
        })
        .collect()
}

/// Apply every resource in build order, collecting per-resource outcomes
pub async fn apply_graph(
    ops: &dyn ClusterOps,
    namespace: &str,
    graph: &ResourceGraph,
) -> Vec<ResourceOutcome> {
    let mut outcomes = Vec::with_capacity(graph.len());
    for resource in graph.iter() {
        let (kind, name) = (resource.kind(), resource.name());
        debug!(kind = %kind, name = %name, namespace = %namespace, "Applying resource");
        match ops.apply(namespace, resource).await {
            Ok(()) => outcomes.push(ResourceOutcome::ok(kind, name)),
            Err(e) => {
                warn!(kind = %kind, name = %name, error = %e, "Apply failed");
                outcomes.push(ResourceOutcome::failed(kind, name, e.to_string()));
            }
        }
    }
    outcomes
}

/// Delete the graph in reverse build order, tolerating "already gone",
/// then clean up the volume claims its StatefulSets created.
pub async fn delete_graph(
    ops: &dyn ClusterOps,
    namespace: &str,
    graph: &ResourceGraph,
) -> Vec<ResourceOutcome> {
    let mut outcomes = Vec::with_capacity(graph.len());
    for resource in graph.iter().collect::<Vec<_>>().into_iter().rev() {
        let (kind, name) = (resource.kind(), resource.name());
        debug!(kind = %kind, name = %name, namespace = %namespace, "Deleting resource");
        match ops.delete(namespace, kind, name).await {
            Ok(()) => outcomes.push(ResourceOutcome::ok(kind, name)),
            Err(e) if e.is_not_found() => outcomes.push(ResourceOutcome::ok(kind, name)),
            Err(e) => {
                warn!(kind = %kind, name = %name, error = %e, "Delete failed");
                outcomes.push(ResourceOutcome::failed(kind, name, e.to_string()));
            }
        }
    }

    for claim in graph.claim_names() {
        debug!(claim = %claim, namespace = %namespace, "Deleting volume claim");
        match ops.delete_claim(namespace, &claim).await {
            Ok(()) => outcomes.push(ResourceOutcome::ok("PersistentVolumeClaim", &claim)),
            Err(e) if e.is_not_found() => {
                outcomes.push(ResourceOutcome::ok("PersistentVolumeClaim", &claim))
            }
            Err(e) => {
                warn!(claim = %claim, error = %e, "Volume claim delete failed");
                outcomes.push(ResourceOutcome::failed(
                    "PersistentVolumeClaim",
                    &claim,
                    e.to_string(),
                ));
            }
        }
    }

    outcomes
}

/// Convenience check: did anything in the pass fail?
pub fn all_succeeded(outcomes: &[ResourceOutcome]) -> bool {
    outcomes.iter().all(|o| o.error.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;
    use caravel_recipe::{catalog, BuildInput};
    use serde_json::Map;
    use std::collections::BTreeMap;

    fn postgres_graph() -> ResourceGraph {
        let recipe = catalog::postgresql();
        let input = BuildInput {
            name: "pg".to_string(),
            namespace: "ws-1".to_string(),
            config: recipe.config.validate(&Map::new()).unwrap(),
            secrets: BTreeMap::from([("password".to_string(), "p".repeat(32))]),
            connections: BTreeMap::new(),
            ingress: None,
        };
        recipe.build(&input).unwrap()
    }

    #[tokio::test]
    async fn test_apply_collects_all_outcomes() {
        let fake = FakeCluster::new();
        let outcomes = apply_graph(&fake, "ws-1", &postgres_graph()).await;
        assert_eq!(outcomes.len(), 4);
        assert!(all_succeeded(&outcomes));
    }

    #[tokio::test]
    async fn test_apply_does_not_short_circuit() {
        let fake = FakeCluster::new();
        fake.fail_kind("StatefulSet");
        let outcomes = apply_graph(&fake, "ws-1", &postgres_graph()).await;
        // the failing StatefulSet must not stop the two services after it
        assert_eq!(outcomes.len(), 4);
        let failed = failures(&outcomes);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].starts_with("StatefulSet/pg"));
        assert!(!all_succeeded(&outcomes));
    }

    #[tokio::test]
    async fn test_delete_reverse_order_and_claims() {
        let fake = FakeCluster::new();
        let graph = postgres_graph();
        apply_graph(&fake, "ws-1", &graph).await;
        let outcomes = delete_graph(&fake, "ws-1", &graph).await;
        assert!(all_succeeded(&outcomes));

        let deleted = fake.deleted();
        // build order: Secret, StatefulSet, Service(headless), Service
        let kinds: Vec<_> = deleted.iter().map(|(kind, _)| kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "Service",
                "Service",
                "StatefulSet",
                "Secret",
                "PersistentVolumeClaim"
            ]
        );
        assert_eq!(deleted[4].1, "data-pg-0");
    }

    #[tokio::test]
    async fn test_delete_tolerates_already_gone() {
        let fake = FakeCluster::new();
        // nothing was ever applied; every delete hits not-found
        let outcomes = delete_graph(&fake, "ws-1", &postgres_graph()).await;
        assert!(all_succeeded(&outcomes));
    }
}
