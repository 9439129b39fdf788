//! Workspace snapshot export/import
//!
//! A snapshot is an ordered list of `{name, recipe, config, depends_on[]}`
//! entries - enough to reproduce a workspace elsewhere. Import validates
//! shape, recipe existence, per-service config and dependency-graph
//! acyclicity before creating anything, then deploys in topological order
//! (Kahn's algorithm) so dependencies are always provisioned before their
//! dependents.

use crate::engine::DeploymentEngine;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// One service in a workspace snapshot
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SnapshotEntry {
    /// Instance name (RFC 1123, also the dependency-reference key)
    #[validate(length(min = 1, max = 63, message = "name must be 1-63 characters"))]
    pub name: String,

    /// Recipe slug
    #[validate(length(min = 1, message = "recipe is required"))]
    pub recipe: String,

    /// Saved config; validated against the recipe's schema on import
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Names of other snapshot entries this service depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A portable copy of one workspace's deployments
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct WorkspaceSnapshot {
    #[validate(nested)]
    pub services: Vec<SnapshotEntry>,
}

/// Kahn's algorithm over the snapshot's dependency edges. Returns the
/// topological order and the residual nodes a cycle kept out of it.
fn kahn(entries: &[SnapshotEntry]) -> (Vec<usize>, Vec<usize>) {
    let index_by_name: BTreeMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name.as_str(), i))
        .collect();

    // edges dependency -> dependent
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    let mut in_degree = vec![0usize; entries.len()];
    for (i, entry) in entries.iter().enumerate() {
        for dep in &entry.depends_on {
            if let Some(&d) = index_by_name.get(dep.as_str()) {
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut queue: Vec<usize> = (0..entries.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(entries.len());
    while let Some(i) = queue.pop() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push(next);
            }
        }
    }

    let placed: BTreeSet<usize> = order.iter().copied().collect();
    let residual = (0..entries.len()).filter(|i| !placed.contains(i)).collect();
    (order, residual)
}

/// Topological deploy order over snapshot indices (dependencies first).
///
/// Nodes left over by a cycle are appended at the end as a defensive
/// fallback - validation rejects cyclic snapshots outright, so the
/// residual path only matters for callers that skip validation.
pub fn deploy_order(entries: &[SnapshotEntry]) -> Vec<usize> {
    let (mut order, residual) = kahn(entries);
    order.extend(residual);
    order
}

/// Names of entries trapped in dependency cycles (empty for a DAG)
pub fn cyclic_entries(entries: &[SnapshotEntry]) -> Vec<String> {
    let (_, residual) = kahn(entries);
    residual
        .into_iter()
        .map(|i| entries[i].name.clone())
        .collect()
}

impl DeploymentEngine {
    /// Export a workspace as a snapshot
    pub async fn export_snapshot(
        &self,
        tenant: &str,
        workspace_id: &str,
    ) -> Result<WorkspaceSnapshot> {
        let rows = self.list_deployments(tenant, workspace_id).await?;
        let name_by_id: BTreeMap<Uuid, String> =
            rows.iter().map(|d| (d.id, d.name.clone())).collect();

        let services = rows
            .into_iter()
            .filter(|d| d.status.holds_name())
            .map(|d| SnapshotEntry {
                name: d.name,
                recipe: d.recipe,
                config: d.config,
                depends_on: d
                    .depends_on
                    .iter()
                    .filter_map(|id| name_by_id.get(id).cloned())
                    .collect(),
            })
            .collect();
        Ok(WorkspaceSnapshot { services })
    }

    /// Validate a snapshot without touching the store.
    ///
    /// Checks entry shape, duplicate names, recipe existence, per-service
    /// config validity, dependency references and acyclicity. A cycle
    /// rejects the whole snapshot before any deployment is created.
    pub fn validate_snapshot(&self, snapshot: &WorkspaceSnapshot) -> Result<()> {
        snapshot
            .validate()
            .map_err(|e| EngineError::InvalidSnapshot(e.to_string()))?;

        let mut seen = BTreeSet::new();
        for entry in &snapshot.services {
            if !seen.insert(entry.name.as_str()) {
                return Err(EngineError::InvalidSnapshot(format!(
                    "duplicate service name '{}'",
                    entry.name
                )));
            }
            let recipe = self
                .registry
                .get(&entry.recipe)
                .ok_or_else(|| EngineError::RecipeNotFound(entry.recipe.clone()))?;
            recipe.config.validate(&entry.config).map_err(|e| {
                EngineError::InvalidSnapshot(format!("service '{}': {}", entry.name, e))
            })?;
        }
        for entry in &snapshot.services {
            for dep in &entry.depends_on {
                if !snapshot.services.iter().any(|e| &e.name == dep) {
                    return Err(EngineError::InvalidSnapshot(format!(
                        "service '{}' depends on unknown service '{}'",
                        entry.name, dep
                    )));
                }
            }
        }

        let cyclic = cyclic_entries(&snapshot.services);
        if !cyclic.is_empty() {
            return Err(EngineError::InvalidSnapshot(format!(
                "dependency cycle involving: {}",
                cyclic.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate, then deploy every service in topological order.
    pub async fn import_snapshot(
        &self,
        tenant: &str,
        workspace_id: &str,
        snapshot: &WorkspaceSnapshot,
        actor: &str,
    ) -> Result<Vec<Uuid>> {
        self.validate_snapshot(snapshot)?;

        let mut created = Vec::with_capacity(snapshot.services.len());
        for index in deploy_order(&snapshot.services) {
            let entry = &snapshot.services[index];
            info!(service = %entry.name, recipe = %entry.recipe, "Importing service");
            let ticket = self
                .initiate_deployment(
                    tenant,
                    workspace_id,
                    &entry.recipe,
                    Some(&entry.name),
                    Some(entry.config.clone()),
                    actor,
                )
                .await?;
            created.push(ticket.deployment_id);
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::fixture;
    use crate::queue::JobKind;
    use crate::store::DeploymentStore;

    fn entry(name: &str, recipe: &str, depends_on: &[&str]) -> SnapshotEntry {
        SnapshotEntry {
            name: name.to_string(),
            recipe: recipe.to_string(),
            config: Map::new(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_deploy_order_dependencies_first() {
        let entries = vec![
            entry("a", "n8n", &["b"]),
            entry("b", "postgresql", &[]),
        ];
        let order = deploy_order(&entries);
        let pos_a = order.iter().position(|&i| i == 0).unwrap();
        let pos_b = order.iter().position(|&i| i == 1).unwrap();
        assert!(pos_b < pos_a, "dependency must come first");
    }

    #[test]
    fn test_deploy_order_appends_cyclic_residue() {
        let entries = vec![
            entry("a", "n8n", &["b"]),
            entry("b", "n8n", &["a"]),
            entry("c", "postgresql", &[]),
        ];
        let order = deploy_order(&entries);
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], 2, "acyclic node first");
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_any_deployment() {
        let f = fixture().await;
        let snapshot = WorkspaceSnapshot {
            services: vec![entry("a", "n8n", &["b"]), entry("b", "n8n", &["a"])],
        };
        let err = f
            .engine
            .import_snapshot("t-1", "ws-1", &snapshot, "user:1")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSnapshot(_)));
        assert!(f.store.list("ws-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_recipe_rejected() {
        let f = fixture().await;
        let snapshot = WorkspaceSnapshot {
            services: vec![entry("a", "mystery", &[])],
        };
        assert!(f.engine.validate_snapshot(&snapshot).is_err());
    }

    #[tokio::test]
    async fn test_import_enqueues_dependency_before_dependent() {
        let f = fixture().await;
        let snapshot = WorkspaceSnapshot {
            services: vec![
                entry("flows", "n8n", &["postgres"]),
                entry("postgres", "postgresql", &[]),
            ],
        };
        f.engine
            .import_snapshot("t-1", "ws-1", &snapshot, "user:1")
            .await
            .unwrap();

        let jobs = f.queue.jobs();
        let deploys: Vec<_> = jobs.iter().filter(|j| j.kind == JobKind::Deploy).collect();
        assert_eq!(deploys.len(), 2);
        let postgres = f.store.find_by_name("ws-1", "postgres").await.unwrap().unwrap();
        let flows = f.store.find_by_name("ws-1", "flows").await.unwrap().unwrap();
        assert_eq!(deploys[0].deployment_id, postgres.id);
        assert_eq!(deploys[1].deployment_id, flows.id);
        // the dependent records its dependency edge
        assert!(flows.depends_on.contains(&postgres.id));
    }

    #[tokio::test]
    async fn test_export_round_trip() {
        let f = fixture().await;
        f.engine
            .initiate_deployment("t-1", "ws-1", "n8n", None, None, "user:1")
            .await
            .unwrap();

        let snapshot = f.engine.export_snapshot("t-1", "ws-1").await.unwrap();
        assert_eq!(snapshot.services.len(), 2);
        let n8n = snapshot.services.iter().find(|s| s.name == "n8n").unwrap();
        assert_eq!(n8n.depends_on, vec!["postgres".to_string()]);
        f.engine.validate_snapshot(&snapshot).unwrap();
    }
}
