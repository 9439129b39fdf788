//! Persistence traits and the in-memory reference implementation
//!
//! The relational backend lives behind these traits; schema and migrations
//! are outside this crate. [`MemoryStore`] backs tests and single-process
//! development setups.

use crate::error::{EngineError, Result};
use crate::model::{Deployment, DeploymentEvent, Workspace};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Store for deployment rows, unique on (workspace, name) among rows whose
/// status holds the name
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn insert(&self, deployment: Deployment) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Deployment>>;

    async fn update(&self, deployment: &Deployment) -> Result<()>;

    /// Hard delete; returns whether a row existed
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// All rows in one workspace
    async fn list(&self, workspace: &str) -> Result<Vec<Deployment>>;

    /// Every row, across workspaces (startup recovery, health sweeps)
    async fn list_all(&self) -> Result<Vec<Deployment>>;

    /// Row by instance name within a workspace, preferring ones whose
    /// status still holds the name
    async fn find_by_name(&self, workspace: &str, name: &str) -> Result<Option<Deployment>>;
}

/// Append-only store for audit events
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: DeploymentEvent) -> Result<()>;

    async fn for_deployment(&self, deployment_id: Uuid) -> Result<Vec<DeploymentEvent>>;
}

/// Store for workspaces
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Workspace>>;

    async fn upsert(&self, workspace: Workspace) -> Result<()>;
}

/// In-memory implementation of all three stores
#[derive(Default)]
pub struct MemoryStore {
    deployments: DashMap<Uuid, Deployment>,
    events: Mutex<Vec<DeploymentEvent>>,
    workspaces: DashMap<String, Workspace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, deployment: Deployment) -> Result<()> {
        // mirror of the relational unique constraint on (workspace, name)
        let duplicate = self.deployments.iter().any(|existing| {
            existing.workspace == deployment.workspace
                && existing.name == deployment.name
                && existing.status.holds_name()
        });
        if duplicate {
            return Err(EngineError::Store(format!(
                "unique violation: '{}' in workspace '{}'",
                deployment.name, deployment.workspace
            )));
        }
        self.deployments.insert(deployment.id, deployment);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Deployment>> {
        Ok(self.deployments.get(&id).map(|d| d.clone()))
    }

    async fn update(&self, deployment: &Deployment) -> Result<()> {
        match self.deployments.get_mut(&deployment.id) {
            Some(mut entry) => {
                *entry = deployment.clone();
                Ok(())
            }
            None => Err(EngineError::Store(format!(
                "update of missing row {}",
                deployment.id
            ))),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.deployments.remove(&id).is_some())
    }

    async fn list(&self, workspace: &str) -> Result<Vec<Deployment>> {
        let mut rows: Vec<Deployment> = self
            .deployments
            .iter()
            .filter(|d| d.workspace == workspace)
            .map(|d| d.clone())
            .collect();
        rows.sort_by_key(|d| d.created_at);
        Ok(rows)
    }

    async fn list_all(&self) -> Result<Vec<Deployment>> {
        let mut rows: Vec<Deployment> = self.deployments.iter().map(|d| d.clone()).collect();
        rows.sort_by_key(|d| d.created_at);
        Ok(rows)
    }

    async fn find_by_name(&self, workspace: &str, name: &str) -> Result<Option<Deployment>> {
        let mut candidates: Vec<Deployment> = self
            .deployments
            .iter()
            .filter(|d| d.workspace == workspace && d.name == name)
            .map(|d| d.clone())
            .collect();
        candidates.sort_by_key(|d| d.created_at);
        Ok(candidates
            .iter()
            .find(|d| d.status.holds_name())
            .or(candidates.last())
            .cloned())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, event: DeploymentEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn for_deployment(&self, deployment_id: Uuid) -> Result<Vec<DeploymentEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.deployment_id == deployment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Workspace>> {
        Ok(self.workspaces.get(id).map(|w| w.clone()))
    }

    async fn upsert(&self, workspace: Workspace) -> Result<()> {
        self.workspaces.insert(workspace.id.clone(), workspace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeploymentStatus;
    use chrono::Utc;
    use serde_json::Map;

    fn deployment(workspace: &str, name: &str, status: DeploymentStatus) -> Deployment {
        Deployment {
            id: Uuid::new_v4(),
            tenant: "t-1".to_string(),
            workspace: workspace.to_string(),
            recipe: "postgresql".to_string(),
            recipe_version: "16.4".to_string(),
            name: name.to_string(),
            namespace: workspace.to_string(),
            config: Map::new(),
            graph: None,
            status,
            access_url: None,
            depends_on: vec![],
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unique_name_per_workspace() {
        let store = MemoryStore::new();
        store
            .insert(deployment("ws-1", "pg", DeploymentStatus::Running))
            .await
            .unwrap();
        let err = store
            .insert(deployment("ws-1", "pg", DeploymentStatus::Pending))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unique"));

        // same name in another workspace is fine
        store
            .insert(deployment("ws-2", "pg", DeploymentStatus::Pending))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_rows_release_the_name() {
        let store = MemoryStore::new();
        store
            .insert(deployment("ws-1", "pg", DeploymentStatus::Stopped))
            .await
            .unwrap();
        store
            .insert(deployment("ws-1", "pg", DeploymentStatus::Pending))
            .await
            .unwrap();
        let found = store.find_by_name("ws-1", "pg").await.unwrap().unwrap();
        assert_eq!(found.status, DeploymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_delete_is_hard() {
        let store = MemoryStore::new();
        let row = deployment("ws-1", "pg", DeploymentStatus::Running);
        let id = row.id;
        store.insert(row).await.unwrap();
        assert!(store.delete(id).await.unwrap());
        assert!(DeploymentStore::get(&store, id).await.unwrap().is_none());
        assert!(!store.delete(id).await.unwrap());
    }
}
