//! The deployment engine
//!
//! Synchronous lifecycle operations invoked by the platform's callers.
//! Each operation validates, persists, records an audit event and enqueues
//! a job; the worker does everything that touches the live cluster
//! (namespace provisioning aside, the engine only *reads* cluster state -
//! live secret values).

use crate::audit::AuditLog;
use crate::error::{EngineError, Result};
use crate::model::{AuditAction, Deployment, DeploymentEvent, DeploymentStatus, Workspace};
use crate::queue::{Job, JobKind, JobQueue};
use crate::secrets;
use crate::store::{DeploymentStore, EventStore, WorkspaceStore};
use caravel_cluster::{secrets as cluster_secrets, ClusterOps, WorkspaceQuota};
use caravel_recipe::{
    config::validate_name, BuildInput, IngressContext, RecipeDefinition, RecipeRegistry,
    ResourceGraph,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Process-wide engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Present in cluster-routed mode; `None` means local/dev mode where
    /// access goes through the worker's port-forwards
    pub ingress: Option<IngressContext>,
    /// Quota applied to workspace namespaces
    pub quota: WorkspaceQuota,
}

/// What a lifecycle operation returns to the caller
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentTicket {
    pub deployment_id: Uuid,
    pub status: DeploymentStatus,
    pub message: String,
    pub access_url: Option<String>,
}

struct EngineMetrics {
    deployments: metrics::Counter,
    upgrades: metrics::Counter,
    removals: metrics::Counter,
}

impl EngineMetrics {
    fn new() -> Self {
        Self {
            deployments: metrics::counter!("caravel_engine_deployments_total"),
            upgrades: metrics::counter!("caravel_engine_upgrades_total"),
            removals: metrics::counter!("caravel_engine_removals_total"),
        }
    }
}

/// Orchestrates deploy/upgrade/remove against the stores, the registry and
/// the queue. Construct once and share.
pub struct DeploymentEngine {
    pub(crate) registry: Arc<RecipeRegistry>,
    pub(crate) store: Arc<dyn DeploymentStore>,
    pub(crate) workspaces: Arc<dyn WorkspaceStore>,
    pub(crate) cluster: Arc<dyn ClusterOps>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) audit: AuditLog,
    pub(crate) settings: EngineSettings,
    metrics: EngineMetrics,
}

impl DeploymentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<RecipeRegistry>,
        store: Arc<dyn DeploymentStore>,
        workspaces: Arc<dyn WorkspaceStore>,
        events: Arc<dyn EventStore>,
        cluster: Arc<dyn ClusterOps>,
        queue: Arc<dyn JobQueue>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            workspaces,
            cluster,
            queue,
            audit: AuditLog::new(events),
            settings,
            metrics: EngineMetrics::new(),
        }
    }

    pub fn registry(&self) -> &RecipeRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterOps> {
        &self.cluster
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Deploy a recipe into a workspace.
    #[instrument(skip(self, config), fields(tenant = %tenant, workspace = %workspace_id, recipe = %recipe_slug))]
    pub async fn initiate_deployment(
        &self,
        tenant: &str,
        workspace_id: &str,
        recipe_slug: &str,
        name: Option<&str>,
        config: Option<Map<String, Value>>,
        actor: &str,
    ) -> Result<DeploymentTicket> {
        let recipe = self
            .registry
            .get(recipe_slug)
            .ok_or_else(|| EngineError::RecipeNotFound(recipe_slug.to_string()))?;
        let workspace = self.workspace_for(tenant, workspace_id).await?;

        let name = name.unwrap_or(&recipe.meta.slug).to_string();
        validate_name(&name).map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;

        if let Some(existing) = self.store.find_by_name(&workspace.id, &name).await? {
            if existing.status.holds_name() {
                return Err(EngineError::AlreadyDeployed {
                    name,
                    workspace: workspace.id,
                });
            }
        }

        let config = recipe.config.validate(&config.unwrap_or_default())?;
        let resolved = self
            .resolve_dependencies(&recipe, &workspace, actor)
            .await?;
        let secret_values = secrets::generate(&recipe.secrets, &BTreeMap::new())?;

        let input = BuildInput {
            name: name.clone(),
            namespace: workspace.namespace.clone(),
            config: config.clone(),
            secrets: secret_values,
            connections: resolved.connections,
            ingress: self.settings.ingress.clone(),
        };
        let graph = recipe.build(&input)?;
        let access_url = graph.ingress_host().map(|host| format!("https://{}", host));

        let now = Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            workspace: workspace.id.clone(),
            recipe: recipe.meta.slug.clone(),
            recipe_version: recipe.meta.version.clone(),
            name: name.clone(),
            namespace: workspace.namespace.clone(),
            config,
            graph: Some(graph.snapshot()),
            status: DeploymentStatus::Pending,
            access_url: access_url.clone(),
            depends_on: resolved.dependency_ids,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let id = deployment.id;
        let snapshot = deployment.state_snapshot();
        self.store.insert(deployment).await?;
        self.audit
            .record(
                id,
                AuditAction::Created,
                None,
                Some(snapshot),
                Some(&format!("deploy {} as '{}'", recipe.meta.slug, name)),
                actor,
            )
            .await?;
        self.queue.enqueue(Job::new(JobKind::Deploy, id)).await?;
        self.metrics.deployments.increment(1);

        info!(deployment = %id, name = %name, "Deployment initiated");
        Ok(DeploymentTicket {
            deployment_id: id,
            status: DeploymentStatus::Pending,
            message: format!("'{}' queued for deployment", name),
            access_url,
        })
    }

    /// Apply a config change (or a plain restart, when the merged config is
    /// unchanged) to an existing deployment.
    #[instrument(skip(self, partial_config), fields(tenant = %tenant, deployment = %deployment_id))]
    pub async fn initiate_upgrade(
        &self,
        tenant: &str,
        deployment_id: Uuid,
        partial_config: Map<String, Value>,
        actor: &str,
    ) -> Result<DeploymentTicket> {
        let mut deployment = self.deployment_for(tenant, deployment_id).await?;
        let recipe = self
            .registry
            .get(&deployment.recipe)
            .ok_or_else(|| EngineError::RecipeNotFound(deployment.recipe.clone()))?;

        // new keys win over the stored config
        let mut merged = deployment.config.clone();
        for (key, value) in partial_config {
            merged.insert(key, value);
        }
        let validated = recipe.config.validate(&merged)?;
        let config_changed = validated != deployment.config;

        let graph = self
            .build_current(&recipe, &deployment, validated.clone())
            .await?;

        let previous = deployment.state_snapshot();
        deployment.config = validated;
        deployment.graph = Some(graph.snapshot());
        deployment.status = DeploymentStatus::Deploying;
        deployment.error = None;
        deployment.touch();
        self.store.update(&deployment).await?;

        self.audit
            .record(
                deployment_id,
                if config_changed {
                    AuditAction::ConfigChanged
                } else {
                    AuditAction::Restarted
                },
                Some(previous),
                Some(deployment.state_snapshot()),
                None,
                actor,
            )
            .await?;
        self.queue
            .enqueue(Job::new(JobKind::Upgrade, deployment_id))
            .await?;
        self.metrics.upgrades.increment(1);

        info!(deployment = %deployment_id, config_changed, "Upgrade initiated");
        Ok(DeploymentTicket {
            deployment_id,
            status: DeploymentStatus::Deploying,
            message: format!("'{}' queued for upgrade", deployment.name),
            access_url: deployment.access_url,
        })
    }

    /// Remove a deployment and its cluster resources.
    #[instrument(skip(self), fields(tenant = %tenant, deployment = %deployment_id))]
    pub async fn initiate_removal(
        &self,
        tenant: &str,
        deployment_id: Uuid,
        actor: &str,
    ) -> Result<DeploymentTicket> {
        let mut deployment = self.deployment_for(tenant, deployment_id).await?;

        let dependents: Vec<String> = self
            .store
            .list(&deployment.workspace)
            .await?
            .into_iter()
            .filter(|d| {
                d.id != deployment_id
                    && d.status.holds_name()
                    && d.depends_on.contains(&deployment_id)
            })
            .map(|d| d.name)
            .collect();
        if !dependents.is_empty() {
            return Err(EngineError::HasDependents {
                name: deployment.name,
                dependents,
            });
        }

        let previous = deployment.state_snapshot();
        self.audit
            .record(
                deployment_id,
                AuditAction::Removed,
                Some(previous),
                None,
                None,
                actor,
            )
            .await?;

        deployment.status = DeploymentStatus::Deleting;
        deployment.touch();
        self.store.update(&deployment).await?;

        // the job carries the last known-good graph; the row is gone once
        // cleanup finishes
        let graph = match &deployment.graph {
            Some(snapshot) => snapshot.clone(),
            None => self.fallback_graph(&deployment).await.snapshot(),
        };
        self.queue
            .enqueue(Job::new(JobKind::Undeploy, deployment_id).with_graph(graph))
            .await?;
        self.metrics.removals.increment(1);

        info!(deployment = %deployment_id, name = %deployment.name, "Removal initiated");
        Ok(DeploymentTicket {
            deployment_id,
            status: DeploymentStatus::Deleting,
            message: format!("'{}' queued for removal", deployment.name),
            access_url: None,
        })
    }

    /// Deployment by id, tenant-scoped
    pub async fn get_deployment(&self, tenant: &str, deployment_id: Uuid) -> Result<Deployment> {
        self.deployment_for(tenant, deployment_id).await
    }

    /// All deployments in a workspace
    pub async fn list_deployments(
        &self,
        tenant: &str,
        workspace_id: &str,
    ) -> Result<Vec<Deployment>> {
        let workspace = self.workspace_for(tenant, workspace_id).await?;
        self.store.list(&workspace.id).await
    }

    /// Audit history for a deployment
    pub async fn deployment_events(
        &self,
        tenant: &str,
        deployment_id: Uuid,
    ) -> Result<Vec<DeploymentEvent>> {
        self.deployment_for(tenant, deployment_id).await?;
        self.audit.history(deployment_id).await
    }

    /// Tail a deployment's pod logs. Empty for graphs without a workload.
    pub async fn deployment_logs(
        &self,
        tenant: &str,
        deployment_id: Uuid,
        tail_lines: i64,
    ) -> Result<String> {
        let deployment = self.deployment_for(tenant, deployment_id).await?;
        let selector = deployment
            .graph
            .as_ref()
            .and_then(|g| g.graph().primary_selector());
        let Some(selector) = selector else {
            return Ok(String::new());
        };
        Ok(self
            .cluster
            .pod_logs(&deployment.namespace, &selector, tail_lines)
            .await?)
    }

    /// Rebuild a deployment's graph from its stored config, live secrets
    /// and currently-deployed dependencies. Used by the worker when a
    /// stranded job must be re-run without a fresh engine-built graph.
    pub async fn rebuild_graph(&self, deployment: &Deployment) -> Result<ResourceGraph> {
        let recipe = self
            .registry
            .get(&deployment.recipe)
            .ok_or_else(|| EngineError::RecipeNotFound(deployment.recipe.clone()))?;
        let config = recipe.config.validate(&deployment.config)?;
        self.build_current(&recipe, deployment, config).await
    }

    /// Build with current secrets (live, falling back to the stored graph,
    /// regenerating only what is missing) and currently-deployed
    /// dependencies. Never rotates an existing credential.
    async fn build_current(
        &self,
        recipe: &RecipeDefinition,
        deployment: &Deployment,
        config: Map<String, Value>,
    ) -> Result<ResourceGraph> {
        let mut existing = cluster_secrets::read_live(
            self.cluster.as_ref(),
            &deployment.namespace,
            &deployment.name,
        )
        .await?;
        if existing.is_empty() {
            if let Some(graph) = &deployment.graph {
                existing = graph.graph().secret_values();
            }
        }
        let secret_values = secrets::generate(&recipe.secrets, &existing)?;
        let resolved = self.resolve_existing(recipe, &deployment.workspace).await?;

        let input = BuildInput {
            name: deployment.name.clone(),
            namespace: deployment.namespace.clone(),
            config,
            secrets: secret_values,
            connections: resolved.connections,
            ingress: self.settings.ingress.clone(),
        };
        Ok(recipe.build(&input)?)
    }

    /// Freshly-built empty-config graph, used only when a removal finds no
    /// persisted graph (a deploy that never got far enough to build)
    async fn fallback_graph(&self, deployment: &Deployment) -> ResourceGraph {
        let Some(recipe) = self.registry.get(&deployment.recipe) else {
            return ResourceGraph::new();
        };
        let built = async {
            let config = recipe.config.validate(&Map::new())?;
            let secret_values = secrets::generate(&recipe.secrets, &BTreeMap::new())?;
            let input = BuildInput {
                name: deployment.name.clone(),
                namespace: deployment.namespace.clone(),
                config,
                secrets: secret_values,
                connections: self
                    .resolve_existing(&recipe, &deployment.workspace)
                    .await?
                    .connections,
                ingress: self.settings.ingress.clone(),
            };
            Ok::<_, EngineError>(recipe.build(&input)?)
        }
        .await;
        match built {
            Ok(graph) => graph,
            Err(e) => {
                warn!(deployment = %deployment.id, error = %e, "Fallback graph build failed");
                ResourceGraph::new()
            }
        }
    }

    async fn workspace_for(&self, tenant: &str, workspace_id: &str) -> Result<Workspace> {
        self.workspaces
            .get(workspace_id)
            .await?
            .filter(|w| w.tenant == tenant)
            .ok_or_else(|| EngineError::WorkspaceNotFound(workspace_id.to_string()))
    }

    async fn deployment_for(&self, tenant: &str, deployment_id: Uuid) -> Result<Deployment> {
        self.store
            .get(deployment_id)
            .await?
            .filter(|d| d.tenant == tenant)
            .ok_or(EngineError::DeploymentNotFound(deployment_id))
    }
}
