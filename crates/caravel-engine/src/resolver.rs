//! Dependency resolution
//!
//! Given a recipe's declared dependencies, find an existing deployment for
//! each alias within the workspace - or auto-deploy one - and produce the
//! typed connection info its build embeds.
//!
//! Resolution is one level deep by contract: dependency recipes are leaves
//! (the registry refuses anything else), so there is never a deeper graph
//! to walk.

use crate::engine::DeploymentEngine;
use crate::error::{EngineError, Result};
use crate::model::{Deployment, DeploymentStatus, Workspace};
use crate::queue::{Job, JobKind, JobPriority, JobQueue};
use crate::secrets;
use crate::store::DeploymentStore;
use crate::AuditAction;
use caravel_cluster::secrets as cluster_secrets;
use caravel_recipe::{BuildInput, ConnectionInfo, RecipeDefinition};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of resolving a recipe's dependency spec
#[derive(Debug, Default)]
pub struct ResolvedDependencies {
    /// Connection info per dependency alias
    pub connections: BTreeMap<String, ConnectionInfo>,
    /// Ids of every deployment the dependent now depends on
    pub dependency_ids: Vec<Uuid>,
    /// Subset of `dependency_ids` that were auto-deployed by this resolution
    pub created: Vec<Uuid>,
}

impl DeploymentEngine {
    /// Resolve dependencies for an initial deployment.
    ///
    /// Missing dependencies are auto-deployed with their declared default
    /// config and enqueued at high priority. Fails fast if a dependency
    /// slug is unregistered or exposes no connection info - a partial
    /// dependency graph is never left half-wired.
    pub async fn resolve_dependencies(
        &self,
        recipe: &RecipeDefinition,
        workspace: &Workspace,
        actor: &str,
    ) -> Result<ResolvedDependencies> {
        let mut resolved = ResolvedDependencies::default();

        for dep in &recipe.dependencies {
            let dep_recipe = self.registry.get(&dep.recipe).ok_or_else(|| {
                EngineError::DependencyNotFound {
                    alias: dep.alias.clone(),
                    recipe: dep.recipe.clone(),
                }
            })?;
            if !dep_recipe.has_connection_info() {
                return Err(EngineError::DependencyMisconfigured {
                    alias: dep.alias.clone(),
                    recipe: dep.recipe.clone(),
                    reason: "recipe exposes no connection info".to_string(),
                });
            }

            let existing = self.store.find_by_name(&workspace.id, &dep.alias).await?;
            match existing.filter(|d| d.status.consumable()) {
                Some(row) => {
                    info!(
                        alias = %dep.alias,
                        deployment = %row.id,
                        "Dependency already deployed"
                    );
                    let info = self.connection_for(&dep_recipe, &row).await?;
                    resolved.connections.insert(dep.alias.clone(), info);
                    resolved.dependency_ids.push(row.id);
                }
                None => {
                    let (id, info) = self
                        .auto_deploy(&dep_recipe, &dep.alias, &dep.default_config, workspace, actor)
                        .await?;
                    resolved.connections.insert(dep.alias.clone(), info);
                    resolved.dependency_ids.push(id);
                    resolved.created.push(id);
                }
            }
        }

        Ok(resolved)
    }

    /// Resolve dependencies for an upgrade: never auto-deploys.
    ///
    /// A dependency that is missing or unusable is logged and skipped -
    /// removing a dependency mid-life must not hard-fail an unrelated
    /// config change. The build then fails only if it actually needs the
    /// missing connection.
    pub async fn resolve_existing(
        &self,
        recipe: &RecipeDefinition,
        workspace_id: &str,
    ) -> Result<ResolvedDependencies> {
        let mut resolved = ResolvedDependencies::default();

        for dep in &recipe.dependencies {
            let Some(dep_recipe) = self.registry.get(&dep.recipe) else {
                warn!(alias = %dep.alias, recipe = %dep.recipe, "Dependency recipe unregistered; skipping");
                continue;
            };
            let row = match self.store.find_by_name(workspace_id, &dep.alias).await? {
                Some(row) if row.status.consumable() => row,
                _ => {
                    warn!(alias = %dep.alias, "Dependency not deployed; skipping");
                    continue;
                }
            };
            match self.connection_for(&dep_recipe, &row).await {
                Ok(info) => {
                    resolved.connections.insert(dep.alias.clone(), info);
                    resolved.dependency_ids.push(row.id);
                }
                Err(e) => {
                    warn!(alias = %dep.alias, error = %e, "Dependency unusable; skipping");
                }
            }
        }

        Ok(resolved)
    }

    /// Reconstruct a deployed dependency's connection info from its stored
    /// config and its live secret values.
    pub(crate) async fn connection_for(
        &self,
        dep_recipe: &RecipeDefinition,
        row: &Deployment,
    ) -> Result<ConnectionInfo> {
        // re-validate: the schema may have grown defaults since this row
        // was written
        let config = dep_recipe.config.validate(&row.config)?;

        let mut secret_values =
            cluster_secrets::read_live(self.cluster.as_ref(), &row.namespace, &row.name).await?;
        if secret_values.is_empty() {
            // deploy job has not applied the secret yet; the persisted
            // graph carries the values it will apply
            if let Some(graph) = &row.graph {
                secret_values = graph.graph().secret_values();
            }
        }

        let input = BuildInput {
            name: row.name.clone(),
            namespace: row.namespace.clone(),
            config,
            secrets: secret_values,
            connections: BTreeMap::new(),
            ingress: None,
        };
        dep_recipe
            .connection_info(&input)?
            .ok_or_else(|| EngineError::DependencyMisconfigured {
                alias: row.name.clone(),
                recipe: dep_recipe.meta.slug.clone(),
                reason: "recipe exposes no connection info".to_string(),
            })
    }

    /// Provision a missing dependency: validate its default config,
    /// generate secrets, build, persist PENDING, enqueue at high priority.
    ///
    /// The returned connection info is computed from the just-generated
    /// secrets - not yet live in the cluster - which is consistent because
    /// the dependent's build embeds exactly these values.
    async fn auto_deploy(
        &self,
        dep_recipe: &Arc<RecipeDefinition>,
        alias: &str,
        default_config: &serde_json::Map<String, serde_json::Value>,
        workspace: &Workspace,
        actor: &str,
    ) -> Result<(Uuid, ConnectionInfo)> {
        info!(alias = %alias, recipe = %dep_recipe.meta.slug, "Auto-deploying dependency");

        let config = dep_recipe.config.validate(default_config)?;
        let secret_values = secrets::generate(&dep_recipe.secrets, &BTreeMap::new())?;

        let input = BuildInput {
            name: alias.to_string(),
            namespace: workspace.namespace.clone(),
            config: config.clone(),
            secrets: secret_values,
            connections: BTreeMap::new(),
            ingress: None,
        };
        let graph = dep_recipe.build(&input)?;
        let info = dep_recipe
            .connection_info(&input)?
            .ok_or_else(|| EngineError::DependencyMisconfigured {
                alias: alias.to_string(),
                recipe: dep_recipe.meta.slug.clone(),
                reason: "recipe exposes no connection info".to_string(),
            })?;

        let now = Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4(),
            tenant: workspace.tenant.clone(),
            workspace: workspace.id.clone(),
            recipe: dep_recipe.meta.slug.clone(),
            recipe_version: dep_recipe.meta.version.clone(),
            name: alias.to_string(),
            namespace: workspace.namespace.clone(),
            config,
            graph: Some(graph.snapshot()),
            status: DeploymentStatus::Pending,
            access_url: None,
            depends_on: vec![],
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
                Some(&format!("auto-deployed as dependency '{}'", alias)),
                actor,
            )
            .await?;

        // dependencies must be provisioned before the dependent needs them
        self.queue
            .enqueue(Job::new(JobKind::Deploy, id).with_priority(JobPriority::High))
            .await?;

        Ok((id, info))
    }
}
