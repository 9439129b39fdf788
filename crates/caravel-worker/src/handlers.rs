//! Job handlers: the per-deployment state machine
//!
//! `PENDING -> DEPLOYING -> {RUNNING | FAILED}` for deploy/upgrade;
//! `(any) -> DELETING -> row deleted | FAILED` for undeploy. Handlers are
//! idempotent against races with removal: a missing row is a no-op, never
//! an error.

use crate::error::Result;
use crate::recovery::recover_stuck;
use crate::worker::Worker;
use caravel_cluster::{
    apply_graph, delete_graph, failures, readiness::wait_ready, ClusterOps, ReadinessVerdict,
};
use caravel_engine::audit::truncate;
use caravel_engine::{
    AuditAction, Deployment, DeploymentStatus, DeploymentStore, EngineError, Job,
};
use caravel_recipe::ResourceGraph;
use tracing::{info, warn};

/// Actor recorded on worker-initiated audit events
const ACTOR: &str = "worker";

impl Worker {
    /// Deploy and upgrade share one handler: apply the persisted graph,
    /// wait for readiness, settle the final status.
    pub(crate) async fn handle_rollout(&self, job: &Job) -> Result<()> {
        let store = self.engine.store();
        let Some(mut deployment) = store.get(job.deployment_id).await? else {
            // raced a removal; the record owner won
            info!(job = %job.id, "Deployment record gone; skipping");
            return Ok(());
        };

        // legacy chart path: clear a release a killed worker left pending
        if let Some(releases) = &self.releases {
            if let Err(e) =
                recover_stuck(releases.as_ref(), &deployment.namespace, &deployment.name).await
            {
                warn!(deployment = %deployment.id, error = %e, "Release recovery failed; continuing");
            }
        }

        let previous = deployment.state_snapshot();
        deployment.status = DeploymentStatus::Deploying;
        deployment.touch();
        store.update(&deployment).await?;

        let verdict = match self.rollout(&mut deployment, job).await {
            Ok(verdict) => verdict,
            Err(e) => {
                // cluster-level failure: mark FAILED and re-throw so the
                // queue's retry/backoff applies
                self.mark_failed(deployment, previous, &e.to_string(), AuditAction::Failed)
                    .await?;
                return Err(e);
            }
        };

        if !verdict.ready {
            // applied cleanly but never became healthy: a terminal,
            // reportable outcome - retrying would not change it
            warn!(
                deployment = %deployment.id,
                summary = %verdict.summary,
                "Readiness timeout"
            );
            self.mark_failed(deployment, previous, &verdict.summary, AuditAction::Failed)
                .await?;
            return Ok(());
        }

        deployment.status = DeploymentStatus::Running;
        deployment.error = None;
        deployment.touch();
        store.update(&deployment).await?;
        self.engine
            .audit()
            .record(
                deployment.id,
                AuditAction::StatusChanged,
                Some(previous),
                Some(deployment.state_snapshot()),
                Some(&verdict.summary),
                ACTOR,
            )
            .await?;
        info!(deployment = %deployment.id, name = %deployment.name, "Deployment running");
        Ok(())
    }

    /// The cluster-facing half of a rollout. Errors here are retryable.
    async fn rollout(&self, deployment: &mut Deployment, job: &Job) -> Result<ReadinessVerdict> {
        let cluster = self.engine.cluster();
        cluster
            .ensure_namespace(&deployment.namespace, &self.engine.settings().quota)
            .await?;

        let graph = match &deployment.graph {
            Some(snapshot) => snapshot.graph(),
            None => match &job.graph {
                Some(snapshot) => snapshot.graph(),
                None => self.engine.rebuild_graph(deployment).await?,
            },
        };

        let outcomes = apply_graph(cluster.as_ref(), &deployment.namespace, &graph).await;
        let failed = failures(&outcomes);
        if !failed.is_empty() {
            return Err(EngineError::ApplyFailed { failures: failed }.into());
        }

        let selector = graph.primary_selector();
        let verdict = wait_ready(
            cluster.as_ref(),
            &deployment.namespace,
            selector.as_deref(),
            &self.settings.readiness,
        )
        .await;

        if verdict.ready {
            deployment.access_url = self.access_url(deployment, &graph, selector.as_deref()).await?;
        }
        Ok(verdict)
    }

    /// Cluster-routed mode exposes the ingress host; dev mode opens a local
    /// port-forward to the primary service port.
    async fn access_url(
        &self,
        deployment: &Deployment,
        graph: &ResourceGraph,
        selector: Option<&str>,
    ) -> Result<Option<String>> {
        if self.engine.settings().ingress.is_some() {
            return Ok(graph
                .ingress_host()
                .map(|host| format!("https://{}", host))
                .or_else(|| deployment.access_url.clone()));
        }
        let (Some(selector), Some(port)) = (selector, graph.primary_port()) else {
            return Ok(None);
        };
        let local = self
            .engine
            .cluster()
            .open_forward(&deployment.namespace, &deployment.name, selector, port)
            .await?;
        Ok(Some(format!("http://127.0.0.1:{}", local)))
    }

    /// Tear down a deployment's cluster resources and delete its row.
    pub(crate) async fn handle_undeploy(&self, job: &Job) -> Result<()> {
        let store = self.engine.store();
        let cluster = self.engine.cluster();

        let record = store.get(job.deployment_id).await?;
        let snapshot = record
            .as_ref()
            .and_then(|d| d.graph.clone())
            .or_else(|| job.graph.clone());

        let (namespace, name) = match &record {
            Some(d) => (d.namespace.clone(), d.name.clone()),
            None => {
                // record already gone; still attempt cluster cleanup in
                // case of an orphaned release
                let Some(identity) = snapshot.as_ref().and_then(|s| graph_identity(&s.graph()))
                else {
                    info!(job = %job.id, "Nothing to undeploy");
                    return Ok(());
                };
                info!(job = %job.id, "Record gone; cleaning orphaned resources");
                identity
            }
        };

        // local access first, best effort
        cluster.close_forward(&namespace, &name).await;

        if let Some(deployment) = &record {
            if deployment.status != DeploymentStatus::Deleting {
                let mut deployment = deployment.clone();
                deployment.status = DeploymentStatus::Deleting;
                deployment.touch();
                store.update(&deployment).await?;
            }
        }

        if let Some(snapshot) = snapshot {
            let graph = snapshot.graph();
            let outcomes = delete_graph(cluster.as_ref(), &namespace, &graph).await;
            let failed = failures(&outcomes);
            if !failed.is_empty() {
                if let Some(deployment) = record {
                    let previous = deployment.state_snapshot();
                    self.mark_failed(
                        deployment,
                        previous,
                        &failed.join("; "),
                        AuditAction::Failed,
                    )
                    .await?;
                }
                return Err(EngineError::DeleteFailed { failures: failed }.into());
            }
        }

        if let Some(deployment) = record {
            // removal is not a soft status: the row only exists while the
            // resource is provisioned or provisioning
            let previous = deployment.state_snapshot();
            store.delete(deployment.id).await?;
            self.engine
                .audit()
                .record(
                    deployment.id,
                    AuditAction::StatusChanged,
                    Some(previous),
                    None,
                    Some("cluster resources removed"),
                    ACTOR,
                )
                .await?;
            info!(deployment = %deployment.id, name = %name, "Deployment removed");
        }
        Ok(())
    }

    /// Flip RUNNING deployments whose pods are no longer all ready to
    /// FAILED, surfacing externally-induced failures.
    pub(crate) async fn handle_health_check(&self, job: &Job) -> Result<()> {
        let store = self.engine.store();
        let Some(mut deployment) = store.get(job.deployment_id).await? else {
            return Ok(());
        };
        if deployment.status != DeploymentStatus::Running {
            return Ok(());
        }

        let selector = deployment
            .graph
            .as_ref()
            .and_then(|g| g.graph().primary_selector());
        let verdict = wait_ready(
            self.engine.cluster().as_ref(),
            &deployment.namespace,
            selector.as_deref(),
            &self.settings.health,
        )
        .await;

        if !verdict.ready {
            warn!(
                deployment = %deployment.id,
                summary = %verdict.summary,
                "Health check failed"
            );
            let previous = deployment.state_snapshot();
            deployment.status = DeploymentStatus::Failed;
            deployment.error = Some(truncate(&verdict.summary));
            deployment.touch();
            store.update(&deployment).await?;
            self.engine
                .audit()
                .record(
                    deployment.id,
                    AuditAction::HealthChanged,
                    Some(previous),
                    Some(deployment.state_snapshot()),
                    Some(&verdict.summary),
                    ACTOR,
                )
                .await?;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        mut deployment: Deployment,
        previous: serde_json::Value,
        reason: &str,
        action: AuditAction,
    ) -> Result<()> {
        deployment.status = DeploymentStatus::Failed;
        deployment.error = Some(truncate(reason));
        deployment.touch();
        self.engine.store().update(&deployment).await?;
        self.engine
            .audit()
            .record(
                deployment.id,
                action,
                Some(previous),
                Some(deployment.state_snapshot()),
                Some(reason),
                ACTOR,
            )
            .await?;
        Ok(())
    }
}

/// Namespace and instance name recovered from a graph, for cleanup when
/// the deployment row no longer exists
fn graph_identity(graph: &ResourceGraph) -> Option<(String, String)> {
    let namespace = graph
        .iter()
        .find_map(|r| r.namespace().map(str::to_string))?;
    let name = graph
        .iter()
        .find_map(|r| match r {
            caravel_recipe::Resource::StatefulSet(_) | caravel_recipe::Resource::Deployment(_) => {
                Some(r.name().to_string())
            }
            _ => None,
        })
        .or_else(|| graph.iter().next().map(|r| r.name().to_string()))?;
    Some((namespace, name))
}
