//! The durable job queue contract
//!
//! One queue, four job kinds. Job ids are `{kind}:{deployment_id}`: the
//! deployment id in the deduplication key is what serializes work per
//! instance, so a deploy and a racing upgrade for the same instance cannot
//! apply concurrently, and a retried enqueue is a no-op while the original
//! job is still queued or running.

use crate::error::Result;
use async_trait::async_trait;
use caravel_recipe::GraphSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The four operations the worker executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Deploy,
    Upgrade,
    Undeploy,
    HealthCheck,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Deploy => "deploy",
            JobKind::Upgrade => "upgrade",
            JobKind::Undeploy => "undeploy",
            JobKind::HealthCheck => "health-check",
        })
    }
}

/// Scheduling priority. Dependency auto-provisioning enqueues at `High` so
/// dependencies are processed before the dependents that need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Normal,
    High,
}

/// One unit of asynchronous work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Deduplication key: `{kind}:{deployment_id}`
    pub id: String,
    pub kind: JobKind,
    pub deployment_id: Uuid,
    pub priority: JobPriority,
    /// Undeploy jobs carry the last known-good graph, since the row is
    /// deleted when cleanup finishes
    pub graph: Option<GraphSnapshot>,
}

impl Job {
    pub fn new(kind: JobKind, deployment_id: Uuid) -> Self {
        Self {
            id: format!("{}:{}", kind, deployment_id),
            kind,
            deployment_id,
            priority: JobPriority::Normal,
            graph: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_graph(mut self, graph: GraphSnapshot) -> Self {
        self.graph = Some(graph);
        self
    }
}

/// Producer side of the durable queue.
///
/// `enqueue` is idempotent on the job id: enqueueing a job whose id is
/// already pending or executing succeeds without adding a duplicate.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_kind_scoped_dedup_key() {
        let id = Uuid::new_v4();
        let deploy = Job::new(JobKind::Deploy, id);
        let upgrade = Job::new(JobKind::Upgrade, id);
        assert_eq!(deploy.id, format!("deploy:{}", id));
        assert_ne!(deploy.id, upgrade.id);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::High > JobPriority::Normal);
    }
}
