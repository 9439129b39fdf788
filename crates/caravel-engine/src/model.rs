//! Persisted deployment model

use caravel_recipe::GraphSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a deployment.
///
/// Created PENDING by the engine; moved to DEPLOYING/RUNNING/FAILED by the
/// worker. DELETING rows are hard-deleted once cluster cleanup succeeds -
/// removal is not a soft status. STOPPED parks an instance and releases
/// its name for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Running,
    Failed,
    Stopped,
    Deleting,
}

impl DeploymentStatus {
    /// Whether a deployment in this status holds its instance name.
    /// Only STOPPED releases the name for reuse.
    pub fn holds_name(&self) -> bool {
        !matches!(self, DeploymentStatus::Stopped)
    }

    /// Whether a dependency in this status can be consumed by dependents
    pub fn consumable(&self) -> bool {
        !matches!(
            self,
            DeploymentStatus::Stopped | DeploymentStatus::Failed | DeploymentStatus::Deleting
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Deleting => "deleting",
        })
    }
}

/// A tenant-scoped grouping of deployments mapped to one cluster namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub tenant: String,
    pub name: String,
    pub namespace: String,
}

/// The persisted unit of work: one provisioned (or provisioning) service
/// instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub tenant: String,
    pub workspace: String,
    pub recipe: String,
    pub recipe_version: String,
    /// Instance name, unique among non-stopped rows in the workspace
    pub name: String,
    pub namespace: String,
    /// Validated config with defaults filled in
    pub config: Map<String, Value>,
    /// Exact output of the last successful build
    pub graph: Option<GraphSnapshot>,
    pub status: DeploymentStatus,
    pub access_url: Option<String>,
    /// Ids of the deployments this one depends on
    pub depends_on: Vec<Uuid>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// State snapshot recorded in audit events
    pub fn state_snapshot(&self) -> Value {
        serde_json::json!({
            "status": self.status,
            "config": self.config,
            "access_url": self.access_url,
            "error": self.error,
        })
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Audit action recorded for every lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    ConfigChanged,
    Restarted,
    StatusChanged,
    HealthChanged,
    Failed,
    Removed,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditAction::Created => "created",
            AuditAction::ConfigChanged => "config_changed",
            AuditAction::Restarted => "restarted",
            AuditAction::StatusChanged => "status_changed",
            AuditAction::HealthChanged => "health_changed",
            AuditAction::Failed => "failed",
            AuditAction::Removed => "removed",
        })
    }
}

/// One append-only audit record. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub action: AuditAction,
    /// State before the transition
    pub previous: Option<Value>,
    /// State after the transition
    pub next: Option<Value>,
    /// Free-form explanation, truncated before persistence
    pub reason: Option<String>,
    /// Who initiated the transition ("user:<id>", "worker", "system")
    pub actor: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_name_holding() {
        assert!(DeploymentStatus::Running.holds_name());
        assert!(DeploymentStatus::Failed.holds_name());
        assert!(!DeploymentStatus::Stopped.holds_name());
    }

    #[test]
    fn test_status_consumable() {
        assert!(DeploymentStatus::Running.consumable());
        assert!(DeploymentStatus::Pending.consumable());
        assert!(!DeploymentStatus::Failed.consumable());
        assert!(!DeploymentStatus::Deleting.consumable());
    }

    #[test]
    fn test_action_rendering() {
        assert_eq!(AuditAction::ConfigChanged.to_string(), "config_changed");
        assert_eq!(AuditAction::HealthChanged.to_string(), "health_changed");
    }
}
