//! Append-only audit log
//!
//! Every lifecycle transition - failures included - is recorded with
//! before/after state snapshots for later diagnosis. Reasons are truncated
//! before persistence to bound storage; pod summaries and log excerpts can
//! get long.

use crate::error::Result;
use crate::model::{AuditAction, DeploymentEvent};
use crate::store::EventStore;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Maximum persisted length of an event reason
pub const MAX_REASON_LEN: usize = 2048;

/// Recorder over the append-only event store
#[derive(Clone)]
pub struct AuditLog {
    events: Arc<dyn EventStore>,
}

impl AuditLog {
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self { events }
    }

    /// Append one event. Events are never mutated or deleted.
    pub async fn record(
        &self,
        deployment_id: Uuid,
        action: AuditAction,
        previous: Option<Value>,
        next: Option<Value>,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<()> {
        debug!(deployment = %deployment_id, action = %action, actor = %actor, "Audit event");
        self.events
            .append(DeploymentEvent {
                id: Uuid::new_v4(),
                deployment_id,
                action,
                previous,
                next,
                reason: reason.map(truncate),
                actor: actor.to_string(),
                at: Utc::now(),
            })
            .await
    }

    /// Event history for one deployment
    pub async fn history(&self, deployment_id: Uuid) -> Result<Vec<DeploymentEvent>> {
        self.events.for_deployment(deployment_id).await
    }
}

/// Truncate a reason to [`MAX_REASON_LEN`] on a character boundary
pub fn truncate(reason: &str) -> String {
    if reason.len() <= MAX_REASON_LEN {
        return reason.to_string();
    }
    let mut end = MAX_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… (truncated)", &reason[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_truncate_bounds_length() {
        let long = "x".repeat(10_000);
        let truncated = truncate(&long);
        assert!(truncated.len() < 10_000);
        assert!(truncated.ends_with("(truncated)"));

        let short = "pod pg-0: Pending";
        assert_eq!(truncate(short), short);
    }

    #[tokio::test]
    async fn test_record_appends() {
        let store = Arc::new(MemoryStore::new());
        let log = AuditLog::new(store);
        let id = Uuid::new_v4();
        log.record(id, AuditAction::Created, None, None, None, "user:1")
            .await
            .unwrap();
        log.record(
            id,
            AuditAction::StatusChanged,
            None,
            None,
            Some("deployed"),
            "worker",
        )
        .await
        .unwrap();

        let history = log.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, AuditAction::Created);
        assert_eq!(history[1].actor, "worker");
    }
}
