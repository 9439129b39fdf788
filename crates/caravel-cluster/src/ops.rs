//! The cluster operations trait
//!
//! Every mutating operation is idempotent with respect to "already exists"
//! and "already gone", which is what lets the worker retry freely and lets
//! a removal race an in-flight deploy without corruption.

use crate::error::Result;
use async_trait::async_trait;
use caravel_recipe::Resource;
use std::collections::BTreeMap;

/// Health of one pod selected by instance labels
#[derive(Debug, Clone)]
pub struct PodHealth {
    pub name: String,
    /// Kubernetes pod phase ("Pending", "Running", ...)
    pub phase: String,
    /// All containers ready
    pub ready: bool,
    /// Waiting reason of the first unready container, when any
    pub message: Option<String>,
}

impl PodHealth {
    /// One-line rendering used in status summaries and audit reasons
    pub fn summary(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {} ({})", self.name, self.phase, message),
            None if self.ready => format!("{}: {} (ready)", self.name, self.phase),
            None => format!("{}: {} (not ready)", self.name, self.phase),
        }
    }
}

/// Resource quota applied to a workspace namespace
#[derive(Debug, Clone)]
pub struct WorkspaceQuota {
    pub cpu: String,
    pub memory: String,
    pub storage: String,
}

impl Default for WorkspaceQuota {
    fn default() -> Self {
        Self {
            cpu: "8".to_string(),
            memory: "16Gi".to_string(),
            storage: "200Gi".to_string(),
        }
    }
}

/// Operations Caravel needs from the cluster.
///
/// [`crate::KubeCluster`] implements this against a live API server;
/// [`crate::testing::FakeCluster`] implements it in memory.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Apply one resource declaratively (server-side apply, forced)
    async fn apply(&self, namespace: &str, resource: &Resource) -> Result<()>;

    /// Delete one resource by kind and name. "Already gone" surfaces as a
    /// not-found error the caller may treat as success.
    async fn delete(&self, namespace: &str, kind: &str, name: &str) -> Result<()>;

    /// Delete a persistent volume claim by name
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;

    /// List pod health for a label selector
    async fn pod_health(&self, namespace: &str, selector: &str) -> Result<Vec<PodHealth>>;

    /// Read a secret's decoded key/value pairs; `None` when it does not exist
    async fn secret_values(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Tail logs from the first pod matching a selector
    async fn pod_logs(&self, namespace: &str, selector: &str, tail_lines: i64) -> Result<String>;

    /// Create or update a workspace namespace with quota and a
    /// same-namespace-only network policy
    async fn ensure_namespace(&self, namespace: &str, quota: &WorkspaceQuota) -> Result<()>;

    /// Open a local port-forward to a pod behind the selector; returns the
    /// bound local port. Keyed by instance so a later call replaces the
    /// previous forward.
    async fn open_forward(
        &self,
        namespace: &str,
        instance: &str,
        selector: &str,
        port: u16,
    ) -> Result<u16>;

    /// Tear down an instance's port-forward, if one is active
    async fn close_forward(&self, namespace: &str, instance: &str);
}
