//! In-memory [`ClusterOps`] implementation for tests
//!
//! Tracks applied and deleted objects, serves secrets back, and synthesizes
//! pod health for applied workloads so engine and worker tests can exercise
//! full lifecycles without an API server.

use crate::error::{ClusterError, Result};
use crate::ops::{ClusterOps, PodHealth, WorkspaceQuota};
use async_trait::async_trait;
use caravel_recipe::Resource;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Mutex;

type ObjectKey = (String, String, String);

#[derive(Default)]
struct State {
    /// (namespace, kind, name) of every live object
    objects: BTreeSet<ObjectKey>,
    /// apply log, in call order
    applied: Vec<ObjectKey>,
    /// delete log, in call order (kind, name)
    deleted: Vec<(String, String)>,
    /// secret payloads by (namespace, name)
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    /// explicit pod fixtures by (namespace, selector)
    pods: BTreeMap<(String, String), Vec<PodHealth>>,
    /// applied workloads: (namespace, selector) -> workload name
    workloads: BTreeMap<(String, String), String>,
    /// kinds whose apply should fail
    fail_kinds: BTreeSet<String>,
    /// open forwards: (namespace, instance) -> local port
    forwards: BTreeMap<(String, String), u16>,
    namespaces: BTreeSet<String>,
}

/// Fake cluster for unit and integration tests
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    /// synthesized pods report ready when set (default true)
    auto_ready: AtomicBool,
    next_port: AtomicU16,
}

impl FakeCluster {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.auto_ready.store(true, Ordering::SeqCst);
        fake.next_port.store(40000, Ordering::SeqCst);
        fake
    }

    /// Make every apply of `kind` fail
    pub fn fail_kind(&self, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_kinds
            .insert(kind.to_string());
    }

    /// Control whether synthesized pods report ready
    pub fn set_auto_ready(&self, ready: bool) {
        self.auto_ready.store(ready, Ordering::SeqCst);
    }

    /// Install an explicit pod fixture for a selector
    pub fn set_pods(&self, namespace: &str, selector: &str, ready: bool) {
        let instance = selector.rsplit('=').next().unwrap_or("pod").to_string();
        self.state.lock().unwrap().pods.insert(
            (namespace.to_string(), selector.to_string()),
            vec![PodHealth {
                name: format!("{}-0", instance),
                phase: if ready { "Running" } else { "Pending" }.to_string(),
                ready,
                message: (!ready).then(|| "ContainerCreating".to_string()),
            }],
        );
    }

    /// Seed a secret as if a previous deploy had created it
    pub fn put_secret(&self, namespace: &str, name: &str, values: BTreeMap<String, String>) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert((namespace.to_string(), name.to_string()), values);
    }

    /// Delete log (kind, name), in call order
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Apply log (namespace, kind, name), in call order
    pub fn applied(&self) -> Vec<ObjectKey> {
        self.state.lock().unwrap().applied.clone()
    }

    /// Currently live secret payload, if any
    pub fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Open forwards as (namespace, instance) -> local port
    pub fn forwards(&self) -> BTreeMap<(String, String), u16> {
        self.state.lock().unwrap().forwards.clone()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .iter()
            .cloned()
            .collect()
    }

    fn record_workload(state: &mut State, namespace: &str, resource: &Resource) {
        let (selector, name) = match resource {
            Resource::StatefulSet(sts) => (
                sts.spec
                    .as_ref()
                    .and_then(|s| s.selector.match_labels.as_ref()),
                sts.metadata.name.clone(),
            ),
            Resource::Deployment(dep) => (
                dep.spec
                    .as_ref()
                    .and_then(|s| s.selector.match_labels.as_ref()),
                dep.metadata.name.clone(),
            ),
            _ => return,
        };
        if let (Some(labels), Some(name)) = (selector, name) {
            let selector = labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            state
                .workloads
                .insert((namespace.to_string(), selector), name);
        }
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn apply(&self, namespace: &str, resource: &Resource) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let kind = resource.kind().to_string();
        if state.fail_kinds.contains(&kind) {
            return Err(ClusterError::InvalidManifest(format!(
                "injected failure for {}",
                kind
            )));
        }
        let key = (namespace.to_string(), kind, resource.name().to_string());
        state.applied.push(key.clone());
        state.objects.insert(key);

        if let Resource::Secret(secret) = resource {
            let values: BTreeMap<String, String> =
                secret.string_data.clone().unwrap_or_default().into_iter().collect();
            state.secrets.insert(
                (namespace.to_string(), resource.name().to_string()),
                values,
            );
        }
        Self::record_workload(&mut state, namespace, resource);
        Ok(())
    }

    async fn delete(&self, namespace: &str, kind: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), kind.to_string(), name.to_string());
        if !state.objects.remove(&key) {
            return Err(ClusterError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        if kind == "Secret" {
            state
                .secrets
                .remove(&(namespace.to_string(), name.to_string()));
        }
        state.deleted.push((kind.to_string(), name.to_string()));
        Ok(())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let _ = namespace;
        let mut state = self.state.lock().unwrap();
        state
            .deleted
            .push(("PersistentVolumeClaim".to_string(), name.to_string()));
        Ok(())
    }

    async fn pod_health(&self, namespace: &str, selector: &str) -> Result<Vec<PodHealth>> {
        let state = self.state.lock().unwrap();
        let key = (namespace.to_string(), selector.to_string());
        if let Some(pods) = state.pods.get(&key) {
            return Ok(pods.clone());
        }
        if let Some(workload) = state.workloads.get(&key) {
            let ready = self.auto_ready.load(Ordering::SeqCst);
            return Ok(vec![PodHealth {
                name: format!("{}-0", workload),
                phase: if ready { "Running" } else { "Pending" }.to_string(),
                ready,
                message: (!ready).then(|| "ContainerCreating".to_string()),
            }]);
        }
        Ok(Vec::new())
    }

    async fn secret_values(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.secret(namespace, name))
    }

    async fn pod_logs(&self, _namespace: &str, _selector: &str, _tail_lines: i64) -> Result<String> {
        Ok(String::new())
    }

    async fn ensure_namespace(&self, namespace: &str, _quota: &WorkspaceQuota) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(namespace.to_string());
        Ok(())
    }

    async fn open_forward(
        &self,
        namespace: &str,
        instance: &str,
        _selector: &str,
        _port: u16,
    ) -> Result<u16> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .forwards
            .insert((namespace.to_string(), instance.to_string()), port);
        Ok(port)
    }

    async fn close_forward(&self, namespace: &str, instance: &str) {
        self.state
            .lock()
            .unwrap()
            .forwards
            .remove(&(namespace.to_string(), instance.to_string()));
    }
}
