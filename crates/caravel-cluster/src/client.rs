//! kube-rs backed implementation of [`ClusterOps`]

use crate::error::{ClusterError, Result};
use crate::ops::{ClusterOps, PodHealth, WorkspaceQuota};
use crate::FIELD_MANAGER;
use async_trait::async_trait;
use caravel_recipe::{Resource, MANAGED_BY};
use dashmap::DashMap;
use k8s_openapi::api::apps::v1::{Deployment as AppDeployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Pod, ResourceQuota, ResourceQuotaSpec, Secret,
    Service,
};
use k8s_openapi::api::networking::v1::{
    Ingress, NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Live-cluster implementation of [`ClusterOps`]
pub struct KubeCluster {
    client: Client,
    forwards: DashMap<String, JoinHandle<()>>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            forwards: DashMap::new(),
        }
    }

    /// Connect using the default kubeconfig resolution (in-cluster service
    /// account, then `$KUBECONFIG`, then `~/.kube/config`)
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn apply_one<K>(&self, namespace: &str, obj: &K) -> Result<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
        <K as kube::Resource>::DynamicType: Default,
    {
        let name = obj.meta().name.clone().ok_or_else(|| {
            ClusterError::InvalidManifest("resource missing metadata.name".to_string())
        })?;
        let api: Api<K> = self.api(namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&name, &params, &Patch::Apply(obj)).await?;
        Ok(())
    }

    async fn delete_one<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.api(namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn ready_pod(&self, namespace: &str, selector: &str) -> Result<String> {
        let pods = self.pod_health(namespace, selector).await?;
        pods.iter()
            .find(|p| p.ready)
            .or_else(|| pods.first())
            .map(|p| p.name.clone())
            .ok_or_else(|| ClusterError::NoPodsFound(selector.to_string()))
    }

    fn forward_key(namespace: &str, instance: &str) -> String {
        format!("{}/{}", namespace, instance)
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn apply(&self, namespace: &str, resource: &Resource) -> Result<()> {
        match resource {
            Resource::Secret(obj) => self.apply_one(namespace, obj).await,
            Resource::ConfigMap(obj) => self.apply_one(namespace, obj).await,
            Resource::PersistentVolumeClaim(obj) => self.apply_one(namespace, obj).await,
            Resource::StatefulSet(obj) => self.apply_one(namespace, obj).await,
            Resource::Deployment(obj) => self.apply_one(namespace, obj).await,
            Resource::Service(obj) => self.apply_one(namespace, obj).await,
            Resource::Ingress(obj) => self.apply_one(namespace, obj).await,
        }
    }

    async fn delete(&self, namespace: &str, kind: &str, name: &str) -> Result<()> {
        match kind {
            "Secret" => self.delete_one::<Secret>(namespace, name).await,
            "ConfigMap" => self.delete_one::<ConfigMap>(namespace, name).await,
            "PersistentVolumeClaim" => {
                self.delete_one::<PersistentVolumeClaim>(namespace, name).await
            }
            "StatefulSet" => self.delete_one::<StatefulSet>(namespace, name).await,
            "Deployment" => self.delete_one::<AppDeployment>(namespace, name).await,
            "Service" => self.delete_one::<Service>(namespace, name).await,
            "Ingress" => self.delete_one::<Ingress>(namespace, name).await,
            other => Err(ClusterError::InvalidManifest(format!(
                "unknown resource kind '{}'",
                other
            ))),
        }
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_one::<PersistentVolumeClaim>(namespace, name).await
    }

    async fn pod_health(&self, namespace: &str, selector: &str) -> Result<Vec<PodHealth>> {
        let api: Api<Pod> = self.api(namespace);
        let params = ListParams::default().labels(selector);
        let pods = api.list(&params).await?;

        Ok(pods
            .items
            .into_iter()
            .map(|pod| {
                let name = pod.metadata.name.unwrap_or_default();
                let status = pod.status.unwrap_or_default();
                let phase = status.phase.unwrap_or_else(|| "Unknown".to_string());
                let container_statuses = status.container_statuses.unwrap_or_default();
                let ready =
                    !container_statuses.is_empty() && container_statuses.iter().all(|c| c.ready);
                let message = container_statuses.iter().find_map(|c| {
                    c.state
                        .as_ref()
                        .and_then(|s| s.waiting.as_ref())
                        .and_then(|w| w.reason.clone())
                });
                PodHealth {
                    name,
                    phase,
                    ready,
                    message,
                }
            })
            .collect())
    }

    async fn secret_values(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Secret> = self.api(namespace);
        let secret = match api.get_opt(name).await? {
            Some(secret) => secret,
            None => return Ok(None),
        };

        let mut values = BTreeMap::new();
        for (key, bytes) in secret.data.unwrap_or_default() {
            if let Ok(value) = String::from_utf8(bytes.0) {
                values.insert(key, value);
            }
        }
        // string_data is write-only in practice but cheap to honor
        for (key, value) in secret.string_data.unwrap_or_default() {
            values.insert(key, value);
        }
        Ok(Some(values))
    }

    async fn pod_logs(&self, namespace: &str, selector: &str, tail_lines: i64) -> Result<String> {
        let pod = self.ready_pod(namespace, selector).await?;
        let api: Api<Pod> = self.api(namespace);
        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        Ok(api.logs(&pod, &params).await?)
    }

    async fn ensure_namespace(&self, namespace: &str, quota: &WorkspaceQuota) -> Result<()> {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        );

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(namespace, &params, &Patch::Apply(&ns)).await?;

        let mut hard = BTreeMap::new();
        hard.insert("requests.cpu".to_string(), Quantity(quota.cpu.clone()));
        hard.insert(
            "requests.memory".to_string(),
            Quantity(quota.memory.clone()),
        );
        hard.insert(
            "requests.storage".to_string(),
            Quantity(quota.storage.clone()),
        );
        let resource_quota = ResourceQuota {
            metadata: ObjectMeta {
                name: Some("workspace-quota".to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(hard),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.apply_one(namespace, &resource_quota).await?;

        // workspaces are isolated: only same-namespace traffic may reach pods
        let policy = NetworkPolicy {
            metadata: ObjectMeta {
                name: Some("workspace-isolation".to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(NetworkPolicySpec {
                pod_selector: LabelSelector::default(),
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    from: Some(vec![NetworkPolicyPeer {
                        pod_selector: Some(LabelSelector::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.apply_one(namespace, &policy).await?;

        info!(namespace = %namespace, "Workspace namespace ensured");
        Ok(())
    }

    async fn open_forward(
        &self,
        namespace: &str,
        instance: &str,
        selector: &str,
        port: u16,
    ) -> Result<u16> {
        // replace any previous forward for this instance
        self.close_forward(namespace, instance).await;

        let pod = self.ready_pod(namespace, selector).await?;
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let local_port = listener.local_addr()?.port();
        let api: Api<Pod> = self.api(namespace);

        debug!(
            instance = %instance,
            pod = %pod,
            local_port = local_port,
            "Opening port-forward"
        );

        let handle = tokio::spawn(async move {
            loop {
                let (mut conn, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Port-forward listener failed");
                        break;
                    }
                };
                let api = api.clone();
                let pod = pod.clone();
                tokio::spawn(async move {
                    match api.portforward(&pod, &[port]).await {
                        Ok(mut forwarder) => {
                            if let Some(mut upstream) = forwarder.take_stream(port) {
                                let _ =
                                    tokio::io::copy_bidirectional(&mut conn, &mut upstream).await;
                            }
                        }
                        Err(e) => {
                            warn!(pod = %pod, error = %e, "Port-forward to pod failed");
                        }
                    }
                });
            }
        });

        self.forwards
            .insert(Self::forward_key(namespace, instance), handle);
        Ok(local_port)
    }

    async fn close_forward(&self, namespace: &str, instance: &str) {
        if let Some((_, handle)) = self.forwards.remove(&Self::forward_key(namespace, instance)) {
            debug!(namespace = %namespace, instance = %instance, "Closing port-forward");
            handle.abort();
        }
    }
}
