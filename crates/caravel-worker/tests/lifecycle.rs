//! End-to-end lifecycle tests: engine -> queue -> worker -> fake cluster

use caravel_cluster::testing::FakeCluster;
use caravel_cluster::ReadinessOptions;
use caravel_engine::{
    AuditAction, DeploymentEngine, DeploymentStatus, DeploymentStore, EngineSettings, MemoryStore,
    Workspace, WorkspaceStore,
};
use caravel_recipe::catalog;
use caravel_worker::{QueueSettings, WorkQueue, Worker, WorkerSettings};
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    engine: Arc<DeploymentEngine>,
    store: Arc<MemoryStore>,
    cluster: Arc<FakeCluster>,
    queue: Arc<WorkQueue>,
    worker: Worker,
}

fn rig() -> Rig {
    let registry = Arc::new(catalog::builtin_registry().unwrap());
    let store = Arc::new(MemoryStore::new());
    let cluster = Arc::new(FakeCluster::new());
    let queue = Arc::new(WorkQueue::new(QueueSettings::default()));
    let engine = Arc::new(DeploymentEngine::new(
        registry,
        store.clone(),
        store.clone(),
        store.clone(),
        cluster.clone(),
        queue.clone(),
        EngineSettings::default(),
    ));
    let settings = WorkerSettings {
        readiness: ReadinessOptions {
            timeout: Duration::from_millis(100),
            interval: Duration::from_millis(10),
        },
        health: ReadinessOptions {
            timeout: Duration::from_millis(50),
            interval: Duration::from_millis(10),
        },
        ..WorkerSettings::default()
    };
    let worker = Worker::new(engine.clone(), queue.clone(), settings);
    Rig {
        engine,
        store,
        cluster,
        queue,
        worker,
    }
}

async fn with_workspace(rig: &Rig) {
    rig.store
        .upsert(Workspace {
            id: "ws-1".to_string(),
            tenant: "t-1".to_string(),
            name: "default".to_string(),
            namespace: "caravel-ws-1".to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn postgres_deploy_reaches_running_with_stable_connection_info() {
    let r = rig();
    with_workspace(&r).await;

    let ticket = r
        .engine
        .initiate_deployment("t-1", "ws-1", "postgresql", None, None, "user:1")
        .await
        .unwrap();
    assert_eq!(ticket.status, DeploymentStatus::Pending);

    r.worker.drain().await;

    let row = r
        .engine
        .get_deployment("t-1", ticket.deployment_id)
        .await
        .unwrap();
    assert_eq!(row.status, DeploymentStatus::Running);
    // dev mode: access goes through the worker's port-forward
    assert!(row.access_url.as_deref().unwrap().starts_with("http://127.0.0.1:"));

    // the namespace was provisioned and the secret is live in the cluster
    assert_eq!(r.cluster.namespaces(), vec!["caravel-ws-1".to_string()]);
    let live = r.cluster.secret("caravel-ws-1", "postgresql-secret").unwrap();
    assert_eq!(live["password"].len(), 32);

    // connection info contract for dependents
    let recipe = r.engine.registry().get("postgresql").unwrap();
    let input = caravel_recipe::BuildInput {
        name: row.name.clone(),
        namespace: row.namespace.clone(),
        config: row.config.clone(),
        secrets: live.clone(),
        connections: Default::default(),
        ingress: None,
    };
    let info = recipe.connection_info(&input).unwrap().unwrap();
    assert_eq!(info.host, "postgresql.caravel-ws-1.svc.cluster.local");
    assert_eq!(info.port, 5432);
    assert_eq!(info.extra["database"], "app");
    assert_eq!(info.extra["username"], "app");
    assert_eq!(info.extra["password"].len(), 32);

    // PENDING -> DEPLOYING -> RUNNING is visible in the audit trail
    let events = r
        .engine
        .deployment_events("t-1", ticket.deployment_id)
        .await
        .unwrap();
    assert_eq!(events[0].action, AuditAction::Created);
    assert!(events.iter().any(|e| e.action == AuditAction::StatusChanged));
}

#[tokio::test]
async fn readiness_timeout_is_terminal_not_retried() {
    let r = rig();
    with_workspace(&r).await;
    r.cluster.set_auto_ready(false);

    let ticket = r
        .engine
        .initiate_deployment("t-1", "ws-1", "valkey", None, None, "user:1")
        .await
        .unwrap();
    r.worker.drain().await;

    let row = DeploymentStore::get(&*r.store, ticket.deployment_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeploymentStatus::Failed);
    let error = row.error.as_deref().unwrap();
    assert!(!error.is_empty());
    assert!(error.contains("valkey-0"), "per-pod detail: {}", error);

    // the job completed; the queue must not retry an unhealthy-but-applied
    // deployment
    let stats = r.queue.stats();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.scheduled, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn apply_failure_marks_failed_and_retries() {
    let r = rig();
    with_workspace(&r).await;
    r.cluster.fail_kind("StatefulSet");

    let ticket = r
        .engine
        .initiate_deployment("t-1", "ws-1", "postgresql", None, None, "user:1")
        .await
        .unwrap();
    r.worker.drain().await;

    let row = DeploymentStore::get(&*r.store, ticket.deployment_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeploymentStatus::Failed);
    assert!(row.error.as_deref().unwrap().contains("StatefulSet"));

    // the queue re-scheduled the job for another attempt
    let stats = r.queue.stats();
    assert_eq!(stats.scheduled + stats.pending, 1);
}

#[tokio::test]
async fn undeploy_deletes_in_reverse_and_removes_the_row() {
    let r = rig();
    with_workspace(&r).await;

    let ticket = r
        .engine
        .initiate_deployment("t-1", "ws-1", "postgresql", None, None, "user:1")
        .await
        .unwrap();
    r.worker.drain().await;
    assert!(!r.cluster.forwards().is_empty());

    r.engine
        .initiate_removal("t-1", ticket.deployment_id, "user:1")
        .await
        .unwrap();
    r.worker.drain().await;

    // row hard-deleted; name reusable
    assert!(DeploymentStore::get(&*r.store, ticket.deployment_id).await.unwrap().is_none());
    r.engine
        .initiate_deployment("t-1", "ws-1", "postgresql", None, None, "user:1")
        .await
        .unwrap();

    // reverse build order, then the claim the template left behind
    let kinds: Vec<String> = r.cluster.deleted().iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            "Service",
            "Service",
            "StatefulSet",
            "Secret",
            "PersistentVolumeClaim"
        ]
    );
    let (_, claim) = &r.cluster.deleted()[4];
    assert_eq!(claim, "data-postgresql-0");

    // port-forward torn down
    assert!(r.cluster.forwards().is_empty());
}

#[tokio::test]
async fn health_check_flips_running_to_failed() {
    let r = rig();
    with_workspace(&r).await;

    let ticket = r
        .engine
        .initiate_deployment("t-1", "ws-1", "postgresql", None, None, "user:1")
        .await
        .unwrap();
    r.worker.drain().await;
    assert_eq!(
        DeploymentStore::get(&*r.store, ticket.deployment_id).await.unwrap().unwrap().status,
        DeploymentStatus::Running
    );

    // pods fall over behind the platform's back
    r.cluster.set_auto_ready(false);
    r.worker.sweep_health().await.unwrap();
    r.worker.drain().await;

    let row = DeploymentStore::get(&*r.store, ticket.deployment_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeploymentStatus::Failed);
    assert!(row.error.is_some());

    let events = r
        .engine
        .deployment_events("t-1", ticket.deployment_id)
        .await
        .unwrap();
    assert_eq!(events.last().unwrap().action, AuditAction::HealthChanged);
}

#[tokio::test]
async fn dependency_deploys_before_dependent_and_both_run() {
    let r = rig();
    with_workspace(&r).await;

    r.engine
        .initiate_deployment("t-1", "ws-1", "n8n", None, None, "user:1")
        .await
        .unwrap();
    r.worker.drain().await;

    let postgres = r.store.find_by_name("ws-1", "postgres").await.unwrap().unwrap();
    let n8n = r.store.find_by_name("ws-1", "n8n").await.unwrap().unwrap();
    assert_eq!(postgres.status, DeploymentStatus::Running);
    assert_eq!(n8n.status, DeploymentStatus::Running);

    // the dependency's workload was applied before the dependent's
    let applied = r.cluster.applied();
    let pos = |name: &str| {
        applied
            .iter()
            .position(|(_, kind, n)| kind == "StatefulSet" && n == name
                || kind == "Deployment" && n == name)
            .unwrap()
    };
    assert!(pos("postgres") < pos("n8n"));
}

#[tokio::test]
async fn interrupted_rows_resume_on_startup() {
    let r = rig();
    with_workspace(&r).await;

    let ticket = r
        .engine
        .initiate_deployment("t-1", "ws-1", "postgresql", None, None, "user:1")
        .await
        .unwrap();
    // simulate a worker killed before processing: fresh queue, same store
    let queue = Arc::new(WorkQueue::new(QueueSettings::default()));
    let engine = Arc::new(DeploymentEngine::new(
        Arc::new(catalog::builtin_registry().unwrap()),
        r.store.clone(),
        r.store.clone(),
        r.store.clone(),
        r.cluster.clone(),
        queue.clone(),
        EngineSettings::default(),
    ));
    let worker = Worker::new(
        engine,
        queue,
        WorkerSettings {
            readiness: ReadinessOptions {
                timeout: Duration::from_millis(100),
                interval: Duration::from_millis(10),
            },
            ..WorkerSettings::default()
        },
    );

    worker.resume_interrupted().await.unwrap();
    worker.drain().await;

    let row = DeploymentStore::get(&*r.store, ticket.deployment_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeploymentStatus::Running);
}
