//! Caravel deployment platform daemon
//!
//! Wires the recipe catalog, stores, cluster access, work queue, engine and
//! worker together and runs the asynchronous half of the platform.

use anyhow::{Context, Result};
use caravel_cluster::{KubeCluster, ReadinessOptions};
use caravel_engine::{
    DeploymentEngine, EngineSettings, MemoryStore, Workspace, WorkspaceStore,
};
use caravel_recipe::{catalog, IngressContext};
use caravel_worker::{HelmCli, QueueSettings, WorkQueue, Worker, WorkerSettings};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Caravel deployment platform daemon
#[derive(Parser, Debug)]
#[command(name = "caraveld")]
#[command(about = "Self-hosted application deployment platform for Kubernetes")]
#[command(version)]
struct Args {
    /// Base domain for ingress routing; unset runs in local/dev mode with
    /// port-forward access
    #[arg(long, env = "CARAVEL_BASE_DOMAIN")]
    base_domain: Option<String>,

    /// Ingress class requested for exposed services
    #[arg(long, env = "CARAVEL_INGRESS_CLASS")]
    ingress_class: Option<String>,

    /// TLS secret holding the wildcard certificate
    #[arg(long, env = "CARAVEL_TLS_SECRET")]
    tls_secret: Option<String>,

    /// Concurrent jobs
    #[arg(long, env = "CARAVEL_CONCURRENCY", default_value = "2")]
    concurrency: usize,

    /// Minimum seconds between job starts
    #[arg(long, env = "CARAVEL_START_GAP_SECS", default_value = "10")]
    start_gap_secs: u64,

    /// Readiness wait timeout in seconds
    #[arg(long, env = "CARAVEL_READINESS_TIMEOUT_SECS", default_value = "180")]
    readiness_timeout_secs: u64,

    /// Health sweep interval in seconds
    #[arg(long, env = "CARAVEL_HEALTH_INTERVAL_SECS", default_value = "300")]
    health_interval_secs: u64,

    /// Helm binary for legacy chart-release recovery; empty disables it
    #[arg(long, env = "CARAVEL_HELM_BIN", default_value = "helm")]
    helm_bin: String,

    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Health probe address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = if args.base_domain.is_some() {
            "cluster-routed"
        } else {
            "local"
        },
        "Starting caraveld"
    );

    // metrics + health endpoints
    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });
    let health_addr = args.health_addr;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_addr).await {
            tracing::error!(error = %e, "Health server failed");
        }
    });

    let registry = Arc::new(catalog::builtin_registry().context("Recipe catalog invalid")?);
    info!(recipes = registry.len(), "Recipe catalog loaded");

    let store = Arc::new(MemoryStore::new());
    // the in-memory store starts empty; give local mode a usable workspace
    store
        .upsert(Workspace {
            id: "default".to_string(),
            tenant: "local".to_string(),
            name: "default".to_string(),
            namespace: "caravel-default".to_string(),
        })
        .await
        .context("Failed to seed default workspace")?;

    let cluster = Arc::new(
        KubeCluster::connect()
            .await
            .context("Failed to create Kubernetes client")?,
    );
    let queue = Arc::new(WorkQueue::new(QueueSettings::default()));

    let settings = EngineSettings {
        ingress: args.base_domain.clone().map(|base_domain| IngressContext {
            base_domain,
            ingress_class: args.ingress_class.clone(),
            tls_secret: args.tls_secret.clone(),
        }),
        ..EngineSettings::default()
    };
    let engine = Arc::new(DeploymentEngine::new(
        registry,
        store.clone(),
        store.clone(),
        store,
        cluster,
        queue.clone(),
        settings,
    ));

    let worker_settings = WorkerSettings {
        concurrency: args.concurrency,
        start_gap: Duration::from_secs(args.start_gap_secs),
        readiness: ReadinessOptions {
            timeout: Duration::from_secs(args.readiness_timeout_secs),
            ..ReadinessOptions::default()
        },
        ..WorkerSettings::default()
    };
    let mut worker = Worker::new(engine, queue, worker_settings);
    if !args.helm_bin.is_empty() {
        worker = worker.with_release_store(Arc::new(HelmCli::new(args.helm_bin.clone())));
    }
    let worker = Arc::new(worker);

    tokio::spawn(
        worker
            .clone()
            .run_health_sweeper(Duration::from_secs(args.health_interval_secs)),
    );

    worker.run().await;
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Start the Prometheus metrics server
async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(address = %addr, "Starting metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    // keep the server task alive
    std::future::pending::<()>().await;

    Ok(())
}

/// Start the health probe server
async fn start_health_server(addr: SocketAddr) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    info!(address = %addr, "Starting health server");

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            if socket.read(&mut buf).await.is_ok() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}
