//! Bounded readiness polling
//!
//! Waits for the pods behind a deployment's label selector to become ready.
//! The wait is interval-based and bounded by an explicit timeout - never
//! infinite - and yields a best-effort verdict rather than raising: an
//! unhealthy-but-applied deployment is a reportable outcome, not a failure
//! of the waiter.

use crate::ops::{ClusterOps, PodHealth};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Tuning for a readiness wait
#[derive(Debug, Clone)]
pub struct ReadinessOptions {
    /// Total time to wait before giving up
    pub timeout: Duration,
    /// Delay between polls
    pub interval: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            interval: Duration::from_secs(5),
        }
    }
}

impl ReadinessOptions {
    /// Short options for health-check sweeps
    pub fn brief() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            interval: Duration::from_secs(3),
        }
    }
}

/// Outcome of a readiness wait
#[derive(Debug, Clone)]
pub struct ReadinessVerdict {
    pub ready: bool,
    /// Per-pod status summary, suitable for an error message or audit reason
    pub summary: String,
}

impl ReadinessVerdict {
    fn ready(pods: &[PodHealth]) -> Self {
        Self {
            ready: true,
            summary: render(pods),
        }
    }
}

fn render(pods: &[PodHealth]) -> String {
    if pods.is_empty() {
        return "no pods found".to_string();
    }
    pods.iter()
        .map(PodHealth::summary)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Poll until every pod behind `selector` is ready, the timeout elapses, or
/// - with no selector - immediately: a graph without a workload is
/// trivially ready.
pub async fn wait_ready(
    ops: &dyn ClusterOps,
    namespace: &str,
    selector: Option<&str>,
    options: &ReadinessOptions,
) -> ReadinessVerdict {
    let Some(selector) = selector else {
        return ReadinessVerdict {
            ready: true,
            summary: "no workload selector".to_string(),
        };
    };

    let deadline = Instant::now() + options.timeout;
    let mut last = String::from("not yet polled");

    loop {
        match ops.pod_health(namespace, selector).await {
            Ok(pods) => {
                if !pods.is_empty() && pods.iter().all(|p| p.ready) {
                    debug!(selector = %selector, "All pods ready");
                    return ReadinessVerdict::ready(&pods);
                }
                last = render(&pods);
            }
            Err(e) => {
                // transient API failures count as "not ready yet"
                warn!(selector = %selector, error = %e, "Pod poll failed");
                last = format!("pod poll failed: {}", e);
            }
        }

        if Instant::now() + options.interval > deadline {
            return ReadinessVerdict {
                ready: false,
                summary: last,
            };
        }
        tokio::time::sleep(options.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    fn options() -> ReadinessOptions {
        ReadinessOptions {
            timeout: Duration::from_millis(50),
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_no_selector_is_trivially_ready() {
        let fake = FakeCluster::new();
        let verdict = wait_ready(&fake, "ws-1", None, &options()).await;
        assert!(verdict.ready);
    }

    #[tokio::test]
    async fn test_ready_pods_pass() {
        let fake = FakeCluster::new();
        fake.set_pods("ws-1", "app.kubernetes.io/instance=pg", true);
        let verdict = wait_ready(
            &fake,
            "ws-1",
            Some("app.kubernetes.io/instance=pg"),
            &options(),
        )
        .await;
        assert!(verdict.ready);
        assert!(verdict.summary.contains("ready"));
    }

    #[tokio::test]
    async fn test_timeout_reports_pod_detail() {
        let fake = FakeCluster::new();
        fake.set_pods("ws-1", "app.kubernetes.io/instance=pg", false);
        let verdict = wait_ready(
            &fake,
            "ws-1",
            Some("app.kubernetes.io/instance=pg"),
            &options(),
        )
        .await;
        assert!(!verdict.ready);
        assert!(!verdict.summary.is_empty());
        assert!(verdict.summary.contains("pg-0"));
    }
}
