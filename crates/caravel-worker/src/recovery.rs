//! Stuck chart-release recovery (legacy path)
//!
//! Deployments that predate the declarative reconciler were installed as
//! Helm releases. If a previous worker process died mid-operation, the
//! release is left in a `pending-*` state that blocks every later helm
//! action on it. Before acting on a deploy or upgrade, the worker inspects
//! the release history and clears the wedge:
//!
//! - `pending-install` - uninstall; there is no safe revision to roll back
//!   to
//! - `pending-upgrade` / `pending-rollback` - roll back to the newest
//!   `deployed` revision, or uninstall when none exists

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Status of one release revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStatus {
    Deployed,
    Failed,
    Superseded,
    Uninstalled,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Other(String),
}

impl From<&str> for ReleaseStatus {
    fn from(value: &str) -> Self {
        match value {
            "deployed" => ReleaseStatus::Deployed,
            "failed" => ReleaseStatus::Failed,
            "superseded" => ReleaseStatus::Superseded,
            "uninstalled" => ReleaseStatus::Uninstalled,
            "pending-install" => ReleaseStatus::PendingInstall,
            "pending-upgrade" => ReleaseStatus::PendingUpgrade,
            "pending-rollback" => ReleaseStatus::PendingRollback,
            other => ReleaseStatus::Other(other.to_string()),
        }
    }
}

/// One revision in a release's history
#[derive(Debug, Clone)]
pub struct ReleaseRevision {
    pub revision: u32,
    pub status: ReleaseStatus,
}

/// Access to chart-release state. The real implementation shells out to
/// the helm binary; tests drive the decision logic with a fixture.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Revision history, oldest first; empty when the release is unknown
    async fn history(&self, namespace: &str, release: &str) -> Result<Vec<ReleaseRevision>>;

    async fn rollback(&self, namespace: &str, release: &str, revision: u32) -> Result<()>;

    async fn uninstall(&self, namespace: &str, release: &str) -> Result<()>;
}

/// What recovery did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Release was healthy or unknown
    None,
    Uninstalled,
    RolledBack(u32),
}

/// Clear a release stuck in a `pending-*` state.
pub async fn recover_stuck(
    store: &dyn ReleaseStore,
    namespace: &str,
    release: &str,
) -> Result<RecoveryAction> {
    let history = store.history(namespace, release).await?;
    let Some(last) = history.last() else {
        return Ok(RecoveryAction::None);
    };

    match last.status {
        ReleaseStatus::PendingInstall => {
            info!(release = %release, "Release stuck pending-install; uninstalling");
            store.uninstall(namespace, release).await?;
            Ok(RecoveryAction::Uninstalled)
        }
        ReleaseStatus::PendingUpgrade | ReleaseStatus::PendingRollback => {
            match history
                .iter()
                .rev()
                .find(|r| r.status == ReleaseStatus::Deployed)
            {
                Some(good) => {
                    info!(
                        release = %release,
                        revision = good.revision,
                        "Release stuck mid-upgrade; rolling back"
                    );
                    store.rollback(namespace, release, good.revision).await?;
                    Ok(RecoveryAction::RolledBack(good.revision))
                }
                None => {
                    warn!(release = %release, "No deployed revision to roll back to; uninstalling");
                    store.uninstall(namespace, release).await?;
                    Ok(RecoveryAction::Uninstalled)
                }
            }
        }
        _ => Ok(RecoveryAction::None),
    }
}

#[derive(Debug, Deserialize)]
struct HelmHistoryEntry {
    revision: u32,
    status: String,
}

/// [`ReleaseStore`] backed by the helm CLI
pub struct HelmCli {
    binary: PathBuf,
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        Ok(Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?)
    }
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl ReleaseStore for HelmCli {
    async fn history(&self, namespace: &str, release: &str) -> Result<Vec<ReleaseRevision>> {
        let output = self
            .run(&["history", release, "-n", namespace, "-o", "json", "--max", "20"])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // an unknown release simply has no history
            if stderr.contains("not found") {
                return Ok(Vec::new());
            }
            return Err(WorkerError::Helm(stderr.trim().to_string()));
        }

        let entries: Vec<HelmHistoryEntry> = serde_json::from_slice(&output.stdout)?;
        Ok(entries
            .into_iter()
            .map(|e| ReleaseRevision {
                revision: e.revision,
                status: e.status.as_str().into(),
            })
            .collect())
    }

    async fn rollback(&self, namespace: &str, release: &str, revision: u32) -> Result<()> {
        let revision = revision.to_string();
        let output = self
            .run(&["rollback", release, &revision, "-n", namespace, "--wait"])
            .await?;
        if !output.status.success() {
            return Err(WorkerError::Helm(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn uninstall(&self, namespace: &str, release: &str) -> Result<()> {
        let output = self.run(&["uninstall", release, "-n", namespace]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("not found") {
                return Err(WorkerError::Helm(stderr.trim().to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FixtureStore {
        history: Vec<ReleaseRevision>,
        rollbacks: Mutex<Vec<u32>>,
        uninstalls: Mutex<usize>,
    }

    impl FixtureStore {
        fn with(history: &[(u32, ReleaseStatus)]) -> Self {
            Self {
                history: history
                    .iter()
                    .map(|(revision, status)| ReleaseRevision {
                        revision: *revision,
                        status: status.clone(),
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ReleaseStore for FixtureStore {
        async fn history(&self, _ns: &str, _release: &str) -> Result<Vec<ReleaseRevision>> {
            Ok(self.history.clone())
        }

        async fn rollback(&self, _ns: &str, _release: &str, revision: u32) -> Result<()> {
            self.rollbacks.lock().unwrap().push(revision);
            Ok(())
        }

        async fn uninstall(&self, _ns: &str, _release: &str) -> Result<()> {
            *self.uninstalls.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unknown_release_untouched() {
        let store = FixtureStore::default();
        let action = recover_stuck(&store, "ws-1", "pg").await.unwrap();
        assert_eq!(action, RecoveryAction::None);
    }

    #[tokio::test]
    async fn test_healthy_release_untouched() {
        let store = FixtureStore::with(&[(1, ReleaseStatus::Deployed)]);
        let action = recover_stuck(&store, "ws-1", "pg").await.unwrap();
        assert_eq!(action, RecoveryAction::None);
        assert_eq!(*store.uninstalls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_install_uninstalled() {
        let store = FixtureStore::with(&[(1, ReleaseStatus::PendingInstall)]);
        let action = recover_stuck(&store, "ws-1", "pg").await.unwrap();
        assert_eq!(action, RecoveryAction::Uninstalled);
        assert_eq!(*store.uninstalls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_upgrade_rolls_back_to_last_deployed() {
        let store = FixtureStore::with(&[
            (1, ReleaseStatus::Superseded),
            (2, ReleaseStatus::Deployed),
            (3, ReleaseStatus::PendingUpgrade),
        ]);
        let action = recover_stuck(&store, "ws-1", "pg").await.unwrap();
        assert_eq!(action, RecoveryAction::RolledBack(2));
        assert_eq!(*store.rollbacks.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_pending_upgrade_without_good_revision_uninstalls() {
        let store = FixtureStore::with(&[
            (1, ReleaseStatus::Failed),
            (2, ReleaseStatus::PendingRollback),
        ]);
        let action = recover_stuck(&store, "ws-1", "pg").await.unwrap();
        assert_eq!(action, RecoveryAction::Uninstalled);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            ReleaseStatus::from("pending-install"),
            ReleaseStatus::PendingInstall
        );
        assert_eq!(ReleaseStatus::from("deployed"), ReleaseStatus::Deployed);
        assert!(matches!(
            ReleaseStatus::from("weird"),
            ReleaseStatus::Other(_)
        ));
    }
}
