//! # caravel-worker
//!
//! The asynchronous half of Caravel's control plane: a bounded-concurrency
//! consumer that executes deploy/upgrade/undeploy/health-check jobs against
//! the live cluster.
//!
//! ## Modules
//!
//! - [`queue`] - the in-process work queue: id deduplication, priority,
//!   per-deployment serialization, retry with exponential backoff, trimming
//! - [`worker`] - the consumer loop and startup recovery sweep
//! - [`handlers`] - the per-job state machine
//! - [`recovery`] - stuck chart-release recovery for the legacy path
//!
//! ## Failure semantics
//!
//! Cluster errors during apply/delete mark the deployment FAILED *and*
//! propagate, so the queue's retry/backoff gets another attempt. A
//! readiness timeout is different: the resources applied cleanly and the
//! pods are simply unhealthy, so the handler records FAILED with the
//! per-pod detail and returns success - retrying would not change the
//! outcome.

pub mod error;
pub mod handlers;
pub mod queue;
pub mod recovery;
pub mod worker;

pub use error::{Result, WorkerError};
pub use queue::{QueueSettings, QueueStats, WorkQueue};
pub use recovery::{recover_stuck, HelmCli, RecoveryAction, ReleaseRevision, ReleaseStatus, ReleaseStore};
pub use worker::{Worker, WorkerSettings};
