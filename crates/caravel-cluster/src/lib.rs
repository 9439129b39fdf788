//! # caravel-cluster
//!
//! Kubernetes access for the Caravel deployment engine and worker.
//!
//! Everything the rest of the platform needs from the cluster goes through
//! the [`ClusterOps`] trait: applying and deleting single resources,
//! listing pod health by label selector, reading live secrets, fetching
//! logs, provisioning workspace namespaces and managing local
//! port-forwards. [`KubeCluster`] is the kube-rs backed implementation;
//! [`testing::FakeCluster`] stands in for tests.
//!
//! On top of the trait sit the policy pieces:
//!
//! - [`reconcile`] - applies a whole resource graph (collecting per-resource
//!   outcomes rather than short-circuiting) and deletes it in reverse build
//!   order, including the volume claims StatefulSet templates leave behind
//! - [`readiness`] - bounded, best-effort polling of pod health
//! - [`secrets`] - canonical secret-name conventions for re-reading live
//!   credentials
//!
//! ## Server-side apply
//!
//! All writes use declarative server-side apply with the fixed field
//! manager [`FIELD_MANAGER`] and forced conflict resolution: Caravel is the
//! sole writer of the resources it manages, so it always wins field
//! ownership.

pub mod client;
pub mod error;
pub mod ops;
pub mod readiness;
pub mod reconcile;
pub mod secrets;
pub mod testing;

pub use client::KubeCluster;
pub use error::{ClusterError, Result};
pub use ops::{ClusterOps, PodHealth, WorkspaceQuota};
pub use readiness::{ReadinessOptions, ReadinessVerdict};
pub use reconcile::{apply_graph, delete_graph, failures, ResourceOutcome};

/// Field manager identity for server-side apply
pub const FIELD_MANAGER: &str = "caravel";
