//! # caravel-engine
//!
//! The deployment orchestration engine: the synchronous half of Caravel's
//! control plane.
//!
//! The engine runs inside the request path of its caller (UI, agent) up to
//! and including job enqueue - everything after that is the worker's
//! responsibility. It owns:
//!
//! - the persisted [`model::Deployment`] state machine and its stores
//! - config validation and secret generation
//! - dependency resolution (find-or-auto-deploy within a workspace)
//! - the lifecycle operations `initiate_deployment`, `initiate_upgrade`,
//!   `initiate_removal` and their status/event queries
//! - the append-only audit log
//! - workspace snapshot export/import with topological ordering
//!
//! ## Sources of truth
//!
//! The persisted deployment row and the live cluster are the only shared
//! mutable state. The engine writes rows and enqueues jobs; the worker
//! reconciles the cluster toward the rows and records the outcome. Nothing
//! is cached across jobs.

pub mod audit;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod resolver;
pub mod secrets;
pub mod snapshot;
pub mod store;

pub use audit::AuditLog;
pub use engine::{DeploymentEngine, DeploymentTicket, EngineSettings};
pub use error::{EngineError, Result};
pub use model::{AuditAction, Deployment, DeploymentEvent, DeploymentStatus, Workspace};
pub use queue::{Job, JobKind, JobPriority, JobQueue};
pub use resolver::ResolvedDependencies;
pub use snapshot::{SnapshotEntry, WorkspaceSnapshot};
pub use store::{DeploymentStore, EventStore, MemoryStore, WorkspaceStore};
