//! # caravel-recipe
//!
//! Typed recipe definitions and Kubernetes resource generation for Caravel.
//!
//! A *recipe* describes how one kind of service (a database, a cache, a web
//! application, an object store) is deployed: which configuration fields the
//! user may tune, which credentials it needs, which other recipes it depends
//! on, and how its Kubernetes resource graph is assembled.
//!
//! ## Modules
//!
//! - [`config`] - runtime config schemas with defaults and validation
//! - [`definition`] - [`RecipeDefinition`] and its supporting types
//! - [`graph`] - the ordered, serializable resource graph a build produces
//! - [`builders`] - label-consistent builders for individual resources
//! - [`archetypes`] - the closed set of recipe shapes (database, cache,
//!   web app, object store, custom)
//! - [`registry`] - the explicit, injectable recipe registry
//! - [`catalog`] - the built-in recipes shipped with Caravel
//!
//! ## Determinism
//!
//! `RecipeDefinition::build` is a pure function of its [`BuildInput`]: the
//! same instance name, namespace, validated config, secrets, dependency
//! connections and ingress context always yield a byte-identical graph.
//! The engine relies on this to persist the graph as the authoritative
//! "last known good" snapshot for later deletion and drift-free rebuilds.

pub mod archetypes;
pub mod builders;
pub mod catalog;
pub mod config;
pub mod definition;
pub mod error;
pub mod graph;
pub mod registry;

pub use config::{ConfigField, ConfigSchema, FieldKind};
pub use definition::{
    BuildInput, ConnectionInfo, ConnectionSpec, DependencySpec, EnvRule, EnvSource, HealthProbe,
    IngressContext, RecipeDefinition, RecipeMeta, SecretField, SecretsSpec, ValueRef,
};
pub use error::{RecipeError, Result};
pub use graph::{GraphSnapshot, Resource, ResourceGraph, SNAPSHOT_VERSION};
pub use registry::RecipeRegistry;

/// Value of the `app.kubernetes.io/managed-by` label on every resource
/// Caravel creates. The reconciler and readiness waiter select by these
/// labels, so they must stay stable across releases.
pub const MANAGED_BY: &str = "caravel";
