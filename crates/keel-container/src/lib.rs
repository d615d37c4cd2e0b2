//! keel-container: platform-neutral container lifecycle management.
//!
//! A single [`ContainerPlatform`] trait covers clusters, services,
//! one-off tasks and versioned task definitions. Each orchestrator gets
//! its own implementation, selected once at startup; business logic
//! never branches on the platform.
//!
//! # Architecture
//!
//! ```text
//! ContainerPlatform (trait object)
//!   ├── EcsPlatform<A: EcsApi>    : task definitions, services, tasks
//!   │   └── LocalEcs              : in-process ECS semantics
//!   └── SwarmPlatform<A: SwarmApi>: services and tasks (no task definitions)
//!       └── LocalSwarm            : in-process swarm semantics
//!
//! taskdef::ensure_task_definition : exists → latest → reuse, or register
//! ```
//!
//! Every call takes a [`Context`] carrying a cancellation token and an
//! optional deadline. Mutations are never retried internally; errors are
//! mapped onto [`ContainerError`] so callers decide what to retry.

pub mod context;
pub mod ecs;
pub mod error;
pub mod platform;
pub mod swarm;
pub mod taskdef;
pub mod types;

pub use context::Context;
pub use ecs::{EcsApi, EcsPlatform, LocalEcs};
pub use error::{ContainerError, ContainerResult};
pub use platform::ContainerPlatform;
pub use swarm::{LocalSwarm, SwarmApi, SwarmPlatform};
pub use taskdef::{ReusePolicy, cleanup_stale_revisions, ensure_task_definition};
pub use types::*;
