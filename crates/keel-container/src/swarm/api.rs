//! Docker swarm engine calls, in the engine's own shapes.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

pub const RESTART_ANY: &str = "any";
pub const RESTART_NONE: &str = "none";
pub const MOUNT_BIND: &str = "bind";
pub const PUBLISH_MODE_HOST: &str = "host";

/// Engine error, carrying the HTTP status the engine answered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmApiError {
    pub status: u16,
    pub message: String,
}

impl SwarmApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    pub fn is_retryable(&self) -> bool {
        self.status >= 500
    }
}

impl fmt::Display for SwarmApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine returned {}: {}", self.status, self.message)
    }
}

impl std::error::Error for SwarmApiError {}

pub type SwarmApiResult<T> = Result<T, SwarmApiError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub kind: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSpec {
    pub nano_cpus: u64,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceRequirements {
    pub limits: Option<ResourceSpec>,
    pub reservations: ResourceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SwarmPlacement {
    pub constraints: Vec<String>,
    /// Spread descriptors, e.g. `node.labels.zone`.
    pub spread: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDriver {
    pub name: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub target_port: u16,
    pub published_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub mounts: Vec<Mount>,
    pub resources: ResourceRequirements,
    pub restart_condition: String,
    pub placement: SwarmPlacement,
    pub log_driver: LogDriver,
    pub replicas: u64,
    pub publish_mode: String,
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmService {
    pub id: String,
    /// Object version; updates must quote the version they were based on.
    pub version: u64,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmTask {
    pub id: String,
    pub service_id: String,
    pub slot: u64,
    /// Creation time, nanoseconds since the unix epoch.
    pub created_at: u64,
    /// `new`, `pending`, `running`, `complete`, `failed`, `shutdown`, ...
    pub state: String,
    pub desired_state: String,
    pub err: Option<String>,
}

/// The subset of the engine API keel drives.
#[async_trait]
pub trait SwarmApi: Send + Sync {
    /// Returns the new service id. Fails with 409 when the name is taken.
    async fn service_create(&self, spec: ServiceSpec) -> SwarmApiResult<String>;
    async fn service_inspect(&self, name: &str) -> SwarmApiResult<SwarmService>;
    async fn service_update(&self, name: &str, version: u64, spec: ServiceSpec) -> SwarmApiResult<()>;
    async fn service_remove(&self, name: &str) -> SwarmApiResult<()>;
    async fn task_list(&self, service: &str) -> SwarmApiResult<Vec<SwarmTask>>;
}
