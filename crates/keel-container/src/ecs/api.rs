//! ECS control plane calls, in ECS's own request and response shapes.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_INACTIVE: &str = "INACTIVE";
pub const STATUS_DRAINING: &str = "DRAINING";

pub const TASK_PENDING: &str = "PENDING";
pub const TASK_RUNNING: &str = "RUNNING";
pub const TASK_STOPPED: &str = "STOPPED";

pub const NETWORK_MODE_HOST: &str = "host";

/// Error codes of the ECS API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcsErrorCode {
    ClientException,
    ServerException,
    ThrottlingException,
    InvalidParameterException,
    ClusterNotFoundException,
    ClusterContainsServicesException,
    ServiceNotFoundException,
    ServiceNotActiveException,
}

impl EcsErrorCode {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ServerException | Self::ThrottlingException)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcsApiError {
    pub code: EcsErrorCode,
    pub message: String,
}

impl EcsApiError {
    pub fn new(code: EcsErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EcsApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for EcsApiError {}

pub type EcsApiResult<T> = Result<T, EcsApiError>;

// ── Task definitions ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcsPortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfiguration {
    pub log_driver: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub cpu: u64,
    /// Hard limit; `None` leaves the container unbounded.
    pub memory: Option<u64>,
    pub memory_reservation: u64,
    pub essential: bool,
    pub port_mappings: Vec<EcsPortMapping>,
    pub mount_points: Vec<MountPoint>,
    pub environment: Vec<KeyValuePair>,
    pub docker_labels: BTreeMap<String, String>,
    pub log_configuration: LogConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub host_source_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterTaskDefinitionInput {
    pub family: String,
    pub network_mode: String,
    pub container_definitions: Vec<ContainerDefinition>,
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcsTaskDefinition {
    pub task_definition_arn: String,
    pub family: String,
    pub revision: u32,
    pub status: String,
    pub network_mode: String,
    pub container_definitions: Vec<ContainerDefinition>,
    pub volumes: Vec<Volume>,
}

// ── Services and tasks ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementConstraint {
    /// `memberOf` or `distinctInstance`.
    pub kind: String,
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateServiceInput {
    pub cluster: String,
    pub service_name: String,
    pub task_definition: String,
    pub desired_count: u32,
    pub placement_constraints: Vec<PlacementConstraint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcsService {
    pub service_arn: String,
    pub service_name: String,
    pub cluster_arn: String,
    pub task_definition: String,
    pub status: String,
    pub desired_count: u32,
    pub running_count: u32,
    pub placement_constraints: Vec<PlacementConstraint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTaskInput {
    pub cluster: String,
    pub task_definition: String,
    pub started_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcsTask {
    pub task_arn: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub started_by: String,
    pub last_status: String,
    pub desired_status: String,
    pub stopped_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcsCluster {
    pub cluster_arn: String,
    pub cluster_name: String,
    pub status: String,
    pub active_services_count: u32,
}

/// The subset of the ECS API keel drives.
///
/// `describe_task_definition` accepts either a bare family, which
/// resolves to the latest active revision, or `family:revision`, which
/// resolves to that revision whatever its status.
#[async_trait]
pub trait EcsApi: Send + Sync {
    async fn create_cluster(&self, cluster_name: &str) -> EcsApiResult<EcsCluster>;
    async fn describe_clusters(&self, clusters: &[String]) -> EcsApiResult<Vec<EcsCluster>>;
    async fn delete_cluster(&self, cluster: &str) -> EcsApiResult<EcsCluster>;

    /// Families with at least one active revision whose name starts with `prefix`.
    async fn list_task_definition_families(&self, prefix: &str) -> EcsApiResult<Vec<String>>;
    /// Active revision arns of `family`, ascending.
    async fn list_task_definitions(&self, family: &str) -> EcsApiResult<Vec<String>>;
    async fn describe_task_definition(&self, task_definition: &str)
    -> EcsApiResult<EcsTaskDefinition>;
    async fn register_task_definition(
        &self,
        input: RegisterTaskDefinitionInput,
    ) -> EcsApiResult<EcsTaskDefinition>;
    async fn deregister_task_definition(
        &self,
        task_definition: &str,
    ) -> EcsApiResult<EcsTaskDefinition>;

    async fn create_service(&self, input: CreateServiceInput) -> EcsApiResult<EcsService>;
    /// Unknown names are omitted from the result.
    async fn describe_services(
        &self,
        cluster: &str,
        services: &[String],
    ) -> EcsApiResult<Vec<EcsService>>;
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        desired_count: u32,
    ) -> EcsApiResult<EcsService>;
    async fn delete_service(&self, cluster: &str, service: &str) -> EcsApiResult<EcsService>;

    async fn run_task(&self, input: RunTaskInput) -> EcsApiResult<EcsTask>;
    async fn describe_tasks(&self, cluster: &str, tasks: &[String]) -> EcsApiResult<Vec<EcsTask>>;
    async fn list_tasks(&self, cluster: &str, started_by: &str) -> EcsApiResult<Vec<String>>;
    async fn stop_task(&self, cluster: &str, task: &str, reason: &str) -> EcsApiResult<EcsTask>;
}
