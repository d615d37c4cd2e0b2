//! Service data model shared across Keel crates.
//!
//! These types describe a deployed stateful service as the control
//! database stores it, the per-replica configuration bundles rendered
//! at creation time, and the platform-neutral creation request.

use std::fmt;

use serde::{Deserialize, Serialize};

/// File mode applied to rendered replica config files.
pub const DEFAULT_CONFIG_FILE_MODE: u32 = 0o600;

/// Path inside the container where the data volume is mounted.
pub const DEFAULT_CONTAINER_MOUNT_PATH: &str = "/data";

/// Registry prefix of the catalog service images.
pub const CONTAINER_IMAGE_PREFIX: &str = "keelhq/";

/// Default CPU and memory limits; a maximum of 0 means no hard limit.
pub const DEFAULT_MAX_CPU_UNITS: u64 = 0;
pub const DEFAULT_RESERVE_CPU_UNITS: u64 = 256;
pub const DEFAULT_MAX_MEM_MB: u64 = 0;
pub const DEFAULT_RESERVE_MEM_MB: u64 = 256;

// ── Service attributes ────────────────────────────────────────────

/// Lifecycle status of a stored service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Creating,
    Active,
    Deleting,
    Deleted,
}

/// Catalog service types Keel knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogService {
    Kafka,
    #[serde(rename = "zookeeper")]
    ZooKeeper,
}

impl fmt::Display for CatalogService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogService::Kafka => f.write_str("kafka"),
            CatalogService::ZooKeeper => f.write_str("zookeeper"),
        }
    }
}

/// Opaque, service-type specific attributes attached to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUserAttr {
    pub service_type: CatalogService,
    /// JSON-encoded attribute struct of the catalog service.
    pub attr_bytes: Vec<u8>,
}

/// EBS-style volume class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    GpSsd,
    ProvisionedIops,
    ThroughputHdd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVolume {
    pub volume_type: VolumeType,
    pub volume_size_gb: u64,
    /// Only meaningful for `ProvisionedIops`.
    #[serde(default)]
    pub iops: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVolumes {
    pub primary_device_name: String,
    pub primary_volume: ServiceVolume,
}

/// CPU/memory maximum and reservation pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub max_cpu_units: u64,
    pub reserve_cpu_units: u64,
    pub max_mem_mb: u64,
    pub reserve_mem_mb: u64,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            max_cpu_units: DEFAULT_MAX_CPU_UNITS,
            reserve_cpu_units: DEFAULT_RESERVE_CPU_UNITS,
            max_mem_mb: DEFAULT_MAX_MEM_MB,
            reserve_mem_mb: DEFAULT_RESERVE_MEM_MB,
        }
    }
}

impl Resources {
    /// Raise the memory reservation to at least `min_mem_mb`.
    ///
    /// A bounded maximum is raised along with it so reservation never
    /// exceeds the limit.
    pub fn with_min_reserved_mem(mut self, min_mem_mb: u64) -> Self {
        if self.reserve_mem_mb < min_mem_mb {
            self.reserve_mem_mb = min_mem_mb;
        }
        if self.max_mem_mb != 0 && self.max_mem_mb < self.reserve_mem_mb {
            self.max_mem_mb = self.reserve_mem_mb;
        }
        self
    }
}

/// A deployed service, as stored by the control database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAttr {
    pub service_uuid: String,
    pub status: ServiceStatus,
    /// Unix timestamp (nanoseconds) of the last status change.
    pub last_modified: u64,
    pub replicas: u32,
    pub cluster: String,
    pub service_name: String,
    pub volumes: ServiceVolumes,
    pub register_dns: bool,
    pub domain_name: String,
    pub hosted_zone_id: String,
    pub resources: Resources,
    pub user_attr: Option<ServiceUserAttr>,
}

impl ServiceAttr {
    /// Build the composite key for the services table.
    pub fn table_key(&self) -> String {
        service_key(&self.cluster, &self.service_name)
    }
}

/// Composite `{cluster}/{service}` key used by the control database.
pub fn service_key(cluster: &str, service: &str) -> String {
    format!("{cluster}/{service}")
}

// ── Replica configs ───────────────────────────────────────────────

/// One rendered configuration file of a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfigFile {
    pub file_name: String,
    pub file_mode: u32,
    pub content: String,
}

/// The configuration bundle of a single replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub zone: String,
    pub member_name: String,
    pub configs: Vec<ReplicaConfigFile>,
}

// ── Requests ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    /// The port registered as the externally visible service port.
    #[serde(default)]
    pub is_service_port: bool,
}

/// Zone affinity for the replicas of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub zones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCommonRequest {
    pub region: String,
    pub cluster: String,
    pub service_name: String,
}

/// Platform-agnostic request to create a catalog service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    pub service: ServiceCommonRequest,
    pub resource: Resources,
    pub container_image: String,
    pub replicas: u32,
    pub volume: ServiceVolume,
    pub container_path: String,
    pub port_mappings: Vec<PortMapping>,
    pub register_dns: bool,
    pub replica_configs: Vec<ReplicaConfig>,
    pub user_attr: Option<ServiceUserAttr>,
}
