//! Platform-neutral request and result types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use keel_core::{Placement, PortMapping, Resources};

use crate::error::{ContainerError, ContainerResult};

/// Task type of the one-off task that initializes a new service.
pub const TASK_TYPE_INIT: &str = "init";

/// Environment keys every keel container receives.
pub const ENV_CLUSTER: &str = "KEEL_CLUSTER";
pub const ENV_SERVICE_NAME: &str = "KEEL_SERVICE_NAME";
pub const ENV_SERVICE_UUID: &str = "KEEL_SERVICE_UUID";

/// Host directory prefix under which service data volumes are bound.
pub const HOST_VOLUME_ROOT: &str = "/mnt";

// ── Options ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub driver: String,
    pub options: BTreeMap<String, String>,
}

impl LogConfig {
    /// Local `json-file` logging with bounded rotation.
    pub fn json_file() -> Self {
        let options = BTreeMap::from([
            ("max-size".to_string(), "64m".to_string()),
            ("max-file".to_string(), "4".to_string()),
        ]);
        Self {
            driver: "json-file".to_string(),
            options,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::json_file()
    }
}

/// Fields shared by services and one-off tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonOptions {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
    pub container_image: String,
    pub resource: Resources,
    pub log_config: LogConfig,
}

impl CommonOptions {
    pub fn validate(&self) -> ContainerResult<()> {
        if self.cluster.is_empty() {
            return Err(ContainerError::Validation("cluster name is empty".into()));
        }
        if self.service_name.is_empty() {
            return Err(ContainerError::Validation("service name is empty".into()));
        }
        if self.container_image.is_empty() {
            return Err(ContainerError::Validation("container image is empty".into()));
        }
        let r = &self.resource;
        if r.max_cpu_units != 0 && r.reserve_cpu_units > r.max_cpu_units {
            return Err(ContainerError::Validation(format!(
                "cpu reservation {} exceeds maximum {}",
                r.reserve_cpu_units, r.max_cpu_units
            )));
        }
        if r.max_mem_mb != 0 && r.reserve_mem_mb > r.max_mem_mb {
            return Err(ContainerError::Validation(format!(
                "memory reservation {} exceeds maximum {}",
                r.reserve_mem_mb, r.max_mem_mb
            )));
        }
        Ok(())
    }

    fn base_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ENV_CLUSTER.to_string(), self.cluster.clone()),
            (ENV_SERVICE_NAME.to_string(), self.service_name.clone()),
            (ENV_SERVICE_UUID.to_string(), self.service_uuid.clone()),
        ])
    }
}

/// Single data volume mounted into every replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOptions {
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateServiceOptions {
    pub common: CommonOptions,
    pub replicas: u32,
    pub port_mappings: Vec<PortMapping>,
    /// Zone affinity; `None` lets the platform place replicas anywhere.
    pub place: Option<Placement>,
    pub data_volume: Option<VolumeOptions>,
    pub env: BTreeMap<String, String>,
}

impl CreateServiceOptions {
    pub fn validate(&self) -> ContainerResult<()> {
        self.common.validate()?;
        if let Some(place) = &self.place
            && place.zones.is_empty()
        {
            return Err(ContainerError::Validation("placement has no zones".into()));
        }
        if let Some(vol) = &self.data_volume
            && vol.mount_path.is_empty()
        {
            return Err(ContainerError::Validation("volume mount path is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunTaskOptions {
    pub common: CommonOptions,
    pub task_type: String,
    pub env: BTreeMap<String, String>,
}

impl RunTaskOptions {
    pub fn validate(&self) -> ContainerResult<()> {
        self.common.validate()?;
        if self.task_type.is_empty() {
            return Err(ContainerError::Validation("task type is empty".into()));
        }
        Ok(())
    }
}

// ── Task definitions ──────────────────────────────────────────────

/// `family:revision`. Revisions increase monotonically per family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskDefinitionId {
    pub family: String,
    pub revision: u32,
}

impl TaskDefinitionId {
    pub fn new(family: impl Into<String>, revision: u32) -> Self {
        Self {
            family: family.into(),
            revision,
        }
    }
}

impl fmt::Display for TaskDefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.revision)
    }
}

impl FromStr for TaskDefinitionId {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ContainerError::Validation(format!("invalid task definition id: {s}"));
        let (family, revision) = s.rsplit_once(':').ok_or_else(invalid)?;
        if family.is_empty() {
            return Err(invalid());
        }
        let revision = revision.parse().map_err(|_| invalid())?;
        Ok(Self::new(family, revision))
    }
}

/// Data volume bound from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVolume {
    pub host_path: String,
    pub mount_path: String,
}

/// Desired content of a task definition, independent of its platform shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinitionSpec {
    pub container_name: String,
    pub image: String,
    pub resource: Resources,
    pub port_mappings: Vec<PortMapping>,
    pub data_volume: Option<DataVolume>,
    pub env: BTreeMap<String, String>,
    pub log_config: LogConfig,
}

impl TaskDefinitionSpec {
    /// Long-running service container.
    pub fn for_service(opts: &CreateServiceOptions) -> Self {
        let mut env = opts.common.base_env();
        env.extend(opts.env.clone());
        Self {
            container_name: opts.common.service_name.clone(),
            image: opts.common.container_image.clone(),
            resource: opts.common.resource,
            port_mappings: opts.port_mappings.clone(),
            data_volume: opts.data_volume.as_ref().map(|v| DataVolume {
                host_path: format!("{HOST_VOLUME_ROOT}/{}", opts.common.service_uuid),
                mount_path: v.mount_path.clone(),
            }),
            env,
            log_config: opts.common.log_config.clone(),
        }
    }

    /// One-off task container.
    pub fn for_task(opts: &RunTaskOptions) -> Self {
        let mut env = opts.common.base_env();
        env.extend(opts.env.clone());
        Self {
            container_name: format!("{}-{}", opts.common.service_name, opts.task_type),
            image: opts.common.container_image.clone(),
            resource: opts.common.resource,
            port_mappings: Vec::new(),
            data_volume: None,
            env,
            log_config: opts.common.log_config.clone(),
        }
    }

    /// Hex sha256 of the canonical JSON form.
    ///
    /// Maps are ordered, so equal specs always produce equal digests.
    pub fn digest(&self) -> ContainerResult<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| ContainerError::Validation(format!("unencodable task definition: {e}")))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// A registered task definition as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: TaskDefinitionId,
    /// Digest recorded at registration; absent for definitions keel did not register.
    pub spec_digest: Option<String>,
}

// ── Tasks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Stopped { reason: String },
}

impl TaskStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn common(cluster: &str, service: &str) -> CommonOptions {
        CommonOptions {
            cluster: cluster.to_string(),
            service_name: service.to_string(),
            service_uuid: format!("{service}-uuid"),
            container_image: "keelhq/zookeeper:3.4".to_string(),
            resource: Resources::default(),
            log_config: LogConfig::json_file(),
        }
    }

    pub(crate) fn service_opts(cluster: &str, service: &str) -> CreateServiceOptions {
        CreateServiceOptions {
            common: common(cluster, service),
            replicas: 1,
            port_mappings: vec![PortMapping {
                container_port: 2181,
                host_port: 2181,
                is_service_port: true,
            }],
            place: None,
            data_volume: None,
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn task_definition_id_round_trip() {
        let id: TaskDefinitionId = "c1-zk1:12".parse().unwrap();
        assert_eq!(id, TaskDefinitionId::new("c1-zk1", 12));
        assert_eq!(id.to_string(), "c1-zk1:12");

        assert!("c1-zk1".parse::<TaskDefinitionId>().is_err());
        assert!(":3".parse::<TaskDefinitionId>().is_err());
        assert!("fam:x".parse::<TaskDefinitionId>().is_err());
    }

    #[test]
    fn digest_stable_and_sensitive() {
        let opts = service_opts("c1", "zk1");
        let a = TaskDefinitionSpec::for_service(&opts);
        let b = TaskDefinitionSpec::for_service(&opts);
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest().unwrap().len(), 64);

        let mut changed = opts.clone();
        changed.common.container_image = "keelhq/zookeeper:3.5".into();
        let c = TaskDefinitionSpec::for_service(&changed);
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }

    #[test]
    fn service_spec_binds_volume_under_uuid() {
        let mut opts = service_opts("c1", "zk1");
        opts.data_volume = Some(VolumeOptions {
            mount_path: "/data".into(),
        });
        let spec = TaskDefinitionSpec::for_service(&opts);
        let vol = spec.data_volume.unwrap();
        assert_eq!(vol.host_path, "/mnt/zk1-uuid");
        assert_eq!(vol.mount_path, "/data");
        assert_eq!(spec.env[ENV_SERVICE_UUID], "zk1-uuid");
    }

    #[test]
    fn validation_rejects_bad_input() {
        let mut opts = service_opts("", "zk1");
        assert!(matches!(opts.validate(), Err(ContainerError::Validation(_))));

        opts.common.cluster = "c1".into();
        opts.place = Some(Placement { zones: vec![] });
        assert!(opts.validate().is_err());

        opts.place = Some(Placement {
            zones: vec!["az1".into()],
        });
        assert!(opts.validate().is_ok());

        opts.common.resource.max_mem_mb = 128;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn task_spec_named_after_type() {
        let opts = RunTaskOptions {
            common: common("c1", "kafka1"),
            task_type: TASK_TYPE_INIT.into(),
            env: BTreeMap::from([("ROLE".to_string(), "init".to_string())]),
        };
        let spec = TaskDefinitionSpec::for_task(&opts);
        assert_eq!(spec.container_name, "kafka1-init");
        assert_eq!(spec.env["ROLE"], "init");
        assert!(spec.port_mappings.is_empty());
    }
}
