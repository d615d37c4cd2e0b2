//! ZooKeeper catalog service.
//!
//! The coordination service Kafka brokers depend on. Every member lists
//! the full ensemble in `zoo.cfg`, in ordinal order, and gets a `myid`
//! equal to its ordinal plus one.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use keel_core::{
    CONTAINER_IMAGE_PREFIX, CatalogService, CreateServiceRequest, DEFAULT_CONTAINER_MOUNT_PATH,
    PlatformKind, PortMapping, ReplicaConfig, Resources, ServiceCommonRequest, ServiceUserAttr,
    ServiceVolume,
};

use crate::error::{CatalogError, CatalogResult};
use crate::target::CatalogTarget;
use crate::template::{ConfigTemplate, SysConfig, bind_address, static_file};
use crate::topology::{ReplicaSlot, plan_members};

const DEFAULT_VERSION: &str = "3.4";

/// Port clients (and Kafka brokers) connect to.
pub const CLIENT_PORT: u16 = 2181;
/// Follower-to-leader port.
pub const PEER_CONNECT_PORT: u16 = 2888;
/// Leader election port.
pub const LEADER_ELECT_PORT: u16 = 3888;

/// Default ZooKeeper JVM heap size.
pub const DEFAULT_HEAP_MB: u64 = 4096;

pub const ZOO_CFG_FILE: &str = "zoo.cfg";
pub const MYID_FILE: &str = "myid";
pub const JAVA_ENV_FILE: &str = "java.env";
pub const LOG_CONFIG_FILE: &str = "log4j.properties";

pub fn container_image() -> String {
    format!("{CONTAINER_IMAGE_PREFIX}zookeeper:{DEFAULT_VERSION}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZkOptions {
    pub replicas: u32,
    pub volume: ServiceVolume,
    pub heap_size_mb: u64,
}

impl ZkOptions {
    pub fn validate(&self) -> CatalogResult<()> {
        if self.replicas == 0 {
            return Err(CatalogError::InvalidOptions("replicas must be at least 1".into()));
        }
        if self.heap_size_mb == 0 {
            return Err(CatalogError::InvalidOptions("heap size must be positive".into()));
        }
        Ok(())
    }
}

/// ZooKeeper attributes persisted with the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkUserAttr {
    pub heap_size_mb: u64,
}

// ── Templates ─────────────────────────────────────────────────────

/// `zoo.cfg` of one member.
#[derive(Debug, Clone, Copy)]
pub struct ZooCfg<'a> {
    pub bind: &'a str,
    /// Members without their own DNS name listen for quorum traffic on every interface.
    pub listen_on_all_ips: bool,
    pub ensemble: &'a [ReplicaSlot],
}

impl ConfigTemplate for ZooCfg<'_> {
    const FILE_NAME: &'static str = ZOO_CFG_FILE;

    fn render(&self) -> String {
        let servers: String = self
            .ensemble
            .iter()
            .map(|slot| {
                format!(
                    "server.{id}={host}:{PEER_CONNECT_PORT}:{LEADER_ELECT_PORT}\n",
                    id = slot.index + 1,
                    host = slot.dns_name,
                )
            })
            .collect();
        format!(
            r#"
tickTime=2000
initLimit=10
syncLimit=5
dataDir={data_dir}/zookeeper
clientPort={CLIENT_PORT}
clientPortAddress={bind}
quorumListenOnAllIPs={listen_on_all_ips}
autopurge.snapRetainCount=3
autopurge.purgeInterval=1
{servers}"#,
            data_dir = DEFAULT_CONTAINER_MOUNT_PATH,
            bind = self.bind,
            listen_on_all_ips = self.listen_on_all_ips,
        )
    }
}

/// `myid`: the member's server id within the ensemble.
#[derive(Debug, Clone, Copy)]
pub struct MyId {
    pub id: u32,
}

impl ConfigTemplate for MyId {
    const FILE_NAME: &'static str = MYID_FILE;

    fn render(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JavaEnv {
    pub heap_size_mb: u64,
}

impl ConfigTemplate for JavaEnv {
    const FILE_NAME: &'static str = JAVA_ENV_FILE;

    fn render(&self) -> String {
        format!("JVMFLAGS=\"-Xmx{heap}m -Xms{heap}m\"\n", heap = self.heap_size_mb)
    }
}

const LOG_CONFIG: &str = r#"
zookeeper.root.logger=INFO, CONSOLE
zookeeper.console.threshold=INFO

log4j.rootLogger=${zookeeper.root.logger}

log4j.appender.CONSOLE=org.apache.log4j.ConsoleAppender
log4j.appender.CONSOLE.Threshold=${zookeeper.console.threshold}
log4j.appender.CONSOLE.layout=org.apache.log4j.PatternLayout
log4j.appender.CONSOLE.layout.ConversionPattern=%d{ISO8601} [myid:%X{myid}] - %-5p [%t:%C{1}@%L] - %m%n
"#;

// ── Generators ────────────────────────────────────────────────────

/// Render the config files of every ensemble member, in ordinal order.
pub fn gen_replica_configs(
    target: &CatalogTarget<'_>,
    service: &str,
    opts: &ZkOptions,
) -> Vec<ReplicaConfig> {
    debug!(%service, replicas = opts.replicas, "rendering zookeeper replica configs");

    let ensemble = plan_members(service, target.domain, opts.replicas, target.zones);
    ensemble
        .iter()
        .map(|slot| {
            let sys = SysConfig {
                platform: target.platform,
                member_dns: &slot.dns_name,
            };
            let zoo = ZooCfg {
                bind: bind_address(target.platform, &slot.dns_name),
                listen_on_all_ips: target.platform == PlatformKind::Swarm,
                ensemble: &ensemble,
            };
            ReplicaConfig {
                zone: slot.zone.clone(),
                member_name: slot.member_name.clone(),
                configs: vec![
                    sys.to_file(),
                    zoo.to_file(),
                    MyId { id: slot.index + 1 }.to_file(),
                    JavaEnv {
                        heap_size_mb: opts.heap_size_mb,
                    }
                    .to_file(),
                    static_file(LOG_CONFIG_FILE, LOG_CONFIG),
                ],
            }
        })
        .collect()
}

/// Build the default create request of a ZooKeeper service.
pub fn gen_default_create_service_request(
    target: &CatalogTarget<'_>,
    service: &str,
    opts: &ZkOptions,
    res: &Resources,
) -> CatalogResult<CreateServiceRequest> {
    let replica_configs = gen_replica_configs(target, service, opts);

    let port_mappings = vec![
        PortMapping {
            container_port: CLIENT_PORT,
            host_port: CLIENT_PORT,
            is_service_port: true,
        },
        PortMapping {
            container_port: PEER_CONNECT_PORT,
            host_port: PEER_CONNECT_PORT,
            is_service_port: false,
        },
        PortMapping {
            container_port: LEADER_ELECT_PORT,
            host_port: LEADER_ELECT_PORT,
            is_service_port: false,
        },
    ];

    let attr_bytes = serde_json::to_vec(&ZkUserAttr {
        heap_size_mb: opts.heap_size_mb,
    })
    .map_err(|e| {
        error!(%service, error = %e, "failed to encode zookeeper user attr");
        CatalogError::Serialization(e)
    })?;

    Ok(CreateServiceRequest {
        service: ServiceCommonRequest {
            region: target.region.to_string(),
            cluster: target.cluster.to_string(),
            service_name: service.to_string(),
        },
        resource: res.with_min_reserved_mem(opts.heap_size_mb),
        container_image: container_image(),
        replicas: opts.replicas,
        volume: opts.volume.clone(),
        container_path: DEFAULT_CONTAINER_MOUNT_PATH.to_string(),
        port_mappings,
        register_dns: true,
        replica_configs,
        user_attr: Some(ServiceUserAttr {
            service_type: CatalogService::ZooKeeper,
            attr_bytes,
        }),
    })
}
