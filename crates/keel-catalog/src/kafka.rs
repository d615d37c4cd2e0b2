//! Kafka catalog service.
//!
//! By default brokers are spread over the availability zones and listen
//! on the standard port 9092. Each broker gets four config files:
//! `sys.conf`, `server.properties`, `java.env` and `log4j.properties`.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use keel_core::{
    CONTAINER_IMAGE_PREFIX, CatalogService, CreateServiceRequest, DEFAULT_CONTAINER_MOUNT_PATH,
    PortMapping, ReplicaConfig, Resources, ServiceAttr, ServiceCommonRequest, ServiceUserAttr,
    ServiceVolume,
};

use crate::dependency::connection_string;
use crate::error::{CatalogError, CatalogResult};
use crate::target::CatalogTarget;
use crate::template::{ConfigTemplate, SysConfig, bind_address, static_file};
use crate::topology::{QuorumDefaults, QuorumParams, plan_members};
use crate::zookeeper;

const DEFAULT_VERSION: &str = "1.0";

/// Broker listener port.
pub const LISTEN_PORT: u16 = 9092;

/// Quorum defaults for a full-size Kafka cluster.
pub const QUORUM_DEFAULTS: QuorumDefaults = QuorumDefaults {
    replication_factor: 3,
    min_insync_replicas: 2,
    partitions: 8,
};

/// Default Kafka JVM heap size.
pub const DEFAULT_HEAP_MB: u64 = 6144;

pub const SERVER_PROPERTIES_FILE: &str = "server.properties";
pub const JAVA_ENV_FILE: &str = "java.env";
pub const LOG_CONFIG_FILE: &str = "log4j.properties";

/// Image of the broker container.
pub fn container_image() -> String {
    format!("{CONTAINER_IMAGE_PREFIX}kafka:{DEFAULT_VERSION}")
}

/// User-facing options of a Kafka service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KafkaOptions {
    pub replicas: u32,
    pub volume: ServiceVolume,
    pub heap_size_mb: u64,
    pub allow_topic_del: bool,
    pub retention_hours: u64,
    /// ZooKeeper service the brokers coordinate through.
    pub zk_service_name: String,
}

impl KafkaOptions {
    pub fn validate(&self) -> CatalogResult<()> {
        if self.replicas == 0 {
            return Err(CatalogError::InvalidOptions("replicas must be at least 1".into()));
        }
        if self.heap_size_mb == 0 {
            return Err(CatalogError::InvalidOptions("heap size must be positive".into()));
        }
        if self.retention_hours == 0 {
            return Err(CatalogError::InvalidOptions("retention hours must be positive".into()));
        }
        if self.zk_service_name.is_empty() {
            return Err(CatalogError::InvalidOptions("zookeeper service name is empty".into()));
        }
        Ok(())
    }
}

/// Kafka attributes persisted with the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaUserAttr {
    pub heap_size_mb: u64,
    pub allow_topic_del: bool,
    pub retention_hours: u64,
    pub zk_service_name: String,
}

// ── Templates ─────────────────────────────────────────────────────

/// `server.properties` of one broker.
#[derive(Debug, Clone, Copy)]
pub struct ServerProperties<'a> {
    pub broker_id: u32,
    pub rack: &'a str,
    pub delete_topic_enable: bool,
    pub partitions: u32,
    pub bind: &'a str,
    pub advertised: &'a str,
    pub replication_factor: u32,
    pub min_insync_replicas: u32,
    pub retention_hours: u64,
    pub zk_connect: &'a str,
}

impl ConfigTemplate for ServerProperties<'_> {
    const FILE_NAME: &'static str = SERVER_PROPERTIES_FILE;

    fn render(&self) -> String {
        format!(
            r#"
# The id of the broker. This must be set to a unique integer for each broker.
broker.id={broker_id}
broker.rack={rack}

delete.topic.enable={delete_topic_enable}
auto.create.topics.enable=true
num.partitions={partitions}

listeners=PLAINTEXT://{bind}:{port}
advertised.listeners=PLAINTEXT://{advertised}:{port}

log.dirs={data_dir}/kafka

offsets.topic.replication.factor={replication_factor}
transaction.state.log.replication.factor={replication_factor}
transaction.state.log.min.isr={replication_factor}
default.replication.factor={replication_factor}
min.insync.replicas={min_insync_replicas}

unclean.leader.election.enable=false

log.retention.hours={retention_hours}

zookeeper.connect={zk_connect}

group.initial.rebalance.delay.ms=3000
"#,
            broker_id = self.broker_id,
            rack = self.rack,
            delete_topic_enable = self.delete_topic_enable,
            partitions = self.partitions,
            bind = self.bind,
            advertised = self.advertised,
            port = LISTEN_PORT,
            data_dir = DEFAULT_CONTAINER_MOUNT_PATH,
            replication_factor = self.replication_factor,
            min_insync_replicas = self.min_insync_replicas,
            retention_hours = self.retention_hours,
            zk_connect = self.zk_connect,
        )
    }
}

/// `java.env`: fixed heap so the JVM never resizes it at runtime.
#[derive(Debug, Clone, Copy)]
pub struct JavaEnv {
    pub heap_size_mb: u64,
}

impl ConfigTemplate for JavaEnv {
    const FILE_NAME: &'static str = JAVA_ENV_FILE;

    fn render(&self) -> String {
        format!(
            "\nKAFKA_HEAP_OPTS=\"-Xmx{heap}m -Xms{heap}m\"\n{JVM_PERFORMANCE_OPTS}\n",
            heap = self.heap_size_mb,
        )
    }
}

const JVM_PERFORMANCE_OPTS: &str = "KAFKA_JVM_PERFORMANCE_OPTS=\"-server -XX:+UseG1GC -XX:MaxGCPauseMillis=20 -XX:InitiatingHeapOccupancyPercent=35 -XX:+DisableExplicitGC -Djava.awt.headless=true -XX:G1HeapRegionSize=16M -XX:MetaspaceSize=96m -XX:MinMetaspaceFreeRatio=50 -XX:MaxMetaspaceFreeRatio=80\"";

const LOG_CONFIG: &str = r#"
log4j.rootLogger=INFO, stdout

log4j.appender.stdout=org.apache.log4j.ConsoleAppender
log4j.appender.stdout.layout=org.apache.log4j.PatternLayout
log4j.appender.stdout.layout.ConversionPattern=[%d] %p %m (%c)%n

# ZooKeeper client logging
log4j.logger.org.I0Itec.zkclient.ZkClient=INFO
log4j.logger.org.apache.zookeeper=INFO

# General broker logging
log4j.logger.kafka=INFO
log4j.logger.org.apache.kafka=INFO
"#;

// ── Generators ────────────────────────────────────────────────────

/// Render the config files of every broker, in ordinal order.
///
/// `zk_servers` is the ZooKeeper connection string the brokers join.
pub fn gen_replica_configs(
    target: &CatalogTarget<'_>,
    service: &str,
    opts: &KafkaOptions,
    zk_servers: &str,
) -> Vec<ReplicaConfig> {
    let quorum = QuorumParams::for_replicas(opts.replicas, QUORUM_DEFAULTS);
    debug!(
        %service,
        replicas = opts.replicas,
        replication_factor = quorum.replication_factor,
        partitions = quorum.partitions,
        "rendering kafka replica configs"
    );

    plan_members(service, target.domain, opts.replicas, target.zones)
        .into_iter()
        .map(|slot| {
            let sys = SysConfig {
                platform: target.platform,
                member_dns: &slot.dns_name,
            };
            let server = ServerProperties {
                broker_id: slot.index,
                rack: &slot.zone,
                delete_topic_enable: opts.allow_topic_del,
                partitions: quorum.partitions,
                bind: bind_address(target.platform, &slot.dns_name),
                advertised: &slot.dns_name,
                replication_factor: quorum.replication_factor,
                min_insync_replicas: quorum.min_insync_replicas,
                retention_hours: opts.retention_hours,
                zk_connect: zk_servers,
            };
            let java_env = JavaEnv {
                heap_size_mb: opts.heap_size_mb,
            };

            ReplicaConfig {
                configs: vec![
                    sys.to_file(),
                    server.to_file(),
                    java_env.to_file(),
                    static_file(LOG_CONFIG_FILE, LOG_CONFIG),
                ],
                zone: slot.zone,
                member_name: slot.member_name,
            }
        })
        .collect()
}

/// Build the default create request of a Kafka service.
///
/// `zk_attr` is the stored ZooKeeper service the brokers depend on.
pub fn gen_default_create_service_request(
    target: &CatalogTarget<'_>,
    service: &str,
    opts: &KafkaOptions,
    res: &Resources,
    zk_attr: &ServiceAttr,
) -> CatalogResult<CreateServiceRequest> {
    let zk_servers = connection_string(zk_attr, zookeeper::CLIENT_PORT);
    let replica_configs = gen_replica_configs(target, service, opts, &zk_servers);

    let port_mappings = vec![PortMapping {
        container_port: LISTEN_PORT,
        host_port: LISTEN_PORT,
        is_service_port: true,
    }];

    let user_attr = KafkaUserAttr {
        heap_size_mb: opts.heap_size_mb,
        allow_topic_del: opts.allow_topic_del,
        retention_hours: opts.retention_hours,
        zk_service_name: opts.zk_service_name.clone(),
    };
    let attr_bytes = serde_json::to_vec(&user_attr).map_err(|e| {
        error!(%service, error = %e, "failed to encode kafka user attr");
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
            service_type: CatalogService::Kafka,
            attr_bytes,
        }),
    })
}
