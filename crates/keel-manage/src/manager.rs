//! Service manager: plan, render, persist and deploy catalog services.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use keel_catalog::{CatalogTarget, kafka, zookeeper};
use keel_container::{
    CommonOptions, ContainerError, ContainerPlatform, Context, CreateServiceOptions, LogConfig,
    VolumeOptions,
};
use keel_core::{
    CreateServiceRequest, KeelConfig, Placement, Resources, ServiceAttr, ServiceStatus,
    ServiceVolumes, naming,
};
use keel_state::{StateError, StateStore, store::epoch_nanos};

use crate::error::{ManageError, ManageResult};

/// Device every service's primary volume is attached as.
pub const PRIMARY_DEVICE_NAME: &str = "/dev/xvdf";

/// Longest service name that still forms a valid DNS label with a member ordinal.
const MAX_SERVICE_NAME_LEN: usize = 48;

/// Time allowed for rolling back a failed create, independent of the caller's context.
const COMPENSATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster-wide inputs of the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub cluster: String,
    pub region: String,
    pub zones: Vec<String>,
    pub domain: String,
    pub hosted_zone_id: String,
    pub defaults: Resources,
}

impl ManagerConfig {
    pub fn from_config(config: &KeelConfig) -> Self {
        Self {
            cluster: config.cluster.name.clone(),
            region: config.cluster.region.clone(),
            zones: config.cluster.zones.clone(),
            domain: config.domain(),
            hosted_zone_id: String::new(),
            defaults: config.default_resources(),
        }
    }
}

pub struct ServiceManager {
    config: ManagerConfig,
    store: StateStore,
    platform: Arc<dyn ContainerPlatform>,
}

impl ServiceManager {
    pub fn new(config: ManagerConfig, store: StateStore, platform: Arc<dyn ContainerPlatform>) -> Self {
        Self {
            config,
            store,
            platform,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn target(&self) -> CatalogTarget<'_> {
        CatalogTarget {
            platform: self.platform.platform(),
            region: &self.config.region,
            cluster: &self.config.cluster,
            domain: &self.config.domain,
            zones: &self.config.zones,
        }
    }

    fn validate(&self, service: &str, replicas: u32) -> ManageResult<()> {
        if self.config.cluster.is_empty() {
            return Err(ManageError::Validation("cluster name is empty".into()));
        }
        if self.config.zones.is_empty() {
            return Err(ManageError::Validation("cluster has no availability zones".into()));
        }
        validate_service_name(service)?;
        if replicas == 0 {
            return Err(ManageError::Validation("replicas must be at least 1".into()));
        }
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn get_service(&self, service: &str) -> ManageResult<ServiceAttr> {
        Ok(self.store.get_service_attr(&self.config.cluster, service)?)
    }

    pub fn list_services(&self) -> ManageResult<Vec<ServiceAttr>> {
        Ok(self.store.list_services(&self.config.cluster)?)
    }

    // ── Catalog services ──────────────────────────────────────────

    /// Create a ZooKeeper ensemble.
    pub async fn create_zookeeper_service(
        &self,
        ctx: &Context,
        service: &str,
        opts: &zookeeper::ZkOptions,
    ) -> ManageResult<ServiceAttr> {
        self.validate(service, opts.replicas)?;
        opts.validate()?;

        let req =
            zookeeper::gen_default_create_service_request(&self.target(), service, opts, &self.config.defaults)?;
        self.create_service(ctx, req).await
    }

    /// Create a Kafka cluster on top of an active ZooKeeper service.
    pub async fn create_kafka_service(
        &self,
        ctx: &Context,
        service: &str,
        opts: &kafka::KafkaOptions,
    ) -> ManageResult<ServiceAttr> {
        self.validate(service, opts.replicas)?;
        opts.validate()?;

        let zk_attr = self.active_dependency(&opts.zk_service_name)?;
        let req = kafka::gen_default_create_service_request(
            &self.target(),
            service,
            opts,
            &self.config.defaults,
            &zk_attr,
        )?;
        self.create_service(ctx, req).await
    }

    fn active_dependency(&self, name: &str) -> ManageResult<ServiceAttr> {
        let attr = match self.store.get_service_attr(&self.config.cluster, name) {
            Ok(attr) => attr,
            Err(StateError::NotFound(_)) => {
                return Err(ManageError::DependencyNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if attr.status != ServiceStatus::Active {
            return Err(ManageError::DependencyNotActive {
                name: name.to_string(),
                status: attr.status,
            });
        }
        Ok(attr)
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Persist the request and bring the container service up.
    ///
    /// A record left in `Creating` by an earlier failed attempt is
    /// resumed with its original uuid. The retry must describe the same
    /// service as the stored record and replica configs.
    async fn create_service(&self, ctx: &Context, req: CreateServiceRequest) -> ManageResult<ServiceAttr> {
        let cluster = req.service.cluster.clone();
        let service = req.service.service_name.clone();

        let attr = match self.store.get_service_attr(&cluster, &service) {
            Ok(existing) if existing.status == ServiceStatus::Creating => {
                self.check_resume(&existing, &req)?;
                info!(%cluster, %service, uuid = %existing.service_uuid, "resuming service creation");
                existing
            }
            Ok(_) => {
                return Err(StateError::AlreadyExists(keel_core::service_key(&cluster, &service)).into());
            }
            Err(StateError::NotFound(_)) => {
                let attr = self.new_service_attr(&req);
                self.store.create_service(&attr, &req.replica_configs)?;
                debug!(%cluster, %service, uuid = %attr.service_uuid, "service recorded");
                attr
            }
            Err(e) => return Err(e.into()),
        };

        let opts = self.service_options(&attr, &req);
        if self.platform.is_service_exist(ctx, &cluster, &service).await? {
            debug!(%cluster, %service, "container service already exists");
        } else if let Err(e) = self.platform.create_service(ctx, &opts).await {
            self.compensate(&e).await;
            error!(%cluster, %service, error = %e, "failed to create container service");
            return Err(e.into());
        }

        let attr = self
            .store
            .update_service_status(&cluster, &service, ServiceStatus::Active)?;
        info!(
            %cluster,
            %service,
            uuid = %attr.service_uuid,
            replicas = attr.replicas,
            platform = %self.platform.platform(),
            "service created"
        );
        Ok(attr)
    }

    /// Reject a retry whose request differs from the record being resumed.
    fn check_resume(&self, stored: &ServiceAttr, req: &CreateServiceRequest) -> ManageResult<()> {
        let service = &stored.service_name;
        let mismatch = if stored.replicas != req.replicas {
            Some(format!("replicas {} != {}", req.replicas, stored.replicas))
        } else if stored.resources != req.resource {
            Some("resources".to_string())
        } else if stored.volumes.primary_volume != req.volume {
            Some("volume".to_string())
        } else if stored.register_dns != req.register_dns {
            Some("register_dns".to_string())
        } else if stored.user_attr != req.user_attr {
            Some("service attributes".to_string())
        } else if self.store.list_replica_configs(&stored.service_uuid)? != req.replica_configs {
            Some("replica configs".to_string())
        } else {
            None
        };
        match mismatch {
            Some(what) => {
                warn!(%service, uuid = %stored.service_uuid, %what, "retry differs from pending create");
                Err(ManageError::Validation(format!(
                    "service {service} is being created with different settings: {what}"
                )))
            }
            None => Ok(()),
        }
    }

    /// Roll back a task definition registered by a create that then failed.
    ///
    /// Runs on its own context: the caller's may be the reason the create failed.
    async fn compensate(&self, err: &ContainerError) {
        let ContainerError::Partial { created, .. } = err else {
            return;
        };
        let ctx = Context::with_timeout(COMPENSATE_TIMEOUT);
        match self.platform.deregister_task_definition(&ctx, created).await {
            Ok(()) => info!(task_definition = %created, "rolled back task definition"),
            Err(e) => warn!(task_definition = %created, error = %e,
                "failed to roll back task definition"),
        }
    }

    fn new_service_attr(&self, req: &CreateServiceRequest) -> ServiceAttr {
        ServiceAttr {
            service_uuid: naming::service_uuid(),
            status: ServiceStatus::Creating,
            last_modified: epoch_nanos(),
            replicas: req.replicas,
            cluster: req.service.cluster.clone(),
            service_name: req.service.service_name.clone(),
            volumes: ServiceVolumes {
                primary_device_name: PRIMARY_DEVICE_NAME.to_string(),
                primary_volume: req.volume.clone(),
            },
            register_dns: req.register_dns,
            domain_name: self.config.domain.clone(),
            hosted_zone_id: self.config.hosted_zone_id.clone(),
            resources: req.resource,
            user_attr: req.user_attr.clone(),
        }
    }

    fn service_options(&self, attr: &ServiceAttr, req: &CreateServiceRequest) -> CreateServiceOptions {
        CreateServiceOptions {
            common: CommonOptions {
                cluster: attr.cluster.clone(),
                service_name: attr.service_name.clone(),
                service_uuid: attr.service_uuid.clone(),
                container_image: req.container_image.clone(),
                resource: req.resource,
                log_config: LogConfig::json_file(),
            },
            replicas: req.replicas,
            port_mappings: req.port_mappings.clone(),
            place: Some(Placement {
                zones: self.config.zones.clone(),
            }),
            data_volume: Some(VolumeOptions {
                mount_path: req.container_path.clone(),
            }),
            env: BTreeMap::new(),
        }
    }

    /// Tear a service down and forget it.
    ///
    /// The record is marked `Deleting` first, so a delete interrupted
    /// after the container service is gone can simply be re-run.
    pub async fn delete_service(&self, ctx: &Context, service: &str) -> ManageResult<()> {
        let cluster = self.config.cluster.clone();
        let attr = self
            .store
            .update_service_status(&cluster, service, ServiceStatus::Deleting)?;

        match self.platform.delete_service(ctx, &cluster, service).await {
            Ok(()) => {}
            Err(ContainerError::NotFound(_)) => {
                debug!(%cluster, %service, "container service already gone");
            }
            Err(e) => {
                error!(%cluster, %service, error = %e, "failed to delete container service");
                return Err(e.into());
            }
        }

        self.store.delete_service(&cluster, service)?;
        info!(%cluster, %service, uuid = %attr.service_uuid, "service deleted");
        Ok(())
    }
}

/// Service names become DNS labels: lowercase letters, digits and `-`.
fn validate_service_name(service: &str) -> ManageResult<()> {
    if service.is_empty() {
        return Err(ManageError::Validation("service name is empty".into()));
    }
    if service.len() > MAX_SERVICE_NAME_LEN {
        return Err(ManageError::Validation(format!(
            "service name longer than {MAX_SERVICE_NAME_LEN} characters: {service}"
        )));
    }
    let valid = service
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid || service.starts_with('-') || service.ends_with('-') {
        return Err(ManageError::Validation(format!("invalid service name: {service}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_names() {
        assert!(validate_service_name("zk1").is_ok());
        assert!(validate_service_name("kafka-prod-2").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("Kafka").is_err());
        assert!(validate_service_name("-zk").is_err());
        assert!(validate_service_name("zk_1").is_err());
        assert!(validate_service_name(&"a".repeat(49)).is_err());
    }

    #[test]
    fn config_from_keel_toml() {
        let config = KeelConfig::scaffold("c1", "us-east-1", &["us-east-1a"]);
        let mc = ManagerConfig::from_config(&config);
        assert_eq!(mc.domain, "c1-keel.com");
        assert_eq!(mc.zones, vec!["us-east-1a".to_string()]);
        assert_eq!(mc.defaults, Resources::default());
    }
}
