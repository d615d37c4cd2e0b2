//! Docker swarm backend.
//!
//! A swarm hosts exactly one keel cluster, so the swarm itself is the
//! cluster and cannot be created or deleted from here. Swarm has no task
//! definitions: every container spec travels inline with its service.

pub mod api;
mod local;

use std::future::Future;

use async_trait::async_trait;
use tracing::info;

use keel_core::{PlatformKind, Resources};

use crate::context::Context;
use crate::error::{ContainerError, ContainerResult};
use crate::platform::ContainerPlatform;
use crate::types::{
    CommonOptions, CreateServiceOptions, RunTaskOptions, TaskDefinition, TaskDefinitionId,
    TaskDefinitionSpec, TaskStatus,
};

pub use api::{SwarmApi, SwarmApiError};
pub use local::LocalSwarm;

use api::*;

pub const LABEL_CLUSTER: &str = "keel.cluster";
pub const LABEL_SERVICE_UUID: &str = "keel.service-uuid";
pub const LABEL_TASK_TYPE: &str = "keel.task-type";
/// Node label holding a node's availability zone.
pub const ZONE_NODE_LABEL: &str = "node.labels.keel.zone";

const NANO_CPUS_PER_UNIT: u64 = 1_000_000_000 / 1024;
const BYTES_PER_MB: u64 = 1024 * 1024;

fn map_err(op: &'static str, err: SwarmApiError) -> ContainerError {
    if err.is_not_found() {
        ContainerError::NotFound(err.message)
    } else if err.is_conflict() {
        ContainerError::AlreadyExists(err.message)
    } else {
        ContainerError::Platform {
            platform: PlatformKind::Swarm,
            op: op.to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

fn resources(r: &Resources) -> ResourceRequirements {
    let limits = (r.max_cpu_units != 0 || r.max_mem_mb != 0).then(|| ResourceSpec {
        nano_cpus: r.max_cpu_units * NANO_CPUS_PER_UNIT,
        memory_bytes: r.max_mem_mb * BYTES_PER_MB,
    });
    ResourceRequirements {
        limits,
        reservations: ResourceSpec {
            nano_cpus: r.reserve_cpu_units * NANO_CPUS_PER_UNIT,
            memory_bytes: r.reserve_mem_mb * BYTES_PER_MB,
        },
    }
}

/// Swarm constraints cannot express "one of these zones": a single zone
/// becomes a hard constraint, several zones a spread preference.
pub fn placement(zones: &[String]) -> SwarmPlacement {
    match zones {
        [] => SwarmPlacement::default(),
        [zone] => SwarmPlacement {
            constraints: vec![format!("{ZONE_NODE_LABEL}=={zone}")],
            spread: Vec::new(),
        },
        _ => SwarmPlacement {
            constraints: Vec::new(),
            spread: vec![ZONE_NODE_LABEL.to_string()],
        },
    }
}

fn base_spec(name: String, common: &CommonOptions, spec: &TaskDefinitionSpec) -> ServiceSpec {
    ServiceSpec {
        name,
        labels: [
            (LABEL_CLUSTER.to_string(), common.cluster.clone()),
            (LABEL_SERVICE_UUID.to_string(), common.service_uuid.clone()),
        ]
        .into(),
        image: spec.image.clone(),
        env: spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
        mounts: spec
            .data_volume
            .iter()
            .map(|v| Mount {
                kind: MOUNT_BIND.to_string(),
                source: v.host_path.clone(),
                target: v.mount_path.clone(),
            })
            .collect(),
        resources: resources(&spec.resource),
        restart_condition: RESTART_ANY.to_string(),
        placement: SwarmPlacement::default(),
        log_driver: LogDriver {
            name: spec.log_config.driver.clone(),
            options: spec.log_config.options.clone(),
        },
        replicas: 1,
        publish_mode: PUBLISH_MODE_HOST.to_string(),
        ports: spec
            .port_mappings
            .iter()
            .map(|p| PortConfig {
                target_port: p.container_port,
                published_port: p.host_port,
            })
            .collect(),
    }
}

fn task_service_name(service: &str, task_type: &str) -> String {
    format!("{service}-{task_type}")
}

fn to_task_status(tasks: &[SwarmTask]) -> TaskStatus {
    // The newest attempt decides. Engine task ids are random, so order by creation.
    let Some(task) = tasks.iter().max_by_key(|t| t.created_at) else {
        return TaskStatus::Pending;
    };
    match task.state.as_str() {
        "running" => TaskStatus::Running,
        "complete" | "failed" | "shutdown" | "rejected" | "orphaned" | "remove" => {
            TaskStatus::Stopped {
                reason: task.err.clone().unwrap_or_else(|| task.state.clone()),
            }
        }
        _ => TaskStatus::Pending,
    }
}

pub struct SwarmPlatform<A> {
    api: A,
    cluster: String,
}

impl<A: SwarmApi> SwarmPlatform<A> {
    /// `cluster` is the keel cluster this swarm hosts.
    pub fn new(api: A, cluster: impl Into<String>) -> Self {
        Self {
            api,
            cluster: cluster.into(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn check_cluster(&self, cluster: &str) -> ContainerResult<()> {
        if cluster != self.cluster {
            return Err(ContainerError::Validation(format!(
                "this swarm hosts cluster {}, not {cluster}",
                self.cluster
            )));
        }
        Ok(())
    }

    fn unsupported<T>(op: &'static str) -> ContainerResult<T> {
        Err(ContainerError::Unsupported {
            platform: PlatformKind::Swarm,
            op,
        })
    }

    async fn call<T, F>(&self, ctx: &Context, op: &'static str, fut: F) -> ContainerResult<T>
    where
        F: Future<Output = SwarmApiResult<T>>,
    {
        ctx.run(op, async move { fut.await.map_err(|e| map_err(op, e)) })
            .await
    }

    /// Inspect a keel service of this cluster; `None` when absent.
    async fn inspect(&self, ctx: &Context, service: &str) -> ContainerResult<Option<SwarmService>> {
        match self
            .call(ctx, "service_inspect", self.api.service_inspect(service))
            .await
        {
            Ok(svc) if svc.spec.labels.get(LABEL_CLUSTER) == Some(&self.cluster) => Ok(Some(svc)),
            Ok(_) | Err(ContainerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<A: SwarmApi> ContainerPlatform for SwarmPlatform<A> {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Swarm
    }

    async fn create_cluster(&self, _ctx: &Context, _cluster: &str) -> ContainerResult<()> {
        Self::unsupported("create_cluster")
    }

    async fn delete_cluster(&self, _ctx: &Context, _cluster: &str) -> ContainerResult<()> {
        Self::unsupported("delete_cluster")
    }

    async fn is_service_exist(&self, ctx: &Context, cluster: &str, service: &str) -> ContainerResult<bool> {
        self.check_cluster(cluster)?;
        Ok(self.inspect(ctx, service).await?.is_some())
    }

    async fn create_service(&self, ctx: &Context, opts: &CreateServiceOptions) -> ContainerResult<()> {
        opts.validate()?;
        let cluster = &opts.common.cluster;
        let service = &opts.common.service_name;
        self.check_cluster(cluster)?;

        if self.inspect(ctx, service).await?.is_some() {
            return Err(ContainerError::AlreadyExists(format!("service {cluster}/{service}")));
        }

        let container = TaskDefinitionSpec::for_service(opts);
        let mut spec = base_spec(service.clone(), &opts.common, &container);
        spec.replicas = u64::from(opts.replicas);
        if let Some(place) = &opts.place {
            spec.placement = placement(&place.zones);
        }

        let id = self
            .call(ctx, "service_create", self.api.service_create(spec))
            .await?;
        info!(%cluster, %service, %id, replicas = opts.replicas, "created swarm service");
        Ok(())
    }

    async fn scale_service(
        &self,
        ctx: &Context,
        cluster: &str,
        service: &str,
        replicas: u32,
    ) -> ContainerResult<()> {
        self.check_cluster(cluster)?;
        let svc = self
            .inspect(ctx, service)
            .await?
            .ok_or_else(|| ContainerError::NotFound(format!("service {cluster}/{service}")))?;
        let mut spec = svc.spec;
        spec.replicas = u64::from(replicas);
        self.call(
            ctx,
            "service_update",
            self.api.service_update(service, svc.version, spec),
        )
        .await?;
        info!(%cluster, %service, replicas, "scaled swarm service");
        Ok(())
    }

    async fn delete_service(&self, ctx: &Context, cluster: &str, service: &str) -> ContainerResult<()> {
        self.check_cluster(cluster)?;
        if self.inspect(ctx, service).await?.is_none() {
            return Err(ContainerError::NotFound(format!("service {cluster}/{service}")));
        }
        self.call(ctx, "service_remove", self.api.service_remove(service))
            .await?;
        info!(%cluster, %service, "deleted swarm service");
        Ok(())
    }

    /// Runs the task as a one-replica service that is never restarted;
    /// the returned id is that service's name.
    async fn run_task(&self, ctx: &Context, opts: &RunTaskOptions) -> ContainerResult<String> {
        opts.validate()?;
        self.check_cluster(&opts.common.cluster)?;

        let name = task_service_name(&opts.common.service_name, &opts.task_type);
        let container = TaskDefinitionSpec::for_task(opts);
        let mut spec = base_spec(name.clone(), &opts.common, &container);
        spec.restart_condition = RESTART_NONE.to_string();
        spec.labels
            .insert(LABEL_TASK_TYPE.to_string(), opts.task_type.clone());

        self.call(ctx, "service_create", self.api.service_create(spec))
            .await?;
        info!(cluster = %opts.common.cluster, task = %name, "started swarm task");
        Ok(name)
    }

    async fn task_status(&self, ctx: &Context, cluster: &str, task_id: &str) -> ContainerResult<TaskStatus> {
        self.check_cluster(cluster)?;
        let tasks = self
            .call(ctx, "task_list", self.api.task_list(task_id))
            .await?;
        Ok(to_task_status(&tasks))
    }

    async fn delete_task(
        &self,
        ctx: &Context,
        cluster: &str,
        service: &str,
        task_type: &str,
    ) -> ContainerResult<()> {
        self.check_cluster(cluster)?;
        let name = task_service_name(service, task_type);
        match self
            .call(ctx, "service_remove", self.api.service_remove(&name))
            .await
        {
            Ok(()) => {
                info!(%cluster, task = %name, "deleted swarm task");
                Ok(())
            }
            Err(ContainerError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn is_task_definition_family_exist(&self, _ctx: &Context, _family: &str) -> ContainerResult<bool> {
        Self::unsupported("is_task_definition_family_exist")
    }

    async fn is_task_definition_exist(&self, _ctx: &Context, _id: &TaskDefinitionId) -> ContainerResult<bool> {
        Self::unsupported("is_task_definition_exist")
    }

    async fn latest_task_definition(&self, _ctx: &Context, _family: &str) -> ContainerResult<TaskDefinition> {
        Self::unsupported("latest_task_definition")
    }

    async fn list_task_definition_revisions(
        &self,
        _ctx: &Context,
        _family: &str,
    ) -> ContainerResult<Vec<TaskDefinitionId>> {
        Self::unsupported("list_task_definition_revisions")
    }

    async fn register_task_definition(
        &self,
        _ctx: &Context,
        _family: &str,
        _spec: &TaskDefinitionSpec,
    ) -> ContainerResult<TaskDefinitionId> {
        Self::unsupported("register_task_definition")
    }

    async fn deregister_task_definition(&self, _ctx: &Context, _id: &TaskDefinitionId) -> ContainerResult<()> {
        Self::unsupported("deregister_task_definition")
    }
}
