//! ECS backend.
//!
//! Services run from task definitions registered under the family
//! `{cluster}-{service}`; one-off tasks use `{cluster}-{service}-{task_type}`.
//! Containers use host networking, so every replica is reachable on its
//! host's address under the member DNS name.

pub mod api;
mod local;

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use keel_core::PlatformKind;
use keel_core::naming::{task_definition_family, task_family_for_task};
use keel_core::types::Placement;

use crate::context::Context;
use crate::error::{ContainerError, ContainerResult};
use crate::platform::ContainerPlatform;
use crate::taskdef::{ReusePolicy, deregister_family, ensure_task_definition};
use crate::types::{
    CreateServiceOptions, RunTaskOptions, TaskDefinition, TaskDefinitionId, TaskDefinitionSpec,
    TaskStatus,
};

pub use api::{EcsApi, EcsApiError, EcsErrorCode};
pub use local::LocalEcs;

use api::*;

/// Docker label carrying the spec digest a revision was registered from.
pub const SPEC_DIGEST_LABEL: &str = "keel.spec-digest";
/// Name of the task definition volume backing the data mount.
pub const DATA_VOLUME_NAME: &str = "keel-data";
/// Container instance attribute holding the availability zone.
pub const ZONE_ATTRIBUTE: &str = "attribute:ecs.availability-zone";

const STOP_REASON: &str = "stopped by keel";

fn map_err(op: &'static str, err: EcsApiError) -> ContainerError {
    match err.code {
        EcsErrorCode::ClusterNotFoundException | EcsErrorCode::ServiceNotFoundException => {
            ContainerError::NotFound(err.message)
        }
        code => ContainerError::Platform {
            platform: PlatformKind::Ecs,
            op: op.to_string(),
            message: err.to_string(),
            retryable: code.is_retryable(),
        },
    }
}

/// `memberOf` constraint pinning tasks to the listed zones.
pub fn placement_constraints(place: Option<&Placement>) -> Vec<PlacementConstraint> {
    place
        .map(|p| {
            vec![PlacementConstraint {
                kind: "memberOf".to_string(),
                expression: Some(format!("{ZONE_ATTRIBUTE} in [{}]", p.zones.join(", "))),
            }]
        })
        .unwrap_or_default()
}

fn register_input(family: &str, spec: &TaskDefinitionSpec) -> ContainerResult<RegisterTaskDefinitionInput> {
    let digest = spec.digest()?;
    let r = &spec.resource;
    let container = ContainerDefinition {
        name: spec.container_name.clone(),
        image: spec.image.clone(),
        cpu: r.reserve_cpu_units,
        memory: (r.max_mem_mb != 0).then_some(r.max_mem_mb),
        memory_reservation: r.reserve_mem_mb,
        essential: true,
        port_mappings: spec
            .port_mappings
            .iter()
            .map(|p| EcsPortMapping {
                container_port: p.container_port,
                host_port: p.host_port,
                protocol: "tcp".to_string(),
            })
            .collect(),
        mount_points: spec
            .data_volume
            .iter()
            .map(|v| MountPoint {
                source_volume: DATA_VOLUME_NAME.to_string(),
                container_path: v.mount_path.clone(),
                read_only: false,
            })
            .collect(),
        environment: spec
            .env
            .iter()
            .map(|(name, value)| KeyValuePair {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
        docker_labels: BTreeMap::from([(SPEC_DIGEST_LABEL.to_string(), digest)]),
        log_configuration: LogConfiguration {
            log_driver: spec.log_config.driver.clone(),
            options: spec.log_config.options.clone(),
        },
    };
    let volumes = spec
        .data_volume
        .iter()
        .map(|v| Volume {
            name: DATA_VOLUME_NAME.to_string(),
            host_source_path: v.host_path.clone(),
        })
        .collect();

    Ok(RegisterTaskDefinitionInput {
        family: family.to_string(),
        network_mode: NETWORK_MODE_HOST.to_string(),
        container_definitions: vec![container],
        volumes,
    })
}

fn to_task_definition(td: &EcsTaskDefinition) -> TaskDefinition {
    TaskDefinition {
        id: TaskDefinitionId::new(&td.family, td.revision),
        spec_digest: td
            .container_definitions
            .first()
            .and_then(|c| c.docker_labels.get(SPEC_DIGEST_LABEL).cloned()),
    }
}

fn id_from_arn(arn: &str) -> ContainerResult<TaskDefinitionId> {
    let name = arn.rsplit_once("task-definition/").map_or(arn, |(_, name)| name);
    name.parse()
}

fn to_task_status(task: &EcsTask) -> TaskStatus {
    match task.last_status.as_str() {
        TASK_RUNNING => TaskStatus::Running,
        TASK_STOPPED => TaskStatus::Stopped {
            reason: task.stopped_reason.clone().unwrap_or_default(),
        },
        _ => TaskStatus::Pending,
    }
}

pub struct EcsPlatform<A> {
    api: A,
    reuse_policy: ReusePolicy,
}

impl<A: EcsApi> EcsPlatform<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            reuse_policy: ReusePolicy::default(),
        }
    }

    pub fn with_reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    async fn call<T, F>(&self, ctx: &Context, op: &'static str, fut: F) -> ContainerResult<T>
    where
        F: Future<Output = EcsApiResult<T>>,
    {
        ctx.run(op, async move { fut.await.map_err(|e| map_err(op, e)) })
            .await
    }
}

#[async_trait]
impl<A: EcsApi> ContainerPlatform for EcsPlatform<A> {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Ecs
    }

    async fn create_cluster(&self, ctx: &Context, cluster: &str) -> ContainerResult<()> {
        let c = self
            .call(ctx, "create_cluster", self.api.create_cluster(cluster))
            .await?;
        info!(%cluster, arn = %c.cluster_arn, "created ecs cluster");
        Ok(())
    }

    async fn delete_cluster(&self, ctx: &Context, cluster: &str) -> ContainerResult<()> {
        self.call(ctx, "delete_cluster", self.api.delete_cluster(cluster))
            .await?;
        info!(%cluster, "deleted ecs cluster");
        Ok(())
    }

    async fn is_service_exist(
        &self,
        ctx: &Context,
        cluster: &str,
        service: &str,
    ) -> ContainerResult<bool> {
        let names = [service.to_string()];
        match self
            .call(ctx, "describe_services", self.api.describe_services(cluster, &names))
            .await
        {
            Ok(services) => Ok(services
                .iter()
                .any(|s| s.service_name == service && s.status != STATUS_INACTIVE)),
            Err(ContainerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_service(&self, ctx: &Context, opts: &CreateServiceOptions) -> ContainerResult<()> {
        opts.validate()?;
        let cluster = &opts.common.cluster;
        let service = &opts.common.service_name;

        if self.is_service_exist(ctx, cluster, service).await? {
            return Err(ContainerError::AlreadyExists(format!("service {cluster}/{service}")));
        }

        let family = task_definition_family(cluster, service);
        let spec = TaskDefinitionSpec::for_service(opts);
        let (task_def, existed) =
            ensure_task_definition(self, ctx, &family, &spec, self.reuse_policy).await?;

        let input = CreateServiceInput {
            cluster: cluster.clone(),
            service_name: service.clone(),
            task_definition: task_def.to_string(),
            desired_count: opts.replicas,
            placement_constraints: placement_constraints(opts.place.as_ref()),
        };
        match self
            .call(ctx, "create_service", self.api.create_service(input))
            .await
        {
            Ok(svc) => {
                info!(
                    %cluster,
                    %service,
                    task_definition = %task_def,
                    replicas = svc.desired_count,
                    "created ecs service"
                );
                Ok(())
            }
            Err(e) if !existed => {
                warn!(%cluster, %service, task_definition = %task_def, error = %e,
                    "service creation failed after registering task definition");
                Err(ContainerError::Partial {
                    created: task_def,
                    source: Box::new(e),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn scale_service(
        &self,
        ctx: &Context,
        cluster: &str,
        service: &str,
        replicas: u32,
    ) -> ContainerResult<()> {
        self.call(
            ctx,
            "update_service",
            self.api.update_service(cluster, service, replicas),
        )
        .await?;
        info!(%cluster, %service, replicas, "scaled ecs service");
        Ok(())
    }

    async fn delete_service(&self, ctx: &Context, cluster: &str, service: &str) -> ContainerResult<()> {
        if !self.is_service_exist(ctx, cluster, service).await? {
            return Err(ContainerError::NotFound(format!("service {cluster}/{service}")));
        }

        // ECS refuses to delete a service that still has desired tasks.
        self.call(ctx, "update_service", self.api.update_service(cluster, service, 0))
            .await?;
        self.call(ctx, "delete_service", self.api.delete_service(cluster, service))
            .await?;

        let family = task_definition_family(cluster, service);
        let removed = deregister_family(self, ctx, &family).await?;
        info!(%cluster, %service, revisions = removed, "deleted ecs service");
        Ok(())
    }

    async fn run_task(&self, ctx: &Context, opts: &RunTaskOptions) -> ContainerResult<String> {
        opts.validate()?;
        let cluster = &opts.common.cluster;
        let family = task_family_for_task(cluster, &opts.common.service_name, &opts.task_type);
        let spec = TaskDefinitionSpec::for_task(opts);
        let (task_def, _) =
            ensure_task_definition(self, ctx, &family, &spec, self.reuse_policy).await?;

        let input = RunTaskInput {
            cluster: cluster.clone(),
            task_definition: task_def.to_string(),
            started_by: family.clone(),
        };
        let task = self.call(ctx, "run_task", self.api.run_task(input)).await?;
        info!(%cluster, task = %task.task_arn, task_definition = %task_def, "started ecs task");
        Ok(task.task_arn)
    }

    async fn task_status(&self, ctx: &Context, cluster: &str, task_id: &str) -> ContainerResult<TaskStatus> {
        let ids = [task_id.to_string()];
        let tasks = self
            .call(ctx, "describe_tasks", self.api.describe_tasks(cluster, &ids))
            .await?;
        let task = tasks
            .iter()
            .find(|t| t.task_arn == task_id)
            .ok_or_else(|| ContainerError::NotFound(format!("task {task_id}")))?;
        Ok(to_task_status(task))
    }

    async fn delete_task(
        &self,
        ctx: &Context,
        cluster: &str,
        service: &str,
        task_type: &str,
    ) -> ContainerResult<()> {
        let family = task_family_for_task(cluster, service, task_type);
        let running = self
            .call(ctx, "list_tasks", self.api.list_tasks(cluster, &family))
            .await?;
        for task in &running {
            self.call(ctx, "stop_task", self.api.stop_task(cluster, task, STOP_REASON))
                .await?;
            debug!(%cluster, %task, "stopped ecs task");
        }
        let removed = deregister_family(self, ctx, &family).await?;
        info!(%cluster, %service, %task_type, stopped = running.len(), revisions = removed,
            "deleted ecs task");
        Ok(())
    }

    async fn is_task_definition_family_exist(&self, ctx: &Context, family: &str) -> ContainerResult<bool> {
        let families = self
            .call(
                ctx,
                "list_task_definition_families",
                self.api.list_task_definition_families(family),
            )
            .await?;
        Ok(families.iter().any(|f| f == family))
    }

    async fn is_task_definition_exist(&self, ctx: &Context, id: &TaskDefinitionId) -> ContainerResult<bool> {
        let op = "describe_task_definition";
        let name = id.to_string();
        ctx.run(op, async {
            match self.api.describe_task_definition(&name).await {
                Ok(td) => Ok(td.status == STATUS_ACTIVE),
                Err(e) if e.code == EcsErrorCode::ClientException => Ok(false),
                Err(e) => Err(map_err(op, e)),
            }
        })
        .await
    }

    async fn latest_task_definition(&self, ctx: &Context, family: &str) -> ContainerResult<TaskDefinition> {
        let op = "describe_task_definition";
        ctx.run(op, async {
            match self.api.describe_task_definition(family).await {
                Ok(td) => Ok(to_task_definition(&td)),
                Err(e) if e.code == EcsErrorCode::ClientException => {
                    Err(ContainerError::NotFound(format!("task definition family {family}")))
                }
                Err(e) => Err(map_err(op, e)),
            }
        })
        .await
    }

    async fn list_task_definition_revisions(
        &self,
        ctx: &Context,
        family: &str,
    ) -> ContainerResult<Vec<TaskDefinitionId>> {
        let arns = self
            .call(ctx, "list_task_definitions", self.api.list_task_definitions(family))
            .await?;
        let mut ids = arns
            .iter()
            .map(|arn| id_from_arn(arn))
            .collect::<ContainerResult<Vec<_>>>()?;
        ids.sort_by_key(|id| id.revision);
        Ok(ids)
    }

    async fn register_task_definition(
        &self,
        ctx: &Context,
        family: &str,
        spec: &TaskDefinitionSpec,
    ) -> ContainerResult<TaskDefinitionId> {
        let input = register_input(family, spec)?;
        let td = self
            .call(
                ctx,
                "register_task_definition",
                self.api.register_task_definition(input),
            )
            .await?;
        Ok(TaskDefinitionId::new(td.family, td.revision))
    }

    async fn deregister_task_definition(&self, ctx: &Context, id: &TaskDefinitionId) -> ContainerResult<()> {
        let op = "deregister_task_definition";
        let name = id.to_string();
        ctx.run(op, async {
            match self.api.deregister_task_definition(&name).await {
                Ok(_) => Ok(()),
                Err(e) if e.code == EcsErrorCode::ClientException => {
                    Err(ContainerError::NotFound(format!("task definition {id}")))
                }
                Err(e) => Err(map_err(op, e)),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::{common, service_opts};
    use crate::types::{TASK_TYPE_INIT, VolumeOptions};

    async fn platform_with_cluster(cluster: &str) -> (EcsPlatform<LocalEcs>, Context) {
        let ecs = EcsPlatform::new(LocalEcs::new());
        let ctx = Context::background();
        ecs.create_cluster(&ctx, cluster).await.unwrap();
        (ecs, ctx)
    }

    async fn create_and_delete(opts: CreateServiceOptions) {
        let cluster = opts.common.cluster.clone();
        let service = opts.common.service_name.clone();
        let (ecs, ctx) = platform_with_cluster(&cluster).await;

        assert!(!ecs.is_service_exist(&ctx, &cluster, &service).await.unwrap());
        ecs.create_service(&ctx, &opts).await.unwrap();
        assert!(ecs.is_service_exist(&ctx, &cluster, &service).await.unwrap());

        let family = task_definition_family(&cluster, &service);
        assert!(ecs.is_task_definition_family_exist(&ctx, &family).await.unwrap());

        ecs.delete_service(&ctx, &cluster, &service).await.unwrap();
        assert!(!ecs.is_service_exist(&ctx, &cluster, &service).await.unwrap());
        assert!(!ecs.is_task_definition_family_exist(&ctx, &family).await.unwrap());

        ecs.delete_cluster(&ctx, &cluster).await.unwrap();
    }

    #[tokio::test]
    async fn service_with_zero_replicas() {
        let mut opts = service_opts("cluster1", "service1");
        opts.replicas = 0;
        create_and_delete(opts).await;
    }

    #[tokio::test]
    async fn service_with_volume() {
        let mut opts = service_opts("cluster2", "service2");
        opts.data_volume = Some(VolumeOptions {
            mount_path: "/data".into(),
        });
        create_and_delete(opts).await;
    }

    #[tokio::test]
    async fn service_with_placement() {
        let mut opts = service_opts("cluster3", "service3");
        opts.replicas = 3;
        opts.place = Some(Placement {
            zones: vec!["us-east-1a".into(), "us-east-1b".into()],
        });
        create_and_delete(opts).await;
    }

    #[tokio::test]
    async fn native_shape_of_service() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        let mut opts = service_opts("c1", "zk1");
        opts.replicas = 3;
        opts.common.resource.max_mem_mb = 4096;
        opts.common.resource.reserve_mem_mb = 4096;
        opts.data_volume = Some(VolumeOptions {
            mount_path: "/data".into(),
        });
        opts.place = Some(Placement {
            zones: vec!["az1".into(), "az2".into()],
        });
        ecs.create_service(&ctx, &opts).await.unwrap();

        let svc = &ecs.api().services("c1").await[0];
        assert_eq!(svc.desired_count, 3);
        assert_eq!(
            svc.placement_constraints[0].expression.as_deref(),
            Some("attribute:ecs.availability-zone in [az1, az2]")
        );

        let td = &ecs.api().revisions("c1-zk1").await[0];
        assert_eq!(td.network_mode, NETWORK_MODE_HOST);
        let c = &td.container_definitions[0];
        assert_eq!(c.memory, Some(4096));
        assert_eq!(c.memory_reservation, 4096);
        assert_eq!(c.mount_points[0].container_path, "/data");
        assert_eq!(td.volumes[0].host_source_path, "/mnt/zk1-uuid");
        assert_eq!(c.port_mappings[0].host_port, 2181);
        assert!(c.docker_labels.contains_key(SPEC_DIGEST_LABEL));
    }

    #[tokio::test]
    async fn create_existing_service_fails() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        let opts = service_opts("c1", "zk1");
        ecs.create_service(&ctx, &opts).await.unwrap();
        let err = ecs.create_service(&ctx, &opts).await.unwrap_err();
        assert!(matches!(err, ContainerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn recreate_reuses_task_definition() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        let opts = service_opts("c1", "zk1");
        ecs.create_service(&ctx, &opts).await.unwrap();

        // Delete only the service, leaving the family behind.
        ecs.api().update_service("c1", "zk1", 0).await.unwrap();
        ecs.api().delete_service("c1", "zk1").await.unwrap();

        ecs.create_service(&ctx, &opts).await.unwrap();
        assert_eq!(ecs.api().revisions("c1-zk1").await.len(), 1);
    }

    #[tokio::test]
    async fn failed_service_after_register_is_partial() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        ecs.api()
            .fail_next(
                "create_service",
                EcsApiError::new(EcsErrorCode::ServerException, "internal failure"),
            )
            .await;

        let err = ecs
            .create_service(&ctx, &service_opts("c1", "zk1"))
            .await
            .unwrap_err();
        match &err {
            ContainerError::Partial { created, source } => {
                assert_eq!(*created, TaskDefinitionId::new("c1-zk1", 1));
                assert!(matches!(**source, ContainerError::Platform { retryable: true, .. }));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert!(err.is_retryable());
        assert!(!ecs.is_service_exist(&ctx, "c1", "zk1").await.unwrap());
    }

    #[tokio::test]
    async fn failed_service_with_reused_definition_is_plain() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        let opts = service_opts("c1", "zk1");
        let spec = TaskDefinitionSpec::for_service(&opts);
        ecs.register_task_definition(&ctx, "c1-zk1", &spec).await.unwrap();
        ecs.api()
            .fail_next(
                "create_service",
                EcsApiError::new(EcsErrorCode::ClientException, "bad request"),
            )
            .await;

        let err = ecs.create_service(&ctx, &opts).await.unwrap_err();
        assert!(matches!(err, ContainerError::Platform { retryable: false, .. }));
    }

    #[tokio::test]
    async fn delete_missing_resources() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        let err = ecs.delete_service(&ctx, "c1", "nope").await.unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));

        let err = ecs.delete_cluster(&ctx, "nope").await.unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));

        assert!(!ecs.is_service_exist(&ctx, "nope", "zk1").await.unwrap());
    }

    #[tokio::test]
    async fn scale_service_updates_desired_count() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        ecs.create_service(&ctx, &service_opts("c1", "zk1")).await.unwrap();
        ecs.scale_service(&ctx, "c1", "zk1", 5).await.unwrap();
        assert_eq!(ecs.api().services("c1").await[0].desired_count, 5);

        let err = ecs.scale_service(&ctx, "c1", "nope", 1).await.unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));
    }

    #[tokio::test]
    async fn init_task_lifecycle() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        let opts = RunTaskOptions {
            common: common("c1", "kafka1"),
            task_type: TASK_TYPE_INIT.into(),
            env: BTreeMap::new(),
        };
        let task = ecs.run_task(&ctx, &opts).await.unwrap();
        assert_eq!(ecs.task_status(&ctx, "c1", &task).await.unwrap(), TaskStatus::Running);
        assert!(
            ecs.is_task_definition_family_exist(&ctx, "c1-kafka1-init")
                .await
                .unwrap()
        );

        ecs.delete_task(&ctx, "c1", "kafka1", TASK_TYPE_INIT).await.unwrap();
        let status = ecs.task_status(&ctx, "c1", &task).await.unwrap();
        assert!(status.is_done());
        assert!(
            !ecs.is_task_definition_family_exist(&ctx, "c1-kafka1-init")
                .await
                .unwrap()
        );

        let err = ecs.task_status(&ctx, "c1", "arn:unknown").await.unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));
    }

    #[tokio::test]
    async fn throttling_maps_to_retryable() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        ecs.api()
            .fail_next(
                "list_task_definition_families",
                EcsApiError::new(EcsErrorCode::ThrottlingException, "Rate exceeded"),
            )
            .await;
        let err = ecs
            .is_task_definition_family_exist(&ctx, "c1-zk1")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn latest_of_unknown_family_is_not_found() {
        let (ecs, ctx) = platform_with_cluster("c1").await;
        let err = ecs.latest_task_definition(&ctx, "nope").await.unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));

        let err = ecs
            .deregister_task_definition(&ctx, &TaskDefinitionId::new("nope", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::NotFound(_)));
    }

    #[test]
    fn no_placement_means_no_constraint() {
        assert!(placement_constraints(None).is_empty());
    }
}
