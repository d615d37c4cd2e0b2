//! End-to-end service creation against the in-process platforms.

use std::sync::Arc;

use keel_catalog::kafka::{self, KafkaOptions};
use keel_catalog::zookeeper::{self, ZkOptions};
use async_trait::async_trait;
use keel_container::ecs::api::*;
use keel_container::{
    ContainerError, ContainerPlatform, Context, EcsPlatform, LocalEcs, LocalSwarm, SwarmApi,
    SwarmPlatform,
};
use keel_core::{Resources, ServiceStatus, ServiceVolume, VolumeType};
use keel_manage::{ManageError, ManagerConfig, ServiceManager};
use keel_state::{StateError, StateStore};

fn config() -> ManagerConfig {
    ManagerConfig {
        cluster: "c1".to_string(),
        region: "us-east-1".to_string(),
        zones: vec!["us-east-1a".to_string(), "us-east-1b".to_string(), "us-east-1c".to_string()],
        domain: "c1-keel.com".to_string(),
        hosted_zone_id: "Z123".to_string(),
        defaults: Resources::default(),
    }
}

fn volume() -> ServiceVolume {
    ServiceVolume {
        volume_type: VolumeType::GpSsd,
        volume_size_gb: 10,
        iops: 0,
    }
}

fn zk_opts() -> ZkOptions {
    ZkOptions {
        replicas: 3,
        volume: volume(),
        heap_size_mb: 512,
    }
}

fn kafka_opts() -> KafkaOptions {
    KafkaOptions {
        replicas: 3,
        volume: volume(),
        heap_size_mb: 1024,
        allow_topic_del: true,
        retention_hours: 168,
        zk_service_name: "zk1".to_string(),
    }
}

async fn ecs_manager() -> (ServiceManager, Arc<EcsPlatform<LocalEcs>>, Context) {
    let ctx = Context::background();
    let ecs = Arc::new(EcsPlatform::new(LocalEcs::new()));
    ecs.create_cluster(&ctx, "c1").await.unwrap();
    let store = StateStore::open_in_memory().unwrap();
    let platform: Arc<dyn ContainerPlatform> = ecs.clone();
    (ServiceManager::new(config(), store, platform), ecs, ctx)
}

#[tokio::test]
async fn kafka_after_zookeeper_on_ecs() {
    let (mgr, ecs, ctx) = ecs_manager().await;

    let zk = mgr.create_zookeeper_service(&ctx, "zk1", &zk_opts()).await.unwrap();
    assert_eq!(zk.status, ServiceStatus::Active);
    assert_eq!(zk.domain_name, "c1-keel.com");
    assert!(ecs.is_service_exist(&ctx, "c1", "zk1").await.unwrap());

    let kafka = mgr.create_kafka_service(&ctx, "kafka1", &kafka_opts()).await.unwrap();
    assert_eq!(kafka.status, ServiceStatus::Active);
    assert_eq!(kafka.resources.reserve_mem_mb, 1024);
    assert!(ecs.is_service_exist(&ctx, "c1", "kafka1").await.unwrap());
    assert!(
        ecs.is_task_definition_family_exist(&ctx, "c1-kafka1")
            .await
            .unwrap()
    );

    let configs = mgr.store().list_replica_configs(&kafka.service_uuid).unwrap();
    assert_eq!(configs.len(), 3);
    assert_eq!(configs[1].member_name, "kafka1-1");
    assert_eq!(configs[1].zone, "us-east-1b");
    let server = configs[2]
        .configs
        .iter()
        .find(|f| f.file_name == kafka::SERVER_PROPERTIES_FILE)
        .unwrap();
    assert!(server.content.contains(
        "zookeeper.connect=zk1-0.c1-keel.com:2181,zk1-1.c1-keel.com:2181,zk1-2.c1-keel.com:2181"
    ));
    assert!(server.content.contains("broker.id=2\n"));

    let names: Vec<String> = mgr
        .list_services()
        .unwrap()
        .into_iter()
        .map(|s| s.service_name)
        .collect();
    assert_eq!(names, vec!["kafka1".to_string(), "zk1".to_string()]);
}

#[tokio::test]
async fn kafka_requires_zookeeper() {
    let (mgr, ecs, ctx) = ecs_manager().await;

    let err = mgr
        .create_kafka_service(&ctx, "kafka1", &kafka_opts())
        .await
        .unwrap_err();
    assert!(matches!(err, ManageError::DependencyNotFound(ref name) if name == "zk1"));
    assert!(mgr.list_services().unwrap().is_empty());
    assert!(ecs.api().services("c1").await.is_empty());
}

#[tokio::test]
async fn kafka_requires_active_zookeeper() {
    let (mgr, ecs, ctx) = ecs_manager().await;

    // Leave the ZooKeeper record behind in Creating.
    ecs.api()
        .fail_next(
            "create_service",
            EcsApiError::new(EcsErrorCode::ServerException, "internal failure"),
        )
        .await;
    mgr.create_zookeeper_service(&ctx, "zk1", &zk_opts())
        .await
        .unwrap_err();
    assert_eq!(mgr.get_service("zk1").unwrap().status, ServiceStatus::Creating);

    let err = mgr
        .create_kafka_service(&ctx, "kafka1", &kafka_opts())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ManageError::DependencyNotActive {
            status: ServiceStatus::Creating,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn failed_create_rolls_back_and_resumes() {
    let (mgr, ecs, ctx) = ecs_manager().await;
    ecs.api()
        .fail_next(
            "create_service",
            EcsApiError::new(EcsErrorCode::ThrottlingException, "Rate exceeded"),
        )
        .await;

    let err = mgr
        .create_zookeeper_service(&ctx, "zk1", &zk_opts())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ManageError::Container(ContainerError::Partial { .. })
    ));
    assert!(err.is_retryable());
    // The task definition registered by the failed attempt was rolled back.
    assert!(
        !ecs.is_task_definition_family_exist(&ctx, "c1-zk1")
            .await
            .unwrap()
    );

    let first = mgr.get_service("zk1").unwrap();
    let resumed = mgr.create_zookeeper_service(&ctx, "zk1", &zk_opts()).await.unwrap();
    assert_eq!(resumed.service_uuid, first.service_uuid);
    assert_eq!(resumed.status, ServiceStatus::Active);
    assert_eq!(ecs.api().revisions("c1-zk1").await.len(), 2);
}

#[tokio::test]
async fn resume_with_different_settings_rejected() {
    let (mgr, ecs, ctx) = ecs_manager().await;
    ecs.api()
        .fail_next(
            "create_service",
            EcsApiError::new(EcsErrorCode::ServerException, "internal failure"),
        )
        .await;
    mgr.create_zookeeper_service(&ctx, "zk1", &zk_opts())
        .await
        .unwrap_err();

    let mut bigger = zk_opts();
    bigger.replicas = 5;
    let err = mgr
        .create_zookeeper_service(&ctx, "zk1", &bigger)
        .await
        .unwrap_err();
    assert!(matches!(err, ManageError::Validation(_)));
    assert!(ecs.api().services("c1").await.is_empty());

    let stored = mgr.get_service("zk1").unwrap();
    assert_eq!(stored.replicas, 3);
    assert_eq!(stored.status, ServiceStatus::Creating);

    // The original settings still resume, and the platform matches the record.
    let attr = mgr.create_zookeeper_service(&ctx, "zk1", &zk_opts()).await.unwrap();
    assert_eq!(attr.service_uuid, stored.service_uuid);
    let services = ecs.api().services("c1").await;
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].desired_count, attr.replicas);
    assert_eq!(
        mgr.store().list_replica_configs(&attr.service_uuid).unwrap().len(),
        attr.replicas as usize
    );
}

/// ECS client whose `create_service` cancels the caller's context and never answers.
struct CancelOnCreate {
    inner: LocalEcs,
    ctx: Context,
}

#[async_trait]
impl EcsApi for CancelOnCreate {
    async fn create_cluster(&self, cluster_name: &str) -> EcsApiResult<EcsCluster> {
        self.inner.create_cluster(cluster_name).await
    }
    async fn describe_clusters(&self, clusters: &[String]) -> EcsApiResult<Vec<EcsCluster>> {
        self.inner.describe_clusters(clusters).await
    }
    async fn delete_cluster(&self, cluster: &str) -> EcsApiResult<EcsCluster> {
        self.inner.delete_cluster(cluster).await
    }
    async fn list_task_definition_families(&self, prefix: &str) -> EcsApiResult<Vec<String>> {
        self.inner.list_task_definition_families(prefix).await
    }
    async fn list_task_definitions(&self, family: &str) -> EcsApiResult<Vec<String>> {
        self.inner.list_task_definitions(family).await
    }
    async fn describe_task_definition(
        &self,
        task_definition: &str,
    ) -> EcsApiResult<EcsTaskDefinition> {
        self.inner.describe_task_definition(task_definition).await
    }
    async fn register_task_definition(
        &self,
        input: RegisterTaskDefinitionInput,
    ) -> EcsApiResult<EcsTaskDefinition> {
        self.inner.register_task_definition(input).await
    }
    async fn deregister_task_definition(
        &self,
        task_definition: &str,
    ) -> EcsApiResult<EcsTaskDefinition> {
        self.inner.deregister_task_definition(task_definition).await
    }
    async fn create_service(&self, _input: CreateServiceInput) -> EcsApiResult<EcsService> {
        self.ctx.cancel();
        std::future::pending().await
    }
    async fn describe_services(
        &self,
        cluster: &str,
        services: &[String],
    ) -> EcsApiResult<Vec<EcsService>> {
        self.inner.describe_services(cluster, services).await
    }
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        desired_count: u32,
    ) -> EcsApiResult<EcsService> {
        self.inner.update_service(cluster, service, desired_count).await
    }
    async fn delete_service(&self, cluster: &str, service: &str) -> EcsApiResult<EcsService> {
        self.inner.delete_service(cluster, service).await
    }
    async fn run_task(&self, input: RunTaskInput) -> EcsApiResult<EcsTask> {
        self.inner.run_task(input).await
    }
    async fn describe_tasks(&self, cluster: &str, tasks: &[String]) -> EcsApiResult<Vec<EcsTask>> {
        self.inner.describe_tasks(cluster, tasks).await
    }
    async fn list_tasks(&self, cluster: &str, started_by: &str) -> EcsApiResult<Vec<String>> {
        self.inner.list_tasks(cluster, started_by).await
    }
    async fn stop_task(&self, cluster: &str, task: &str, reason: &str) -> EcsApiResult<EcsTask> {
        self.inner.stop_task(cluster, task, reason).await
    }
}

#[tokio::test]
async fn create_cancelled_mid_call_still_rolls_back() {
    let ctx = Context::background();
    let ecs = Arc::new(EcsPlatform::new(CancelOnCreate {
        inner: LocalEcs::new(),
        ctx: ctx.clone(),
    }));
    ecs.create_cluster(&ctx, "c1").await.unwrap();
    let mgr = ServiceManager::new(config(), StateStore::open_in_memory().unwrap(), ecs.clone());

    let err = mgr
        .create_zookeeper_service(&ctx, "zk1", &zk_opts())
        .await
        .unwrap_err();
    match err {
        ManageError::Container(ContainerError::Partial { source, .. }) => {
            assert!(matches!(*source, ContainerError::Cancelled(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(ctx.is_cancelled());

    // The task definition was deregistered even though the caller's context was cancelled.
    let fresh = Context::background();
    assert!(
        !ecs.is_task_definition_family_exist(&fresh, "c1-zk1")
            .await
            .unwrap()
    );
    assert_eq!(mgr.get_service("zk1").unwrap().status, ServiceStatus::Creating);
}

#[tokio::test]
async fn create_active_service_twice_fails() {
    let (mgr, _ecs, ctx) = ecs_manager().await;
    mgr.create_zookeeper_service(&ctx, "zk1", &zk_opts()).await.unwrap();

    let err = mgr
        .create_zookeeper_service(&ctx, "zk1", &zk_opts())
        .await
        .unwrap_err();
    assert!(matches!(err, ManageError::State(StateError::AlreadyExists(_))));
}

#[tokio::test]
async fn validation_happens_before_any_call() {
    let ctx = Context::background();
    let ecs = Arc::new(EcsPlatform::new(LocalEcs::new()));
    let mut cfg = config();
    cfg.zones.clear();
    let mgr = ServiceManager::new(cfg, StateStore::open_in_memory().unwrap(), ecs.clone());

    let err = mgr
        .create_zookeeper_service(&ctx, "zk1", &zk_opts())
        .await
        .unwrap_err();
    assert!(matches!(err, ManageError::Validation(_)));

    let mgr = ServiceManager::new(config(), StateStore::open_in_memory().unwrap(), ecs.clone());
    let mut opts = zk_opts();
    opts.replicas = 0;
    let err = mgr.create_zookeeper_service(&ctx, "zk1", &opts).await.unwrap_err();
    assert!(matches!(err, ManageError::Validation(_)));

    let err = mgr
        .create_zookeeper_service(&ctx, "Bad_Name", &zk_opts())
        .await
        .unwrap_err();
    assert!(matches!(err, ManageError::Validation(_)));

    // The cluster was never created, so any platform call would have failed differently.
    assert!(ecs.api().services("c1").await.is_empty());
}

#[tokio::test]
async fn delete_service_removes_everything() {
    let (mgr, ecs, ctx) = ecs_manager().await;
    let zk = mgr.create_zookeeper_service(&ctx, "zk1", &zk_opts()).await.unwrap();

    mgr.delete_service(&ctx, "zk1").await.unwrap();
    assert!(!ecs.is_service_exist(&ctx, "c1", "zk1").await.unwrap());
    assert!(
        !ecs.is_task_definition_family_exist(&ctx, "c1-zk1")
            .await
            .unwrap()
    );
    assert!(matches!(
        mgr.get_service("zk1").unwrap_err(),
        ManageError::State(StateError::NotFound(_))
    ));
    assert!(mgr.store().list_replica_configs(&zk.service_uuid).unwrap().is_empty());

    let err = mgr.delete_service(&ctx, "zk1").await.unwrap_err();
    assert!(matches!(err, ManageError::State(StateError::NotFound(_))));
}

#[tokio::test]
async fn cancelled_create_leaves_record_resumable() {
    let (mgr, ecs, _) = ecs_manager().await;
    let ctx = Context::background();
    ctx.cancel();

    let err = mgr
        .create_zookeeper_service(&ctx, "zk1", &zk_opts())
        .await
        .unwrap_err();
    assert!(matches!(err, ManageError::Container(ContainerError::Cancelled(_))));
    assert_eq!(mgr.get_service("zk1").unwrap().status, ServiceStatus::Creating);

    let attr = mgr
        .create_zookeeper_service(&Context::background(), "zk1", &zk_opts())
        .await
        .unwrap();
    assert_eq!(attr.status, ServiceStatus::Active);
    assert!(
        ecs.is_service_exist(&Context::background(), "c1", "zk1")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn zookeeper_on_swarm() {
    let ctx = Context::background();
    let swarm = Arc::new(SwarmPlatform::new(LocalSwarm::new(), "c1"));
    let mgr = ServiceManager::new(config(), StateStore::open_in_memory().unwrap(), swarm.clone());

    let zk = mgr.create_zookeeper_service(&ctx, "zk1", &zk_opts()).await.unwrap();
    assert_eq!(zk.status, ServiceStatus::Active);

    let svc = swarm.api().service_inspect("zk1").await.unwrap();
    assert_eq!(svc.spec.replicas, 3);
    assert_eq!(svc.spec.image, zookeeper::container_image());
    assert!(svc.spec.placement.constraints.is_empty());

    let configs = mgr.store().list_replica_configs(&zk.service_uuid).unwrap();
    let zoo = configs[0]
        .configs
        .iter()
        .find(|f| f.file_name == zookeeper::ZOO_CFG_FILE)
        .unwrap();
    assert!(zoo.content.contains("quorumListenOnAllIPs=true"));
}
