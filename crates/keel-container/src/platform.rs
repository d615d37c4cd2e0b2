//! The container platform adapter.

use async_trait::async_trait;

use keel_core::PlatformKind;

use crate::context::Context;
use crate::error::ContainerResult;
use crate::types::{
    CreateServiceOptions, RunTaskOptions, TaskDefinition, TaskDefinitionId, TaskDefinitionSpec,
    TaskStatus,
};

/// Cluster, service, task and task definition operations of one
/// orchestrator.
///
/// Implementations translate each call into the orchestrator's native
/// shape and never retry mutations. Existence checks return `Ok(false)`
/// for an absent resource; mutations on an absent resource fail with
/// [`ContainerError::NotFound`](crate::ContainerError::NotFound).
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    fn platform(&self) -> PlatformKind;

    // ── Clusters ──────────────────────────────────────────────────

    async fn create_cluster(&self, ctx: &Context, cluster: &str) -> ContainerResult<()>;

    async fn delete_cluster(&self, ctx: &Context, cluster: &str) -> ContainerResult<()>;

    // ── Services ──────────────────────────────────────────────────

    async fn is_service_exist(
        &self,
        ctx: &Context,
        cluster: &str,
        service: &str,
    ) -> ContainerResult<bool>;

    /// Create a long-running service. Fails with `AlreadyExists` when
    /// the service is already present.
    async fn create_service(&self, ctx: &Context, opts: &CreateServiceOptions) -> ContainerResult<()>;

    async fn scale_service(
        &self,
        ctx: &Context,
        cluster: &str,
        service: &str,
        replicas: u32,
    ) -> ContainerResult<()>;

    async fn delete_service(&self, ctx: &Context, cluster: &str, service: &str)
    -> ContainerResult<()>;

    // ── Tasks ─────────────────────────────────────────────────────

    /// Start a one-off task and return its platform id.
    async fn run_task(&self, ctx: &Context, opts: &RunTaskOptions) -> ContainerResult<String>;

    async fn task_status(&self, ctx: &Context, cluster: &str, task_id: &str)
    -> ContainerResult<TaskStatus>;

    /// Stop every task of `task_type` and drop what was registered for it.
    async fn delete_task(
        &self,
        ctx: &Context,
        cluster: &str,
        service: &str,
        task_type: &str,
    ) -> ContainerResult<()>;

    // ── Task definitions ──────────────────────────────────────────

    async fn is_task_definition_family_exist(
        &self,
        ctx: &Context,
        family: &str,
    ) -> ContainerResult<bool>;

    /// Whether this exact revision is registered and active.
    async fn is_task_definition_exist(
        &self,
        ctx: &Context,
        id: &TaskDefinitionId,
    ) -> ContainerResult<bool>;

    async fn latest_task_definition(
        &self,
        ctx: &Context,
        family: &str,
    ) -> ContainerResult<TaskDefinition>;

    /// Active revisions of `family`, oldest first.
    async fn list_task_definition_revisions(
        &self,
        ctx: &Context,
        family: &str,
    ) -> ContainerResult<Vec<TaskDefinitionId>>;

    async fn register_task_definition(
        &self,
        ctx: &Context,
        family: &str,
        spec: &TaskDefinitionSpec,
    ) -> ContainerResult<TaskDefinitionId>;

    async fn deregister_task_definition(
        &self,
        ctx: &Context,
        id: &TaskDefinitionId,
    ) -> ContainerResult<()>;
}
