//! In-process ECS control plane.
//!
//! Keeps clusters, task definitions, services and tasks in memory and
//! reproduces the ECS behaviours keel relies on: revisions numbered per
//! family, deregistered revisions kept as `INACTIVE`, services deletable
//! only once scaled to zero, and `ServiceNotFound`/`ClusterNotFound`
//! style errors. Failures can be injected per call for tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::api::*;

const ACCOUNT: &str = "000000000000";

#[derive(Default)]
struct State {
    clusters: BTreeMap<String, EcsCluster>,
    /// Revisions of each family; revision `n` lives at index `n - 1`.
    task_definitions: BTreeMap<String, Vec<EcsTaskDefinition>>,
    /// Keyed by `(cluster, service)`.
    services: BTreeMap<(String, String), EcsService>,
    tasks: BTreeMap<String, EcsTask>,
    next_task: u64,
    failures: HashMap<&'static str, EcsApiError>,
}

impl State {
    fn take_failure(&mut self, op: &'static str) -> EcsApiResult<()> {
        match self.failures.remove(op) {
            Some(err) => {
                debug!(op, error = %err, "injected ecs failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn active_cluster(&self, cluster: &str) -> EcsApiResult<&EcsCluster> {
        self.clusters
            .get(cluster)
            .filter(|c| c.status == STATUS_ACTIVE)
            .ok_or_else(|| {
                EcsApiError::new(EcsErrorCode::ClusterNotFoundException, "Cluster not found.")
            })
    }

    fn resolve_task_definition(&self, task_definition: &str) -> EcsApiResult<&EcsTaskDefinition> {
        let not_found = || {
            EcsApiError::new(
                EcsErrorCode::ClientException,
                format!("Unable to describe task definition {task_definition}."),
            )
        };
        let (family, revision) = split_revision(task_definition);
        let revisions = self.task_definitions.get(family).ok_or_else(not_found)?;
        match revision {
            Some(rev) => rev
                .checked_sub(1)
                .and_then(|i| revisions.get(i as usize))
                .ok_or_else(not_found),
            None => revisions
                .iter()
                .rev()
                .find(|td| td.status == STATUS_ACTIVE)
                .ok_or_else(not_found),
        }
    }

    fn active_services_in(&self, cluster: &str) -> u32 {
        self.services
            .iter()
            .filter(|((c, _), svc)| c == cluster && svc.status == STATUS_ACTIVE)
            .count() as u32
    }

    fn refresh_cluster_counts(&mut self, cluster: &str) {
        let count = self.active_services_in(cluster);
        if let Some(c) = self.clusters.get_mut(cluster) {
            c.active_services_count = count;
        }
    }
}

/// Split `family:revision` (or a task definition arn) into its parts.
fn split_revision(task_definition: &str) -> (&str, Option<u32>) {
    let name = task_definition
        .rsplit_once("task-definition/")
        .map_or(task_definition, |(_, name)| name);
    match name.rsplit_once(':') {
        Some((family, rev)) => match rev.parse() {
            Ok(rev) => (family, Some(rev)),
            Err(_) => (name, None),
        },
        None => (name, None),
    }
}

pub struct LocalEcs {
    region: String,
    state: Mutex<State>,
}

impl Default for LocalEcs {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEcs {
    pub fn new() -> Self {
        Self::with_region("local")
    }

    pub fn with_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Make the next call of `op` fail with `err`.
    pub async fn fail_next(&self, op: &'static str, err: EcsApiError) {
        self.state.lock().await.failures.insert(op, err);
    }

    /// Every service record of `cluster`, deleted ones included.
    pub async fn services(&self, cluster: &str) -> Vec<EcsService> {
        let st = self.state.lock().await;
        st.services
            .iter()
            .filter(|((c, _), _)| c == cluster)
            .map(|(_, svc)| svc.clone())
            .collect()
    }

    /// Every revision of `family`, inactive ones included.
    pub async fn revisions(&self, family: &str) -> Vec<EcsTaskDefinition> {
        let st = self.state.lock().await;
        st.task_definitions.get(family).cloned().unwrap_or_default()
    }

    fn arn(&self, resource: &str) -> String {
        format!("arn:aws:ecs:{}:{ACCOUNT}:{resource}", self.region)
    }
}

#[async_trait]
impl EcsApi for LocalEcs {
    async fn create_cluster(&self, cluster_name: &str) -> EcsApiResult<EcsCluster> {
        let mut st = self.state.lock().await;
        st.take_failure("create_cluster")?;
        if cluster_name.is_empty() {
            return Err(EcsApiError::new(
                EcsErrorCode::InvalidParameterException,
                "Cluster name is required.",
            ));
        }
        let cluster = EcsCluster {
            cluster_arn: self.arn(&format!("cluster/{cluster_name}")),
            cluster_name: cluster_name.to_string(),
            status: STATUS_ACTIVE.to_string(),
            active_services_count: st.active_services_in(cluster_name),
        };
        st.clusters.insert(cluster_name.to_string(), cluster.clone());
        Ok(cluster)
    }

    async fn describe_clusters(&self, clusters: &[String]) -> EcsApiResult<Vec<EcsCluster>> {
        let mut st = self.state.lock().await;
        st.take_failure("describe_clusters")?;
        Ok(clusters
            .iter()
            .filter_map(|name| st.clusters.get(name).cloned())
            .collect())
    }

    async fn delete_cluster(&self, cluster: &str) -> EcsApiResult<EcsCluster> {
        let mut st = self.state.lock().await;
        st.take_failure("delete_cluster")?;
        st.active_cluster(cluster)?;
        if st.active_services_in(cluster) > 0 {
            return Err(EcsApiError::new(
                EcsErrorCode::ClusterContainsServicesException,
                "The Cluster cannot be deleted while Services are active.",
            ));
        }
        let c = st.clusters.get_mut(cluster).ok_or_else(|| {
            EcsApiError::new(EcsErrorCode::ClusterNotFoundException, "Cluster not found.")
        })?;
        c.status = STATUS_INACTIVE.to_string();
        Ok(c.clone())
    }

    async fn list_task_definition_families(&self, prefix: &str) -> EcsApiResult<Vec<String>> {
        let mut st = self.state.lock().await;
        st.take_failure("list_task_definition_families")?;
        Ok(st
            .task_definitions
            .iter()
            .filter(|(family, revs)| {
                family.starts_with(prefix) && revs.iter().any(|td| td.status == STATUS_ACTIVE)
            })
            .map(|(family, _)| family.clone())
            .collect())
    }

    async fn list_task_definitions(&self, family: &str) -> EcsApiResult<Vec<String>> {
        let mut st = self.state.lock().await;
        st.take_failure("list_task_definitions")?;
        Ok(st
            .task_definitions
            .get(family)
            .map(|revs| {
                revs.iter()
                    .filter(|td| td.status == STATUS_ACTIVE)
                    .map(|td| td.task_definition_arn.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_task_definition(
        &self,
        task_definition: &str,
    ) -> EcsApiResult<EcsTaskDefinition> {
        let mut st = self.state.lock().await;
        st.take_failure("describe_task_definition")?;
        st.resolve_task_definition(task_definition).cloned()
    }

    async fn register_task_definition(
        &self,
        input: RegisterTaskDefinitionInput,
    ) -> EcsApiResult<EcsTaskDefinition> {
        let mut st = self.state.lock().await;
        st.take_failure("register_task_definition")?;
        if input.family.is_empty() || input.container_definitions.is_empty() {
            return Err(EcsApiError::new(
                EcsErrorCode::ClientException,
                "Family and container definitions are required.",
            ));
        }
        let revs = st.task_definitions.entry(input.family.clone()).or_default();
        let revision = revs.len() as u32 + 1;
        let td = EcsTaskDefinition {
            task_definition_arn: self.arn(&format!("task-definition/{}:{revision}", input.family)),
            family: input.family,
            revision,
            status: STATUS_ACTIVE.to_string(),
            network_mode: input.network_mode,
            container_definitions: input.container_definitions,
            volumes: input.volumes,
        };
        revs.push(td.clone());
        Ok(td)
    }

    async fn deregister_task_definition(
        &self,
        task_definition: &str,
    ) -> EcsApiResult<EcsTaskDefinition> {
        let mut st = self.state.lock().await;
        st.take_failure("deregister_task_definition")?;
        let invalid = || {
            EcsApiError::new(
                EcsErrorCode::ClientException,
                format!("The specified task definition does not exist: {task_definition}"),
            )
        };
        let (family, Some(revision)) = split_revision(task_definition) else {
            return Err(invalid());
        };
        let index = revision.checked_sub(1).ok_or_else(invalid)? as usize;
        let td = st
            .task_definitions
            .get_mut(family)
            .and_then(|revs| revs.get_mut(index))
            .ok_or_else(invalid)?;
        td.status = STATUS_INACTIVE.to_string();
        Ok(td.clone())
    }

    async fn create_service(&self, input: CreateServiceInput) -> EcsApiResult<EcsService> {
        let mut st = self.state.lock().await;
        st.take_failure("create_service")?;
        let cluster_arn = st.active_cluster(&input.cluster)?.cluster_arn.clone();

        let key = (input.cluster.clone(), input.service_name.clone());
        if st.services.get(&key).is_some_and(|s| s.status != STATUS_INACTIVE) {
            return Err(EcsApiError::new(
                EcsErrorCode::InvalidParameterException,
                "Creation of service was not idempotent.",
            ));
        }
        let td = st.resolve_task_definition(&input.task_definition)?;
        if td.status != STATUS_ACTIVE {
            return Err(EcsApiError::new(
                EcsErrorCode::ClientException,
                format!("TaskDefinition is inactive: {}", input.task_definition),
            ));
        }
        let task_definition = td.task_definition_arn.clone();

        let svc = EcsService {
            service_arn: self.arn(&format!("service/{}/{}", input.cluster, input.service_name)),
            service_name: input.service_name,
            cluster_arn,
            task_definition,
            status: STATUS_ACTIVE.to_string(),
            desired_count: input.desired_count,
            running_count: input.desired_count,
            placement_constraints: input.placement_constraints,
        };
        st.services.insert(key, svc.clone());
        st.refresh_cluster_counts(&input.cluster);
        Ok(svc)
    }

    async fn describe_services(
        &self,
        cluster: &str,
        services: &[String],
    ) -> EcsApiResult<Vec<EcsService>> {
        let mut st = self.state.lock().await;
        st.take_failure("describe_services")?;
        st.active_cluster(cluster)?;
        Ok(services
            .iter()
            .filter_map(|name| st.services.get(&(cluster.to_string(), name.clone())).cloned())
            .collect())
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        desired_count: u32,
    ) -> EcsApiResult<EcsService> {
        let mut st = self.state.lock().await;
        st.take_failure("update_service")?;
        st.active_cluster(cluster)?;
        let svc = st
            .services
            .get_mut(&(cluster.to_string(), service.to_string()))
            .ok_or_else(|| {
                EcsApiError::new(EcsErrorCode::ServiceNotFoundException, "Service not found.")
            })?;
        if svc.status != STATUS_ACTIVE {
            return Err(EcsApiError::new(
                EcsErrorCode::ServiceNotActiveException,
                "Service was not ACTIVE.",
            ));
        }
        svc.desired_count = desired_count;
        svc.running_count = desired_count;
        Ok(svc.clone())
    }

    async fn delete_service(&self, cluster: &str, service: &str) -> EcsApiResult<EcsService> {
        let mut st = self.state.lock().await;
        st.take_failure("delete_service")?;
        st.active_cluster(cluster)?;
        let svc = st
            .services
            .get_mut(&(cluster.to_string(), service.to_string()))
            .filter(|s| s.status != STATUS_INACTIVE)
            .ok_or_else(|| {
                EcsApiError::new(EcsErrorCode::ServiceNotFoundException, "Service not found.")
            })?;
        if svc.desired_count > 0 {
            return Err(EcsApiError::new(
                EcsErrorCode::InvalidParameterException,
                "The service cannot be stopped while it is scaled above 0.",
            ));
        }
        svc.status = STATUS_INACTIVE.to_string();
        svc.running_count = 0;
        let deleted = svc.clone();
        st.refresh_cluster_counts(cluster);
        Ok(deleted)
    }

    async fn run_task(&self, input: RunTaskInput) -> EcsApiResult<EcsTask> {
        let mut st = self.state.lock().await;
        st.take_failure("run_task")?;
        let cluster_arn = st.active_cluster(&input.cluster)?.cluster_arn.clone();
        let td = st.resolve_task_definition(&input.task_definition)?;
        if td.status != STATUS_ACTIVE {
            return Err(EcsApiError::new(
                EcsErrorCode::ClientException,
                format!("TaskDefinition is inactive: {}", input.task_definition),
            ));
        }
        let task_definition_arn = td.task_definition_arn.clone();

        st.next_task += 1;
        let task_arn = self.arn(&format!("task/{}/{:032x}", input.cluster, st.next_task));
        let task = EcsTask {
            task_arn: task_arn.clone(),
            cluster_arn,
            task_definition_arn,
            started_by: input.started_by,
            last_status: TASK_RUNNING.to_string(),
            desired_status: TASK_RUNNING.to_string(),
            stopped_reason: None,
        };
        st.tasks.insert(task_arn, task.clone());
        Ok(task)
    }

    async fn describe_tasks(&self, cluster: &str, tasks: &[String]) -> EcsApiResult<Vec<EcsTask>> {
        let mut st = self.state.lock().await;
        st.take_failure("describe_tasks")?;
        let cluster_arn = st.active_cluster(cluster)?.cluster_arn.clone();
        Ok(tasks
            .iter()
            .filter_map(|arn| st.tasks.get(arn))
            .filter(|t| t.cluster_arn == cluster_arn)
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, cluster: &str, started_by: &str) -> EcsApiResult<Vec<String>> {
        let mut st = self.state.lock().await;
        st.take_failure("list_tasks")?;
        let cluster_arn = st.active_cluster(cluster)?.cluster_arn.clone();
        Ok(st
            .tasks
            .values()
            .filter(|t| {
                t.cluster_arn == cluster_arn
                    && t.started_by == started_by
                    && t.desired_status == TASK_RUNNING
            })
            .map(|t| t.task_arn.clone())
            .collect())
    }

    async fn stop_task(&self, cluster: &str, task: &str, reason: &str) -> EcsApiResult<EcsTask> {
        let mut st = self.state.lock().await;
        st.take_failure("stop_task")?;
        let cluster_arn = st.active_cluster(cluster)?.cluster_arn.clone();
        let t = st
            .tasks
            .get_mut(task)
            .filter(|t| t.cluster_arn == cluster_arn)
            .ok_or_else(|| {
                EcsApiError::new(
                    EcsErrorCode::InvalidParameterException,
                    "The referenced task was not found.",
                )
            })?;
        t.last_status = TASK_STOPPED.to_string();
        t.desired_status = TASK_STOPPED.to_string();
        t.stopped_reason = Some(reason.to_string());
        Ok(t.clone())
    }
}
