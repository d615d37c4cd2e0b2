//! In-process swarm engine.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::api::*;

const STATE_RUNNING: &str = "running";
const STATE_SHUTDOWN: &str = "shutdown";

#[derive(Default)]
struct State {
    services: BTreeMap<String, SwarmService>,
    tasks: BTreeMap<String, Vec<SwarmTask>>,
    next_id: u64,
    last_created_at: u64,
    failures: HashMap<&'static str, SwarmApiError>,
}

impl State {
    fn take_failure(&mut self, op: &'static str) -> SwarmApiResult<()> {
        match self.failures.remove(op) {
            Some(err) => {
                debug!(op, error = %err, "injected swarm failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:025x}", self.next_id)
    }

    /// Strictly increasing, so tasks created under one lock never tie.
    fn created_at(&mut self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        self.last_created_at = now.max(self.last_created_at + 1);
        self.last_created_at
    }

    /// Reconcile the running tasks of `name` with its replica count.
    fn reconcile(&mut self, name: &str) {
        let Some(svc) = self.services.get(name) else {
            return;
        };
        let (service_id, replicas) = (svc.id.clone(), svc.spec.replicas);
        let mut tasks = self.tasks.remove(name).unwrap_or_default();
        let running = tasks.iter().filter(|t| t.desired_state == STATE_RUNNING).count() as u64;

        for slot in running..replicas {
            let id = self.next_id();
            let created_at = self.created_at();
            tasks.push(SwarmTask {
                id,
                service_id: service_id.clone(),
                slot: slot + 1,
                created_at,
                state: STATE_RUNNING.to_string(),
                desired_state: STATE_RUNNING.to_string(),
                err: None,
            });
        }
        for task in tasks
            .iter_mut()
            .filter(|t| t.desired_state == STATE_RUNNING && t.slot > replicas)
        {
            task.state = STATE_SHUTDOWN.to_string();
            task.desired_state = STATE_SHUTDOWN.to_string();
        }
        self.tasks.insert(name.to_string(), tasks);
    }
}

#[derive(Default)]
pub struct LocalSwarm {
    state: Mutex<State>,
}

impl LocalSwarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `err`.
    pub async fn fail_next(&self, op: &'static str, err: SwarmApiError) {
        self.state.lock().await.failures.insert(op, err);
    }

    /// Move every task of `service` to a terminal `state`.
    pub async fn finish_tasks(&self, service: &str, state: &str, err: Option<&str>) {
        let mut st = self.state.lock().await;
        if let Some(tasks) = st.tasks.get_mut(service) {
            for t in tasks.iter_mut() {
                t.state = state.to_string();
                t.desired_state = STATE_SHUTDOWN.to_string();
                t.err = err.map(str::to_string);
            }
        }
    }
}

#[async_trait]
impl SwarmApi for LocalSwarm {
    async fn service_create(&self, spec: ServiceSpec) -> SwarmApiResult<String> {
        let mut st = self.state.lock().await;
        st.take_failure("service_create")?;
        if st.services.contains_key(&spec.name) {
            return Err(SwarmApiError::new(
                409,
                format!("rpc error: name conflicts with an existing object: {}", spec.name),
            ));
        }
        let id = st.next_id();
        let name = spec.name.clone();
        st.services.insert(
            name.clone(),
            SwarmService {
                id: id.clone(),
                version: 1,
                spec,
            },
        );
        st.reconcile(&name);
        Ok(id)
    }

    async fn service_inspect(&self, name: &str) -> SwarmApiResult<SwarmService> {
        let mut st = self.state.lock().await;
        st.take_failure("service_inspect")?;
        st.services
            .get(name)
            .cloned()
            .ok_or_else(|| SwarmApiError::not_found(format!("service {name} not found")))
    }

    async fn service_update(&self, name: &str, version: u64, spec: ServiceSpec) -> SwarmApiResult<()> {
        let mut st = self.state.lock().await;
        st.take_failure("service_update")?;
        let svc = st
            .services
            .get_mut(name)
            .ok_or_else(|| SwarmApiError::not_found(format!("service {name} not found")))?;
        if svc.version != version {
            return Err(SwarmApiError::new(500, "rpc error: update out of sequence"));
        }
        svc.version += 1;
        svc.spec = spec;
        st.reconcile(name);
        Ok(())
    }

    async fn service_remove(&self, name: &str) -> SwarmApiResult<()> {
        let mut st = self.state.lock().await;
        st.take_failure("service_remove")?;
        st.services
            .remove(name)
            .ok_or_else(|| SwarmApiError::not_found(format!("service {name} not found")))?;
        st.tasks.remove(name);
        Ok(())
    }

    async fn task_list(&self, service: &str) -> SwarmApiResult<Vec<SwarmTask>> {
        let mut st = self.state.lock().await;
        st.take_failure("task_list")?;
        if !st.services.contains_key(service) {
            return Err(SwarmApiError::not_found(format!("service {service} not found")));
        }
        Ok(st.tasks.get(service).cloned().unwrap_or_default())
    }
}
