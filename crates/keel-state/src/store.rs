//! StateStore: redb-backed control database for Keel.
//!
//! Service attributes and replica configs are stored as JSON. A service
//! and all of its replica configs are written in one write transaction,
//! so readers never observe a service without its configs.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use keel_core::{ReplicaConfig, ServiceAttr, ServiceStatus, service_key};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Thread-safe control database backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) the control database file at `path`.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(StateError::db("open"))?;
        debug!(?path, "control database opened");
        Self::init(db)
    }

    /// An ephemeral store, for tests and dry runs.
    pub fn open_in_memory() -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(StateError::db("open"))?;
        Self::init(db)
    }

    fn init(db: Database) -> StateResult<Self> {
        let txn = db.begin_write().map_err(StateError::db("init"))?;
        txn.open_table(SERVICES).map_err(StateError::db("init"))?;
        txn.open_table(REPLICA_CONFIGS).map_err(StateError::db("init"))?;
        txn.commit().map_err(StateError::db("init"))?;
        Ok(Self { db: Arc::new(db) })
    }

    // ── Services ───────────────────────────────────────────────────

    /// Store a newly created service together with its replica configs.
    ///
    /// Re-running the create for the same service uuid is a no-op. A
    /// record with the same name but a different uuid is rejected with
    /// `StateError::AlreadyExists`.
    pub fn create_service(
        &self,
        attr: &ServiceAttr,
        replica_configs: &[ReplicaConfig],
    ) -> StateResult<()> {
        const OP: &str = "create_service";
        let key = attr.table_key();
        let value = serde_json::to_vec(attr).map_err(StateError::encode(&key))?;
        let configs = replica_configs
            .iter()
            .enumerate()
            .map(|(index, cfg)| {
                let cfg_key = replica_config_key(&attr.service_uuid, index);
                let bytes = serde_json::to_vec(cfg).map_err(StateError::encode(&cfg_key))?;
                Ok((cfg_key, bytes))
            })
            .collect::<StateResult<Vec<_>>>()?;

        let txn = self.db.begin_write().map_err(StateError::db(OP))?;
        {
            let mut services = txn.open_table(SERVICES).map_err(StateError::db(OP))?;
            let existing = services
                .get(key.as_str())
                .map_err(StateError::db(OP))?
                .map(|guard| guard.value().to_vec());
            if let Some(bytes) = existing {
                let stored: ServiceAttr =
                    serde_json::from_slice(&bytes).map_err(StateError::corrupt(&key))?;
                if stored.service_uuid == attr.service_uuid {
                    debug!(%key, "service already stored with the same uuid");
                    return Ok(());
                }
                return Err(StateError::AlreadyExists(key));
            }
            services
                .insert(key.as_str(), value.as_slice())
                .map_err(StateError::db(OP))?;

            let mut table = txn.open_table(REPLICA_CONFIGS).map_err(StateError::db(OP))?;
            for (cfg_key, bytes) in &configs {
                table
                    .insert(cfg_key.as_str(), bytes.as_slice())
                    .map_err(StateError::db(OP))?;
            }
        }
        txn.commit().map_err(StateError::db(OP))?;
        info!(%key, replicas = replica_configs.len(), "service stored");
        Ok(())
    }

    /// Get a service by cluster and name.
    pub fn get_service_attr(&self, cluster: &str, service: &str) -> StateResult<ServiceAttr> {
        const OP: &str = "get_service_attr";
        let key = service_key(cluster, service);
        let txn = self.db.begin_read().map_err(StateError::db(OP))?;
        let table = txn.open_table(SERVICES).map_err(StateError::db(OP))?;
        match table.get(key.as_str()).map_err(StateError::db(OP))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(StateError::corrupt(&key)),
            None => Err(StateError::NotFound(key)),
        }
    }

    /// Set the status of a stored service and bump its modification time.
    pub fn update_service_status(
        &self,
        cluster: &str,
        service: &str,
        status: ServiceStatus,
    ) -> StateResult<ServiceAttr> {
        const OP: &str = "update_service_status";
        let key = service_key(cluster, service);
        let txn = self.db.begin_write().map_err(StateError::db(OP))?;
        let attr = {
            let mut table = txn.open_table(SERVICES).map_err(StateError::db(OP))?;
            let existing = table
                .get(key.as_str())
                .map_err(StateError::db(OP))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(key.clone()))?;
            let mut attr: ServiceAttr =
                serde_json::from_slice(&existing).map_err(StateError::corrupt(&key))?;
            attr.status = status;
            attr.last_modified = epoch_nanos();
            let value = serde_json::to_vec(&attr).map_err(StateError::encode(&key))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(StateError::db(OP))?;
            attr
        };
        txn.commit().map_err(StateError::db(OP))?;
        debug!(%key, ?status, "service status updated");
        Ok(attr)
    }

    /// List all services of a cluster.
    pub fn list_services(&self, cluster: &str) -> StateResult<Vec<ServiceAttr>> {
        self.scan(SERVICES, &format!("{cluster}/"), "list_services")?
            .into_iter()
            .map(|(key, bytes)| serde_json::from_slice(&bytes).map_err(StateError::corrupt(&key)))
            .collect()
    }

    /// Delete a service and its replica configs. Returns true if it existed.
    pub fn delete_service(&self, cluster: &str, service: &str) -> StateResult<bool> {
        const OP: &str = "delete_service";
        let key = service_key(cluster, service);
        let txn = self.db.begin_write().map_err(StateError::db(OP))?;
        let removed = {
            let mut services = txn.open_table(SERVICES).map_err(StateError::db(OP))?;
            let removed = services
                .remove(key.as_str())
                .map_err(StateError::db(OP))?
                .map(|guard| guard.value().to_vec());

            if let Some(bytes) = &removed {
                let attr: ServiceAttr =
                    serde_json::from_slice(bytes).map_err(StateError::corrupt(&key))?;
                let prefix = format!("{}:", attr.service_uuid);
                let mut table = txn.open_table(REPLICA_CONFIGS).map_err(StateError::db(OP))?;
                let mut keys = Vec::new();
                for entry in table.range(prefix.as_str()..).map_err(StateError::db(OP))? {
                    let (k, _) = entry.map_err(StateError::db(OP))?;
                    if !k.value().starts_with(&prefix) {
                        break;
                    }
                    keys.push(k.value().to_string());
                }
                for k in &keys {
                    table.remove(k.as_str()).map_err(StateError::db(OP))?;
                }
            }
            removed.is_some()
        };
        txn.commit().map_err(StateError::db(OP))?;
        info!(%key, existed = removed, "service deleted");
        Ok(removed)
    }

    // ── Replica configs ────────────────────────────────────────────

    /// List the replica configs of a service in ordinal order.
    pub fn list_replica_configs(&self, service_uuid: &str) -> StateResult<Vec<ReplicaConfig>> {
        self.scan(REPLICA_CONFIGS, &format!("{service_uuid}:"), "list_replica_configs")?
            .into_iter()
            .map(|(key, bytes)| serde_json::from_slice(&bytes).map_err(StateError::corrupt(&key)))
            .collect()
    }

    /// Raw records of `table` whose key starts with `prefix`, in key order.
    fn scan(
        &self,
        table: redb::TableDefinition<'static, &'static str, &'static [u8]>,
        prefix: &str,
        op: &'static str,
    ) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(StateError::db(op))?;
        let table = txn.open_table(table).map_err(StateError::db(op))?;
        let mut records = Vec::new();
        for entry in table.range(prefix..).map_err(StateError::db(op))? {
            let (key, value) = entry.map_err(StateError::db(op))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            records.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(records)
    }
}

/// Current Unix epoch in nanoseconds.
pub fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
