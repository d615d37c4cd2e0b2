//! redb table definitions for the Keel control database.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Service attributes keyed by `{cluster}/{service}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Replica configs keyed by `{service_uuid}:{index:06}`.
pub const REPLICA_CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("replica_configs");

/// Key of the replica config at `index` of a service.
pub fn replica_config_key(service_uuid: &str, index: usize) -> String {
    format!("{service_uuid}:{index:06}")
}
