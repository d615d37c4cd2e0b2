//! Replica identity and addressing.
//!
//! Every name here is a pure function of its inputs. Re-creating a
//! service with the same inputs must produce the same member names,
//! DNS names and task definition families.

/// Suffix appended to a cluster name to form its default DNS domain.
pub const DEFAULT_DOMAIN_SUFFIX: &str = "-keel.com";

/// Stable member name for the replica at `index` of `service`, e.g. `zk1-0`.
pub fn member_name(service: &str, index: u32) -> String {
    format!("{service}-{index}")
}

/// Fully-qualified DNS name of a member within a domain.
pub fn dns_name(member: &str, domain: &str) -> String {
    format!("{member}.{domain}")
}

/// Default DNS domain for a cluster, e.g. `c1-keel.com`.
pub fn default_domain(cluster: &str) -> String {
    format!("{cluster}{DEFAULT_DOMAIN_SUFFIX}")
}

/// Task definition family of a long-running service.
pub fn task_definition_family(cluster: &str, service: &str) -> String {
    format!("{cluster}-{service}")
}

/// Task definition family of a one-off task (init, maintenance) of a service.
pub fn task_family_for_task(cluster: &str, service: &str, task_type: &str) -> String {
    format!("{cluster}-{service}-{task_type}")
}

/// Generate a fresh service uuid.
pub fn service_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
