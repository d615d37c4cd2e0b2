//! Dependency resolver: connection strings to another service's members.

use keel_core::ServiceAttr;
use keel_core::naming::{dns_name, member_name};

/// Separator between member addresses in a connection string.
pub const MEMBER_SEP: &str = ",";

/// Build `<dns0>:<port>,<dns1>:<port>,...` for every member of `dep`.
///
/// The list is ordered by member ordinal; dependent services parse it as
/// an ordered seed list.
pub fn connection_string(dep: &ServiceAttr, client_port: u16) -> String {
    (0..dep.replicas)
        .map(|i| {
            let member = member_name(&dep.service_name, i);
            format!("{}:{client_port}", dns_name(&member, &dep.domain_name))
        })
        .collect::<Vec<_>>()
        .join(MEMBER_SEP)
}
