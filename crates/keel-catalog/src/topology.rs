//! Topology planner: zone spread and quorum sizing.
//!
//! Replicas are spread round-robin over the availability zones so no zone
//! receives a second replica before every zone has one. Quorum parameters
//! tuned for a target topology are clamped to the replica count, since a
//! replication factor above the member count never forms a quorum.

use keel_core::naming::{dns_name, member_name};

/// Per-service quorum defaults, tuned for a full-size deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumDefaults {
    pub replication_factor: u32,
    pub min_insync_replicas: u32,
    pub partitions: u32,
}

/// Quorum parameters effective for a concrete replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumParams {
    pub replication_factor: u32,
    pub min_insync_replicas: u32,
    pub partitions: u32,
}

impl QuorumParams {
    /// Clamp every default to at most `replicas`.
    pub fn for_replicas(replicas: u32, defaults: QuorumDefaults) -> Self {
        Self {
            replication_factor: defaults.replication_factor.min(replicas),
            min_insync_replicas: defaults.min_insync_replicas.min(replicas),
            partitions: defaults.partitions.min(replicas),
        }
    }
}

/// Zone of the replica at `index`: `zones[index % zones.len()]`.
///
/// Returns an empty zone for an empty list; callers reject that input
/// before planning.
pub fn zone_for(zones: &[String], index: u32) -> &str {
    if zones.is_empty() {
        return "";
    }
    &zones[index as usize % zones.len()]
}

/// Identity and placement of one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSlot {
    pub index: u32,
    pub member_name: String,
    pub dns_name: String,
    pub zone: String,
}

/// Plan the members of a service, in ordinal order.
pub fn plan_members(service: &str, domain: &str, replicas: u32, zones: &[String]) -> Vec<ReplicaSlot> {
    (0..replicas)
        .map(|index| {
            let member = member_name(service, index);
            ReplicaSlot {
                index,
                dns_name: dns_name(&member, domain),
                member_name: member,
                zone: zone_for(zones, index).to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: QuorumDefaults = QuorumDefaults {
        replication_factor: 3,
        min_insync_replicas: 2,
        partitions: 8,
    };

    fn zones(names: &[&str]) -> Vec<String> {
        names.iter().map(|z| z.to_string()).collect()
    }

    #[test]
    fn zones_assigned_round_robin() {
        let zs = zones(&["a", "b", "c"]);
        for replicas in 1..=12u32 {
            let slots = plan_members("svc", "d.com", replicas, &zs);
            assert_eq!(slots.len(), replicas as usize);
            for slot in &slots {
                assert_eq!(slot.zone, zs[slot.index as usize % zs.len()]);
            }
        }
    }

    #[test]
    fn every_zone_used_before_repeat() {
        let zs = zones(&["a", "b", "c"]);
        let slots = plan_members("svc", "d.com", 3, &zs);
        let used: Vec<&str> = slots.iter().map(|s| s.zone.as_str()).collect();
        assert_eq!(used, vec!["a", "b", "c"]);
    }

    #[test]
    fn empty_zone_list_yields_empty_zone() {
        assert_eq!(zone_for(&[], 5), "");
    }

    #[test]
    fn quorum_clamped_to_replicas() {
        for replicas in 1..=10u32 {
            let q = QuorumParams::for_replicas(replicas, DEFAULTS);
            assert!(q.replication_factor <= replicas);
            assert!(q.min_insync_replicas <= replicas);
            assert!(q.partitions <= replicas);
        }
    }

    #[test]
    fn quorum_defaults_kept_when_enough_replicas() {
        let q = QuorumParams::for_replicas(8, DEFAULTS);
        assert_eq!(q.replication_factor, 3);
        assert_eq!(q.min_insync_replicas, 2);
        assert_eq!(q.partitions, 8);

        let q = QuorumParams::for_replicas(1, DEFAULTS);
        assert_eq!(q, QuorumParams {
            replication_factor: 1,
            min_insync_replicas: 1,
            partitions: 1,
        });
    }

    #[test]
    fn members_named_by_ordinal() {
        let slots = plan_members("kafka1", "c1-keel.com", 2, &zones(&["az1"]));
        assert_eq!(slots[0].member_name, "kafka1-0");
        assert_eq!(slots[1].dns_name, "kafka1-1.c1-keel.com");
    }
}
