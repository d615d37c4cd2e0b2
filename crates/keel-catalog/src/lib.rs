//! keel-catalog: catalog services and their replica configs.
//!
//! Everything in this crate is a pure function of its inputs: calling a
//! generator twice with the same arguments reproduces every rendered file
//! byte for byte, which is what makes re-creating a service safe.
//!
//! # Components
//!
//! - **`topology`**: zone assignment and quorum parameter clamping
//! - **`dependency`**: connection strings to another service's members
//! - **`target`**: cluster-wide generator inputs
//! - **`template`**: typed config file templates
//! - **`kafka`**: Kafka brokers (depend on a ZooKeeper service)
//! - **`zookeeper`**: ZooKeeper ensembles

pub mod dependency;
pub mod error;
pub mod kafka;
pub mod target;
pub mod template;
pub mod topology;
pub mod zookeeper;

pub use dependency::connection_string;
pub use error::{CatalogError, CatalogResult};
pub use target::CatalogTarget;
pub use template::{ConfigTemplate, SysConfig};
pub use topology::{QuorumDefaults, QuorumParams, ReplicaSlot, plan_members, zone_for};
