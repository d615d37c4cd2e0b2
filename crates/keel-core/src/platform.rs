//! Container platform selector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The orchestrator a Keel control plane drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// ECS-style task scheduling service (host networking, per-member DNS).
    Ecs,
    /// Swarm-style cluster manager (overlay networking, no per-container DNS).
    Swarm,
}

#[derive(Debug, Clone, Error)]
#[error("unsupported container platform: {0}")]
pub struct UnknownPlatform(pub String);

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Ecs => "ecs",
            PlatformKind::Swarm => "swarm",
        }
    }

    /// Whether each container can be reached through its own member DNS name.
    ///
    /// When false, services must bind the wildcard address instead.
    pub fn supports_member_dns(&self) -> bool {
        matches!(self, PlatformKind::Ecs)
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecs" => Ok(PlatformKind::Ecs),
            "swarm" => Ok(PlatformKind::Swarm),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}
