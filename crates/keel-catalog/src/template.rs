//! Typed config file templates.
//!
//! Each rendered file is a struct whose fields are the template inputs.
//! Rendering uses `format!` with named arguments bound to those fields,
//! so a missing or misspelled parameter fails to compile instead of
//! leaving a placeholder in the output.

use keel_core::{DEFAULT_CONFIG_FILE_MODE, PlatformKind, ReplicaConfigFile};

/// Address services bind when the platform has no per-container DNS.
pub const BIND_ALL_IP: &str = "0.0.0.0";

/// A config file rendered from typed inputs.
pub trait ConfigTemplate {
    /// File name inside the replica's config directory.
    const FILE_NAME: &'static str;

    fn render(&self) -> String;

    fn to_file(&self) -> ReplicaConfigFile {
        ReplicaConfigFile {
            file_name: Self::FILE_NAME.to_string(),
            file_mode: DEFAULT_CONFIG_FILE_MODE,
            content: self.render(),
        }
    }
}

/// A config file whose content never varies between replicas.
pub fn static_file(file_name: &str, content: &str) -> ReplicaConfigFile {
    ReplicaConfigFile {
        file_name: file_name.to_string(),
        file_mode: DEFAULT_CONFIG_FILE_MODE,
        content: content.to_string(),
    }
}

/// Address a replica's service should listen on.
pub fn bind_address(platform: PlatformKind, member_dns: &str) -> &str {
    if platform.supports_member_dns() {
        member_dns
    } else {
        BIND_ALL_IP
    }
}

/// Host identity of a replica, read by the container entrypoint.
#[derive(Debug, Clone, Copy)]
pub struct SysConfig<'a> {
    pub platform: PlatformKind,
    pub member_dns: &'a str,
}

impl ConfigTemplate for SysConfig<'_> {
    const FILE_NAME: &'static str = "sys.conf";

    fn render(&self) -> String {
        format!(
            "PLATFORM={platform}\nSERVICE_MEMBER={member}\nBIND_IP={bind}\n",
            platform = self.platform,
            member = self.member_dns,
            bind = bind_address(self.platform, self.member_dns),
        )
    }
}
