//! keel.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::platform::PlatformKind;
use crate::types::Resources;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeelConfig {
    pub platform: Option<PlatformKind>,
    pub data_dir: Option<String>,
    pub cluster: ClusterConfig,
    pub defaults: Option<ResourcesConfig>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub region: String,
    pub zones: Vec<String>,
    /// Overrides the default `{cluster}-keel.com` domain.
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    pub max_cpu_units: Option<u64>,
    pub reserve_cpu_units: Option<u64>,
    pub max_mem_mb: Option<u64>,
    pub reserve_mem_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

impl KeelConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: KeelConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Default service resources, with unset fields taken from the built-in defaults.
    pub fn default_resources(&self) -> Resources {
        let base = Resources::default();
        match &self.defaults {
            Some(d) => Resources {
                max_cpu_units: d.max_cpu_units.unwrap_or(base.max_cpu_units),
                reserve_cpu_units: d.reserve_cpu_units.unwrap_or(base.reserve_cpu_units),
                max_mem_mb: d.max_mem_mb.unwrap_or(base.max_mem_mb),
                reserve_mem_mb: d.reserve_mem_mb.unwrap_or(base.reserve_mem_mb),
            },
            None => base,
        }
    }

    /// DNS domain of the cluster.
    pub fn domain(&self) -> String {
        self.cluster
            .domain
            .clone()
            .unwrap_or_else(|| crate::naming::default_domain(&self.cluster.name))
    }

    /// Scaffold a minimal keel.toml for a cluster.
    pub fn scaffold(cluster: &str, region: &str, zones: &[&str]) -> Self {
        KeelConfig {
            platform: Some(PlatformKind::Ecs),
            data_dir: None,
            cluster: ClusterConfig {
                name: cluster.to_string(),
                region: region.to_string(),
                zones: zones.iter().map(|z| z.to_string()).collect(),
                domain: None,
            },
            defaults: None,
            tls: None,
        }
    }
}
