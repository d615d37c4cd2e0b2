//! Startup settings: command line flags layered over `keel.toml`.

use std::path::PathBuf;

use anyhow::bail;
use clap::Args;
use tracing::warn;

use keel_core::config::ClusterConfig;
use keel_core::{KeelConfig, PlatformKind};

pub const DEFAULT_DATA_DIR: &str = "/var/lib/keel";
/// File name of the control database inside the data directory.
pub const DB_FILE: &str = "controldb.redb";
/// Environment variable naming the cluster a swarm hosts.
pub const SWARM_CLUSTER_ENV: &str = "CLUSTER";

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Container platform: ecs or swarm.
    #[arg(long = "container-platform")]
    pub platform: Option<PlatformKind>,

    /// Data directory for the control database.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// ECS cluster name.
    #[arg(long, env = "ECS_CLUSTER")]
    pub cluster: Option<String>,

    /// Region the cluster runs in.
    #[arg(long)]
    pub region: Option<String>,

    /// Availability zones, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub zones: Vec<String>,

    /// Serve the control plane over TLS.
    #[arg(long)]
    pub tls_verify: bool,

    /// PEM certificate chain.
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Path to keel.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub platform: PlatformKind,
    pub data_dir: PathBuf,
    /// The effective configuration, flags applied.
    pub keel: KeelConfig,
    pub tls: Option<TlsPaths>,
}

impl Settings {
    /// Merge flags over the file config. `env` looks up environment variables.
    pub fn resolve(
        args: &RunArgs,
        file: Option<KeelConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut keel = file.unwrap_or_else(|| KeelConfig {
            platform: None,
            data_dir: None,
            cluster: ClusterConfig {
                name: String::new(),
                region: "local".to_string(),
                zones: Vec::new(),
                domain: None,
            },
            defaults: None,
            tls: None,
        });

        let platform = args.platform.or(keel.platform).unwrap_or(PlatformKind::Ecs);
        keel.platform = Some(platform);

        let cluster = match platform {
            PlatformKind::Swarm => match env(SWARM_CLUSTER_ENV) {
                Some(name) if !name.is_empty() => name,
                _ => bail!("swarm requires the {SWARM_CLUSTER_ENV} environment variable"),
            },
            PlatformKind::Ecs => args
                .cluster
                .clone()
                .unwrap_or_else(|| keel.cluster.name.clone()),
        };
        if cluster.is_empty() {
            bail!("no ecs cluster: pass --cluster or set ECS_CLUSTER");
        }
        keel.cluster.name = cluster;

        if let Some(region) = &args.region {
            keel.cluster.region = region.clone();
        }
        if !args.zones.is_empty() {
            keel.cluster.zones = args.zones.clone();
        }
        if keel.cluster.zones.is_empty() {
            warn!(cluster = %keel.cluster.name, "no availability zones configured; service creation will be rejected");
        }

        let data_dir = args
            .data_dir
            .clone()
            .or_else(|| keel.data_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let tls = if args.tls_verify {
            let file_tls = keel.tls.as_ref();
            let cert = args
                .tls_cert
                .clone()
                .or_else(|| file_tls.and_then(|t| t.cert_file.as_ref().map(PathBuf::from)));
            let key = args
                .tls_key
                .clone()
                .or_else(|| file_tls.and_then(|t| t.key_file.as_ref().map(PathBuf::from)));
            match (cert, key) {
                (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
                _ => bail!("tls requested but --tls-cert or --tls-key is missing"),
            }
        } else {
            None
        };

        Ok(Self {
            platform,
            data_dir,
            keel,
            tls,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }
}
