//! keeld: the Keel control plane daemon.
//!
//! Resolves the container platform and cluster, validates TLS material,
//! opens the control database and brings up the service manager.
//!
//! # Usage
//!
//! ```text
//! keeld --container-platform ecs --cluster c1 --zones us-east-1a,us-east-1b
//! CLUSTER=c1 keeld --container-platform swarm --data-dir /var/lib/keel
//! keeld scaffold --cluster c1 --region us-east-1 --zones us-east-1a > keel.toml
//! ```

mod settings;
mod tls;

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keel_container::{ContainerPlatform, Context, EcsPlatform, LocalEcs, LocalSwarm, SwarmPlatform};
use keel_core::{KeelConfig, PlatformKind};
use keel_manage::{ManagerConfig, ServiceManager};
use keel_state::StateStore;

use crate::settings::{RunArgs, Settings};

const DEFAULT_LOG_FILTER: &str = "info,keeld=debug,keel=debug";

#[derive(Parser)]
#[command(name = "keeld", about = "Keel control plane daemon")]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print a minimal keel.toml for a cluster.
    Scaffold {
        #[arg(long)]
        cluster: String,

        #[arg(long)]
        region: String,

        /// Availability zones, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        zones: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Scaffold {
            cluster,
            region,
            zones,
        }) => {
            let zones: Vec<&str> = zones.iter().map(String::as_str).collect();
            print!("{}", KeelConfig::scaffold(&cluster, &region, &zones).to_toml_string()?);
            Ok(())
        }
        None => run(cli.run).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let file = args
        .config
        .as_deref()
        .map(|path| {
            KeelConfig::from_file(path).with_context(|| format!("reading {}", path.display()))
        })
        .transpose()?;
    let settings = Settings::resolve(&args, file, |key| std::env::var(key).ok())?;
    let cluster = settings.keel.cluster.name.clone();

    info!(platform = %settings.platform, %cluster, "keel daemon starting");

    // Refuse to start insecurely when TLS was asked for.
    match &settings.tls {
        Some(paths) => tls::check(&paths.cert, &paths.key)?,
        None => warn!("tls disabled"),
    }

    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("creating data dir {}", settings.data_dir.display()))?;
    let db_path = settings.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "control database opened");

    let root = Context::background();
    let platform: Arc<dyn ContainerPlatform> = match settings.platform {
        PlatformKind::Ecs => {
            let ecs = EcsPlatform::new(LocalEcs::with_region(&settings.keel.cluster.region));
            ecs.create_cluster(&root, &cluster).await?;
            Arc::new(ecs)
        }
        PlatformKind::Swarm => Arc::new(SwarmPlatform::new(LocalSwarm::new(), cluster.as_str())),
    };

    let manager = ServiceManager::new(ManagerConfig::from_config(&settings.keel), store, platform);
    let services = manager.list_services()?;
    info!(
        %cluster,
        domain = %manager.config().domain,
        zones = ?manager.config().zones,
        services = services.len(),
        "keel daemon ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    root.cancel();

    info!("keel daemon stopped");
    Ok(())
}
