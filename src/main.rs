use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streamops::crd::{EngineConfig, StreamDeployment};
use streamops::service::rest::RestControlPlane;

/// Operator managing StreamDeployment clusters
#[derive(Parser)]
#[command(name = "streamops", version)]
struct Args {
    /// Print the CustomResourceDefinition as YAML and exit
    #[arg(long)]
    crd: bool,

    /// Base URL of the cluster manager API
    #[arg(
        long,
        env = "STREAMOPS_CONTROL_PLANE_URL",
        default_value = "http://cluster-manager:8080"
    )]
    control_plane_url: String,

    /// YAML file of default engine configuration applied under every
    /// deployment's own config
    #[arg(long, env = "STREAMOPS_DEFAULT_CONFIG")]
    default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.crd {
        println!("{}", serde_yaml::to_string(&StreamDeployment::crd())?);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let defaults: EngineConfig = match &args.default_config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading default config {}", path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing default config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    info!(
        control_plane = %args.control_plane_url,
        defaults = defaults.len(),
        "streamops operator starting"
    );

    let client = Client::try_default()
        .await
        .context("connecting to the Kubernetes API")?;
    let control_plane = Arc::new(RestControlPlane::new(args.control_plane_url.as_str())?);

    streamops::controller::run(client, control_plane, defaults).await?;
    Ok(())
}
