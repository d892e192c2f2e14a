//! Fabric Services Synchronizer Operator
//!
//! Kubernetes operator translating NetworkAttachmentDefinitions into
//! fabric objects on an external Fabric Services System.

use clap::{Parser, Subcommand};
use fabricsync_operator::{
    controllers::{Context, NadController},
    crds::NetworkAttachmentDefinition,
    provider::new_vlan_provider,
};
use kube::CustomResourceExt;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fabricsync-operator")]
#[command(about = "Synchronizes VLAN-backed secondary networks to a Fabric Services System")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print CRD manifests to stdout
    Crds,
    /// Run the topology controller
    Run {
        /// VLAN provider backend
        #[arg(long, default_value = "baremetal")]
        provider: String,

        /// File containing credentials to access the external provider
        #[arg(long, default_value = "/etc/config/fss.conf")]
        provider_config: String,

        /// Namespace holding the operator's bookkeeping ConfigMap
        #[arg(long, env = "POD_NAMESPACE")]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();

    match cli.command {
        Commands::Crds => {
            print_crds();
            Ok(())
        }
        Commands::Run {
            provider,
            provider_config,
            namespace,
        } => run_operator(&provider, &provider_config, &namespace).await,
    }
}

fn print_crds() {
    println!("---");
    println!(
        "{}",
        serde_yaml::to_string(&NetworkAttachmentDefinition::crd())
            .expect("Failed to serialize NetworkAttachmentDefinition CRD")
    );
}

async fn run_operator(
    provider_name: &str,
    provider_config: &str,
    namespace: &str,
) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting fabricsync-operator");

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes");

    let mut provider = new_vlan_provider(provider_name, provider_config)?;
    provider.connect(client.clone(), namespace).await?;
    info!(provider = provider_name, "Connected to VLAN provider");

    let ctx = Arc::new(Context::new(client.clone(), provider));
    NadController::run(client, ctx).await;

    Ok(())
}
