//! Porthole - multi-cluster Kubernetes console API

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use porthole::clusters::ClusterRegistry;
use porthole::relay::registry::ConnectionRegistry;
use porthole::server::{start_server, AppState};

/// Porthole - web console API over Kubernetes clusters
#[derive(Parser, Debug)]
#[command(name = "porthole", version, about, long_about = None)]
struct Cli {
    /// Address to bind the API server
    #[arg(long, env = "PORTHOLE_ADDR", default_value = "0.0.0.0:8080")]
    addr: std::net::SocketAddr,

    /// Kubeconfig whose contexts become the registered clusters.
    /// When absent, configuration is inferred (in-cluster or ambient
    /// default) and registered under a single name.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<String>,

    /// Cluster name used when configuration is inferred
    #[arg(long, env = "PORTHOLE_CLUSTER_NAME", default_value = "default")]
    cluster_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let clusters = match &cli.kubeconfig {
        Some(path) => ClusterRegistry::from_kubeconfig(path).await?,
        None => ClusterRegistry::infer(&cli.cluster_name).await?,
    };

    let state = AppState {
        clusters,
        connections: ConnectionRegistry::new(),
    };

    start_server(cli.addr, state).await?;
    Ok(())
}
