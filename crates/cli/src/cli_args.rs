use clap::Parser;
use std::path::PathBuf;

/// Run one scheduler node.
#[derive(Debug, Parser)]
#[command(name = "iarnet", version, about = "Federated compute scheduler node")]
pub struct CliArgs {
    /// Path to the node's TOML configuration. Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the node display name.
    #[arg(long)]
    pub name: Option<String>,

    /// Seed peer multiaddr; repeat for several peers.
    #[arg(long = "seed-peer")]
    pub seed_peers: Vec<String>,

    /// Disable mDNS discovery (rely on seed peers only).
    #[arg(long)]
    pub no_mdns: bool,

    /// Override the mesh listen multiaddr.
    #[arg(long)]
    pub scheduler_bind: Option<String>,

    /// Override the messaging router bind address.
    #[arg(long)]
    pub messaging_bind: Option<String>,

    /// Override the provider database path.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Run without joining a mesh (single-node mode).
    #[arg(long)]
    pub standalone: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    pub print_config: bool,
}
