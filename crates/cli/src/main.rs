use anyhow::{Context, Result};
use clap::Parser;
use iarnet::{IarnetConfig, IarnetNode, NodeOptions};

mod cli_args;
mod tracing;

use cli_args::CliArgs;
use tracing::setup_logging;

fn load_config(args: &CliArgs) -> Result<IarnetConfig> {
    let mut config = match &args.config {
        Some(path) => IarnetConfig::load(path)?,
        None => IarnetConfig::default(),
    };

    if let Some(name) = &args.name {
        config.node.name = name.clone();
    }
    if !args.seed_peers.is_empty() {
        config.gossip.seed_peers = args.seed_peers.clone();
    }
    if args.no_mdns {
        config.gossip.mdns = false;
    }
    if let Some(bind) = &args.scheduler_bind {
        config.transport.rpc.scheduler.bind = bind.clone();
    }
    if let Some(bind) = &args.messaging_bind {
        config.transport.messaging.bind = bind.clone();
    }
    if let Some(db) = &args.db {
        config.persistence.path = db.to_string_lossy().to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging();

    let config = load_config(&args)?;
    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let options = NodeOptions {
        mesh: !args.standalone,
        persistence: true,
    };
    let node = IarnetNode::start_with(config, options)
        .await
        .context("starting scheduler node")?;

    log::info!("node is up; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    node.stop().await;
    Ok(())
}
