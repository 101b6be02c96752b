//! `meshbridge` binary: client and gateway daemons.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

use meshbridge::cli::{Cli, Command};
use meshbridge::client::ClientDaemon;
use meshbridge::config::BridgeConfig;
use meshbridge::gateway::GatewayDaemon;
use meshbridge::logging;
use meshbridge::radio::{Datagram, UdpRadioLink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(file) = &cli.log_file {
        config.log_file = Some(file.clone());
    }
    logging::init(&config.log_level, config.log_file.as_deref())?;

    match &cli.command {
        Command::Client(args) => {
            args.apply(&mut config)?;
            config.transport.validate()?;
            run_client(config).await
        }
        Command::Gateway(args) => {
            args.apply(&mut config)?;
            config.transport.validate()?;
            run_gateway(config).await
        }
    }
}

async fn bind_radio(
    config: &BridgeConfig,
) -> anyhow::Result<(Arc<UdpRadioLink>, mpsc::Receiver<Datagram>)> {
    let node_id = config
        .radio
        .node_id
        .context("radio node id is required (--node-id)")?;
    let bind = config
        .radio
        .bind
        .context("radio bind address is required (--radio-bind)")?;

    let link = UdpRadioLink::bind(node_id, bind, config.radio.peer_map()).await?;
    let (tx, rx) = mpsc::channel(256);
    link.start_receive(tx);
    Ok((link, rx))
}

async fn run_client(config: BridgeConfig) -> anyhow::Result<()> {
    let (link, datagrams) = bind_radio(&config).await?;
    let daemon = ClientDaemon::start(&config, link, datagrams).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("received interrupt, shutting down");
    daemon.shutdown();
    Ok(())
}

async fn run_gateway(config: BridgeConfig) -> anyhow::Result<()> {
    let (link, datagrams) = bind_radio(&config).await?;
    let daemon = GatewayDaemon::start(&config, link, datagrams).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("received interrupt, shutting down");
    daemon.shutdown().await;
    Ok(())
}
