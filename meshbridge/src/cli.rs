//! Command-line interface for the bridge daemons.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};

use meshstream::AckMethod;

use crate::config::{BridgeConfig, RadioConfig, RadioPeer};

#[derive(Parser, Debug)]
#[command(name = "meshbridge", version, about = "TCP-over-LoRa bridge for Meshtastic meshes")]
pub struct Cli {
    /// Path to a TOML config file; flags override its values.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level or env-filter directive (e.g. info, meshstream=debug).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the client daemon: a local HTTP CONNECT proxy tunneled to a
    /// gateway node.
    Client(ClientArgs),
    /// Run the gateway daemon: terminates tunnels onto the Internet.
    Gateway(GatewayArgs),
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Gateway node id (!hex, 0x-prefixed hex, or decimal).
    #[arg(long, value_parser = parse_node_id)]
    pub gateway_node_id: Option<u32>,

    /// Proxy listen address (host:port, or a bare port).
    #[arg(long)]
    pub listen: Option<String>,

    #[command(flatten)]
    pub radio: RadioArgs,

    #[command(flatten)]
    pub transport: TransportArgs,
}

impl ClientArgs {
    pub fn apply(&self, config: &mut BridgeConfig) -> anyhow::Result<()> {
        if let Some(id) = self.gateway_node_id {
            config.gateway_node_id = Some(id);
        }
        if let Some(listen) = &self.listen {
            let (host, port) = parse_listen(listen)?;
            if let Some(host) = host {
                config.listen_host = host;
            }
            config.listen_port = port;
        }
        self.radio.apply(&mut config.radio);
        self.transport.apply(&mut config.transport)
    }
}

#[derive(Args, Debug)]
pub struct GatewayArgs {
    #[command(flatten)]
    pub radio: RadioArgs,

    #[command(flatten)]
    pub transport: TransportArgs,
}

impl GatewayArgs {
    pub fn apply(&self, config: &mut BridgeConfig) -> anyhow::Result<()> {
        self.radio.apply(&mut config.radio);
        self.transport.apply(&mut config.transport)
    }
}

#[derive(Args, Debug)]
pub struct RadioArgs {
    /// Local mesh node id (!hex, 0x-prefixed hex, or decimal).
    #[arg(long, value_parser = parse_node_id)]
    pub node_id: Option<u32>,

    /// UDP radio bind address.
    #[arg(long)]
    pub radio_bind: Option<SocketAddr>,

    /// Peer address mapping <node-id>=<host:port>; repeatable.
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<RadioPeer>,
}

impl RadioArgs {
    fn apply(&self, config: &mut RadioConfig) {
        if let Some(id) = self.node_id {
            config.node_id = Some(id);
        }
        if let Some(bind) = self.radio_bind {
            config.bind = Some(bind);
        }
        if !self.peers.is_empty() {
            config.peers = self.peers.clone();
        }
    }
}

#[derive(Args, Debug)]
pub struct TransportArgs {
    /// Sliding window size (1..=32).
    #[arg(long)]
    pub window_size: Option<usize>,

    /// Retransmit timeout in milliseconds (>= 1000).
    #[arg(long)]
    pub retransmit_timeout: Option<u64>,

    /// Retransmit attempts before a stream is abandoned.
    #[arg(long)]
    pub max_retransmits: Option<u32>,

    /// Inactivity timeout in seconds.
    #[arg(long)]
    pub stream_timeout: Option<u64>,

    /// ACK policy: smart or basic.
    #[arg(long)]
    pub ack_method: Option<String>,
}

impl TransportArgs {
    fn apply(&self, config: &mut meshstream::Config) -> anyhow::Result<()> {
        if let Some(window_size) = self.window_size {
            config.window_size = window_size;
        }
        if let Some(timeout) = self.retransmit_timeout {
            config.retransmit_timeout_ms = timeout;
        }
        if let Some(max) = self.max_retransmits {
            config.max_retransmits = max;
        }
        if let Some(timeout) = self.stream_timeout {
            config.stream_timeout_s = timeout;
        }
        if let Some(method) = &self.ack_method {
            config.ack_method = match method.to_ascii_lowercase().as_str() {
                "smart" => AckMethod::Smart,
                "basic" => AckMethod::Basic,
                other => bail!("unknown ack method {other:?} (expected smart or basic)"),
            };
        }
        Ok(())
    }
}

/// Parse a node id: `!a1b2c3d4`, `0xa1b2c3d4`, or decimal.
pub fn parse_node_id(value: &str) -> Result<u32, String> {
    let value = value.trim();
    let parsed = if let Some(hex) = value.strip_prefix('!') {
        u32::from_str_radix(hex, 16)
    } else if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse::<u32>()
    };
    parsed.map_err(|e| format!("invalid node id {value:?}: {e}"))
}

fn parse_peer(value: &str) -> Result<RadioPeer, String> {
    let (node, addr) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <node-id>=<host:port>, got {value:?}"))?;
    Ok(RadioPeer {
        node_id: parse_node_id(node)?,
        addr: addr
            .parse()
            .map_err(|e| format!("invalid peer address {addr:?}: {e}"))?,
    })
}

/// Parse a listen address: `host:port` or a bare port.
fn parse_listen(value: &str) -> anyhow::Result<(Option<String>, u16)> {
    match value.rsplit_once(':') {
        Some((host, port)) => Ok((Some(host.to_string()), port.parse()?)),
        None => Ok((None, value.parse()?)),
    }
}
