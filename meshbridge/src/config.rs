//! Bridge configuration: daemon-level settings wrapped around the protocol
//! tunables, loadable from a TOML file with CLI overrides applied on top.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address the client-side HTTP CONNECT proxy listens on.
    pub listen_host: String,
    pub listen_port: u16,
    /// Mesh node id of the gateway (client side only).
    pub gateway_node_id: Option<u32>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub radio: RadioConfig,
    /// Stream transport tunables.
    pub transport: meshstream::Config,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".into(),
            listen_port: 3128,
            gateway_node_id: None,
            log_level: "info".into(),
            log_file: None,
            radio: RadioConfig::default(),
            transport: meshstream::Config::default(),
        }
    }
}

impl BridgeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

/// Settings for the UDP development radio backend.
///
/// The real Meshtastic serial radio is consumed behind the
/// [`RadioLink`](crate::radio::RadioLink) trait; this backend stands in for
/// it on a LAN so the two daemons can be exercised end to end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Local mesh node id.
    pub node_id: Option<u32>,
    /// UDP bind address for the backend.
    pub bind: Option<SocketAddr>,
    /// Known peers: node id to UDP address.
    pub peers: Vec<RadioPeer>,
}

impl RadioConfig {
    pub fn peer_map(&self) -> HashMap<u32, SocketAddr> {
        self.peers
            .iter()
            .map(|peer| (peer.node_id, peer.addr))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioPeer {
    pub node_id: u32,
    pub addr: SocketAddr,
}
