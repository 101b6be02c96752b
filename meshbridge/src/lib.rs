//! meshbridge -- TCP-over-LoRa bridge daemons.
//!
//! Two roles share the [`meshstream`] transport:
//! - **client**: a local HTTP CONNECT proxy whose tunnels ride mesh streams
//!   to a gateway node;
//! - **gateway**: terminates those streams by dialing the requested targets
//!   and pumping bytes between sockets and streams.
//!
//! The radio is consumed behind [`radio::RadioLink`]; a UDP backend stands
//! in for the Meshtastic serial interface during development.

pub mod cli;
pub mod client;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod radio;

pub use cli::{Cli, Command};
pub use client::{ClientDaemon, ClientStreamManager, ProxyServer};
pub use config::{BridgeConfig, RadioConfig, RadioPeer};
pub use gateway::{GatewayDaemon, GatewayStreamManager};
pub use radio::{Datagram, RadioLink, RadioTransport, UdpRadioLink};
