//! Client daemon: wires the radio, stream manager, proxy server, and
//! retransmit ticker together.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use meshstream::RetransmitTicker;

use crate::client::manager::ClientStreamManager;
use crate::client::proxy::ProxyServer;
use crate::config::BridgeConfig;
use crate::radio::{Datagram, RadioLink, RadioTransport};

pub struct ClientDaemon {
    manager: Arc<ClientStreamManager>,
    proxy: ProxyServer,
    ticker: RetransmitTicker,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl ClientDaemon {
    pub async fn start(
        config: &BridgeConfig,
        link: Arc<dyn RadioLink>,
        mut datagrams: mpsc::Receiver<Datagram>,
    ) -> anyhow::Result<Self> {
        let gateway_node_id = config
            .gateway_node_id
            .context("gateway node id is required")?;

        let radio = RadioTransport::new(link);
        let manager = Arc::new(ClientStreamManager::new(
            gateway_node_id,
            Arc::new(config.transport.clone()),
            radio,
        ));

        let proxy = ProxyServer::bind(&config.listen_addr(), manager.clone())
            .await
            .context("binding proxy listener")?;
        proxy.start();

        let ticker = RetransmitTicker::new(config.transport.tick_interval());
        {
            let manager = manager.clone();
            ticker.start(move || manager.check_streams());
        }

        let dispatch = {
            let manager = manager.clone();
            tokio::spawn(async move {
                while let Some(datagram) = datagrams.recv().await {
                    if datagram.from_node == gateway_node_id {
                        manager.handle_frame(datagram.from_node, &datagram.payload);
                    } else {
                        tracing::debug!(
                            "ignoring datagram from non-gateway node {:#x}",
                            datagram.from_node
                        );
                    }
                }
            })
        };

        tracing::info!(
            proxy = %proxy.local_addr(),
            "client daemon started, gateway node {gateway_node_id:#x}"
        );

        Ok(Self {
            manager,
            proxy,
            ticker,
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    pub fn manager(&self) -> &Arc<ClientStreamManager> {
        &self.manager
    }

    pub fn shutdown(&self) {
        self.ticker.stop();
        self.proxy.stop();
        if let Some(handle) = self.dispatch.lock().take() {
            handle.abort();
        }
        self.manager.shutdown();
        tracing::info!("client daemon stopped");
    }
}
