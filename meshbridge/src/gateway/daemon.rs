//! Gateway daemon: wires the radio, stream manager, and retransmit ticker
//! together.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use meshstream::RetransmitTicker;

use crate::config::BridgeConfig;
use crate::gateway::manager::GatewayStreamManager;
use crate::radio::{Datagram, RadioLink, RadioTransport};

pub struct GatewayDaemon {
    manager: Arc<GatewayStreamManager>,
    ticker: RetransmitTicker,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayDaemon {
    pub async fn start(
        config: &BridgeConfig,
        link: Arc<dyn RadioLink>,
        mut datagrams: mpsc::Receiver<Datagram>,
    ) -> anyhow::Result<Self> {
        let radio = RadioTransport::new(link);
        let manager = Arc::new(GatewayStreamManager::new(
            Arc::new(config.transport.clone()),
            radio,
        ));

        let ticker = RetransmitTicker::new(config.transport.tick_interval());
        {
            let manager = manager.clone();
            // The sweep drains residual bytes to sockets, so it runs as a
            // task of its own.
            ticker.start(move || {
                let manager = manager.clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.check_streams().await {
                        tracing::error!("stream sweep failed: {e}");
                    }
                });
                Ok(())
            });
        }

        let dispatch = {
            let manager = manager.clone();
            tokio::spawn(async move {
                while let Some(datagram) = datagrams.recv().await {
                    manager.handle_frame(datagram.from_node, &datagram.payload).await;
                }
            })
        };

        tracing::info!("gateway daemon started");
        Ok(Self {
            manager,
            ticker,
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    pub fn manager(&self) -> &Arc<GatewayStreamManager> {
        &self.manager
    }

    pub async fn shutdown(&self) {
        self.ticker.stop();
        if let Some(handle) = self.dispatch.lock().take() {
            handle.abort();
        }
        self.manager.shutdown().await;
        tracing::info!("gateway daemon stopped");
    }
}
