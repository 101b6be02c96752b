//! Outbound TCP connection paired with one mesh stream on the gateway.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use meshstream::stream::Stream;

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// One dialed TCP connection bridged to a mesh stream.
pub struct OutboundConnection {
    stream: Arc<Stream>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: Mutex<Option<OwnedReadHalf>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl OutboundConnection {
    /// Dial the target with a bounded timeout.
    pub async fn connect(stream: Arc<Stream>, host: &str, port: u16) -> std::io::Result<Self> {
        let socket = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")
            })??;

        tracing::info!(
            "stream {:#x}: connected to {host}:{port}",
            stream.stream_id()
        );

        let (reader, writer) = socket.into_split();
        Ok(Self {
            stream,
            writer: tokio::sync::Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            pump: Mutex::new(None),
        })
    }

    /// Spawn the socket-to-stream pump. A remote close turns into a graceful
    /// stream FIN.
    pub fn start_forwarding(&self) {
        let Some(mut reader) = self.reader.lock().take() else {
            return;
        };
        let stream = self.stream.clone();

        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        tracing::info!("stream {:#x}: remote closed connection", stream.stream_id());
                        stream.close();
                        break;
                    }
                    Ok(n) => {
                        tracing::trace!(bytes = n, "socket -> stream");
                        if stream.send(&buf[..n]) == 0 {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(
                            "stream {:#x}: error reading from socket: {e}",
                            stream.stream_id()
                        );
                        break;
                    }
                }
            }
        });
        *self.pump.lock() = Some(handle);
    }

    /// Write stream bytes out to the TCP socket.
    pub async fn send(&self, data: &[u8]) -> bool {
        match self.writer.lock().await.write_all(data).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "stream {:#x}: error writing to socket: {e}",
                    self.stream.stream_id()
                );
                false
            }
        }
    }

    pub fn close(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        tracing::debug!(
            "stream {:#x}: outbound connection closed",
            self.stream.stream_id()
        );
    }
}
