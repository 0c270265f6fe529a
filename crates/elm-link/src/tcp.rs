//! TCP transport for Wi-Fi ELM327 dongles (usually `192.168.0.10:35000`).

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{LinkError, LinkResult};
use crate::transport::{Notification, Transport, notification_channel};

const READ_BUFFER: usize = 512;

/// Transport over a plain TCP socket.
pub struct TcpTransport {
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: JoinHandle<()>,
    peer: String,
}

impl TcpTransport {
    /// Connect to `address` and start forwarding everything the adapter
    /// sends as notifications.
    pub async fn connect(address: &str) -> LinkResult<(Self, mpsc::Receiver<Notification>)> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| address.to_string());
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = notification_channel();
        let reader = tokio::spawn(forward(read_half, tx));

        tracing::info!(peer = %peer, "adapter connected over TCP");
        Ok((
            Self {
                writer: Mutex::new(Some(write_half)),
                reader,
                peer,
            },
            rx,
        ))
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write(&self, bytes: &[u8]) -> LinkResult<()> {
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(LinkError::Closed)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn close(&self) -> LinkResult<()> {
        if let Some(mut stream) = self.writer.lock().await.take() {
            stream.shutdown().await?;
        }
        self.reader.abort();
        tracing::info!(peer = %self.peer, "adapter connection closed");
        Ok(())
    }
}

/// Reader task: forward socket reads until EOF, an error, or the link goes
/// away.
async fn forward(mut stream: OwnedReadHalf, tx: mpsc::Sender<Notification>) {
    let mut buf = [0u8; READ_BUFFER];
    loop {
        let notification = match stream.read(&mut buf).await {
            Ok(0) => {
                let _ = tx.send(Err(LinkError::Closed)).await;
                return;
            }
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) => {
                tracing::warn!(error = %e, "adapter read failed");
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        if tx.send(notification).await.is_err() {
            return;
        }
    }
}
