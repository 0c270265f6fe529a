//! Byte transport abstraction.
//!
//! A transport only moves bytes. Writes go through [`Transport::write`];
//! everything the adapter sends back arrives as [`Notification`]s on the
//! channel handed out when the transport is created, in arrival order and
//! in arbitrary chunk sizes. Turning chunks into replies is the link's job.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LinkResult;

/// One chunk of adapter output, or the reason the stream ended.
pub type Notification = LinkResult<Vec<u8>>;

/// Capacity of the notification channel.
pub const NOTIFICATION_CAPACITY: usize = 64;

/// Trait for byte transports to an ELM327 adapter.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write raw bytes to the adapter.
    async fn write(&self, bytes: &[u8]) -> LinkResult<()>;

    /// Release the underlying connection. Later writes fail.
    async fn close(&self) -> LinkResult<()> {
        Ok(())
    }
}

/// Create the notification channel a transport feeds.
pub fn notification_channel() -> (mpsc::Sender<Notification>, mpsc::Receiver<Notification>) {
    mpsc::channel(NOTIFICATION_CAPACITY)
}
