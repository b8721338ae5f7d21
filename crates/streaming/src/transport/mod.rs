//! Transport implementations.
//!
//! - [`memory`]: in-process network for tests and single-process clusters
//! - [`tcp`]: length-prefixed request/reply over TCP
//!
//! Both hand inbound exchanges to the node through a [`ChannelListener`].

pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use corelib::{Exchange, Listener, TransportError};
use tokio::sync::mpsc;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpListenerHandle, TcpTransport};

/// Listener fed by a channel of exchanges.
///
/// Reports [`TransportError::Closed`] once every producer is gone.
#[derive(Debug)]
pub struct ChannelListener {
    address: String,
    exchanges: mpsc::UnboundedReceiver<Exchange>,
}

impl ChannelListener {
    pub fn new(address: impl Into<String>, exchanges: mpsc::UnboundedReceiver<Exchange>) -> Self {
        Self {
            address: address.into(),
            exchanges,
        }
    }

    /// Address this listener was bound to.
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Listener for ChannelListener {
    async fn recv(&mut self) -> Result<Exchange, TransportError> {
        self.exchanges.recv().await.ok_or(TransportError::Closed)
    }
}
