//! In-process transport.
//!
//! A [`MemoryNetwork`] is a registry of bound addresses. Requests are routed
//! straight to the listener's channel and the reply comes back on a oneshot,
//! mirroring the request/reply discipline of a real socket.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use corelib::{Exchange, Transport, TransportError};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::ChannelListener;

type Endpoints = Arc<DashMap<String, mpsc::UnboundedSender<Exchange>>>;

/// Registry of in-process endpoints. Clones share the registry.
#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    endpoints: Endpoints,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `address`, returning the listener that receives its traffic.
    pub fn bind(&self, address: &str) -> Result<ChannelListener, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.endpoints.entry(address.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TransportError::Bind {
                address: address.to_owned(),
                reason: "address already in use".into(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
                debug!(address, "memory endpoint bound");
                Ok(ChannelListener::new(address, rx))
            }
        }
    }

    /// Remove `address`. Its listener reports `Closed` once drained.
    pub fn unbind(&self, address: &str) -> bool {
        self.endpoints.remove(address).is_some()
    }

    /// A client handle routing through this network.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            endpoints: Arc::clone(&self.endpoints),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemoryTransport {
    endpoints: Endpoints,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn request(&self, address: &str, message: Bytes) -> Result<Bytes, TransportError> {
        // Clone the sender out so no map guard is held across the await.
        let endpoint = self
            .endpoints
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::ConnectFailed {
                address: address.to_owned(),
                reason: "no listener bound".into(),
            })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        endpoint
            .send(Exchange::new(message, reply_tx))
            .map_err(|_| TransportError::SendFailed(format!("listener at {address} is gone")))?;

        reply_rx
            .await
            .map_err(|_| TransportError::ReceiveFailed(format!("{address} dropped the request")))
    }
}
