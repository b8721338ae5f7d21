//! Inbound pipeline.
//!
//! Pulls raw messages from a [`Listener`] one at a time, decodes them, pushes
//! the envelopes onto the node's inbox and acknowledges each exchange before
//! receiving the next. Undecodable messages are counted and acknowledged
//! anyway; they never stop the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use corelib::{Envelope, Listener, NodeId, TransportError};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::codec;
use crate::protocol::ACK;

/// Live counters for one inbound pipeline.
#[derive(Debug, Default)]
pub struct InboundStats {
    received: AtomicU64,
    decode_errors: AtomicU64,
}

impl InboundStats {
    /// Envelopes decoded and handed to the inbox.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Messages that could not be decoded.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

pub struct InboundPipeline<L: Listener> {
    node: NodeId,
    listener: L,
    inbox: mpsc::UnboundedSender<Envelope>,
    stats: Arc<InboundStats>,
}

impl<L: Listener> InboundPipeline<L> {
    pub fn new(
        node: NodeId,
        listener: L,
        inbox: mpsc::UnboundedSender<Envelope>,
        stats: Arc<InboundStats>,
    ) -> Self {
        Self {
            node,
            listener,
            inbox,
            stats,
        }
    }

    /// Run until the listener closes or fails, or the inbox consumer goes
    /// away.
    ///
    /// A cleanly closed listener returns `Ok(())`; any other transport error
    /// is returned as-is.
    pub async fn run(mut self) -> Result<(), TransportError> {
        loop {
            let exchange = match self.listener.recv().await {
                Ok(exchange) => exchange,
                Err(TransportError::Closed) => {
                    debug!(node = %self.node, "listener closed, inbound pipeline stopping");
                    return Ok(());
                }
                Err(err) => {
                    warn!(node = %self.node, error = %err, "listener failed, inbound pipeline stopping");
                    return Err(err);
                }
            };

            let mut inbox_closed = false;
            match codec::decode(exchange.message()) {
                Ok(envelope) => {
                    trace!(
                        node = %self.node,
                        message_id = %envelope.message_id(),
                        "envelope received"
                    );
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("fabric_inbound_received_total").increment(1);
                    inbox_closed = self.inbox.send(envelope).is_err();
                }
                Err(err) => {
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("fabric_inbound_decode_errors_total").increment(1);
                    warn!(
                        node = %self.node,
                        error = %err,
                        bytes = exchange.message().len(),
                        "dropping undecodable message"
                    );
                }
            }

            if let Err(err) = exchange.reply(Bytes::from_static(ACK)) {
                debug!(node = %self.node, error = %err, "could not acknowledge message");
            }

            if inbox_closed {
                debug!(node = %self.node, "inbox consumer gone, inbound pipeline stopping");
                return Ok(());
            }
        }
    }
}
