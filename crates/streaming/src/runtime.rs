//! Per-node runtime: one outbound and one inbound pipeline, each on its own
//! tokio task, sharing nothing but the queues.
//!
//! ```text
//! application ──enqueue──▶ outbox ──▶ OutboundPipeline ──▶ Transport ──▶ peer
//! peer ──▶ Listener ──▶ InboundPipeline ──▶ inbox ──recv──▶ application
//!                                   failures ◀── OutboundPipeline
//! ```

use std::sync::Arc;

use corelib::{Envelope, Listener, NodeId, NodeIdentity, Transport, TransportError};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::codec::WireFormat;
use crate::error::{DeliveryFailure, QueueClosed, RuntimeError};
use crate::protocol::RetryPolicy;
use crate::receiver::{InboundPipeline, InboundStats};
use crate::sender::{OutboundPipeline, OutboundReport};

/// Knobs for a node's pipelines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeOptions {
    pub retry: RetryPolicy,
    pub wire_format: WireFormat,
}

/// Final counters of a stopped node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeReport {
    pub outbound: OutboundReport,
    pub received: u64,
    pub decode_errors: u64,
}

/// A running node.
///
/// Dropping the runtime closes the outbox, including for handles taken with
/// [`outbox`](Self::outbox); the inbound task keeps running until its
/// listener closes. Prefer [`shutdown`](Self::shutdown).
pub struct NodeRuntime {
    id: NodeId,
    outbox: Option<mpsc::UnboundedSender<Envelope>>,
    close: Option<oneshot::Sender<()>>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    failures: mpsc::UnboundedReceiver<DeliveryFailure>,
    stats: Arc<InboundStats>,
    outbound: JoinHandle<OutboundReport>,
    inbound: JoinHandle<Result<(), TransportError>>,
}

impl NodeRuntime {
    /// Spawn both pipelines for `identity`. Must be called inside a tokio
    /// runtime.
    pub fn spawn<T, L>(
        identity: &NodeIdentity,
        transport: Arc<T>,
        listener: L,
        options: RuntimeOptions,
    ) -> Self
    where
        T: Transport,
        L: Listener,
    {
        let id = identity.id();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let stats = Arc::new(InboundStats::default());

        let outbound = OutboundPipeline::new(
            id,
            identity.address_book().clone(),
            transport,
            options.retry,
            options.wire_format,
            failure_tx,
        );
        let inbound = InboundPipeline::new(id, listener, inbox_tx, Arc::clone(&stats));

        info!(
            node = %id,
            address = identity.address(),
            peers = identity.peers().len(),
            "node started"
        );

        Self {
            id,
            outbox: Some(outbox_tx),
            close: Some(close_tx),
            inbox: inbox_rx,
            failures: failure_rx,
            stats,
            outbound: tokio::spawn(outbound.run(outbox_rx, close_rx)),
            inbound: tokio::spawn(inbound.run()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Queue an envelope for delivery.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), QueueClosed> {
        match &self.outbox {
            Some(outbox) => outbox.send(envelope).map_err(|e| QueueClosed(e.0)),
            None => Err(QueueClosed(envelope)),
        }
    }

    /// Another producer handle on the outbox, if it is still open.
    ///
    /// Sends on it are refused once [`close_outbox`](Self::close_outbox) runs.
    pub fn outbox(&self) -> Option<mpsc::UnboundedSender<Envelope>> {
        self.outbox.clone()
    }

    /// Close the outbox for every handle. Envelopes already queued are still
    /// delivered, then the outbound pipeline stops.
    pub fn close_outbox(&mut self) {
        self.outbox = None;
        if let Some(close) = self.close.take() {
            // The pipeline may already have stopped on its own.
            let _ = close.send(());
        }
    }

    /// Wait for the next inbound envelope.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.inbox.try_recv().ok()
    }

    /// Wait for the next envelope the outbound pipeline gave up on.
    pub async fn next_failure(&mut self) -> Option<DeliveryFailure> {
        self.failures.recv().await
    }

    pub fn try_failure(&mut self) -> Option<DeliveryFailure> {
        self.failures.try_recv().ok()
    }

    pub fn stats(&self) -> &InboundStats {
        &self.stats
    }

    /// Whether the outbound pipeline has finished.
    pub fn outbound_finished(&self) -> bool {
        self.outbound.is_finished()
    }

    /// Whether the inbound pipeline has finished, either because its listener
    /// closed or because it failed.
    pub fn inbound_finished(&self) -> bool {
        self.inbound.is_finished()
    }

    /// Close the outbox, wait for queued envelopes to be sent, then stop the
    /// inbound pipeline.
    ///
    /// Returns the inbound pipeline's transport error if it had already
    /// failed on its own.
    pub async fn shutdown(mut self) -> Result<RuntimeReport, RuntimeError> {
        self.close_outbox();
        let outbound = self.outbound.await?;

        let inbound_failed = if self.inbound.is_finished() {
            self.inbound.await?.err()
        } else {
            self.inbound.abort();
            None
        };

        let report = RuntimeReport {
            outbound,
            received: self.stats.received(),
            decode_errors: self.stats.decode_errors(),
        };
        info!(
            node = %self.id,
            delivered = report.outbound.delivered,
            failed = report.outbound.failed,
            received = report.received,
            "node stopped"
        );

        match inbound_failed {
            Some(err) => Err(err.into()),
            None => Ok(report),
        }
    }
}
