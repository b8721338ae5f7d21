//! Outbound pipeline.
//!
//! Drains a node's outbox one envelope at a time: resolve the destination,
//! encode, and hand the bytes to the transport under a per-attempt timeout.
//! Failed attempts are retried with exponential backoff. Envelopes that still
//! fail are reported on the failure queue instead of being dropped.
//!
//! Envelopes are delivered sequentially, so per-destination order follows
//! enqueue order as long as the transport keeps per-connection order.

use std::sync::Arc;

use corelib::{AddressBook, Envelope, NodeId, Transport, TransportError};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::codec::{self, WireFormat};
use crate::error::{DeliveryError, DeliveryFailure};
use crate::protocol::RetryPolicy;

/// Totals returned when the outbox closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutboundReport {
    pub delivered: u64,
    pub failed: u64,
}

pub struct OutboundPipeline<T: Transport> {
    node: NodeId,
    addresses: AddressBook,
    transport: Arc<T>,
    policy: RetryPolicy,
    format: WireFormat,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
}

impl<T: Transport> OutboundPipeline<T> {
    pub fn new(
        node: NodeId,
        addresses: AddressBook,
        transport: Arc<T>,
        policy: RetryPolicy,
        format: WireFormat,
        failures: mpsc::UnboundedSender<DeliveryFailure>,
    ) -> Self {
        Self {
            node,
            addresses,
            transport,
            policy,
            format,
            failures,
        }
    }

    /// Run until the outbox is closed and drained.
    ///
    /// The outbox closes when every sender is dropped, or when `close` fires
    /// (or its sender is dropped). Envelopes already queued at that point are
    /// still delivered; later sends on any outstanding handle are refused.
    pub async fn run(
        self,
        mut outbox: mpsc::UnboundedReceiver<Envelope>,
        mut close: oneshot::Receiver<()>,
    ) -> OutboundReport {
        let mut report = OutboundReport::default();
        let mut closing = false;

        loop {
            let envelope = tokio::select! {
                biased;
                _ = &mut close, if !closing => {
                    closing = true;
                    outbox.close();
                    continue;
                }
                envelope = outbox.recv() => envelope,
            };
            let Some(envelope) = envelope else {
                break;
            };

            match self.deliver(&envelope).await {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::counter!("fabric_outbound_delivered_total").increment(1);
                }
                Err(error) => {
                    report.failed += 1;
                    metrics::counter!("fabric_outbound_failed_total").increment(1);
                    warn!(
                        node = %self.node,
                        destination = %envelope.destination(),
                        message_id = %envelope.message_id(),
                        error = %error,
                        "delivery failed"
                    );
                    // Nobody listening for failures is not a reason to stop sending.
                    let _ = self.failures.send(DeliveryFailure { envelope, error });
                }
            }
        }

        debug!(
            node = %self.node,
            delivered = report.delivered,
            failed = report.failed,
            "outbox closed, outbound pipeline stopping"
        );
        report
    }

    /// Deliver one envelope, retrying per the policy.
    pub async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let destination = envelope.destination();
        let address = self
            .addresses
            .resolve(destination)
            .ok_or(DeliveryError::UnknownDestination(destination))?;

        let frame = codec::encode(envelope, self.format)?;
        let mut backoff = self.policy.initial_backoff;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let outcome = match tokio::time::timeout(
                self.policy.request_timeout,
                self.transport.request(address, frame.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.policy.request_timeout)),
            };

            match outcome {
                // The reply body carries nothing this layer needs.
                Ok(_reply) => {
                    trace!(
                        node = %self.node,
                        destination = %destination,
                        message_id = %envelope.message_id(),
                        attempts,
                        "envelope delivered"
                    );
                    return Ok(());
                }
                Err(last) if attempts >= self.policy.attempts() => {
                    return Err(DeliveryError::Exhausted { attempts, last });
                }
                Err(error) => {
                    metrics::counter!("fabric_outbound_retries_total").increment(1);
                    debug!(
                        node = %self.node,
                        destination = %destination,
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = self.policy.next_backoff(backoff);
                }
            }
        }
    }
}
