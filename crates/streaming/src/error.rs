//! Errors surfaced by the pipelines and the node runtime.

use corelib::{EncodeError, Envelope, NodeId, TransportError};
use thiserror::Error;

/// Why one envelope could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The destination has no address. Broadcast envelopes land here too:
    /// they must be fanned out per peer before they reach the outbox.
    #[error("no address for destination {0}")]
    UnknownDestination(NodeId),

    /// The envelope cannot be put on the wire at all; nothing was sent.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: TransportError,
    },
}

/// An envelope the outbound pipeline gave up on, reported to the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub envelope: Envelope,
    pub error: DeliveryError,
}

/// The outbox was closed; the envelope is handed back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("outbox closed")]
pub struct QueueClosed(pub Envelope);

/// Errors from running a node.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
