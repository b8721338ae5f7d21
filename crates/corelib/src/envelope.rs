//! The envelope: the unit of communication between nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::{MessageId, NodeId};

/// An immutable message addressed to one node.
///
/// Fields are private so an envelope cannot change once built; it is cloned
/// by value whenever it crosses a queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Envelope {
    destination: NodeId,
    message_id: MessageId,
    payload: String,
}

impl Envelope {
    pub fn new(destination: NodeId, message_id: MessageId, payload: impl Into<String>) -> Self {
        Self {
            destination,
            message_id,
            payload: payload.into(),
        }
    }

    #[inline]
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    #[inline]
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    #[inline]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Take the payload, dropping the envelope.
    pub fn into_payload(self) -> String {
        self.payload
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope(dst={}, id={}, {} bytes)",
            self.destination,
            self.message_id,
            self.payload.len()
        )
    }
}
