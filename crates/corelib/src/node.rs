//! Node identity and message-ID assignment.
//!
//! Nodes are identified by a compact `NodeId` that is cheap to compare and
//! hash. A [`NodeIdentity`] is the per-node state built once from the
//! [`Topology`](crate::topology::Topology) at startup: own ID and address, the
//! peer list, a read-only address book, and the message-ID counter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::topology::Topology;

/// Spacing between the message-ID ranges of consecutive node IDs.
///
/// A node with ID `n` starts numbering at `n * MESSAGE_ID_STRIDE`. IDs stay
/// unique across the cluster only while every node originates fewer than
/// this many messages and node IDs are small and distinct.
pub const MESSAGE_ID_STRIDE: i64 = 1000;

/// Identifier for a node in the cluster.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i32);

impl NodeId {
    /// Reserved destination meaning "every peer except the sender".
    pub const BROADCAST: NodeId = NodeId(-1);

    #[inline]
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an originated message, unique per originating node.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    /// First message ID handed out by `node`.
    pub fn seed(node: NodeId) -> Self {
        MessageId(i64::from(node.0) * MESSAGE_ID_STRIDE)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only map of node ID to address, shared between a node and its
/// pipelines.
///
/// Cloning is an `Arc` bump; the map is never mutated after construction so
/// concurrent readers need no synchronization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressBook(Arc<BTreeMap<NodeId, String>>);

impl AddressBook {
    pub fn new(entries: BTreeMap<NodeId, String>) -> Self {
        Self(Arc::new(entries))
    }

    /// Address of `id`, if it is a cluster member.
    pub fn resolve(&self, id: NodeId) -> Option<&str> {
        self.0.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.0.iter().map(|(id, addr)| (*id, addr.as_str()))
    }
}

/// Per-node state: identity, peers, and the message-ID counter.
///
/// Origination takes `&mut self`, so a single owner serializes counter
/// increments. Sharing one identity between several originators requires an
/// external lock; without one, IDs are not guaranteed unique.
#[derive(Clone, Debug)]
pub struct NodeIdentity {
    id: NodeId,
    address: String,
    peer_ids: Vec<NodeId>,
    addresses: AddressBook,
    next_message_id: MessageId,
}

impl NodeIdentity {
    /// Build the identity of node `id` from a snapshot of `topology`.
    ///
    /// Fails with [`Error::UnknownNode`] if `id` is not configured.
    pub fn new(id: NodeId, topology: &Topology) -> Result<Self> {
        let address = topology
            .address(id)
            .ok_or(Error::UnknownNode(id))?
            .to_owned();

        let peer_ids = topology
            .ids()
            .iter()
            .copied()
            .filter(|peer| *peer != id)
            .collect();

        let addresses = AddressBook::new(
            topology
                .iter()
                .map(|(node, addr)| (node, addr.to_owned()))
                .collect(),
        );

        Ok(Self {
            id,
            address,
            peer_ids,
            addresses,
            next_message_id: MessageId::seed(id),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Every other node in the cluster, in configuration order.
    pub fn peers(&self) -> &[NodeId] {
        &self.peer_ids
    }

    /// Address book covering every node, including this one.
    pub fn address_book(&self) -> &AddressBook {
        &self.addresses
    }

    /// The ID the next originated envelope will carry.
    pub fn next_message_id(&self) -> MessageId {
        self.next_message_id
    }

    /// Originate one point-to-point envelope, consuming one message ID.
    pub fn envelope(&mut self, destination: NodeId, payload: impl Into<String>) -> Envelope {
        let message_id = self.take_message_id();
        Envelope::new(destination, message_id, payload)
    }

    /// Fan `payload` out to every peer, one envelope (and one ID) per peer.
    pub fn broadcast(&mut self, payload: impl Into<String>) -> Vec<Envelope> {
        let payload = payload.into();
        let peers = self.peer_ids.clone();
        peers
            .into_iter()
            .map(|peer| self.envelope(peer, payload.clone()))
            .collect()
    }

    /// Originate toward `destination`, expanding [`NodeId::BROADCAST`].
    pub fn originate(&mut self, destination: NodeId, payload: impl Into<String>) -> Vec<Envelope> {
        if destination.is_broadcast() {
            self.broadcast(payload)
        } else {
            vec![self.envelope(destination, payload)]
        }
    }

    fn take_message_id(&mut self) -> MessageId {
        let current = self.next_message_id;
        self.next_message_id = MessageId(current.0.wrapping_add(1));
        current
    }
}
