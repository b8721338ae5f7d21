//! Core library for the peer-to-peer messaging fabric.
//!
//! This crate provides the fundamental abstractions shared by every node:
//! - Static topology loading and validation
//! - Node identity and message-ID assignment
//! - The envelope data model
//! - The error taxonomy
//! - Request/reply transport contracts

pub mod envelope;
pub mod error;
pub mod network;
pub mod node;
pub mod topology;

pub use envelope::Envelope;
pub use error::{ConfigError, DecodeError, EncodeError, Error, Result, TransportError};
pub use network::{Exchange, Listener, Transport};
pub use node::{AddressBook, MessageId, NodeId, NodeIdentity, MESSAGE_ID_STRIDE};
pub use topology::{Topology, TopologyBuilder};
