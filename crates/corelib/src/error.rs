//! Error types for the core library.
//!
//! The taxonomy is split by who has to react to it:
//!
//! - [`ConfigError`] is fatal at startup; no node may be created from a
//!   rejected topology.
//! - [`DecodeError`] is per-message and never stops a pipeline.
//! - [`EncodeError`] is per-message on the sending side and fails only that
//!   envelope.
//! - [`TransportError`] comes from the external transport primitive and is
//!   surfaced to the caller once retries are exhausted.

use std::time::Duration;

use thiserror::Error;

use crate::node::NodeId;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading the static topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Two entries share a node ID.
    #[error("{id}: duplicate node ID, node IDs must be unique")]
    DuplicateId { id: NodeId },

    /// Two entries with different IDs share an address.
    #[error("{address}: duplicate address (already used by node {existing}), addresses must be unique")]
    DuplicateAddress { address: String, existing: NodeId },

    /// A non-comment, non-blank line that is not a valid `id, address` pair.
    #[error("line {line}: {reason}")]
    Unparseable { line: usize, reason: String },

    /// The configuration source could not be read.
    #[error("failed to read configuration: {0}")]
    Io(String),
}

impl ConfigError {
    /// Process exit code for this rejection. Zero is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::DuplicateId { .. } => 1,
            ConfigError::DuplicateAddress { .. } => 2,
            ConfigError::Unparseable { .. } => 3,
            ConfigError::Io(_) => 4,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

/// Errors raised while decoding a raw inbound message into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes do not describe an envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A framed message carried a version this build does not speak.
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
}

/// Errors raised while encoding an envelope for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The payload does not fit the frame's 32-bit length field.
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge { len: usize, max: u32 },
}

/// Errors reported by the external transport primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// The listener was shut down; no further messages will arrive.
    #[error("transport closed")]
    Closed,
}

/// Top-level error for the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A node identity was requested for an ID absent from the topology.
    #[error("node {0} is not part of the topology")]
    UnknownNode(NodeId),
}
