//! Envelope streaming between nodes.
//!
//! This crate provides the moving parts of a node:
//! - Wire codecs for envelopes (framed and legacy text)
//! - The outbound pipeline (outbox → transport, with retry and timeouts)
//! - The inbound pipeline (listener → inbox, with acknowledgments)
//! - A per-node runtime wiring both pipelines to their queues
//! - In-memory and TCP transports

pub mod codec;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod runtime;
pub mod sender;
pub mod transport;

pub use codec::WireFormat;
pub use error::{DeliveryError, DeliveryFailure, QueueClosed, RuntimeError};
pub use protocol::RetryPolicy;
pub use receiver::{InboundPipeline, InboundStats};
pub use runtime::{NodeRuntime, RuntimeOptions, RuntimeReport};
pub use sender::{OutboundPipeline, OutboundReport};
pub use transport::{ChannelListener, MemoryNetwork, MemoryTransport, TcpListenerHandle, TcpTransport};
