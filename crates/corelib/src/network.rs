//! Transport-agnostic request/reply contracts.
//!
//! The fabric does not move bytes itself. It relies on an external
//! synchronous messaging primitive with two halves:
//!
//! - [`Transport`]: connect to an address, send one message, wait for the
//!   single reply.
//! - [`Listener`]: yield received messages one at a time, each wrapped in an
//!   [`Exchange`] that must be answered exactly once before the requester
//!   gets its reply.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::TransportError;

/// Client half: one request, one reply.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver `message` to the listener bound at `address` and return its
    /// reply.
    async fn request(&self, address: &str, message: Bytes) -> Result<Bytes, TransportError>;
}

/// Server half: a stream of inbound exchanges.
#[async_trait]
pub trait Listener: Send + 'static {
    /// Wait for the next inbound message.
    ///
    /// Returns [`TransportError::Closed`] once the listener is shut down.
    async fn recv(&mut self) -> Result<Exchange, TransportError>;
}

/// One received message together with the channel its reply goes back on.
///
/// [`reply`](Self::reply) consumes the exchange, so each message is answered
/// at most once. Dropping an exchange unanswered fails the requester with
/// [`TransportError::ReceiveFailed`].
#[derive(Debug)]
pub struct Exchange {
    message: Bytes,
    reply: oneshot::Sender<Bytes>,
}

impl Exchange {
    pub fn new(message: Bytes, reply: oneshot::Sender<Bytes>) -> Self {
        Self { message, reply }
    }

    pub fn message(&self) -> &Bytes {
        &self.message
    }

    pub fn reply(self, response: Bytes) -> Result<(), TransportError> {
        self.reply
            .send(response)
            .map_err(|_| TransportError::SendFailed("requester went away before the reply".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exchange_reply_reaches_requester() {
        let (tx, rx) = oneshot::channel();
        let exchange = Exchange::new(Bytes::from_static(b"ping"), tx);
        assert_eq!(exchange.message().as_ref(), b"ping");

        exchange.reply(Bytes::from_static(b"pong")).unwrap();
        assert_eq!(rx.await.unwrap().as_ref(), b"pong");
    }

    #[tokio::test]
    async fn test_exchange_reply_after_requester_left() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let exchange = Exchange::new(Bytes::new(), tx);
        assert!(matches!(
            exchange.reply(Bytes::new()),
            Err(TransportError::SendFailed(_))
        ));
    }
}
