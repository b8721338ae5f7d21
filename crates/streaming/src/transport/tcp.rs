//! Request/reply over TCP.
//!
//! # Wire format
//!
//! ```text
//! [4-byte big-endian length][message bytes]
//! ```
//!
//! The client opens one connection per request, writes one frame and reads
//! one reply frame. The server answers any number of request frames per
//! connection, strictly one reply per request. Addresses may carry a
//! `tcp://` scheme prefix.
//!
//! [`bind`] hands back a [`TcpListenerHandle`] next to the listener. Calling
//! [`TcpListenerHandle::shutdown`] stops accepting, ends every open
//! connection, and the listener then reports [`TransportError::Closed`],
//! the same way an unbound memory endpoint does.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use corelib::{Exchange, Transport, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use super::ChannelListener;

/// Largest frame either side will accept.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const SCHEME: &str = "tcp://";

/// Strip an optional `tcp://` prefix.
pub fn socket_address(address: &str) -> &str {
    address.strip_prefix(SCHEME).unwrap_or(address)
}

/// Client half. Stateless; every request uses a fresh connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn request(&self, address: &str, message: Bytes) -> Result<Bytes, TransportError> {
        let mut stream = TcpStream::connect(socket_address(address))
            .await
            .map_err(|e| TransportError::ConnectFailed {
                address: address.to_owned(),
                reason: e.to_string(),
            })?;

        write_frame(&mut stream, &message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        read_frame(&mut stream)
            .await
            .map(Bytes::from)
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))
    }
}

/// Control side of a bound TCP listener.
///
/// Dropping the handle leaves the listener running.
#[derive(Debug)]
pub struct TcpListenerHandle {
    local: SocketAddr,
    stop: watch::Sender<bool>,
}

impl TcpListenerHandle {
    /// Bound socket address; differs from the requested one when binding
    /// port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }
}

/// Bind `address` and start accepting connections in the background.
pub async fn bind(address: &str) -> Result<(ChannelListener, TcpListenerHandle), TransportError> {
    let bind_err = |e: io::Error| TransportError::Bind {
        address: address.to_owned(),
        reason: e.to_string(),
    };

    let listener = TcpListener::bind(socket_address(address))
        .await
        .map_err(bind_err)?;
    let local = listener.local_addr().map_err(bind_err)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(accept_loop(listener, tx, stop_rx));

    debug!(address, %local, "tcp listener bound");
    Ok((
        ChannelListener::new(address, rx),
        TcpListenerHandle {
            local,
            stop: stop_tx,
        },
    ))
}

/// Resolves once shutdown is requested. A dropped handle never requests it.
async fn stopped(mut stop: watch::Receiver<bool>) {
    if stop.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Accept until shutdown or until the paired [`ChannelListener`] is dropped.
async fn accept_loop(
    listener: TcpListener,
    exchanges: mpsc::UnboundedSender<Exchange>,
    stop: watch::Receiver<bool>,
) {
    let shutdown = stopped(stop.clone());
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = exchanges.closed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(%peer, "accepted connection");
                    let exchanges = exchanges.clone();
                    let stop = stop.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(stream, exchanges, stop).await {
                            debug!(%peer, error = %err, "connection ended with error");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
        }
    }
    debug!("tcp accept loop stopped");
}

async fn serve_connection(
    mut stream: TcpStream,
    exchanges: mpsc::UnboundedSender<Exchange>,
    stop: watch::Receiver<bool>,
) -> io::Result<()> {
    let shutdown = stopped(stop);
    tokio::pin!(shutdown);

    loop {
        let read = tokio::select! {
            _ = &mut shutdown => return Ok(()),
            read = read_frame(&mut stream) => read,
        };
        let message = match read {
            Ok(message) => message,
            // Peer finished sending requests.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if exchanges
            .send(Exchange::new(Bytes::from(message), reply_tx))
            .is_err()
        {
            return Ok(());
        }

        match reply_rx.await {
            Ok(reply) => write_frame(&mut stream, &reply).await?,
            // Listener dropped the exchange; closing tells the client.
            Err(_) => return Ok(()),
        }
    }
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes", data.len()),
        ));
    }
    stream.write_all(&(data.len() as u32).to_be_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await
}

/// Read one length-prefixed frame.
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::Listener;
    use std::time::Duration;

    #[test]
    fn test_socket_address_strips_scheme() {
        assert_eq!(socket_address("tcp://127.0.0.1:5001"), "127.0.0.1:5001");
        assert_eq!(socket_address("127.0.0.1:5001"), "127.0.0.1:5001");
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"framed").await.unwrap();
        assert_eq!(&buf[..4], &6u32.to_be_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), b"framed");
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let mut cursor = std::io::Cursor::new(((MAX_FRAME_SIZE as u32) + 1).to_be_bytes().to_vec());
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body() {
        let mut buf = 100u32.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 10]);
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_request_over_loopback() {
        let (mut listener, handle) = bind("tcp://127.0.0.1:0").await.unwrap();
        let local = handle.local_addr();

        let server = tokio::spawn(async move {
            for _ in 0..2 {
                let exchange = listener.recv().await.unwrap();
                let mut reply = b"re:".to_vec();
                reply.extend_from_slice(exchange.message());
                exchange.reply(Bytes::from(reply)).unwrap();
            }
        });

        let address = format!("tcp://{local}");
        let transport = TcpTransport;
        let first = transport
            .request(&address, Bytes::from_static(b"one"))
            .await
            .unwrap();
        let second = transport
            .request(&address, Bytes::from_static(b"two"))
            .await
            .unwrap();

        assert_eq!(first.as_ref(), b"re:one");
        assert_eq!(second.as_ref(), b"re:two");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = unused.local_addr().unwrap().to_string();
        drop(unused);

        let err = TcpTransport
            .request(&address, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_closes_listener() {
        let (mut listener, handle) = bind("tcp://127.0.0.1:0").await.unwrap();

        // An idle client connection must not keep the listener alive
        let idle = TcpStream::connect(handle.local_addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.shutdown();
        let closed = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .expect("listener did not close after shutdown");
        assert!(matches!(closed, Err(TransportError::Closed)));

        let refused = TcpTransport
            .request(&handle.local_addr().to_string(), Bytes::from_static(b"late"))
            .await;
        assert!(refused.is_err());
        drop(idle);
    }

    #[tokio::test]
    async fn test_dropped_handle_keeps_listening() {
        let (mut listener, handle) = bind("tcp://127.0.0.1:0").await.unwrap();
        let address = handle.local_addr().to_string();
        drop(handle);

        let server = tokio::spawn(async move {
            let exchange = listener.recv().await.unwrap();
            exchange.reply(Bytes::from_static(b"still here")).unwrap();
        });

        let reply = TcpTransport
            .request(&address, Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(reply.as_ref(), b"still here");
        server.await.unwrap();
    }
}
