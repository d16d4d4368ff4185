//! Local echo server.
//!
//! Gives the echo clients a peer to talk to without external equipment:
//! every byte received on a TCP connection is written straight back, and
//! every UDP datagram is returned to its sender. TCP and UDP share one
//! address and port.

use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 1024;

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Largest UDP payload
const MAX_DATAGRAM: usize = 64 * 1024;

/// Bound, not yet serving, echo server
pub struct EchoServer {
    listener: TcpListener,
    udp: UdpSocket,
    local_addr: SocketAddr,
    connection_limit: Arc<Semaphore>,
}

impl EchoServer {
    /// Bind TCP and UDP on `addr`. With port 0 the UDP socket takes the
    /// port the TCP listener was given.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let udp = UdpSocket::bind(local_addr).await?;

        Ok(Self {
            listener,
            udp,
            local_addr,
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve both transports until the runtime shuts down.
    pub async fn serve(self) {
        info!(address = %self.local_addr, "Echo server listening");

        tokio::spawn(serve_udp(self.udp));

        loop {
            // Wait for a connection slot
            let permit = match self.connection_limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    tokio::spawn(async move {
                        match handle_connection(stream).await {
                            Ok(bytes) => trace!(peer = %peer, bytes, "Connection closed"),
                            Err(e) => debug!(peer = %peer, error = %e, "Connection error"),
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Echo one TCP stream until the peer closes. Returns the bytes echoed.
async fn handle_connection<S>(mut stream: S) -> io::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut echoed = 0u64;

    loop {
        buffer.clear();
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            // Peer closed; finish our side of the close
            stream.shutdown().await?;
            return Ok(echoed);
        }

        stream.write_all(&buffer).await?;
        echoed += n as u64;
    }
}

async fn serve_udp(socket: UdpSocket) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, peer)) => {
                if let Err(e) = socket.send_to(&buf[..n], peer).await {
                    debug!(peer = %peer, error = %e, "UDP echo failed");
                }
            }
            Err(e) => {
                debug!(error = %e, "UDP receive failed");
            }
        }
    }
}
