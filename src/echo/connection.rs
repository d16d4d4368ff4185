//! Socket primitives used by the echo workers.
//!
//! The network stack is a collaborator: workers only ever create, configure,
//! connect, send, receive, shut down and close. `Connector` and
//! `EchoConnection` are that surface; `SocketConnector` maps it onto host
//! sockets through `socket2`.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use super::Transport;

/// Options applied to every socket before it connects.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub receive_timeout: Duration,
    pub send_timeout: Duration,
    /// Kernel send and receive buffer size in bytes.
    pub buffer_size: usize,
}

/// Result of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    /// This many bytes were written to the start of the buffer.
    Data(usize),
    /// Nothing arrived within the receive timeout.
    TimedOut,
    /// The peer closed, or the connection was shut down locally.
    Closed,
}

/// An open, configured socket. Dropping it closes the socket.
pub trait EchoConnection {
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()>;

    /// Send from `data`, returning how many bytes were accepted.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Receive at most `buf.len()` bytes.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Recv>;

    /// Replace the receive timeout for later `recv` calls. `timeout` is
    /// never zero.
    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Start a graceful close in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Creates sockets for one worker.
pub trait Connector: Send + 'static {
    type Connection: EchoConnection;

    /// Create a socket for `addr`'s family and apply `options`.
    fn open(&mut self, addr: SocketAddr, options: &SocketOptions) -> io::Result<Self::Connection>;
}

/// Host socket connector for either transport.
#[derive(Debug, Clone, Copy)]
pub struct SocketConnector {
    transport: Transport,
}

impl SocketConnector {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

impl Connector for SocketConnector {
    type Connection = SocketConnection;

    fn open(&mut self, addr: SocketAddr, options: &SocketOptions) -> io::Result<SocketConnection> {
        let (ty, protocol) = match self.transport {
            Transport::Tcp => (Type::STREAM, Protocol::TCP),
            Transport::Udp => (Type::DGRAM, Protocol::UDP),
        };
        let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol))?;

        socket.set_read_timeout(Some(options.receive_timeout))?;
        socket.set_write_timeout(Some(options.send_timeout))?;
        socket.set_send_buffer_size(options.buffer_size)?;
        socket.set_recv_buffer_size(options.buffer_size)?;

        Ok(SocketConnection {
            socket,
            transport: self.transport,
            connect_timeout: options.send_timeout,
            shut: false,
        })
    }
}

/// A configured host socket.
#[derive(Debug)]
pub struct SocketConnection {
    socket: Socket,
    transport: Transport,
    connect_timeout: Duration,
    shut: bool,
}

impl EchoConnection for SocketConnection {
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        match self.transport {
            Transport::Tcp => self.socket.connect_timeout(&addr.into(), self.connect_timeout),
            // Only fixes the default peer; nothing goes on the wire.
            Transport::Udp => self.socket.connect(&addr.into()),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Recv> {
        // Datagram sockets have no half-close, so shutdown is tracked here.
        if self.shut && self.transport == Transport::Udp {
            return Ok(Recv::Closed);
        }

        loop {
            match self.socket.read(buf) {
                Ok(0) => return Ok(Recv::Closed),
                Ok(n) => return Ok(Recv::Data(n)),
                Err(e) => match e.kind() {
                    io::ErrorKind::Interrupted => {}
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                        return Ok(Recv::TimedOut)
                    }
                    _ => return Err(e),
                },
            }
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.shut = true;
        match self.transport {
            Transport::Tcp => self.socket.shutdown(Shutdown::Both),
            Transport::Udp => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, UdpSocket};
    use std::thread;

    fn options() -> SocketOptions {
        SocketOptions {
            receive_timeout: Duration::from_millis(200),
            send_timeout: Duration::from_millis(200),
            buffer_size: 8192,
        }
    }

    #[test]
    fn test_tcp_round_trip_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let mut conn = SocketConnector::new(Transport::Tcp)
            .open(addr, &options())
            .unwrap();
        conn.connect(addr).unwrap();
        assert_eq!(conn.send(b"hello").unwrap(), 5);

        let mut buf = [0u8; 16];
        let mut received = 0;
        while received < 5 {
            match conn.recv(&mut buf[received..5]).unwrap() {
                Recv::Data(n) => received += n,
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert_eq!(&buf[..5], b"hello");

        peer.join().unwrap();
        conn.shutdown().unwrap();
        assert_eq!(conn.recv(&mut buf).unwrap(), Recv::Closed);
    }

    #[test]
    fn test_tcp_receive_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut conn = SocketConnector::new(Transport::Tcp)
            .open(addr, &options())
            .unwrap();
        conn.connect(addr).unwrap();
        let _accepted = listener.accept().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(conn.recv(&mut buf).unwrap(), Recv::TimedOut);
    }

    #[test]
    fn test_tcp_connect_refused() {
        // Bind then drop to get a port with nothing listening.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut conn = SocketConnector::new(Transport::Tcp)
            .open(addr, &options())
            .unwrap();
        assert!(conn.connect(addr).is_err());
    }

    #[test]
    fn test_udp_round_trip_and_local_shutdown() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = peer.local_addr().unwrap();

        let mut conn = SocketConnector::new(Transport::Udp)
            .open(addr, &options())
            .unwrap();
        conn.connect(addr).unwrap();
        conn.send(b"ping").unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        peer.send_to(&buf[..n], from).unwrap();

        let mut reply = [0u8; 4];
        assert_eq!(conn.recv(&mut reply).unwrap(), Recv::Data(4));
        assert_eq!(&reply, b"ping");

        conn.shutdown().unwrap();
        assert_eq!(conn.recv(&mut reply).unwrap(), Recv::Closed);
    }
}
