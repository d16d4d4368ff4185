//! Scripted connector for exercising workers without a network.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::connection::{Connector, EchoConnection, Recv, SocketOptions};
use super::{EngineConfig, Transport};

pub fn test_config(cycles: u32) -> EngineConfig {
    EngineConfig {
        transport: Transport::Tcp,
        workers: 1,
        server: "127.0.0.1".to_string(),
        port: 5050,
        cycles,
        receive_timeout: Duration::from_millis(200),
        send_timeout: Duration::from_millis(200),
        loop_delay: Duration::ZERO,
        buffer_size: 1460 * 3,
        socket_buffer_size: 8192,
        stack_size: 256 * 1024,
        priority: 0,
    }
}

/// How the fake peer answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    Echo,
    /// Echo, but flip the first byte of the reply to send number `n` (1-based).
    CorruptCycle(u32),
    /// Refuse every connect.
    Refuse,
    /// Accept data, never reply.
    Silent,
    /// Echo `n` requests, then close.
    CloseAfter(u32),
    /// Every send fails.
    SendError,
    /// Echo, delivering at most `n` bytes per receive.
    Trickle(usize),
    /// Echo, but keep timing out instead of closing after shutdown.
    LingerAfterShutdown,
    /// Accept data, then fail every receive.
    RecvError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened,
    Connect(SocketAddr),
    Sent(Vec<u8>),
    Shutdown,
    Dropped,
}

#[derive(Clone)]
pub struct ScriptedConnector {
    behavior: PeerBehavior,
    events: Arc<Mutex<Vec<Event>>>,
    over_read: Arc<AtomicBool>,
    receive_timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl ScriptedConnector {
    pub fn new(behavior: PeerBehavior) -> Self {
        Self {
            behavior,
            events: Arc::default(),
            over_read: Arc::default(),
            receive_timeouts: Arc::default(),
        }
    }

    /// Every receive timeout set after a connection was opened.
    pub fn receive_timeouts(&self) -> Vec<Duration> {
        self.receive_timeouts.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sent(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Whether a receive ever asked for more than was outstanding.
    pub fn over_read(&self) -> bool {
        self.over_read.load(Ordering::Relaxed)
    }
}

impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    fn open(&mut self, _addr: SocketAddr, options: &SocketOptions) -> io::Result<ScriptedConnection> {
        self.events.lock().unwrap().push(Event::Opened);
        Ok(ScriptedConnection {
            behavior: self.behavior,
            events: Arc::clone(&self.events),
            over_read: Arc::clone(&self.over_read),
            receive_timeouts: Arc::clone(&self.receive_timeouts),
            receive_timeout: options.receive_timeout,
            pending: VecDeque::new(),
            sends: 0,
            shut: false,
        })
    }
}

pub struct ScriptedConnection {
    behavior: PeerBehavior,
    events: Arc<Mutex<Vec<Event>>>,
    over_read: Arc<AtomicBool>,
    receive_timeouts: Arc<Mutex<Vec<Duration>>>,
    receive_timeout: Duration,
    pending: VecDeque<u8>,
    sends: u32,
    shut: bool,
}

impl ScriptedConnection {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl EchoConnection for ScriptedConnection {
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.record(Event::Connect(addr));
        match self.behavior {
            PeerBehavior::Refuse => Err(io::ErrorKind::ConnectionRefused.into()),
            _ => Ok(()),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.behavior == PeerBehavior::SendError {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.record(Event::Sent(data.to_vec()));
        self.sends += 1;

        match self.behavior {
            PeerBehavior::Silent => {}
            PeerBehavior::CloseAfter(n) if self.sends > n => {}
            _ => {
                let start = self.pending.len();
                self.pending.extend(data);
                if self.behavior == PeerBehavior::CorruptCycle(self.sends) {
                    self.pending[start] ^= 0xFF;
                }
            }
        }
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Recv> {
        if self.shut {
            if self.behavior == PeerBehavior::LingerAfterShutdown {
                thread::sleep(self.receive_timeout.min(Duration::from_millis(5)));
                return Ok(Recv::TimedOut);
            }
            return Ok(Recv::Closed);
        }

        if self.behavior == PeerBehavior::RecvError {
            return Err(io::ErrorKind::ConnectionReset.into());
        }

        if self.pending.is_empty() {
            return Ok(match self.behavior {
                PeerBehavior::CloseAfter(_) => Recv::Closed,
                _ => Recv::TimedOut,
            });
        }

        if buf.len() > self.pending.len() {
            self.over_read.store(true, Ordering::Relaxed);
        }

        let limit = match self.behavior {
            PeerBehavior::Trickle(n) => n,
            _ => usize::MAX,
        };
        let n = buf.len().min(self.pending.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(Recv::Data(n))
    }

    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.receive_timeout = timeout;
        self.receive_timeouts.lock().unwrap().push(timeout);
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.shut = true;
        self.record(Event::Shutdown);
        Ok(())
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.record(Event::Dropped);
    }
}
