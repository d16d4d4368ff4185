//! Echo worker state machine.
//!
//! Each worker loops forever over one connection at a time:
//!
//! ```text
//! Connecting --ok--> Cycling --> Closing --> Closed --(delay)--> Connecting
//!     |                                         ^
//!     +-----------------fail--------------------+
//! ```
//!
//! The server address is resolved once when the worker is created and reused
//! for every connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::address::{self, AddressError};
use super::buffer::{self, WorkerBuffers};
use super::connection::{Connector, EchoConnection, Recv, SocketOptions};
use super::EngineConfig;

/// Counters for one worker. Written only by that worker.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    cycles: AtomicU32,
    failures: AtomicU32,
    connections: AtomicU32,
}

impl WorkerCounters {
    pub fn snapshot(&self, index: usize) -> WorkerStats {
        WorkerStats {
            index,
            cycles: self.cycles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a worker's counters.
///
/// Counters wrap on overflow; they are for inspection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub index: usize,
    /// Verified request/reply round trips.
    pub cycles: u32,
    /// Connections abandoned because the echo did not match.
    pub failures: u32,
    /// Successful connects.
    pub connections: u32,
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Cycling,
    Closing,
    Closed,
}

/// Why the cycle loop stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    SendFailed,
    /// A receive returned nothing within the timeout.
    TimedOut,
    PeerClosed,
    RecvFailed,
    /// The echoed bytes differ from what was sent.
    Mismatch,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::SendFailed => "send failed",
            AbortReason::TimedOut => "receive timed out",
            AbortReason::PeerClosed => "peer closed",
            AbortReason::RecvFailed => "receive failed",
            AbortReason::Mismatch => "echo mismatch",
        };
        f.write_str(s)
    }
}

/// What one pass through the state machine achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Socket creation or connect failed; no cycles were attempted.
    Unreachable,
    /// All configured cycles were verified.
    Completed { cycles: u32 },
    /// Cycling stopped after `cycles` verified round trips.
    Aborted { cycles: u32, reason: AbortReason },
}

/// One echo client task.
pub struct Worker<C: Connector> {
    index: usize,
    server: SocketAddr,
    connector: C,
    cycles: u32,
    options: SocketOptions,
    loop_delay: Duration,
    buffers: WorkerBuffers,
    counters: Arc<WorkerCounters>,
    /// Running message number, carried across connections.
    tx_count: u32,
}

impl<C: Connector> Worker<C> {
    /// Resolve the server address and build worker `index`.
    pub fn new(
        index: usize,
        config: &EngineConfig,
        connector: C,
        buffers: WorkerBuffers,
        counters: Arc<WorkerCounters>,
    ) -> Result<Self, AddressError> {
        let server = address::resolve(&config.server, config.port)?;

        Ok(Self {
            index,
            server,
            connector,
            cycles: config.cycles,
            options: config.socket_options(),
            loop_delay: config.loop_delay,
            buffers,
            counters,
            tx_count: 0,
        })
    }

    #[cfg(test)]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    #[cfg(test)]
    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot(self.index)
    }

    /// Run connections forever.
    pub fn run(mut self) {
        info!(worker = self.index, server = %self.server, "Echo worker started");
        loop {
            self.iterate();
        }
    }

    /// One connection followed by the inter-iteration delay.
    pub fn iterate(&mut self) -> ConnectionOutcome {
        let outcome = self.run_connection();

        match outcome {
            ConnectionOutcome::Unreachable => {
                warn!(worker = self.index, server = %self.server, "Echo server unreachable");
            }
            ConnectionOutcome::Completed { cycles } => {
                info!(worker = self.index, cycles, "Echo connection completed");
            }
            ConnectionOutcome::Aborted { cycles, reason } => {
                warn!(worker = self.index, cycles, %reason, "Echo connection aborted");
            }
        }

        thread::sleep(self.loop_delay);
        outcome
    }

    /// Drive one connection from Connecting to Closed.
    ///
    /// The connection is always released before returning, whatever
    /// happened along the way.
    pub fn run_connection(&mut self) -> ConnectionOutcome {
        let mut phase = Phase::Connecting;
        let mut connection: Option<C::Connection> = None;
        let mut outcome = ConnectionOutcome::Unreachable;

        loop {
            trace!(worker = self.index, ?phase, "Phase");
            phase = match phase {
                Phase::Connecting => match self.connect() {
                    Ok(conn) => {
                        self.counters.connections.fetch_add(1, Ordering::Relaxed);
                        connection = Some(conn);
                        Phase::Cycling
                    }
                    Err(e) => {
                        debug!(worker = self.index, error = %e, "Connect failed");
                        Phase::Closed
                    }
                },
                Phase::Cycling => {
                    if let Some(conn) = connection.as_mut() {
                        outcome = self.exchange(conn);
                    }
                    Phase::Closing
                }
                Phase::Closing => {
                    if let Some(conn) = connection.as_mut() {
                        self.close_gracefully(conn);
                    }
                    Phase::Closed
                }
                Phase::Closed => {
                    drop(connection.take());
                    return outcome;
                }
            };
        }
    }

    fn connect(&mut self) -> std::io::Result<C::Connection> {
        let mut conn = self.connector.open(self.server, &self.options)?;
        conn.connect(self.server)?;
        Ok(conn)
    }

    /// Run up to `cycles` verified round trips.
    fn exchange(&mut self, conn: &mut C::Connection) -> ConnectionOutcome {
        let mut completed = 0;

        for _ in 0..self.cycles {
            let len = match buffer::write_payload(&mut self.buffers.tx, self.tx_count) {
                Ok(len) => len,
                Err(e) => {
                    warn!(worker = self.index, error = %e, "Payload does not fit transmit buffer");
                    return ConnectionOutcome::Aborted {
                        cycles: completed,
                        reason: AbortReason::SendFailed,
                    };
                }
            };
            self.tx_count = self.tx_count.wrapping_add(1);

            if let Err(e) = send_all(conn, &self.buffers.tx[..len]) {
                debug!(worker = self.index, error = %e, "Send failed");
                return ConnectionOutcome::Aborted {
                    cycles: completed,
                    reason: AbortReason::SendFailed,
                };
            }

            if let Err(reason) = receive_exact(conn, &mut self.buffers.rx[..len]) {
                return ConnectionOutcome::Aborted {
                    cycles: completed,
                    reason,
                };
            }

            if self.buffers.rx[..len] != self.buffers.tx[..len] {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker = self.index,
                    sent = %String::from_utf8_lossy(&self.buffers.tx[..len]),
                    received = %String::from_utf8_lossy(&self.buffers.rx[..len]),
                    "Echo mismatch"
                );
                return ConnectionOutcome::Aborted {
                    cycles: completed,
                    reason: AbortReason::Mismatch,
                };
            }

            self.counters.cycles.fetch_add(1, Ordering::Relaxed);
            completed += 1;
            trace!(worker = self.index, len, "Echo verified");
        }

        ConnectionOutcome::Completed { cycles: completed }
    }

    /// Shut down, then read until the peer is gone or one receive timeout
    /// has passed.
    fn close_gracefully(&mut self, conn: &mut C::Connection) {
        if let Err(e) = conn.shutdown() {
            debug!(worker = self.index, error = %e, "Shutdown failed");
        }

        // Each receive waits at most until the overall deadline.
        let deadline = Instant::now() + self.options.receive_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(worker = self.index, "Peer did not close within receive timeout");
                break;
            }
            if let Err(e) = conn.set_receive_timeout(remaining) {
                debug!(worker = self.index, error = %e, "Failed to shorten receive timeout");
                break;
            }
            match conn.recv(&mut self.buffers.rx) {
                Ok(Recv::Closed) | Err(_) => break,
                Ok(Recv::Data(_)) | Ok(Recv::TimedOut) => {}
            }
        }
    }
}

fn send_all<T: EchoConnection>(conn: &mut T, mut data: &[u8]) -> std::io::Result<()> {
    while !data.is_empty() {
        match conn.send(data)? {
            0 => return Err(std::io::ErrorKind::WriteZero.into()),
            n => data = &data[n..],
        }
    }
    Ok(())
}

/// Fill `buf` from `conn`, never asking for more than is still outstanding.
fn receive_exact<T: EchoConnection>(conn: &mut T, buf: &mut [u8]) -> Result<(), AbortReason> {
    buf.fill(0);
    let mut received = 0;

    while received < buf.len() {
        match conn.recv(&mut buf[received..]) {
            Ok(Recv::Data(0)) | Ok(Recv::Closed) => return Err(AbortReason::PeerClosed),
            Ok(Recv::Data(n)) => received += n,
            Ok(Recv::TimedOut) => return Err(AbortReason::TimedOut),
            Err(e) => {
                debug!(error = %e, "Receive failed");
                return Err(AbortReason::RecvFailed);
            }
        }
    }
    Ok(())
}
