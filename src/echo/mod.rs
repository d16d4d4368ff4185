//! Echo client workload engine.
//!
//! A fixed pool of worker tasks, each repeatedly connecting to the echo
//! server, running a number of request/reply cycles with byte-exact
//! verification, and closing gracefully before starting over.
//!
//! ## Wire content
//!
//! Every request is the ASCII text `TxRx message number <n>`, where `n` is a
//! per-worker running counter. The server must return it unchanged.
//!
//! ## Failure handling
//!
//! Nothing a peer does can stop a worker:
//! - connect, send and receive errors or timeouts abandon the connection
//! - an echo that differs from the request abandons the connection and bumps
//!   the worker's failure counter
//!
//! In every case the worker waits `loop_delay` and reconnects. Only an
//! unparseable server address is fatal, and it is reported by
//! [`EchoEngine::start`] before any worker runs.

mod address;
mod buffer;
mod connection;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

pub use address::AddressError;
pub use connection::{Connector, SocketConnector, SocketOptions};
pub use worker::{WorkerCounters, WorkerStats};

use buffer::BufferArena;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use worker::Worker;

use crate::task::{self, TaskSpec};

/// Attempts made to start each worker task before giving up.
pub const SPAWN_ATTEMPTS: u32 = 3;

/// Body of a worker task.
type TaskBody = Box<dyn FnOnce() + Send + 'static>;

/// Transport used by an engine's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Udp => f.write_str("udp"),
        }
    }
}

/// Settings for one engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub transport: Transport,
    pub workers: usize,
    /// IPv6 or IPv4 literal.
    pub server: String,
    pub port: u16,
    /// Request/reply cycles per connection.
    pub cycles: u32,
    pub receive_timeout: Duration,
    pub send_timeout: Duration,
    /// Pause between connections.
    pub loop_delay: Duration,
    /// Size of each worker's transmit and receive buffer.
    pub buffer_size: usize,
    /// Kernel socket buffer size.
    pub socket_buffer_size: usize,
    pub stack_size: usize,
    pub priority: i32,
}

impl EngineConfig {
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            receive_timeout: self.receive_timeout,
            send_timeout: self.send_timeout,
            buffer_size: self.socket_buffer_size,
        }
    }
}

/// Engine startup errors.
#[derive(Debug)]
pub enum EngineError {
    /// The server address could not be parsed.
    Config(AddressError),
    /// A worker task could not be started after [`SPAWN_ATTEMPTS`] tries.
    /// Workers spawned before it keep running.
    Spawn { index: usize, source: io::Error },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "invalid echo server address: {e}"),
            EngineError::Spawn { index, source } => {
                write!(f, "failed to start echo worker {index}: {source}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<AddressError> for EngineError {
    fn from(e: AddressError) -> Self {
        EngineError::Config(e)
    }
}

/// A running pool of echo workers.
pub struct EchoEngine {
    transport: Transport,
    counters: Vec<Arc<WorkerCounters>>,
}

impl EchoEngine {
    /// Spawn `config.workers` workers and return without waiting on them.
    ///
    /// Each worker gets its own buffer slot, counters and clone of
    /// `connector`. Workers run for the life of the process.
    pub fn start<C>(config: &EngineConfig, connector: C) -> Result<Self, EngineError>
    where
        C: Connector + Clone,
    {
        Self::start_with(config, connector, |spec, body| {
            task::spawn(spec, body).map(drop)
        })
    }

    /// [`EchoEngine::start`] with a custom task spawner.
    fn start_with<C, S>(config: &EngineConfig, connector: C, mut spawner: S) -> Result<Self, EngineError>
    where
        C: Connector + Clone,
        S: FnMut(TaskSpec, TaskBody) -> io::Result<()>,
    {
        let arena = BufferArena::new(config.workers, config.buffer_size);
        let mut counters = Vec::with_capacity(config.workers);

        for (index, buffers) in arena.into_slots() {
            let worker_counters = Arc::new(WorkerCounters::default());
            let worker = Worker::new(
                index,
                config,
                connector.clone(),
                buffers,
                Arc::clone(&worker_counters),
            )?;

            let spec = TaskSpec::new(
                format!("{}-echo-{index}", config.transport),
                config.stack_size,
                config.priority,
            );
            if let Err(source) = spawn_worker(&mut spawner, spec, worker) {
                error!(
                    transport = %config.transport,
                    worker = index,
                    error = %source,
                    "Failed to start echo worker"
                );
                return Err(EngineError::Spawn { index, source });
            }
            counters.push(worker_counters);
        }

        info!(
            transport = %config.transport,
            workers = config.workers,
            server = %config.server,
            port = config.port,
            cycles = config.cycles,
            "Echo engine started"
        );

        Ok(Self {
            transport: config.transport,
            counters,
        })
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    #[cfg(test)]
    pub fn worker_count(&self) -> usize {
        self.counters.len()
    }

    /// Current counters of every worker, by index.
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.counters
            .iter()
            .enumerate()
            .map(|(index, c)| c.snapshot(index))
            .collect()
    }
}

/// Start `worker` on its own task, retrying failed spawns.
///
/// The worker is handed over only once its task is running, so a failed
/// attempt leaves it here for the next one.
fn spawn_worker<C, S>(spawner: &mut S, spec: TaskSpec, worker: Worker<C>) -> io::Result<()>
where
    C: Connector,
    S: FnMut(TaskSpec, TaskBody) -> io::Result<()>,
{
    let mut attempt = 1;
    loop {
        let (tx, rx) = oneshot::channel::<Worker<C>>();
        let body: TaskBody = Box::new(move || {
            if let Ok(worker) = rx.blocking_recv() {
                worker.run();
            }
        });

        match spawner(spec.clone(), body) {
            Ok(()) => {
                return tx.send(worker).map_err(|_| {
                    io::Error::other(format!("task {} exited before its worker arrived", spec.name))
                });
            }
            Err(e) if attempt < SPAWN_ATTEMPTS => {
                warn!(task = %spec.name, attempt, error = %e, "Spawn failed, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
