//! Asynchronous log sink.
//!
//! Producers format messages into owned buffers and hand them to a bounded
//! queue without ever blocking; a single consumer task drains the queue and
//! prints each message through a [`LogOutput`].
//!
//! ## Backpressure
//!
//! The queue send never waits. When the queue is full the new message is
//! dropped on the spot, so a slow output can lose messages but can never
//! stall a worker. Messages from one producer keep their submission order.
//!
//! ## Lifecycle
//!
//! ```text
//! submit -> LogMessage::format -> try_send --(full)--> dropped
//!                                    |
//!                                    v
//!                    consumer: blocking_recv -> output -> drop
//! ```

mod message;
mod output;

pub use message::LogMessage;
pub use output::{LogOutput, LogWriter, StdoutOutput};

use std::fmt;
use std::sync::OnceLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::task::{self, TaskSpec};

/// Submit a formatted message to the process-wide logger.
///
/// Never blocks; the message is silently dropped if the logger is not
/// initialized or its queue is full.
#[macro_export]
macro_rules! log_printf {
    ($($arg:tt)*) => {{
        let _ = $crate::logging::global().submit(format_args!($($arg)*));
    }};
}

static GLOBAL: AsyncLogger = AsyncLogger::new();

/// The process-wide logger used by [`log_printf!`].
pub fn global() -> &'static AsyncLogger {
    &GLOBAL
}

/// Log sink settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Messages the queue holds before new ones are dropped.
    pub queue_length: usize,
    /// Buffer size of one message, line ending included.
    pub max_message_length: usize,
    /// Stack size of the consumer task.
    pub stack_size: usize,
    /// Nice value of the consumer task.
    pub priority: i32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            queue_length: 100,
            max_message_length: 512,
            stack_size: 256 * 1024,
            priority: 0,
        }
    }
}

/// Why [`AsyncLogger::initialize`] failed.
#[derive(Debug)]
pub enum InitError {
    /// The logger already has a queue and consumer.
    AlreadyInitialized,
    /// A queue needs room for at least one message.
    ZeroQueueLength,
    /// The consumer task could not be started.
    Spawn(std::io::Error),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::AlreadyInitialized => write!(f, "logger already initialized"),
            InitError::ZeroQueueLength => write!(f, "log queue length must be non-zero"),
            InitError::Spawn(e) => write!(f, "failed to start log consumer: {e}"),
        }
    }
}

impl std::error::Error for InitError {}

/// Why a message was not queued. The message is gone in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    NotInitialized,
    /// The message buffer could not be allocated.
    Alloc,
    QueueFull,
    /// The consumer has gone away.
    Closed,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::NotInitialized => write!(f, "logger not initialized"),
            SubmitError::Alloc => write!(f, "log buffer allocation failed"),
            SubmitError::QueueFull => write!(f, "log queue full"),
            SubmitError::Closed => write!(f, "log consumer stopped"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Create a bounded log queue and its consumer end.
pub fn channel(queue_length: usize, max_message_length: usize) -> (LogQueue, LogConsumer) {
    let (tx, rx) = mpsc::channel(queue_length);
    (
        LogQueue {
            tx,
            max_message_length,
        },
        LogConsumer { rx },
    )
}

/// Producer end of the log queue.
#[derive(Clone)]
pub struct LogQueue {
    tx: mpsc::Sender<LogMessage>,
    max_message_length: usize,
}

impl LogQueue {
    /// Format and enqueue a message without waiting.
    pub fn submit(&self, args: fmt::Arguments<'_>) -> Result<(), SubmitError> {
        let message =
            LogMessage::format(args, self.max_message_length).ok_or(SubmitError::Alloc)?;
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }
}

/// Consumer end of the log queue.
pub struct LogConsumer {
    rx: mpsc::Receiver<LogMessage>,
}

impl LogConsumer {
    /// Print messages until every producer is gone.
    ///
    /// Must run outside an async context.
    pub fn run<O: LogOutput>(mut self, mut output: O) {
        while let Some(message) = self.rx.blocking_recv() {
            output.write_message(&message);
        }
    }
}

/// A log sink that can be initialized once.
pub struct AsyncLogger {
    queue: OnceLock<LogQueue>,
}

impl AsyncLogger {
    pub const fn new() -> Self {
        Self {
            queue: OnceLock::new(),
        }
    }

    /// Create the queue and start the consumer task.
    ///
    /// A second call fails and leaves the running sink untouched.
    pub fn initialize<O: LogOutput>(&self, config: LogConfig, output: O) -> Result<(), InitError> {
        if self.queue.get().is_some() {
            return Err(InitError::AlreadyInitialized);
        }
        if config.queue_length == 0 {
            return Err(InitError::ZeroQueueLength);
        }

        let (queue, consumer) = channel(config.queue_length, config.max_message_length);

        // On failure the closure, and with it the queue's receiver, is dropped.
        task::spawn(
            TaskSpec::new("logging", config.stack_size, config.priority),
            move || consumer.run(output),
        )
        .map_err(InitError::Spawn)?;

        // A concurrent initializer may have won; dropping our sender ends our consumer.
        self.queue
            .set(queue)
            .map_err(|_| InitError::AlreadyInitialized)
    }

    #[cfg(test)]
    pub fn is_initialized(&self) -> bool {
        self.queue.get().is_some()
    }

    /// Format and enqueue a message without waiting.
    pub fn submit(&self, args: fmt::Arguments<'_>) -> Result<(), SubmitError> {
        self.queue
            .get()
            .ok_or(SubmitError::NotInitialized)?
            .submit(args)
    }
}

impl Default for AsyncLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn collecting_output() -> (impl LogOutput, std_mpsc::Receiver<String>) {
        let (tx, rx) = std_mpsc::channel();
        let output = move |m: &LogMessage| {
            let _ = tx.send(m.text().to_string());
        };
        (output, rx)
    }

    #[test]
    fn test_burst_beyond_capacity_keeps_first_messages_in_order() {
        let (queue, consumer) = channel(4, 64);

        let results: Vec<_> = (0..10)
            .map(|i| queue.submit(format_args!("message {i}")))
            .collect();
        assert!(results[..4].iter().all(|r| r.is_ok()));
        assert!(results[4..].iter().all(|r| *r == Err(SubmitError::QueueFull)));

        // Closing the producer side lets the consumer finish.
        drop(queue);
        let (output, rx) = collecting_output();
        consumer.run(output);

        let delivered: Vec<String> = rx.try_iter().collect();
        assert_eq!(
            delivered,
            vec!["message 0\n", "message 1\n", "message 2\n", "message 3\n"]
        );
    }

    #[test]
    fn test_consumer_outputs_each_message_once() {
        let (queue, consumer) = channel(8, 64);
        queue.submit(format_args!("one")).unwrap();
        queue.submit(format_args!("two")).unwrap();
        drop(queue);

        let mut count = 0;
        let (tx, rx) = std_mpsc::channel();
        consumer.run(move |m: &LogMessage| {
            let _ = tx.send(m.text().to_string());
        });
        for _ in rx.try_iter() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_submit_after_consumer_gone() {
        let (queue, consumer) = channel(2, 64);
        drop(consumer);
        assert_eq!(queue.submit(format_args!("late")), Err(SubmitError::Closed));
    }

    #[test]
    fn test_submit_before_initialize() {
        let logger = AsyncLogger::new();
        assert!(!logger.is_initialized());
        assert_eq!(
            logger.submit(format_args!("too early")),
            Err(SubmitError::NotInitialized)
        );
    }

    #[test]
    fn test_initialize_and_deliver() {
        let logger = AsyncLogger::new();
        let (output, rx) = collecting_output();
        logger.initialize(LogConfig::default(), output).unwrap();

        logger.submit(format_args!("cycle {} ok", 7)).unwrap();
        let text = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(text, "cycle 7 ok\n");
    }

    #[test]
    fn test_double_initialize_keeps_first_sink() {
        let logger = AsyncLogger::new();
        let (first, first_rx) = collecting_output();
        let (second, second_rx) = collecting_output();

        logger.initialize(LogConfig::default(), first).unwrap();
        assert!(matches!(
            logger.initialize(LogConfig::default(), second),
            Err(InitError::AlreadyInitialized)
        ));

        logger.submit(format_args!("still here")).unwrap();
        assert_eq!(
            first_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "still here\n"
        );
        assert!(second_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_zero_queue_length_is_rejected() {
        let logger = AsyncLogger::new();
        let (output, _rx) = collecting_output();
        let config = LogConfig {
            queue_length: 0,
            ..LogConfig::default()
        };
        assert!(matches!(
            logger.initialize(config, output),
            Err(InitError::ZeroQueueLength)
        ));
        assert!(!logger.is_initialized());
    }

    #[test]
    fn test_messages_are_truncated_to_configured_length() {
        let (queue, consumer) = channel(1, 8);
        queue.submit(format_args!("a very long line")).unwrap();
        drop(queue);

        let (output, rx) = collecting_output();
        consumer.run(output);
        assert_eq!(rx.try_recv().unwrap(), "a very \n");
    }
}
