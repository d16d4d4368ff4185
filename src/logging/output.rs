//! Output sinks for the log consumer, and the `tracing` bridge.

use std::io::{self, Write};
use tracing_subscriber::fmt::MakeWriter;

use super::{AsyncLogger, LogMessage, SubmitError};

/// Destination for messages drained by the log consumer.
///
/// Called exactly once per message, always from the consumer thread.
pub trait LogOutput: Send + 'static {
    fn write_message(&mut self, message: &LogMessage);
}

impl<F> LogOutput for F
where
    F: FnMut(&LogMessage) + Send + 'static,
{
    fn write_message(&mut self, message: &LogMessage) {
        self(message)
    }
}

/// Writes each message to stdout, prefixed with its submit time.
#[derive(Debug, Default)]
pub struct StdoutOutput;

impl LogOutput for StdoutOutput {
    fn write_message(&mut self, message: &LogMessage) {
        let mut out = io::stdout().lock();
        let _ = write!(
            out,
            "{} {}",
            message.timestamp().format("%Y-%m-%dT%H:%M:%S%.3f"),
            message.text()
        );
        let _ = out.flush();
    }
}

/// `MakeWriter` that routes formatted `tracing` events through a logger.
///
/// Each event becomes one message. Events emitted before the logger is
/// initialized go straight to stderr.
#[derive(Clone, Copy)]
pub struct LogWriter {
    logger: &'static AsyncLogger,
}

impl LogWriter {
    pub fn new(logger: &'static AsyncLogger) -> Self {
        Self { logger }
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter {
            logger: self.logger,
            buf: Vec::new(),
        }
    }
}

/// Collects one formatted event and submits it on drop.
pub struct EventWriter {
    logger: &'static AsyncLogger,
    buf: Vec<u8>,
}

impl Write for EventWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buf);
        let text = text.trim_end_matches(['\r', '\n']);
        if let Err(SubmitError::NotInitialized) = self.logger.submit(format_args!("{text}")) {
            let _ = writeln!(io::stderr(), "{text}");
        }
    }
}
