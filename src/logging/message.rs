//! Formatted log messages.

use chrono::{DateTime, Local};
use std::fmt::{self, Write};

/// Terminator appended to every message.
pub const LINE_ENDING: &str = "\n";

/// One formatted, line-terminated log message.
///
/// The text never exceeds the buffer size it was formatted into, line
/// ending included.
#[derive(Debug)]
pub struct LogMessage {
    timestamp: DateTime<Local>,
    text: String,
}

impl LogMessage {
    /// Format `args` into a fresh buffer of `max_len` bytes.
    ///
    /// Output that does not fit is cut at the last character boundary that
    /// still leaves room for the line ending. Returns `None` if the buffer
    /// cannot be allocated.
    pub fn format(args: fmt::Arguments<'_>, max_len: usize) -> Option<Self> {
        let mut text = String::new();
        text.try_reserve_exact(max_len).ok()?;

        let mut bounded = Bounded {
            buf: &mut text,
            limit: max_len.saturating_sub(LINE_ENDING.len()),
        };
        // An error only means the output was truncated.
        let _ = bounded.write_fmt(args);

        text.push_str(LINE_ENDING);
        Some(Self {
            timestamp: Local::now(),
            text,
        })
    }

    /// The message text, line ending included.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// When the message was submitted.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }
}

/// `fmt::Write` adapter that stops at `limit` bytes.
struct Bounded<'a> {
    buf: &'a mut String,
    limit: usize,
}

impl Write for Bounded<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.limit - self.buf.len();
        if s.len() <= room {
            self.buf.push_str(s);
            return Ok(());
        }

        let mut end = room;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&s[..end]);
        self.limit = self.buf.len();
        Err(fmt::Error)
    }
}
