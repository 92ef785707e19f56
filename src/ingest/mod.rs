//! Line sources for motion events.
//!
//! - Serial devices (the sensor link)
//! - Any `BufRead` (stdin for bench testing, in-memory buffers in tests)
//!
//! Sources decode bytes leniently: invalid UTF-8 is dropped rather than
//! failing the read, since the sensor link is noisy.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::time::{Duration, Instant};

pub mod serial;

pub use serial::{open_serial, SerialSettings};

/// One read from a line source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadLine {
    /// A non-empty, trimmed line.
    Line(String),
    /// Timeout, blank line, or nothing decodable.
    Idle,
    /// The source is exhausted and will not produce more lines.
    Closed,
}

pub trait LineSource {
    fn read_line(&mut self) -> Result<ReadLine>;

    /// Human-readable source name for logs.
    fn describe(&self) -> &str;
}

/// Line source over any buffered reader.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    source: String,
    /// Set for sources that stay open after a zero-byte read.
    idle_timeout: Option<Duration>,
    early_eof_logged: bool,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    /// A reader that reports `Closed` at end of input.
    pub fn new(reader: R, source: impl Into<String>) -> Self {
        Self {
            reader,
            source: source.into(),
            idle_timeout: None,
            early_eof_logged: false,
            buf: Vec::with_capacity(128),
        }
    }

    /// Keeps the source open after a zero-byte read, which is what a tty
    /// with a read timeout returns when the line is quiet.
    ///
    /// A zero-byte read that returns before `timeout` (a hung-up device or
    /// a drained plain file) is held until `timeout` has passed, so idle
    /// reads never come faster than one per timeout.
    pub fn idle_on_eof(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    fn wait_out_early_eof(&mut self, started: Instant, timeout: Duration) {
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return;
        }
        if !self.early_eof_logged {
            log::warn!(
                "{} returned no data before the read timeout; the device may have hung up",
                self.source
            );
            self.early_eof_logged = true;
        }
        std::thread::sleep(timeout - elapsed);
    }
}

impl<R: BufRead> LineSource for LineReader<R> {
    fn read_line(&mut self) -> Result<ReadLine> {
        self.buf.clear();
        let started = Instant::now();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .with_context(|| format!("failed to read {}", self.source))?;
        if read == 0 {
            return match self.idle_timeout {
                Some(timeout) => {
                    self.wait_out_early_eof(started, timeout);
                    Ok(ReadLine::Idle)
                }
                None => Ok(ReadLine::Closed),
            };
        }
        self.early_eof_logged = false;
        let line = decode_line(&self.buf);
        if line.is_empty() {
            Ok(ReadLine::Idle)
        } else {
            Ok(ReadLine::Line(line))
        }
    }

    fn describe(&self) -> &str {
        &self.source
    }
}

/// Decodes raw bytes as UTF-8, discarding undecodable bytes, and trims.
pub fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}
