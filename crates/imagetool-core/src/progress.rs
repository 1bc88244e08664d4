//! Transfer progress reporting.
//!
//! [`ProgressReporter`] turns the cumulative number of bytes seen into a
//! percentage display. Interactive sinks get a single line updated in place
//! on every hundredth-of-a-percent change; other sinks (log files, CI
//! consoles) get one line per whole percent.

use std::io::{IsTerminal, Stderr, Write};

/// Receives every chunk before it is handed on to the consumer.
///
/// Observers are side-effect only: they never see a mutable chunk and cannot
/// fail the transfer.
pub trait ProgressObserver: Send {
    /// Called once per chunk, in stream order.
    fn observe(&mut self, chunk: &[u8]);

    /// Called once the stream is exhausted.
    fn finish(&mut self) {}
}

/// Progress display for a transfer of known total length.
#[derive(Debug)]
pub struct ProgressReporter<W> {
    total: Option<u64>,
    bytes_read: u64,
    hundredths: u64,
    interactive: bool,
    printed: bool,
    sink: W,
}

impl ProgressReporter<Stderr> {
    /// Creates a reporter writing to stderr, interactive when stderr is a terminal.
    #[must_use]
    pub fn stderr(total: Option<u64>) -> Self {
        let interactive = std::io::stderr().is_terminal();
        Self::new(std::io::stderr(), total, interactive)
    }
}

impl<W: Write> ProgressReporter<W> {
    /// Creates a reporter over an arbitrary sink.
    pub const fn new(sink: W, total: Option<u64>, interactive: bool) -> Self {
        Self {
            total,
            bytes_read: 0,
            hundredths: 0,
            interactive,
            printed: false,
            sink,
        }
    }

    /// Cumulative number of bytes observed so far.
    #[must_use]
    pub const fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Last reported progress in hundredths of a percent.
    #[must_use]
    pub const fn percent_hundredths(&self) -> u64 {
        self.hundredths
    }

    /// Returns the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn record(&mut self, len: u64) {
        self.bytes_read += len;
        let Some(total) = self.total.filter(|t| *t > 0) else {
            return;
        };

        let current = floor_hundredths(self.bytes_read, total);
        if current == self.hundredths {
            return;
        }
        let previous = std::mem::replace(&mut self.hundredths, current);

        // Best effort: write errors never reach the transfer.
        let result = if self.interactive {
            write!(
                self.sink,
                "  {} / {} ({}.{:02}%)\r",
                self.bytes_read,
                total,
                current / 100,
                current % 100
            )
        } else if current / 100 != previous / 100 {
            writeln!(
                self.sink,
                "  {} / {} ({}%)",
                self.bytes_read,
                total,
                current / 100
            )
        } else {
            return;
        };
        if result.is_ok() {
            self.printed = true;
            let _ = self.sink.flush();
        }
    }
}

impl<W: Write + Send> ProgressObserver for ProgressReporter<W> {
    fn observe(&mut self, chunk: &[u8]) {
        self.record(chunk.len() as u64);
    }

    fn finish(&mut self) {
        if self.interactive && self.printed {
            let _ = writeln!(self.sink);
            let _ = self.sink.flush();
        }
    }
}

/// Progress in hundredths of a percent, rounded down.
fn floor_hundredths(done: u64, total: u64) -> u64 {
    let scaled = u128::from(done) * 10_000 / u128::from(total);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}
