//! Printer connection abstraction
//!
//! A connection moves text lines to and from a printer. Implementations do
//! not block: [`Connection::poll_responses`] returns whatever complete lines
//! have arrived since the last call.

use gcodestream_core::Result;

/// A line-oriented link to a printer
pub trait Connection: Send {
    /// Human-readable connection name (port name, "emulator")
    fn name(&self) -> String;

    /// Write one line; the line terminator is added by the connection
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Complete response lines received since the last poll
    fn poll_responses(&mut self) -> Result<Vec<String>>;

    /// Whether the link is still usable
    fn is_connected(&self) -> bool;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        (**self).send_line(line)
    }

    fn poll_responses(&mut self) -> Result<Vec<String>> {
        (**self).poll_responses()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
