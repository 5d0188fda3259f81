//! Stream sink: rendered lines to stdout or stderr.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::formatter::Formatter;
use crate::record::Record;

use super::worker::Sink;
use super::{Handler, HandlerOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamTarget {
    Stdout,
    Stderr,
}

impl Default for StreamTarget {
    fn default() -> Self {
        StreamTarget::Stderr
    }
}

enum StreamWriter {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
    Boxed(Box<dyn Write + Send>),
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StreamWriter::Stdout(w) => w.write(buf),
            StreamWriter::Stderr(w) => w.write(buf),
            StreamWriter::Boxed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StreamWriter::Stdout(w) => w.flush(),
            StreamWriter::Stderr(w) => w.flush(),
            StreamWriter::Boxed(w) => w.flush(),
        }
    }
}

pub(crate) struct StreamSink {
    writer: StreamWriter,
}

impl StreamSink {
    pub(crate) fn new(target: StreamTarget) -> StreamSink {
        let writer = match target {
            StreamTarget::Stdout => StreamWriter::Stdout(io::stdout()),
            StreamTarget::Stderr => StreamWriter::Stderr(io::stderr()),
        };
        StreamSink { writer }
    }

    pub(crate) fn with_writer(writer: Box<dyn Write + Send>) -> StreamSink {
        StreamSink {
            writer: StreamWriter::Boxed(writer),
        }
    }
}

impl Sink for StreamSink {
    fn emit(&mut self, record: &Record, formatter: &Formatter) -> io::Result<()> {
        let mut line = formatter.format(record);
        line.push('\n');
        self.writer.write_all(line.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Handler {
    /// Stream handler over the given standard stream.
    pub fn stream(
        target: StreamTarget,
        formatter: Formatter,
        opts: HandlerOptions,
    ) -> Result<Handler, ConfigError> {
        let name = match target {
            StreamTarget::Stdout => "stdout",
            StreamTarget::Stderr => "stderr",
        };
        Ok(Handler::spawn(
            name,
            Box::new(StreamSink::new(target)),
            formatter,
            opts,
        )?)
    }

    /// Stderr handler with default formatter and options.
    pub fn stderr() -> Handler {
        // Default options always validate; spawn can only fail on thread
        // creation, which has no meaningful fallback here.
        Handler::stream(
            StreamTarget::Stderr,
            Formatter::default(),
            HandlerOptions::default(),
        )
        .unwrap_or_else(|err| panic!("stderr handler: {err}"))
    }

    /// Stdout handler with default formatter and options.
    pub fn stdout() -> Handler {
        Handler::stream(
            StreamTarget::Stdout,
            Formatter::default(),
            HandlerOptions::default(),
        )
        .unwrap_or_else(|err| panic!("stdout handler: {err}"))
    }

    /// Handler over an arbitrary writer; the seam used by tests and by
    /// adapters that capture output.
    pub fn with_writer(
        writer: Box<dyn Write + Send>,
        formatter: Formatter,
        opts: HandlerOptions,
    ) -> Result<Handler, ConfigError> {
        Ok(Handler::spawn(
            "writer",
            Box::new(StreamSink::with_writer(writer)),
            formatter,
            opts,
        )?)
    }
}
