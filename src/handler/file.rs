//! File sink: appends rendered lines to a single path.
//!
//! A failed write drops that record (counted by the worker) and closes
//! the handle; the next write attempt reopens the path in append mode.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, HandlerConfigError, HandlerConfigErrorKind};
use crate::formatter::Formatter;
use crate::record::Record;

use super::worker::Sink;
use super::{Handler, HandlerOptions};

pub(crate) fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub(crate) struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub(crate) fn open(path: impl Into<PathBuf>) -> io::Result<FileSink> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(FileSink {
            path,
            file: Some(file),
        })
    }
}

impl Sink for FileSink {
    fn emit(&mut self, record: &Record, formatter: &Formatter) -> io::Result<()> {
        if self.file.is_none() {
            self.file = Some(open_append(&self.path)?);
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("file sink has no open file"))?;
        let mut line = formatter.format(record);
        line.push('\n');
        if let Err(err) = file.write_all(line.as_bytes()) {
            self.file = None;
            return Err(err);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }
}

impl Handler {
    /// File handler appending to `path`. The open happens here; a failure
    /// is a build-time error and no runtime is spawned.
    pub fn file(
        path: impl Into<PathBuf>,
        formatter: Formatter,
        opts: HandlerOptions,
    ) -> Result<Handler, ConfigError> {
        let path = path.into();
        let sink = FileSink::open(&path).map_err(|err| {
            HandlerConfigError::new(
                HandlerConfigErrorKind::IoOpen,
                format!("cannot open {}: {err}", path.display()),
            )
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        Ok(Handler::spawn(name, Box::new(sink), formatter, opts)?)
    }
}
