//! Rotating-file sink: size-triggered rotation with numbered backups.
//!
//! Backups are `base.1 .. base.backup_count`, `base.1` most recent. A
//! record whose write would push the current file past `max_bytes`
//! triggers a rotation first. If the fresh open after a rotation fails,
//! the sink enters an error state in which records are dropped (and
//! counted by the worker) until a later write attempt reopens the base
//! path; the shuffled backups stay consistent throughout.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::formatter::Formatter;
use crate::record::Record;

use super::file::open_append;
use super::worker::Sink;
use super::{Handler, HandlerOptions};

pub(crate) fn validate_rotation(max_bytes: u64, backup_count: u32) -> Result<(), ConfigError> {
    if (max_bytes > 0) != (backup_count > 0) {
        return Err(ConfigError::InvalidRotationConfig(format!(
            "max_bytes and backup_count must both be positive to enable rotation \
             (got max_bytes={max_bytes}, backup_count={backup_count})"
        )));
    }
    Ok(())
}

pub(crate) struct RotatingSink {
    path: PathBuf,
    max_bytes: u64,
    backup_count: u32,
    file: Option<File>,
    size: u64,
    #[cfg(test)]
    pub(crate) force_fresh_open_failures: u32,
}

impl RotatingSink {
    pub(crate) fn open(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        backup_count: u32,
    ) -> io::Result<RotatingSink> {
        let path = path.into();
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(RotatingSink {
            path,
            max_bytes,
            backup_count,
            file: Some(file),
            size,
            #[cfg(test)]
            force_fresh_open_failures: 0,
        })
    }

    fn rotation_enabled(&self) -> bool {
        self.max_bytes > 0 && self.backup_count > 0
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut os = self.path.as_os_str().to_os_string();
        os.push(format!(".{index}"));
        PathBuf::from(os)
    }

    /// Shift `base.i` to `base.(i+1)`, evict `base.backup_count`, then
    /// move the live file to `base.1`. A failure mid-shuffle leaves every
    /// existing backup intact under its old or new name.
    fn shuffle_backups(&self) -> io::Result<()> {
        let last = self.backup_path(self.backup_count);
        if last.exists() {
            fs::remove_file(&last)?;
        }
        for index in (1..self.backup_count).rev() {
            let src = self.backup_path(index);
            if src.exists() {
                fs::rename(&src, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))
    }

    fn reopen(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if self.force_fresh_open_failures > 0 {
            self.force_fresh_open_failures -= 1;
            return Err(io::Error::other("forced fresh-open failure"));
        }
        let file = open_append(&self.path)?;
        self.size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        self.shuffle_backups()?;
        self.reopen()
    }
}

impl Sink for RotatingSink {
    fn emit(&mut self, record: &Record, formatter: &Formatter) -> io::Result<()> {
        let mut line = formatter.format(record);
        line.push('\n');
        let len = line.len() as u64;

        if self.rotation_enabled()
            && self.file.is_some()
            && self.size > 0
            && self.size + len > self.max_bytes
        {
            self.rotate()?;
        }
        if self.file.is_none() {
            // Error state after a failed fresh open or shuffle; each
            // write attempt retries the open.
            self.reopen()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("rotating sink has no open file"))?;
        file.write_all(line.as_bytes())?;
        self.size += len;
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
    /// Rotating-file handler. Rotation is enabled iff both `max_bytes`
    /// and `backup_count` are positive; a partial configuration is
    /// rejected.
    pub fn rotating(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        backup_count: u32,
        formatter: Formatter,
        opts: HandlerOptions,
    ) -> Result<Handler, ConfigError> {
        let path = path.into();
        validate_rotation(max_bytes, backup_count)?;
        let sink = RotatingSink::open(&path, max_bytes, backup_count).map_err(|err| {
            crate::error::HandlerConfigError::new(
                crate::error::HandlerConfigErrorKind::IoOpen,
                format!("cannot open {}: {err}", path.display()),
            )
        })?;
        let name = handler_name(&path);
        Ok(Handler::spawn(name, Box::new(sink), formatter, opts)?)
    }

    /// Test seam: rotating handler whose first `failures` fresh opens
    /// after a rotation fail.
    #[cfg(test)]
    pub(crate) fn rotating_with_fresh_failures(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        backup_count: u32,
        failures: u32,
        formatter: Formatter,
        opts: HandlerOptions,
    ) -> Result<Handler, ConfigError> {
        let path = path.into();
        validate_rotation(max_bytes, backup_count)?;
        let mut sink = RotatingSink::open(&path, max_bytes, backup_count).map_err(|err| {
            crate::error::HandlerConfigError::new(
                crate::error::HandlerConfigErrorKind::IoOpen,
                format!("cannot open {}: {err}", path.display()),
            )
        })?;
        sink.force_fresh_open_failures = failures;
        let name = handler_name(&path);
        Ok(Handler::spawn(name, Box::new(sink), formatter, opts)?)
    }
}

fn handler_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("rotating")
        .to_string()
}
