//! Integration-style tests for the dispatch fabric, sinks, hierarchy,
//! and configuration graph.
//!
//! Tests that touch the process-wide manager serialise on a shared lock
//! and reset the manager on entry and exit; handler-only tests run
//! against standalone runtimes and need no such guard.

mod config_tests;
mod handler_tests;
mod rotating_tests;

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

static MANAGER_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Run `f` with exclusive ownership of a freshly reset manager.
pub(crate) fn with_clean_manager<R>(f: impl FnOnce() -> R) -> R {
    let _guard = MANAGER_LOCK.lock();
    crate::reset_manager();
    let result = f();
    crate::reset_manager();
    result
}

/// A writer whose contents the test can inspect while a handler owns it.
#[derive(Clone, Default)]
pub(crate) struct SharedBuf {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuf {
    pub(crate) fn new() -> SharedBuf {
        SharedBuf::default()
    }

    pub(crate) fn writer(&self) -> Box<dyn Write + Send> {
        Box::new(SharedBufWriter {
            inner: Arc::clone(&self.inner),
        })
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

pub(crate) struct SharedBufWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl From<&SharedBuf> for SharedBufWriter {
    fn from(buf: &SharedBuf) -> SharedBufWriter {
        SharedBufWriter {
            inner: Arc::clone(&buf.inner),
        }
    }
}

impl Write for SharedBufWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A sink the test can pause: while the gate is closed the consumer
/// blocks inside `emit`, holding one record out of the queue.
#[derive(Clone, Default)]
pub(crate) struct Gate {
    state: Arc<(Mutex<bool>, Condvar)>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl Gate {
    pub(crate) fn new() -> Gate {
        Gate::default()
    }

    pub(crate) fn pause(&self) {
        *self.state.0.lock() = true;
    }

    pub(crate) fn resume(&self) {
        let mut paused = self.state.0.lock();
        *paused = false;
        self.state.1.notify_all();
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub(crate) fn sink(&self) -> GateSink {
        GateSink { gate: self.clone() }
    }
}

pub(crate) struct GateSink {
    gate: Gate,
}

impl crate::handler::worker::Sink for GateSink {
    fn emit(
        &mut self,
        record: &crate::Record,
        formatter: &crate::Formatter,
    ) -> std::io::Result<()> {
        let mut paused = self.gate.state.0.lock();
        while *paused {
            self.gate.state.1.wait(&mut paused);
        }
        drop(paused);
        self.gate.lines.lock().push(formatter.format(record));
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Spin until `predicate` holds or the deadline passes.
pub(crate) fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}
