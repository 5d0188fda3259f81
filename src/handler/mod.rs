//! The handler runtime shared by every sink.
//!
//! A handler bundles a bounded multi-producer/single-consumer channel, a
//! dedicated consumer thread, and a sink. Producers offer records under a
//! configurable overflow policy; the consumer renders and writes them and
//! honours the flush/close protocol. All sinks (stream, file, rotating
//! file, socket, HTTP) run on this same runtime.

pub(crate) mod backoff;
pub(crate) mod file;
pub(crate) mod http;
pub(crate) mod rotating;
pub(crate) mod socket;
pub(crate) mod stream;
pub(crate) mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Sender, TrySendError, bounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{HandlerConfigError, HandlerConfigErrorKind, HandlerError};
use crate::formatter::Formatter;
use crate::record::Record;
use worker::{Sink, WorkItem};

pub use backoff::BackoffConfig;
pub use http::{HttpAuth, HttpBody, HttpConfig, HttpMethod};
pub use socket::{SocketConfig, TlsOptions, Transport};
pub use stream::StreamTarget;

/// Resolution of producer/consumer queue saturation, chosen per handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Discard the record and report `Dropped`.
    Drop,
    /// Suspend the producer until space is available; unbounded by design.
    Block,
    /// Wait up to the given number of milliseconds, then discard and
    /// report `TimedOut`. Zero is rejected at build time.
    Timeout(u64),
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Drop
    }
}

/// When the consumer flushes the sink between explicit `Flush` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushPolicy {
    /// Flush after every N processed records.
    pub every_n: usize,
    /// Additionally flush once this many milliseconds have elapsed since
    /// the last flush while unflushed writes are pending.
    pub every_ms: Option<u64>,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy {
            every_n: 1,
            every_ms: None,
        }
    }
}

/// Queue and protocol tuning for a handler runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOptions {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub flush: FlushPolicy,
    /// Bound on the wait for a `Flush` reply, milliseconds.
    pub flush_timeout_ms: u64,
    /// Bound on the waits inside the close protocol, milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        HandlerOptions {
            capacity: 1024,
            overflow: OverflowPolicy::default(),
            flush: FlushPolicy::default(),
            flush_timeout_ms: 1_000,
            close_timeout_ms: 5_000,
        }
    }
}

impl HandlerOptions {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_flush_every(mut self, every_n: usize) -> Self {
        self.flush.every_n = every_n;
        self
    }

    pub fn with_flush_interval_ms(mut self, every_ms: u64) -> Self {
        self.flush.every_ms = Some(every_ms);
        self
    }

    pub fn with_flush_timeout_ms(mut self, ms: u64) -> Self {
        self.flush_timeout_ms = ms;
        self
    }

    pub fn with_close_timeout_ms(mut self, ms: u64) -> Self {
        self.close_timeout_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), HandlerConfigError> {
        if self.capacity == 0 {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::ZeroInterval,
                "queue capacity must be at least 1",
            ));
        }
        if self.flush.every_n == 0 {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::ZeroInterval,
                "flush_every_n must be at least 1",
            ));
        }
        if self.flush.every_ms == Some(0) {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::ZeroInterval,
                "flush_every_ms must be positive when set",
            ));
        }
        if let OverflowPolicy::Timeout(0) = self.overflow {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::ZeroTimeout,
                "overflow timeout must be positive",
            ));
        }
        if self.flush_timeout_ms == 0 || self.close_timeout_ms == 0 {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::ZeroTimeout,
                "flush and close timeouts must be positive",
            ));
        }
        Ok(())
    }
}

/// Non-fatal outcome of a `submit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// The record was enqueued for the consumer.
    Submitted,
    /// The queue was full under the `Drop` policy; the record was
    /// discarded.
    Dropped,
    /// The `Timeout` policy expired; the record was discarded.
    TimedOut,
}

/// The record-dispatch shape any handler-like object must present.
///
/// `Handler` implements this; external adapters may too, and a logger
/// accepts any of them.
pub trait RecordHandler: Send + Sync {
    fn submit(&self, record: Arc<Record>) -> Result<SubmitResult, HandlerError>;

    /// Request a drain-and-flush; `true` means the reply arrived within
    /// the handler's flush timeout.
    fn flush(&self) -> bool;

    /// Run the close protocol. Idempotent; repeat calls return the first
    /// result.
    fn close(&self) -> bool;

    /// Best-effort render of a record with this handler's formatter, used
    /// for the logger's preview contract.
    fn preview(&self, _record: &Record) -> Option<String> {
        None
    }
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Counters shared between producers and the consumer thread.
#[derive(Debug, Default)]
pub(crate) struct HandlerStats {
    pub(crate) submitted: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) write_errors: AtomicU64,
}

#[derive(Debug)]
pub(crate) struct HandlerShared {
    pub(crate) state: AtomicU8,
    pub(crate) poisoned: AtomicBool,
    pub(crate) stats: HandlerStats,
}

impl HandlerShared {
    fn new() -> Self {
        HandlerShared {
            state: AtomicU8::new(STATE_OPEN),
            poisoned: AtomicBool::new(false),
            stats: HandlerStats::default(),
        }
    }
}

/// A live handler runtime: bounded queue, consumer thread, sink.
///
/// Dropping the last reference without an explicit `close()` still runs
/// the close protocol, so runtimes retired by a topology swap shut down
/// once every in-flight `log` call has released them.
pub struct Handler {
    name: String,
    tx: ArcSwapOption<Sender<WorkItem>>,
    shared: Arc<HandlerShared>,
    opts: HandlerOptions,
    formatter: Formatter,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    close_result: Mutex<Option<bool>>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("state", &self.shared.state.load(Ordering::Relaxed))
            .field("poisoned", &self.shared.poisoned.load(Ordering::Relaxed))
            .finish()
    }
}

impl Handler {
    /// Spawn a consumer thread over `sink` and return the producer-side
    /// handle.
    pub(crate) fn spawn(
        name: impl Into<String>,
        sink: Box<dyn Sink>,
        formatter: Formatter,
        opts: HandlerOptions,
    ) -> Result<Handler, HandlerConfigError> {
        opts.validate()?;
        let name = name.into();
        let (tx, rx) = bounded(opts.capacity);
        let shared = Arc::new(HandlerShared::new());

        let worker_shared = Arc::clone(&shared);
        let worker_formatter = formatter.clone();
        let flush = opts.flush;
        let handle = thread::Builder::new()
            .name(format!("fanlog-{name}"))
            .spawn(move || worker::run(sink, rx, worker_formatter, flush, worker_shared))
            .map_err(|err| {
                HandlerConfigError::new(
                    HandlerConfigErrorKind::IoOpen,
                    format!("failed to spawn consumer thread: {err}"),
                )
            })?;

        Ok(Handler {
            name,
            tx: ArcSwapOption::from_pointee(tx),
            shared,
            opts,
            formatter,
            worker: Mutex::new(Some(handle)),
            close_result: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records discarded by the `Drop` overflow policy.
    pub fn dropped(&self) -> u64 {
        self.shared.stats.dropped.load(Ordering::Relaxed)
    }

    /// Records discarded by the `Timeout` overflow policy.
    pub fn timed_out(&self) -> u64 {
        self.shared.stats.timed_out.load(Ordering::Relaxed)
    }

    /// Records lost to terminal sink failures (including recovery-state
    /// drops in the rotating and socket sinks).
    pub fn write_errors(&self) -> u64 {
        self.shared.stats.write_errors.load(Ordering::Relaxed)
    }

    /// Records accepted onto the queue.
    pub fn submitted(&self) -> u64 {
        self.shared.stats.submitted.load(Ordering::Relaxed)
    }

    pub fn is_poisoned(&self) -> bool {
        self.shared.poisoned.load(Ordering::Acquire)
    }

    fn disconnect_error(&self) -> HandlerError {
        if self.shared.poisoned.load(Ordering::Acquire) {
            HandlerError::Poisoned
        } else {
            HandlerError::Closed
        }
    }

    fn submit_item(&self, record: Arc<Record>) -> Result<SubmitResult, HandlerError> {
        if self.shared.poisoned.load(Ordering::Acquire) {
            return Err(HandlerError::Poisoned);
        }
        if self.shared.state.load(Ordering::Acquire) != STATE_OPEN {
            return Err(HandlerError::Closed);
        }
        let tx = self.tx.load_full().ok_or(HandlerError::Closed)?;
        let item = WorkItem::Record(record);
        let outcome = match self.opts.overflow {
            OverflowPolicy::Drop => match tx.try_send(item) {
                Ok(()) => SubmitResult::Submitted,
                Err(TrySendError::Full(_)) => {
                    self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    SubmitResult::Dropped
                }
                Err(TrySendError::Disconnected(_)) => return Err(self.disconnect_error()),
            },
            OverflowPolicy::Block => match tx.send(item) {
                Ok(()) => SubmitResult::Submitted,
                Err(_) => return Err(self.disconnect_error()),
            },
            OverflowPolicy::Timeout(ms) => {
                match tx.send_timeout(item, Duration::from_millis(ms)) {
                    Ok(()) => SubmitResult::Submitted,
                    Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => {
                        self.shared.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                        SubmitResult::TimedOut
                    }
                    Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                        return Err(self.disconnect_error());
                    }
                }
            }
        };
        if outcome == SubmitResult::Submitted {
            self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    fn flush_inner(&self) -> bool {
        if self.shared.poisoned.load(Ordering::Acquire)
            || self.shared.state.load(Ordering::Acquire) != STATE_OPEN
        {
            return false;
        }
        let Some(tx) = self.tx.load_full() else {
            return false;
        };
        let timeout = Duration::from_millis(self.opts.flush_timeout_ms);
        let deadline = Instant::now() + timeout;
        let (reply_tx, reply_rx) = bounded(1);
        let item = WorkItem::Flush(reply_tx);
        // The enqueue wait follows the overflow policy but is always
        // bounded by the flush timeout.
        let enqueued = match self.opts.overflow {
            OverflowPolicy::Drop => tx.try_send(item).is_ok(),
            OverflowPolicy::Block => tx.send_timeout(item, timeout).is_ok(),
            OverflowPolicy::Timeout(ms) => {
                let wait = Duration::from_millis(ms.min(self.opts.flush_timeout_ms));
                tx.send_timeout(item, wait).is_ok()
            }
        };
        enqueued && reply_rx.recv_deadline(deadline).is_ok()
    }

    fn close_inner(&self) -> bool {
        let mut cached = self.close_result.lock();
        if let Some(result) = *cached {
            return result;
        }
        self.shared.state.store(STATE_CLOSING, Ordering::Release);
        let timeout = Duration::from_millis(self.opts.close_timeout_ms);

        let replied = match self.tx.swap(None) {
            Some(tx) => {
                let (reply_tx, reply_rx) = bounded(1);
                let enqueued = tx.send_timeout(WorkItem::Close(reply_tx), timeout).is_ok();
                // Release the producer side regardless; once every clone
                // drops the consumer drains and exits on disconnect.
                drop(tx);
                enqueued && reply_rx.recv_timeout(timeout).is_ok()
            }
            None => false,
        };

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.shared.state.store(STATE_CLOSED, Ordering::Release);
        let result = replied && !self.shared.poisoned.load(Ordering::Acquire);
        *cached = Some(result);
        result
    }
}

impl RecordHandler for Handler {
    fn submit(&self, record: Arc<Record>) -> Result<SubmitResult, HandlerError> {
        self.submit_item(record)
    }

    fn flush(&self) -> bool {
        self.flush_inner()
    }

    fn close(&self) -> bool {
        self.close_inner()
    }

    fn preview(&self, record: &Record) -> Option<String> {
        Some(self.formatter.format(record))
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        if self.shared.state.load(Ordering::Acquire) != STATE_CLOSED {
            self.close_inner();
        }
    }
}
