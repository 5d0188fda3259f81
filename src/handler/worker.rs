//! The consumer side of a handler runtime.
//!
//! One OS thread per handler drains the bounded channel, renders records
//! through the handler's formatter, writes them to the sink, and services
//! the flush/close protocol. A panic while emitting poisons the handler;
//! the sink is released and further submissions fail.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{FlushPolicy, HandlerShared, STATE_CLOSING};
use crate::formatter::Formatter;
use crate::record::Record;

/// Items carried by a handler's channel.
pub(crate) enum WorkItem {
    Record(Arc<Record>),
    Flush(Sender<()>),
    Close(Sender<()>),
}

/// Terminal write target driven by the consumer thread.
///
/// `emit` returning an error means the record was not persisted; the
/// worker counts it and continues. Sinks with recovery behaviour (reopen,
/// reconnect with backoff) run it inside `emit`.
pub(crate) trait Sink: Send {
    fn emit(&mut self, record: &Record, formatter: &Formatter) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn close(&mut self) {}
}

enum Next {
    Item(WorkItem),
    FlushDue,
    Disconnected,
}

fn next_item(
    rx: &Receiver<WorkItem>,
    flush: &FlushPolicy,
    pending: bool,
    last_flush: Instant,
) -> Next {
    match flush.every_ms {
        Some(ms) if pending => {
            let deadline = last_flush + Duration::from_millis(ms);
            match rx.recv_deadline(deadline) {
                Ok(item) => Next::Item(item),
                Err(RecvTimeoutError::Timeout) => Next::FlushDue,
                Err(RecvTimeoutError::Disconnected) => Next::Disconnected,
            }
        }
        _ => match rx.recv() {
            Ok(item) => Next::Item(item),
            Err(_) => Next::Disconnected,
        },
    }
}

pub(crate) fn run(
    mut sink: Box<dyn Sink>,
    rx: Receiver<WorkItem>,
    formatter: Formatter,
    flush: FlushPolicy,
    shared: Arc<HandlerShared>,
) {
    let mut pending = 0usize;
    let mut last_flush = Instant::now();

    loop {
        let item = match next_item(&rx, &flush, pending > 0, last_flush) {
            Next::Item(item) => item,
            Next::FlushDue => {
                let _ = sink.flush();
                pending = 0;
                last_flush = Instant::now();
                continue;
            }
            Next::Disconnected => break,
        };

        match item {
            WorkItem::Record(record) => {
                match emit_guarded(&mut sink, &record, &formatter) {
                    Emit::Written => {
                        pending += 1;
                        if pending >= flush.every_n {
                            let _ = sink.flush();
                            pending = 0;
                            last_flush = Instant::now();
                        }
                    }
                    Emit::Lost => {
                        shared.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    Emit::Panicked => {
                        shared.poisoned.store(true, Ordering::Release);
                        shared.state.store(STATE_CLOSING, Ordering::Release);
                        sink.close();
                        return;
                    }
                }
            }
            WorkItem::Flush(reply) => {
                let _ = sink.flush();
                pending = 0;
                last_flush = Instant::now();
                let _ = reply.send(());
            }
            WorkItem::Close(reply) => {
                drain_remaining(&mut sink, &rx, &formatter, &shared);
                let _ = sink.flush();
                sink.close();
                let _ = reply.send(());
                return;
            }
        }
    }

    // Every producer dropped without an explicit close; release cleanly.
    let _ = sink.flush();
    sink.close();
}

enum Emit {
    Written,
    Lost,
    Panicked,
}

fn emit_guarded(sink: &mut Box<dyn Sink>, record: &Record, formatter: &Formatter) -> Emit {
    match panic::catch_unwind(AssertUnwindSafe(|| sink.emit(record, formatter))) {
        Ok(Ok(())) => Emit::Written,
        Ok(Err(_)) => Emit::Lost,
        Err(_) => Emit::Panicked,
    }
}

fn drain_remaining(
    sink: &mut Box<dyn Sink>,
    rx: &Receiver<WorkItem>,
    formatter: &Formatter,
    shared: &HandlerShared,
) {
    while let Ok(item) = rx.try_recv() {
        match item {
            WorkItem::Record(record) => match emit_guarded(sink, &record, formatter) {
                Emit::Written => {}
                Emit::Lost => {
                    shared.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                }
                Emit::Panicked => {
                    shared.poisoned.store(true, Ordering::Release);
                    return;
                }
            },
            WorkItem::Flush(reply) => {
                let _ = sink.flush();
                let _ = reply.send(());
            }
            WorkItem::Close(reply) => {
                let _ = reply.send(());
            }
        }
    }
}
