//! Handler runtime behaviour: ordering, overflow policies, flush/close
//! protocol, poisoning.

use std::io::BufWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::HandlerError;
use crate::formatter::Formatter;
use crate::handler::worker::Sink;
use crate::handler::{Handler, HandlerOptions, OverflowPolicy, RecordHandler, SubmitResult};
use crate::level::Level;
use crate::record::Record;

use super::{Gate, SharedBuf, wait_until};

fn record(name: &str, message: &str) -> Arc<Record> {
    Arc::new(Record::new(Arc::from(name), Level::Info, message))
}

#[test]
fn single_producer_order_is_preserved() {
    let buf = SharedBuf::new();
    let opts = HandlerOptions::default()
        .with_capacity(8)
        .with_overflow(OverflowPolicy::Block);
    let handler = Handler::with_writer(buf.writer(), Formatter::default(), opts).unwrap();

    for i in 0..100 {
        let result = handler.submit(record("core", &format!("m{i}"))).unwrap();
        assert_eq!(result, SubmitResult::Submitted);
    }
    assert!(handler.flush());
    assert!(handler.close());

    let lines = buf.lines();
    assert_eq!(lines.len(), 100);
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line, &format!("core [INFO] m{i}"));
    }
}

#[test]
fn drop_policy_discards_at_saturation_and_counts() {
    let gate = Gate::new();
    gate.pause();
    let opts = HandlerOptions::default()
        .with_capacity(2)
        .with_overflow(OverflowPolicy::Drop);
    let handler =
        Handler::spawn("gate", Box::new(gate.sink()), Formatter::default(), opts).unwrap();

    let started = Instant::now();
    let mut accepted = 0u64;
    let mut dropped = 0u64;
    for i in 0..1000 {
        match handler.submit(record("core", &format!("r{i}"))).unwrap() {
            SubmitResult::Submitted => accepted += 1,
            SubmitResult::Dropped => dropped += 1,
            SubmitResult::TimedOut => unreachable!("drop policy cannot time out"),
        }
    }
    // Drop policy never blocks the producer.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(accepted + dropped, 1000);
    assert!(dropped > 0);
    assert_eq!(handler.dropped(), dropped);

    gate.resume();
    assert!(handler.close());
    assert_eq!(gate.lines().len() as u64, accepted);
}

#[test]
fn timeout_policy_returns_within_the_bound() {
    let gate = Gate::new();
    gate.pause();
    let opts = HandlerOptions::default()
        .with_capacity(1)
        .with_overflow(OverflowPolicy::Timeout(50));
    let handler =
        Handler::spawn("gate", Box::new(gate.sink()), Formatter::default(), opts).unwrap();

    // First record is taken by the consumer and parks in the gate; the
    // second fills the queue.
    assert_eq!(
        handler.submit(record("core", "a")).unwrap(),
        SubmitResult::Submitted
    );
    assert_eq!(
        handler.submit(record("core", "b")).unwrap(),
        SubmitResult::Submitted
    );

    let started = Instant::now();
    let result = handler.submit(record("core", "c")).unwrap();
    let elapsed = started.elapsed();
    assert_eq!(result, SubmitResult::TimedOut);
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(500));
    assert_eq!(handler.timed_out(), 1);

    gate.resume();
    assert!(handler.close());
}

#[test]
fn block_policy_with_capacity_one_loses_nothing() {
    let gate = Gate::new();
    let opts = HandlerOptions::default()
        .with_capacity(1)
        .with_overflow(OverflowPolicy::Block);
    let handler = Arc::new(
        Handler::spawn("gate", Box::new(gate.sink()), Formatter::default(), opts).unwrap(),
    );

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let handler = Arc::clone(&handler);
            std::thread::spawn(move || {
                for i in 0..50 {
                    let result = handler
                        .submit(record("core", &format!("t{t}-{i}")))
                        .unwrap();
                    assert_eq!(result, SubmitResult::Submitted);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    assert!(handler.close());

    let lines = gate.lines();
    assert_eq!(lines.len(), 200);
    // Per-producer order survives interleaving.
    for t in 0..4 {
        let own: Vec<_> = lines
            .iter()
            .filter(|l| l.contains(&format!("t{t}-")))
            .collect();
        for (i, line) in own.iter().enumerate() {
            assert_eq!(**line, format!("core [INFO] t{t}-{i}"));
        }
    }
}

#[test]
fn flush_reply_signals_durability() {
    let buf = SharedBuf::new();
    let opts = HandlerOptions::default().with_flush_every(1_000);
    let handler = Handler::with_writer(
        Box::new(BufWriter::new(super::SharedBufWriter::from(&buf))),
        Formatter::default(),
        opts,
    )
    .unwrap();

    handler.submit(record("core", "pending")).unwrap();
    assert!(handler.flush());
    assert!(buf.contents().contains("pending"));
    assert!(handler.close());
}

#[test]
fn timed_flush_fires_without_explicit_requests() {
    let buf = SharedBuf::new();
    let opts = HandlerOptions::default()
        .with_flush_every(1_000)
        .with_flush_interval_ms(25);
    let handler = Handler::with_writer(
        Box::new(BufWriter::new(super::SharedBufWriter::from(&buf))),
        Formatter::default(),
        opts,
    )
    .unwrap();

    handler.submit(record("core", "timed")).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        buf.contents().contains("timed")
    }));
    assert!(handler.close());
}

#[test]
fn close_is_idempotent_and_rejects_later_submits() {
    let buf = SharedBuf::new();
    let handler =
        Handler::with_writer(buf.writer(), Formatter::default(), HandlerOptions::default())
            .unwrap();
    handler.submit(record("core", "last")).unwrap();

    let first = handler.close();
    let second = handler.close();
    assert!(first);
    assert_eq!(first, second);

    assert_eq!(
        handler.submit(record("core", "late")).unwrap_err(),
        HandlerError::Closed
    );
    assert!(!handler.flush());
    assert_eq!(buf.lines(), vec!["core [INFO] last".to_string()]);
}

struct PanickingSink;

impl Sink for PanickingSink {
    fn emit(&mut self, _record: &Record, _formatter: &Formatter) -> std::io::Result<()> {
        panic!("sink exploded");
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn consumer_panic_poisons_the_handler() {
    let handler = Handler::spawn(
        "panicky",
        Box::new(PanickingSink),
        Formatter::default(),
        HandlerOptions::default(),
    )
    .unwrap();

    handler.submit(record("core", "boom")).unwrap();
    assert!(wait_until(Duration::from_secs(2), || handler.is_poisoned()));

    let err = handler.submit(record("core", "after")).unwrap_err();
    assert_eq!(err, HandlerError::Poisoned);
    assert!(!handler.flush());
    assert!(!handler.close());
}

struct FailingSink;

impl Sink for FailingSink {
    fn emit(&mut self, _record: &Record, _formatter: &Formatter) -> std::io::Result<()> {
        Err(std::io::Error::other("write refused"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn terminal_write_failures_count_and_do_not_stop_the_consumer() {
    let handler = Handler::spawn(
        "failing",
        Box::new(FailingSink),
        Formatter::default(),
        HandlerOptions::default(),
    )
    .unwrap();

    for _ in 0..5 {
        handler.submit(record("core", "x")).unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || {
        handler.write_errors() == 5
    }));
    assert!(!handler.is_poisoned());
    assert!(handler.close());
}

#[test]
fn zero_values_are_rejected_at_build_time() {
    use crate::error::HandlerConfigErrorKind;

    let cases = [
        (
            HandlerOptions::default().with_capacity(0),
            HandlerConfigErrorKind::ZeroInterval,
        ),
        (
            HandlerOptions::default().with_flush_every(0),
            HandlerConfigErrorKind::ZeroInterval,
        ),
        (
            HandlerOptions::default().with_flush_interval_ms(0),
            HandlerConfigErrorKind::ZeroInterval,
        ),
        (
            HandlerOptions::default().with_overflow(OverflowPolicy::Timeout(0)),
            HandlerConfigErrorKind::ZeroTimeout,
        ),
        (
            HandlerOptions::default().with_flush_timeout_ms(0),
            HandlerConfigErrorKind::ZeroTimeout,
        ),
    ];
    for (opts, expected) in cases {
        let err = opts.validate().unwrap_err();
        assert_eq!(err.kind, expected);
    }
}
