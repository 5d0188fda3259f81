//! Named loggers: level gate, filters, handler dispatch, propagation.
//!
//! A `Logger` is a lightweight facade over the manager's published
//! snapshot; its mutable state (level, filters, handlers, propagate) lives
//! in the snapshot so one `log` call observes exactly one topology. The
//! effective level is cached per logger and invalidated by a global
//! generation counter bumped on every snapshot publication.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::HandlerError;
use crate::filter::{Filter, passes_all};
use crate::handler::{RecordHandler, SubmitResult};
use crate::level::Level;
use crate::manager::{DEFAULT_ROOT_LEVEL, ROOT, SliceHandler, Snapshot, ancestor_chain, manager};
use crate::record::{Record, RecordFields};

/// Outcome of a `log` call that passed the level gate.
///
/// Submission outcomes are values, not errors: a saturated Drop-policy
/// handler shows up in `dropped`, an expired Timeout-policy wait in
/// `timed_out`. The preview is rendered by the first handler's formatter,
/// or the default `"{name} [{level}] {message}"` when no handler exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    pub preview: String,
    pub delivered: usize,
    pub dropped: usize,
    pub timed_out: usize,
}

/// A named node in the logger hierarchy.
///
/// Instances are canonical: `get_logger` returns the same `Arc<Logger>`
/// for the same name for the life of the process. Names are
/// dot-separated; the parent of `a.b.c` is `a.b` and the parent of a
/// top-level name is the root logger.
pub struct Logger {
    name: Arc<str>,
    ancestors: Box<[Arc<str>]>,
    cached_level: AtomicU64,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").field("name", &self.name).finish()
    }
}

impl Logger {
    pub(crate) fn new(name: &str) -> Logger {
        let ancestors = ancestor_chain(name)
            .into_iter()
            .map(Arc::from)
            .collect::<Vec<Arc<str>>>()
            .into_boxed_slice();
        Logger {
            name: Arc::from(name),
            ancestors,
            cached_level: AtomicU64::new(0),
        }
    }

    /// This logger's full dotted name.
    ///
    /// # Returns
    ///
    /// The name passed to `get_logger`, unchanged
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The level this logger gates on: its own if set, else inherited
    /// from the nearest ancestor with one set, else the root default
    /// (`WARN`).
    ///
    /// The walk result is cached per logger; any snapshot publication
    /// (topology commit, level mutation, reset) invalidates the cache, so
    /// the next check observes the update.
    ///
    /// # Returns
    ///
    /// The concrete level used by the next threshold check
    ///
    /// # Examples
    ///
    /// ```rust
    /// let log = fanlog::get_logger("docs.effective").unwrap();
    /// assert_eq!(log.effective_level(), fanlog::Level::Warn);
    ///
    /// log.set_level(fanlog::Level::Debug);
    /// assert_eq!(log.effective_level(), fanlog::Level::Debug);
    /// ```
    pub fn effective_level(&self) -> Level {
        let mgr = manager();
        let generation = mgr.generation();
        let snapshot = mgr.snapshot();
        self.effective_level_in(&snapshot, generation)
    }

    fn effective_level_in(&self, snapshot: &Snapshot, generation: u64) -> Level {
        // Cache encoding: (generation + 1) << 3 | rank; zero = no entry.
        let cached = self.cached_level.load(Ordering::Acquire);
        if cached != 0 && (cached >> 3) == generation + 1 {
            if let Some(level) = Level::from_rank((cached & 0x7) as u8) {
                return level;
            }
        }
        let level = self.compute_effective_level(snapshot);
        self.cached_level.store(
            ((generation + 1) << 3) | u64::from(level.rank()),
            Ordering::Release,
        );
        level
    }

    fn compute_effective_level(&self, snapshot: &Snapshot) -> Level {
        if let Some(slice) = snapshot.loggers.get(self.name.as_ref()) {
            if let Some(level) = slice.level {
                return level;
            }
        }
        for ancestor in &self.ancestors {
            if let Some(slice) = snapshot.loggers.get(ancestor.as_ref()) {
                if let Some(level) = slice.level {
                    return level;
                }
            }
        }
        DEFAULT_ROOT_LEVEL
    }

    /// Emit a record at `level`.
    ///
    /// The record is materialised only after the level check passes, then
    /// offered to this logger's handlers and, while propagation allows,
    /// to each ancestor's handlers in walk order.
    ///
    /// # Arguments
    ///
    /// * `level` - Severity of the record
    /// * `message` - Log message
    ///
    /// # Returns
    ///
    /// * `Ok(None)` when suppressed at this logger's threshold or by its
    ///   filters
    /// * `Ok(Some(Emitted))` with the preview and per-submission counts
    /// * `Err(HandlerError)` when a target handler is closed or poisoned
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fanlog::Level;
    ///
    /// let log = fanlog::get_logger("docs.log").unwrap();
    /// log.set_level(Level::Info);
    ///
    /// assert!(log.log(Level::Debug, "hidden").unwrap().is_none());
    /// let emitted = log.log(Level::Info, "shown").unwrap().unwrap();
    /// assert_eq!(emitted.preview, "docs.log [INFO] shown");
    /// ```
    pub fn log(&self, level: Level, message: &str) -> Result<Option<Emitted>, HandlerError> {
        self.log_with(level, message, RecordFields::default())
    }

    /// Emit a record carrying extra payloads.
    ///
    /// # Arguments
    ///
    /// * `level` - Severity of the record
    /// * `message` - Log message
    /// * `fields` - Exception payload, stack payload, key-values, and
    ///   caller location to attach to the record
    ///
    /// # Returns
    ///
    /// Same contract as [`Logger::log`]
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fanlog::{Level, RecordFields};
    ///
    /// let log = fanlog::get_logger("docs.extras").unwrap();
    /// log.set_level(Level::Info);
    ///
    /// let fields = RecordFields::default().with_key_value("request_id", "r-1");
    /// let emitted = log.log_with(Level::Info, "handled", fields).unwrap().unwrap();
    /// assert_eq!(emitted.delivered, 0);
    /// ```
    pub fn log_with(
        &self,
        level: Level,
        message: &str,
        fields: RecordFields,
    ) -> Result<Option<Emitted>, HandlerError> {
        let mgr = manager();
        let generation = mgr.generation();
        let snapshot = mgr.snapshot();

        if level < self.effective_level_in(&snapshot, generation) {
            return Ok(None);
        }

        let record = Arc::new(Record::with_fields(
            Arc::clone(&self.name),
            level,
            message,
            fields,
        ));

        if let Some(slice) = snapshot.loggers.get(self.name.as_ref()) {
            if !passes_all(&slice.filters, &record) {
                return Ok(None);
            }
        }

        let mut preview: Option<String> = None;
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        let mut timed_out = 0usize;

        let chain =
            std::iter::once(self.name.as_ref()).chain(self.ancestors.iter().map(|a| a.as_ref()));
        for name in chain {
            let Some(slice) = snapshot.loggers.get(name) else {
                // Absent loggers behave as defaults: no handlers,
                // propagate on.
                continue;
            };
            for entry in &slice.handlers {
                let handler = entry.runtime();
                if preview.is_none() {
                    preview = handler.preview(&record);
                }
                match handler.submit(Arc::clone(&record))? {
                    SubmitResult::Submitted => delivered += 1,
                    SubmitResult::Dropped => dropped += 1,
                    SubmitResult::TimedOut => timed_out += 1,
                }
            }
            if name != ROOT && !slice.propagate {
                break;
            }
        }

        let preview =
            preview.unwrap_or_else(|| format!("{} [{}] {}", self.name, level, record.message()));
        Ok(Some(Emitted {
            preview,
            delivered,
            dropped,
            timed_out,
        }))
    }

    /// Log a message at TRACE level (most verbose).
    ///
    /// # Arguments
    ///
    /// * `message` - Log message
    pub fn trace(&self, message: &str) -> Result<Option<Emitted>, HandlerError> {
        self.log(Level::Trace, message)
    }

    /// Log a message at DEBUG level.
    ///
    /// # Arguments
    ///
    /// * `message` - Log message
    pub fn debug(&self, message: &str) -> Result<Option<Emitted>, HandlerError> {
        self.log(Level::Debug, message)
    }

    /// Log a message at INFO level.
    ///
    /// # Arguments
    ///
    /// * `message` - Log message
    pub fn info(&self, message: &str) -> Result<Option<Emitted>, HandlerError> {
        self.log(Level::Info, message)
    }

    /// Log a message at WARN level.
    ///
    /// # Arguments
    ///
    /// * `message` - Log message
    pub fn warn(&self, message: &str) -> Result<Option<Emitted>, HandlerError> {
        self.log(Level::Warn, message)
    }

    /// Log a message at ERROR level.
    ///
    /// # Arguments
    ///
    /// * `message` - Log message
    pub fn error(&self, message: &str) -> Result<Option<Emitted>, HandlerError> {
        self.log(Level::Error, message)
    }

    /// Log a message at CRITICAL level (most severe).
    ///
    /// # Arguments
    ///
    /// * `message` - Log message
    pub fn critical(&self, message: &str) -> Result<Option<Emitted>, HandlerError> {
        self.log(Level::Critical, message)
    }

    /// Set or clear this logger's level.
    ///
    /// Descendants with no level of their own observe the change at
    /// their next level check; the operation never tears a concurrent
    /// `log` call.
    ///
    /// # Arguments
    ///
    /// * `level` - A concrete `Level`, or `None` to inherit from the
    ///   nearest ancestor again
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fanlog::Level;
    ///
    /// let log = fanlog::get_logger("docs.levels").unwrap();
    /// log.set_level(Level::Debug);
    /// assert_eq!(log.level(), Some(Level::Debug));
    ///
    /// log.set_level(None);
    /// assert_eq!(log.level(), None);
    /// assert_eq!(log.effective_level(), Level::Warn);
    /// ```
    pub fn set_level(&self, level: impl Into<Option<Level>>) {
        let level = level.into();
        manager().update_slice(&self.name, |slice| slice.level = level);
    }

    /// Enable or disable forwarding records to ancestor loggers.
    ///
    /// The root logger's flag is ignored; the ancestor walk always stops
    /// there.
    ///
    /// # Arguments
    ///
    /// * `propagate` - `true` to forward to ancestors (the default)
    pub fn set_propagate(&self, propagate: bool) {
        manager().update_slice(&self.name, |slice| slice.propagate = propagate);
    }

    /// Attach a handler to this logger.
    ///
    /// Any object presenting the submit/flush/close shape is accepted,
    /// including externally implemented adapters. Handlers attached here
    /// survive topology commits (they are not owned by the handler
    /// table).
    ///
    /// # Arguments
    ///
    /// * `handler` - The handler to receive this logger's records
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// let log = fanlog::get_logger("docs.attach").unwrap();
    /// log.add_handler(Arc::new(fanlog::Handler::stderr()));
    /// assert_eq!(log.handler_count(), 1);
    /// ```
    pub fn add_handler(&self, handler: Arc<dyn RecordHandler>) {
        manager().update_slice(&self.name, |slice| {
            slice.handlers.push(SliceHandler::Direct(handler));
        });
    }

    /// Detach every handler from this logger.
    ///
    /// Detached runtimes shut down once the last reference (the handler
    /// table or an in-flight `log` call) releases them.
    pub fn clear_handlers(&self) {
        manager().update_slice(&self.name, |slice| slice.handlers.clear());
    }

    /// Append a filter to this logger's filter list.
    ///
    /// Filters evaluate in list order at the emitting logger; a record
    /// passes iff every filter accepts it.
    ///
    /// # Arguments
    ///
    /// * `filter` - The predicate to append
    pub fn add_filter(&self, filter: Filter) {
        manager().update_slice(&self.name, |slice| {
            let mut filters = (*slice.filters).clone();
            filters.push(filter);
            slice.filters = Arc::new(filters);
        });
    }

    /// Remove every filter from this logger.
    pub fn clear_filters(&self) {
        manager().update_slice(&self.name, |slice| slice.filters = Arc::new(Vec::new()));
    }

    /// Flush every handler attached to this logger.
    ///
    /// Each flush waits up to that handler's flush timeout for the
    /// drain-and-flush reply. A `false` return is the canonical signal
    /// that pending records may not be durable yet.
    ///
    /// # Returns
    ///
    /// `true` iff every attached handler replied in time
    pub fn flush_handlers(&self) -> bool {
        let snapshot = manager().snapshot();
        match snapshot.loggers.get(self.name.as_ref()) {
            Some(slice) => slice.handlers.iter().all(|h| h.runtime().flush()),
            None => true,
        }
    }

    /// Number of handlers currently attached to this logger.
    ///
    /// # Returns
    ///
    /// The attached handler count in the published snapshot
    pub fn handler_count(&self) -> usize {
        manager()
            .snapshot()
            .loggers
            .get(self.name.as_ref())
            .map(|slice| slice.handlers.len())
            .unwrap_or(0)
    }

    /// This logger's own level.
    ///
    /// # Returns
    ///
    /// `Some(level)` when explicitly set, `None` when inheriting; see
    /// [`Logger::effective_level`] for the resolved value
    pub fn level(&self) -> Option<Level> {
        manager()
            .snapshot()
            .loggers
            .get(self.name.as_ref())
            .and_then(|slice| slice.level)
    }

    /// Whether records forwarded from this logger reach its ancestors.
    ///
    /// # Returns
    ///
    /// The propagate flag, `true` for loggers never configured
    pub fn propagate(&self) -> bool {
        manager()
            .snapshot()
            .loggers
            .get(self.name.as_ref())
            .map(|slice| slice.propagate)
            .unwrap_or(true)
    }
}
