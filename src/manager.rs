//! The process-wide manager: logger registry and published topology.
//!
//! The published [`Snapshot`] is the sole shared mutable datum. Emitters
//! load it lock-free through `arc-swap` and keep the loaded reference for
//! the duration of one `log` call, so a concurrent commit can never be
//! observed half-installed. Writers (topology commits, per-logger
//! mutators, reset) serialise on a single lock, build a new snapshot
//! value, and swap it in whole. Handler runtimes dropped from the table
//! shut down via their `Drop` impl once the last in-flight reference
//! releases.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::config::Topology;
use crate::error::ConfigError;
use crate::filter::Filter;
use crate::handler::{Handler, RecordHandler};
use crate::level::Level;
use crate::logger::Logger;

pub(crate) const ROOT: &str = "root";

/// Effective level when no logger on the chain has one set.
pub(crate) const DEFAULT_ROOT_LEVEL: Level = Level::Warn;

/// A handler attached to a logger: either owned by the topology's
/// handler table (tracked by id so a later commit can re-resolve or
/// retire it) or attached directly via `Logger::add_handler`.
#[derive(Clone)]
pub(crate) enum SliceHandler {
    Managed {
        id: String,
        runtime: Arc<dyn RecordHandler>,
    },
    Direct(Arc<dyn RecordHandler>),
}

impl SliceHandler {
    /// The live runtime behind this attachment, regardless of ownership.
    ///
    /// # Returns
    ///
    /// The handler to submit records to
    pub(crate) fn runtime(&self) -> &Arc<dyn RecordHandler> {
        match self {
            SliceHandler::Managed { runtime, .. } => runtime,
            SliceHandler::Direct(runtime) => runtime,
        }
    }
}

/// Per-logger state embedded in a snapshot. Cheap to clone: handler and
/// filter lists are shared.
#[derive(Clone)]
pub(crate) struct LoggerSlice {
    pub(crate) level: Option<Level>,
    pub(crate) propagate: bool,
    pub(crate) filters: Arc<Vec<Filter>>,
    pub(crate) handlers: SmallVec<[SliceHandler; 2]>,
}

impl LoggerSlice {
    pub(crate) fn new() -> LoggerSlice {
        LoggerSlice {
            level: None,
            propagate: true,
            filters: Arc::new(Vec::new()),
            handlers: SmallVec::new(),
        }
    }
}

/// One immutable published topology: per-logger slices plus the owning
/// handler table keyed by id.
pub(crate) struct Snapshot {
    pub(crate) loggers: AHashMap<Arc<str>, LoggerSlice>,
    pub(crate) handlers: AHashMap<String, Arc<Handler>>,
}

impl Snapshot {
    fn empty() -> Snapshot {
        Snapshot {
            loggers: AHashMap::new(),
            handlers: AHashMap::new(),
        }
    }
}

pub(crate) struct Manager {
    snapshot: ArcSwap<Snapshot>,
    registry: RwLock<AHashMap<String, Arc<Logger>>>,
    write_lock: Mutex<()>,
    generation: AtomicU64,
}

static MANAGER: Lazy<Manager> = Lazy::new(|| Manager {
    snapshot: ArcSwap::from_pointee(Snapshot::empty()),
    registry: RwLock::new(AHashMap::new()),
    write_lock: Mutex::new(()),
    generation: AtomicU64::new(0),
});

pub(crate) fn manager() -> &'static Manager {
    &MANAGER
}

impl Manager {
    /// Capture the currently published topology snapshot.
    ///
    /// Emitters call this once per `log` and hold the returned reference
    /// for the whole call; a concurrent commit therefore cannot be
    /// observed half-installed, and runtimes retired by that commit stay
    /// alive until the reference drops.
    ///
    /// # Returns
    ///
    /// A shared reference to the immutable snapshot
    pub(crate) fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// The publication counter used to invalidate per-logger level
    /// caches.
    ///
    /// # Returns
    ///
    /// A value that increases on every snapshot publication (commit,
    /// per-logger mutation, reset)
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Return the canonical logger for `name`, materialising it and any
    /// missing ancestors up to the root.
    ///
    /// # Arguments
    ///
    /// * `name` - Dot-separated logger name, or `"root"` for the root
    ///   logger
    ///
    /// # Returns
    ///
    /// * `Ok(logger)` - The canonical instance; repeat calls return the
    ///   same `Arc`
    /// * `Err(ConfigError::InvalidLoggerName)` - Empty name, leading or
    ///   trailing dot, or consecutive dots
    pub(crate) fn get_logger(&self, name: &str) -> Result<Arc<Logger>, ConfigError> {
        validate_logger_name(name)?;
        if let Some(existing) = self.registry.read().get(name) {
            return Ok(Arc::clone(existing));
        }
        let mut registry = self.registry.write();
        if let Some(existing) = registry.get(name) {
            return Ok(Arc::clone(existing));
        }
        for ancestor in ancestor_chain(name) {
            registry
                .entry(ancestor.to_string())
                .or_insert_with(|| Arc::new(Logger::new(&ancestor)));
        }
        let logger = registry
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Logger::new(name)));
        Ok(Arc::clone(logger))
    }

    /// Replace one logger's slice, leaving the rest of the published
    /// snapshot untouched.
    ///
    /// Writers serialise on the manager's lock; readers keep loading the
    /// previous snapshot lock-free until the new one is stored, so the
    /// mutation is observed whole or not at all.
    ///
    /// # Arguments
    ///
    /// * `name` - Logger whose slice is replaced (created with defaults
    ///   when absent)
    /// * `mutate` - Edit applied to a copy of the slice before it is
    ///   published
    pub(crate) fn update_slice(&self, name: &str, mutate: impl FnOnce(&mut LoggerSlice)) {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load_full();
        let mut loggers = current.loggers.clone();
        let mut slice = loggers
            .get(name)
            .cloned()
            .unwrap_or_else(LoggerSlice::new);
        mutate(&mut slice);
        loggers.insert(Arc::from(name), slice);
        self.publish(Snapshot {
            loggers,
            handlers: current.handlers.clone(),
        });
    }

    /// Commit a validated topology: build all runtimes, then swap the
    /// published snapshot. Any failure before the swap leaves the prior
    /// topology in effect; runtimes spawned during the attempt close as
    /// they drop.
    ///
    /// With `disable_existing` set, prior loggers that are neither
    /// re-declared nor ancestors of a declared logger are cleared back
    /// to defaults; ancestors keep their node and directly attached
    /// handlers.
    ///
    /// # Arguments
    ///
    /// * `topology` - The configuration value to install
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The snapshot was swapped; retired runtimes close as
    ///   their last references release
    /// * `Err(ConfigError)` - Validation or handler construction failed;
    ///   nothing was published
    pub(crate) fn apply(&self, topology: &Topology) -> Result<(), ConfigError> {
        topology.validate()?;
        let runtimes = topology.build_runtimes()?;

        let _guard = self.write_lock.lock();
        let current = self.snapshot.load_full();
        let mut loggers = current.loggers.clone();

        if topology.disable_existing {
            let preserved = topology.ancestor_names();
            loggers.retain(|name, _| {
                let name = name.as_ref();
                name == ROOT
                    || topology.loggers.contains_key(name)
                    || preserved.contains(name)
            });
        }

        // Retained loggers re-resolve their topology-managed handlers
        // against the new table: same id points at the new runtime, a
        // vanished id is dropped (the old runtime closes once the last
        // in-flight reference releases). Directly attached handlers
        // survive untouched.
        for slice in loggers.values_mut() {
            let mut remapped: SmallVec<[SliceHandler; 2]> = SmallVec::new();
            for entry in slice.handlers.drain(..) {
                match entry {
                    SliceHandler::Managed { id, .. } => {
                        if let Some(runtime) = runtimes.get(&id) {
                            let runtime: Arc<dyn RecordHandler> = Arc::clone(runtime) as Arc<dyn RecordHandler>;
                            remapped.push(SliceHandler::Managed { id, runtime });
                        }
                    }
                    SliceHandler::Direct(runtime) => {
                        remapped.push(SliceHandler::Direct(runtime));
                    }
                }
            }
            slice.handlers = remapped;
        }

        for (name, config) in &topology.loggers {
            let slice = topology.build_slice(config, &runtimes)?;
            loggers.insert(Arc::from(name.as_str()), slice);
        }
        let root_slice = topology.build_slice(&topology.root, &runtimes)?;
        loggers.insert(Arc::from(ROOT), root_slice);

        self.publish(Snapshot {
            loggers,
            handlers: runtimes,
        });
        Ok(())
    }

    /// Install an empty topology with only the default root, closing
    /// every prior handler runtime via the close protocol.
    ///
    /// Serialisable against concurrent emitters: a `log` call either
    /// completes against the old snapshot or observes the empty one; an
    /// emitter caught mid-call may see `HandlerClosed` from a runtime
    /// this reset closed underneath it.
    pub(crate) fn reset(&self) {
        let old = {
            let _guard = self.write_lock.lock();
            self.snapshot.swap(Arc::new(Snapshot::empty()))
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        for handler in old.handlers.values() {
            handler.close();
        }
    }

    fn publish(&self, snapshot: Snapshot) {
        self.snapshot.store(Arc::new(snapshot));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Reject empty names, leading/trailing dots, and consecutive dots.
///
/// # Arguments
///
/// * `name` - Candidate logger name
///
/// # Returns
///
/// * `Ok(())` when every dot-separated segment is non-empty
/// * `Err(ConfigError::InvalidLoggerName)` otherwise
pub(crate) fn validate_logger_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.split('.').any(str::is_empty) {
        return Err(ConfigError::InvalidLoggerName(name.to_string()));
    }
    Ok(())
}

/// Names of the ancestors of `name`, nearest first, ending at `root`.
///
/// # Arguments
///
/// * `name` - Logger name to walk up from
///
/// # Returns
///
/// `["a.b", "a", "root"]` for `"a.b.c"`; empty for the root itself
pub(crate) fn ancestor_chain(name: &str) -> Vec<String> {
    if name == ROOT {
        return Vec::new();
    }
    let mut chain = Vec::new();
    let mut rest = name;
    while let Some(idx) = rest.rfind('.') {
        rest = &rest[..idx];
        chain.push(rest.to_string());
    }
    chain.push(ROOT.to_string());
    chain
}
