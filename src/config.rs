//! The configuration graph: serialisable topology values and the fluent
//! builder that commits them.
//!
//! A [`Topology`] is the atomic unit handed to the manager: formatters,
//! filters, handler configurations, and logger configurations, all keyed
//! by id. Building runtimes and swapping the published snapshot is
//! all-or-nothing; any validation or construction failure leaves the
//! previously committed topology in effect.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::ConfigError;
use crate::filter::Filter;
use crate::formatter::{Formatter, FormatterSpec};
use crate::handler::{
    Handler, HandlerOptions, HttpConfig, OverflowPolicy, RecordHandler, SocketConfig, StreamTarget,
};
use crate::handler::rotating::validate_rotation;
use crate::level::Level;
use crate::logger::Logger;
use crate::manager::{LoggerSlice, SliceHandler, ancestor_chain, manager, validate_logger_name};

/// Sink selection and sink-specific parameters for one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SinkConfig {
    Stream {
        target: StreamTarget,
    },
    File {
        path: PathBuf,
    },
    RotatingFile {
        path: PathBuf,
        max_bytes: u64,
        backup_count: u32,
    },
    Socket(SocketConfig),
    Http(HttpConfig),
}

/// Topology-level description of one handler runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub sink: SinkConfig,
    #[serde(default)]
    pub formatter: Option<String>,
    #[serde(default)]
    pub options: HandlerOptions,
}

impl HandlerConfig {
    fn new(sink: SinkConfig) -> HandlerConfig {
        HandlerConfig {
            sink,
            formatter: None,
            options: HandlerOptions::default(),
        }
    }

    /// Handler over a standard output stream.
    ///
    /// # Arguments
    ///
    /// * `target` - `StreamTarget::Stdout` or `StreamTarget::Stderr`
    ///
    /// # Returns
    ///
    /// A configuration with the default formatter and options
    pub fn stream(target: StreamTarget) -> HandlerConfig {
        HandlerConfig::new(SinkConfig::Stream { target })
    }

    /// Shorthand for a stderr stream handler.
    pub fn stderr() -> HandlerConfig {
        HandlerConfig::stream(StreamTarget::Stderr)
    }

    /// Shorthand for a stdout stream handler.
    pub fn stdout() -> HandlerConfig {
        HandlerConfig::stream(StreamTarget::Stdout)
    }

    /// Handler appending rendered lines to a file.
    ///
    /// The path is opened when the topology commits; an open failure
    /// aborts the commit with `HandlerConfigError(IoOpen)`.
    ///
    /// # Arguments
    ///
    /// * `path` - File to append to, created when missing
    pub fn file(path: impl Into<PathBuf>) -> HandlerConfig {
        HandlerConfig::new(SinkConfig::File { path: path.into() })
    }

    /// Handler with size-triggered rotation and numbered backups.
    ///
    /// Rotation is enabled iff both `max_bytes` and `backup_count` are
    /// positive; both zero disables rotation, and a partial
    /// configuration is rejected at build time.
    ///
    /// # Arguments
    ///
    /// * `path` - Base file; backups are `path.1 .. path.backup_count`
    /// * `max_bytes` - Size a write may not push the active file past
    /// * `backup_count` - How many rotated files to keep
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fanlog::{ConfigBuilder, ConfigError, HandlerConfig, LoggerConfig};
    ///
    /// let err = ConfigBuilder::new()
    ///     .with_handler("rot", HandlerConfig::rotating("/tmp/app.log", 1024, 0))
    ///     .with_root(LoggerConfig::new())
    ///     .build()
    ///     .unwrap_err();
    /// assert!(matches!(err, ConfigError::InvalidRotationConfig(_)));
    /// ```
    pub fn rotating(path: impl Into<PathBuf>, max_bytes: u64, backup_count: u32) -> HandlerConfig {
        HandlerConfig::new(SinkConfig::RotatingFile {
            path: path.into(),
            max_bytes,
            backup_count,
        })
    }

    /// Handler shipping length-prefixed binary frames over a socket.
    ///
    /// # Arguments
    ///
    /// * `config` - Transport, TLS, timeout, frame-size, and backoff
    ///   parameters
    pub fn socket(config: SocketConfig) -> HandlerConfig {
        HandlerConfig::new(SinkConfig::Socket(config))
    }

    /// Handler posting each record to an HTTP endpoint.
    ///
    /// # Arguments
    ///
    /// * `config` - URL, method, auth, body shape, timeout, and backoff
    ///   parameters
    pub fn http(config: HttpConfig) -> HandlerConfig {
        HandlerConfig::new(SinkConfig::Http(config))
    }

    /// Render records with the formatter registered under `id` instead
    /// of the default template.
    ///
    /// # Arguments
    ///
    /// * `id` - Formatter id; unknown ids fail the commit with
    ///   `UnknownReference`
    pub fn with_formatter(mut self, id: impl Into<String>) -> Self {
        self.formatter = Some(id.into());
        self
    }

    /// Set the bounded queue capacity (default 1024, must be at least
    /// 1).
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum records waiting for the consumer
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.options.capacity = capacity;
        self
    }

    /// Choose how producers behave when the queue is full (default
    /// `Drop`).
    ///
    /// # Arguments
    ///
    /// * `overflow` - `Drop`, `Block`, or `Timeout(ms)`
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.options.overflow = overflow;
        self
    }

    /// Flush the sink after every `every_n` processed records (default
    /// 1, must be at least 1).
    ///
    /// # Arguments
    ///
    /// * `every_n` - Record count between flushes
    pub fn with_flush_every(mut self, every_n: usize) -> Self {
        self.options.flush.every_n = every_n;
        self
    }

    /// Additionally flush once `every_ms` milliseconds have elapsed with
    /// unflushed writes pending.
    ///
    /// # Arguments
    ///
    /// * `every_ms` - Milliseconds between time-driven flushes, positive
    pub fn with_flush_interval_ms(mut self, every_ms: u64) -> Self {
        self.options.flush.every_ms = Some(every_ms);
        self
    }

    /// Replace the whole tuning block in one call.
    ///
    /// # Arguments
    ///
    /// * `options` - Capacity, overflow, flush, and protocol timeouts
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.options.validate()?;
        match &self.sink {
            SinkConfig::Stream { .. } | SinkConfig::File { .. } => Ok(()),
            SinkConfig::RotatingFile {
                max_bytes,
                backup_count,
                ..
            } => validate_rotation(*max_bytes, *backup_count),
            SinkConfig::Socket(config) => Ok(config.validate()?),
            SinkConfig::Http(config) => Ok(config.validate()?),
        }
    }

    fn build_runtime(&self, formatter: Formatter) -> Result<Handler, ConfigError> {
        let opts = self.options.clone();
        match &self.sink {
            SinkConfig::Stream { target } => Handler::stream(*target, formatter, opts),
            SinkConfig::File { path } => Handler::file(path.clone(), formatter, opts),
            SinkConfig::RotatingFile {
                path,
                max_bytes,
                backup_count,
            } => Handler::rotating(path.clone(), *max_bytes, *backup_count, formatter, opts),
            SinkConfig::Socket(config) => Handler::socket(config.clone(), formatter, opts),
            SinkConfig::Http(config) => Handler::http(config.clone(), formatter, opts),
        }
    }
}

fn default_propagate() -> bool {
    true
}

/// Topology-level description of one logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub level: Option<Level>,
    #[serde(default)]
    pub handlers: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default = "default_propagate")]
    pub propagate: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: None,
            handlers: Vec::new(),
            filters: Vec::new(),
            propagate: true,
        }
    }
}

impl LoggerConfig {
    /// A logger with no level of its own, no handlers, no filters, and
    /// propagation on.
    pub fn new() -> LoggerConfig {
        LoggerConfig::default()
    }

    /// Give this logger an explicit level instead of inheriting one.
    ///
    /// # Arguments
    ///
    /// * `level` - Threshold for records emitted through this logger
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Attach handlers by id.
    ///
    /// # Arguments
    ///
    /// * `ids` - Handler ids; each must be registered in the same
    ///   topology or the commit fails with `UnknownReference`
    pub fn with_handlers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handlers = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Attach filters by id, evaluated in the given order.
    ///
    /// # Arguments
    ///
    /// * `ids` - Filter ids; each must be registered in the same
    ///   topology or the commit fails with `UnknownReference`
    pub fn with_filters<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Control whether records continue to ancestor loggers (default
    /// `true`).
    ///
    /// # Arguments
    ///
    /// * `propagate` - `false` stops the ancestor walk at this logger
    pub fn with_propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }
}

/// The atomically committed configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub version: u32,
    #[serde(default)]
    pub formatters: BTreeMap<String, FormatterSpec>,
    #[serde(default)]
    pub filters: BTreeMap<String, Filter>,
    #[serde(default)]
    pub handlers: BTreeMap<String, HandlerConfig>,
    #[serde(default)]
    pub loggers: BTreeMap<String, LoggerConfig>,
    pub root: LoggerConfig,
    #[serde(default)]
    pub disable_existing: bool,
}

impl Topology {
    /// Commit this topology to the process-wide manager.
    ///
    /// All handler runtimes are built before anything is published;
    /// concurrent emitters observe either the previous topology or this
    /// one in full, never a mix.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The topology is installed; runtimes it no longer
    ///   references retire once in-flight `log` calls release them
    /// * `Err(ConfigError)` - Validation or construction failed and the
    ///   previous topology remains in effect
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fanlog::{ConfigBuilder, HandlerConfig, Level, LoggerConfig};
    ///
    /// let topology = ConfigBuilder::new()
    ///     .with_handler("console", HandlerConfig::stderr())
    ///     .with_root(
    ///         LoggerConfig::new()
    ///             .with_level(Level::Info)
    ///             .with_handlers(["console"]),
    ///     )
    ///     .build()
    ///     .unwrap();
    /// topology.apply().unwrap();
    /// ```
    pub fn apply(&self) -> Result<(), ConfigError> {
        manager().apply(self)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        for spec in self.formatters.values() {
            spec.build()?;
        }
        for config in self.handlers.values() {
            config.validate()?;
            if let Some(id) = &config.formatter {
                if !self.formatters.contains_key(id) {
                    return Err(ConfigError::UnknownReference(id.clone()));
                }
            }
        }
        for name in self.loggers.keys() {
            validate_logger_name(name)?;
        }
        for config in self.loggers.values().chain(std::iter::once(&self.root)) {
            for id in &config.handlers {
                if !self.handlers.contains_key(id) {
                    return Err(ConfigError::UnknownReference(id.clone()));
                }
            }
            for id in &config.filters {
                if !self.filters.contains_key(id) {
                    return Err(ConfigError::UnknownReference(id.clone()));
                }
            }
        }
        Ok(())
    }

    /// Spawn every handler runtime the topology names. On failure the
    /// already-spawned runtimes drop, which runs their close protocol.
    pub(crate) fn build_runtimes(&self) -> Result<AHashMap<String, Arc<Handler>>, ConfigError> {
        let mut formatters: AHashMap<&str, Formatter> = AHashMap::new();
        for (id, spec) in &self.formatters {
            formatters.insert(id.as_str(), spec.build()?);
        }
        let mut runtimes = AHashMap::new();
        for (id, config) in &self.handlers {
            let formatter = match &config.formatter {
                Some(fid) => formatters
                    .get(fid.as_str())
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownReference(fid.clone()))?,
                None => Formatter::default(),
            };
            let runtime = config.build_runtime(formatter)?;
            runtimes.insert(id.clone(), Arc::new(runtime));
        }
        Ok(runtimes)
    }

    pub(crate) fn build_slice(
        &self,
        config: &LoggerConfig,
        runtimes: &AHashMap<String, Arc<Handler>>,
    ) -> Result<LoggerSlice, ConfigError> {
        let mut handlers: SmallVec<[SliceHandler; 2]> = SmallVec::new();
        for id in &config.handlers {
            let runtime = runtimes
                .get(id)
                .ok_or_else(|| ConfigError::UnknownReference(id.clone()))?;
            let runtime: Arc<dyn RecordHandler> = Arc::clone(runtime) as Arc<dyn RecordHandler>;
            handlers.push(SliceHandler::Managed {
                id: id.clone(),
                runtime,
            });
        }
        let mut filters = Vec::with_capacity(config.filters.len());
        for id in &config.filters {
            let filter = self
                .filters
                .get(id)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownReference(id.clone()))?;
            filters.push(filter);
        }
        Ok(LoggerSlice {
            level: config.level,
            propagate: config.propagate,
            filters: Arc::new(filters),
            handlers,
        })
    }

    /// Names that are ancestors of any logger in this topology; these are
    /// preserved across a `disable_existing` commit.
    pub(crate) fn ancestor_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for name in self.loggers.keys() {
            for ancestor in ancestor_chain(name) {
                names.insert(ancestor);
            }
        }
        names
    }
}

/// Fluent accumulator for a [`Topology`]. Duplicate ids are last-wins.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    version: Option<u32>,
    formatters: BTreeMap<String, FormatterSpec>,
    filters: BTreeMap<String, Filter>,
    handlers: BTreeMap<String, HandlerConfig>,
    loggers: BTreeMap<String, LoggerConfig>,
    root: Option<LoggerConfig>,
    disable_existing: bool,
}

impl ConfigBuilder {
    /// An empty builder targeting schema version 1.
    pub fn new() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Declare the schema version carried by the built topology.
    ///
    /// # Arguments
    ///
    /// * `version` - Must be 1; anything else fails the build with
    ///   `UnsupportedVersion`
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Register a formatter under `id`. Re-using an id replaces the
    /// earlier registration.
    ///
    /// # Arguments
    ///
    /// * `id` - Name handlers reference the formatter by
    /// * `spec` - Template and optional date-format, compiled and
    ///   checked at build time
    pub fn with_formatter(mut self, id: impl Into<String>, spec: FormatterSpec) -> Self {
        self.formatters.insert(id.into(), spec);
        self
    }

    /// Register a filter under `id`. Re-using an id replaces the earlier
    /// registration.
    ///
    /// # Arguments
    ///
    /// * `id` - Name loggers reference the filter by
    /// * `filter` - The predicate value
    pub fn with_filter(mut self, id: impl Into<String>, filter: Filter) -> Self {
        self.filters.insert(id.into(), filter);
        self
    }

    /// Register a handler under `id`. Re-using an id replaces the
    /// earlier registration.
    ///
    /// # Arguments
    ///
    /// * `id` - Name loggers reference the handler by
    /// * `config` - Sink selection plus queue and flush tuning
    pub fn with_handler(mut self, id: impl Into<String>, config: HandlerConfig) -> Self {
        self.handlers.insert(id.into(), config);
        self
    }

    /// Configure a named logger. Re-using a name replaces the earlier
    /// configuration.
    ///
    /// # Arguments
    ///
    /// * `name` - Dot-separated logger name, validated at build time
    /// * `config` - Level, handler ids, filter ids, and propagation
    pub fn with_logger(mut self, name: impl Into<String>, config: LoggerConfig) -> Self {
        self.loggers.insert(name.into(), config);
        self
    }

    /// Configure the root logger. Required: building without one fails
    /// with `MissingRoot`.
    ///
    /// # Arguments
    ///
    /// * `config` - The root logger's level, handlers, and filters
    pub fn with_root(mut self, config: LoggerConfig) -> Self {
        self.root = Some(config);
        self
    }

    /// Clear prior loggers that the new topology neither re-declares nor
    /// needs as ancestors (default `false`).
    ///
    /// # Arguments
    ///
    /// * `disable_existing` - `true` to clear omitted non-ancestor
    ///   loggers at commit time
    pub fn with_disable_existing(mut self, disable_existing: bool) -> Self {
        self.disable_existing = disable_existing;
        self
    }

    /// Materialise and validate the immutable topology value.
    ///
    /// No runtimes are spawned and nothing is installed; this only
    /// checks the value.
    ///
    /// # Returns
    ///
    /// * `Ok(Topology)` - A value that can be inspected, serialised, or
    ///   applied
    /// * `Err(ConfigError)` - The specific validation failure
    ///   (`MissingRoot`, `UnsupportedVersion`, `UnknownReference`,
    ///   `InvalidRotationConfig`, `InvalidFormatSpec`,
    ///   `InvalidLoggerName`, or a handler kind)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fanlog::{ConfigBuilder, HandlerConfig, Level, LoggerConfig};
    ///
    /// let topology = ConfigBuilder::new()
    ///     .with_handler("console", HandlerConfig::stderr())
    ///     .with_root(
    ///         LoggerConfig::new()
    ///             .with_level(Level::Info)
    ///             .with_handlers(["console"]),
    ///     )
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(topology.version, 1);
    /// ```
    pub fn build(&self) -> Result<Topology, ConfigError> {
        let topology = Topology {
            version: self.version.unwrap_or(1),
            formatters: self.formatters.clone(),
            filters: self.filters.clone(),
            handlers: self.handlers.clone(),
            loggers: self.loggers.clone(),
            root: self.root.clone().ok_or(ConfigError::MissingRoot)?,
            disable_existing: self.disable_existing,
        };
        topology.validate()?;
        Ok(topology)
    }

    /// Build the topology and commit it to the manager in one step.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The topology is live
    /// * `Err(ConfigError)` - Validation or construction failed; the
    ///   previously installed topology is untouched
    pub fn build_and_init(&self) -> Result<(), ConfigError> {
        self.build()?.apply()
    }
}

/// Return the canonical logger for `name`, materialising missing
/// ancestors up to the root.
///
/// # Arguments
///
/// * `name` - Dot-separated logger name, or `"root"` for the root logger
///
/// # Returns
///
/// * `Ok(logger)` - The same `Arc<Logger>` on every call with this name
/// * `Err(ConfigError::InvalidLoggerName)` - Empty name, leading or
///   trailing dot, or consecutive dots
///
/// # Examples
///
/// ```rust
/// let log = fanlog::get_logger("docs.app.db").unwrap();
/// assert_eq!(log.name(), "docs.app.db");
///
/// assert!(fanlog::get_logger("bad..name").is_err());
/// ```
pub fn get_logger(name: &str) -> Result<Arc<Logger>, ConfigError> {
    manager().get_logger(name)
}

/// Close every handler runtime and install an empty topology with only a
/// default root logger.
///
/// Each runtime is shut down through the drain-and-flush close protocol
/// before the call returns. Canonical logger instances survive; their
/// configuration resets to the defaults.
///
/// # Examples
///
/// ```rust
/// let log = fanlog::get_logger("docs.reset").unwrap();
/// log.set_level(fanlog::Level::Trace);
///
/// fanlog::reset_manager();
/// assert_eq!(log.level(), None);
/// ```
pub fn reset_manager() {
    manager().reset();
}
