//! # fanlog — concurrent structured logging
//!
//! A structured logging library built around a concurrent dispatch
//! fabric: every handler owns a bounded queue and a dedicated consumer
//! thread, and the logger hierarchy routes records to handlers with level
//! filtering and propagation. Configuration is committed transactionally;
//! concurrent emitters always observe a whole topology, never a partial
//! one.
//!
//! ## Architecture
//!
//! - `level`, `record`: the immutable record value and the level order
//! - `formatter`: template-driven rendering (`{field}` placeholders)
//! - `filter`: level-ceiling and name-prefix predicates
//! - `handler`: the bounded-queue worker runtime shared by the stream,
//!   file, rotating-file, socket, and HTTP sinks
//! - `logger`: named hierarchy nodes with propagation
//! - `manager`: the process-wide registry and atomically swapped topology
//! - `config`: serialisable topology values and the fluent builder
//!
//! ## Example
//!
//! ```no_run
//! use fanlog::{ConfigBuilder, HandlerConfig, Level, LoggerConfig};
//!
//! let result = ConfigBuilder::new()
//!     .with_handler("console", HandlerConfig::stderr())
//!     .with_root(LoggerConfig::new().with_level(Level::Info).with_handlers(["console"]))
//!     .build_and_init();
//! assert!(result.is_ok());
//!
//! let log = fanlog::get_logger("app.web").unwrap();
//! log.info("listening on :8080").unwrap();
//! ```

mod config;
mod error;
mod filter;
mod formatter;
mod handler;
mod level;
mod logger;
mod macros;
mod manager;
mod record;

pub use config::{
    ConfigBuilder, HandlerConfig, LoggerConfig, SinkConfig, Topology, get_logger, reset_manager,
};
pub use error::{ConfigError, HandlerConfigError, HandlerConfigErrorKind, HandlerError};
pub use filter::Filter;
pub use formatter::{DEFAULT_DATE_FORMAT, DEFAULT_TEMPLATE, Formatter, FormatterSpec};
pub use handler::{
    BackoffConfig, FlushPolicy, Handler, HandlerOptions, HttpAuth, HttpBody, HttpConfig,
    HttpMethod, OverflowPolicy, RecordHandler, SocketConfig, StreamTarget, SubmitResult,
    TlsOptions, Transport,
};
pub use level::Level;
pub use logger::{Emitted, Logger};
pub use record::{Record, RecordFields};

#[cfg(test)]
mod tests;
