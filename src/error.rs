//! Error taxonomy for configuration, build, and submission failures.
//!
//! Build-time problems (invalid levels, bad templates, rotation
//! misconfiguration, handler construction failures) are reported through
//! [`ConfigError`] and never mutate the installed topology. Runtime
//! submission failures are split between fatal [`HandlerError`] values and
//! the non-fatal [`SubmitResult`](crate::handler::SubmitResult) outcomes.

use std::fmt;

/// Specific reason a handler configuration was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerConfigErrorKind {
    /// Opening the sink target (file, path) failed at construction.
    IoOpen,
    /// TLS options were combined with a non-TCP transport.
    TlsRequiresTcp,
    /// More than one authentication scheme was configured.
    AuthConflict,
    /// A record-field projection named a field outside the known set.
    UnknownField,
    /// A timeout that must be positive was zero.
    ZeroTimeout,
    /// A count or interval that must be positive was zero
    /// (queue capacity, flush-every-n, flush-every-ms).
    ZeroInterval,
}

impl HandlerConfigErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            HandlerConfigErrorKind::IoOpen => "io open",
            HandlerConfigErrorKind::TlsRequiresTcp => "tls requires tcp",
            HandlerConfigErrorKind::AuthConflict => "auth conflict",
            HandlerConfigErrorKind::UnknownField => "unknown field",
            HandlerConfigErrorKind::ZeroTimeout => "zero timeout",
            HandlerConfigErrorKind::ZeroInterval => "zero interval",
        }
    }
}

/// A handler configuration that cannot be built into a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfigError {
    pub kind: HandlerConfigErrorKind,
    detail: String,
}

impl HandlerConfigError {
    pub fn new(kind: HandlerConfigErrorKind, detail: impl Into<String>) -> Self {
        HandlerConfigError {
            kind,
            detail: detail.into(),
        }
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for HandlerConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler configuration rejected ({}): {}",
            self.kind.as_str(),
            self.detail
        )
    }
}

impl std::error::Error for HandlerConfigError {}

/// Build-time and commit-time errors.
///
/// Every variant leaves the previously installed topology untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A level token was not a recognised level or alias.
    InvalidLevel(String),
    /// A logger name was empty or contained misplaced dots.
    InvalidLoggerName(String),
    /// A formatter template or date-format could not be compiled.
    InvalidFormatSpec(String),
    /// Exactly one of `max_bytes` / `backup_count` was positive.
    InvalidRotationConfig(String),
    /// A handler configuration failed validation or construction.
    Handler(HandlerConfigError),
    /// A logger or handler referenced an id absent from the topology.
    UnknownReference(String),
    /// The topology did not configure a root logger.
    MissingRoot,
    /// The topology carried a schema version other than 1.
    UnsupportedVersion(u32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidLevel(token) => write!(
                f,
                "invalid log level {token:?}; valid levels are TRACE, DEBUG, INFO, \
                 WARN, WARNING, ERROR, CRITICAL"
            ),
            ConfigError::InvalidLoggerName(name) => write!(
                f,
                "invalid logger name {name:?}: names are non-empty dot-separated \
                 segments with no leading, trailing, or consecutive dots"
            ),
            ConfigError::InvalidFormatSpec(detail) => {
                write!(f, "invalid format spec: {detail}")
            }
            ConfigError::InvalidRotationConfig(detail) => {
                write!(f, "invalid rotation config: {detail}")
            }
            ConfigError::Handler(err) => err.fmt(f),
            ConfigError::UnknownReference(id) => {
                write!(f, "configuration references unknown id {id:?}")
            }
            ConfigError::MissingRoot => {
                write!(f, "configuration does not define a root logger")
            }
            ConfigError::UnsupportedVersion(v) => {
                write!(f, "unsupported configuration version {v} (expected 1)")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<HandlerConfigError> for ConfigError {
    fn from(err: HandlerConfigError) -> Self {
        ConfigError::Handler(err)
    }
}

/// Fatal submission errors surfaced out of `Logger::log` and
/// `Handler::submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler has been closed; its consumer no longer accepts work.
    Closed,
    /// The handler's consumer panicked; the handler must be replaced via a
    /// new topology commit.
    Poisoned,
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Closed => write!(f, "handler is closed"),
            HandlerError::Poisoned => write!(f, "handler is poisoned"),
        }
    }
}

impl std::error::Error for HandlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_names_the_offender() {
        let err = ConfigError::InvalidLevel("LOUD".to_string());
        assert!(err.to_string().contains("LOUD"));
        assert!(err.to_string().contains("WARNING"));

        let err = ConfigError::UnknownReference("h1".to_string());
        assert!(err.to_string().contains("h1"));
    }

    #[test]
    fn handler_config_error_carries_kind() {
        let err = HandlerConfigError::new(
            HandlerConfigErrorKind::TlsRequiresTcp,
            "unix transport cannot carry TLS",
        );
        assert_eq!(err.kind, HandlerConfigErrorKind::TlsRequiresTcp);
        assert!(err.to_string().contains("tls requires tcp"));
    }
}
