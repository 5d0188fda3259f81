//! Configuration graph: builder semantics, validation kinds, round
//! trips.

use crate::config::{ConfigBuilder, HandlerConfig, LoggerConfig, SinkConfig, Topology};
use crate::error::{ConfigError, HandlerConfigErrorKind};
use crate::filter::Filter;
use crate::formatter::FormatterSpec;
use crate::handler::{HttpConfig, OverflowPolicy, SocketConfig, StreamTarget, TlsOptions};
use crate::level::Level;

fn minimal_builder() -> ConfigBuilder {
    ConfigBuilder::new()
        .with_handler("console", HandlerConfig::stderr())
        .with_root(LoggerConfig::new().with_level(Level::Info).with_handlers(["console"]))
}

#[test]
fn builder_materialises_a_complete_topology() {
    let topology = minimal_builder()
        .with_formatter("plain", FormatterSpec::new("{message}"))
        .with_filter("warnish", Filter::level_ceiling(Level::Warn))
        .with_logger(
            "app.db",
            LoggerConfig::new()
                .with_level(Level::Debug)
                .with_filters(["warnish"])
                .with_propagate(false),
        )
        .build()
        .unwrap();

    assert_eq!(topology.version, 1);
    assert_eq!(topology.handlers.len(), 1);
    assert_eq!(topology.loggers["app.db"].level, Some(Level::Debug));
    assert!(!topology.loggers["app.db"].propagate);
    assert_eq!(topology.root.handlers, vec!["console".to_string()]);
}

#[test]
fn topology_value_round_trips_through_serde() {
    let topology = minimal_builder()
        .with_formatter(
            "stamped",
            FormatterSpec::new("{asctime} {message}").with_date_format("%H:%M:%S"),
        )
        .with_filter("app-only", Filter::name_prefix("app"))
        .with_handler(
            "spool",
            HandlerConfig::file("/tmp/spool.log")
                .with_capacity(64)
                .with_overflow(OverflowPolicy::Timeout(250))
                .with_flush_every(8)
                .with_formatter("stamped"),
        )
        .with_logger("app", LoggerConfig::new().with_handlers(["spool"]))
        .build()
        .unwrap();

    let json = serde_json::to_string(&topology).unwrap();
    let decoded: Topology = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, topology);
}

#[test]
fn duplicate_ids_are_last_wins() {
    let topology = minimal_builder()
        .with_handler("dup", HandlerConfig::stdout())
        .with_handler("dup", HandlerConfig::stderr())
        .build()
        .unwrap();
    assert_eq!(
        topology.handlers["dup"].sink,
        SinkConfig::Stream {
            target: StreamTarget::Stderr
        }
    );
}

#[test]
fn missing_root_is_rejected() {
    let err = ConfigBuilder::new()
        .with_handler("console", HandlerConfig::stderr())
        .build()
        .unwrap_err();
    assert_eq!(err, ConfigError::MissingRoot);
}

#[test]
fn unsupported_versions_are_rejected() {
    let err = minimal_builder().with_version(2).build().unwrap_err();
    assert_eq!(err, ConfigError::UnsupportedVersion(2));
}

#[test]
fn unknown_references_are_rejected() {
    let err = minimal_builder()
        .with_logger("x", LoggerConfig::new().with_handlers(["ghost"]))
        .build()
        .unwrap_err();
    assert_eq!(err, ConfigError::UnknownReference("ghost".to_string()));

    let err = minimal_builder()
        .with_logger("x", LoggerConfig::new().with_filters(["nope"]))
        .build()
        .unwrap_err();
    assert_eq!(err, ConfigError::UnknownReference("nope".to_string()));

    let err = minimal_builder()
        .with_handler(
            "styled",
            HandlerConfig::stderr().with_formatter("unregistered"),
        )
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::UnknownReference("unregistered".to_string())
    );
}

#[test]
fn invalid_logger_names_fail_validation() {
    let err = minimal_builder()
        .with_logger("bad..name", LoggerConfig::new())
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidLoggerName(_)));
}

#[test]
fn rotation_misconfiguration_fails_at_build() {
    let err = minimal_builder()
        .with_handler("rot", HandlerConfig::rotating("/tmp/r.log", 1024, 0))
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidRotationConfig(_)));
}

#[test]
fn bad_formatter_specs_fail_at_build() {
    let err = minimal_builder()
        .with_formatter("broken", FormatterSpec::new("{unclosed"))
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidFormatSpec(_)));
}

#[test]
fn handler_config_error_kinds_surface_through_the_builder() {
    let err = minimal_builder()
        .with_handler(
            "sock",
            HandlerConfig::socket(SocketConfig::unix("/tmp/s").with_tls(TlsOptions {
                domain: None,
                insecure: false,
            })),
        )
        .build()
        .unwrap_err();
    match err {
        ConfigError::Handler(inner) => {
            assert_eq!(inner.kind, HandlerConfigErrorKind::TlsRequiresTcp);
        }
        other => panic!("expected handler error, got {other:?}"),
    }

    let err = minimal_builder()
        .with_handler(
            "http",
            HandlerConfig::http(
                HttpConfig::new("http://localhost/logs")
                    .with_basic_auth("u", "p")
                    .with_bearer_token("t"),
            ),
        )
        .build()
        .unwrap_err();
    match err {
        ConfigError::Handler(inner) => {
            assert_eq!(inner.kind, HandlerConfigErrorKind::AuthConflict);
        }
        other => panic!("expected handler error, got {other:?}"),
    }

    let err = minimal_builder()
        .with_handler("tiny", HandlerConfig::stderr().with_capacity(0))
        .build()
        .unwrap_err();
    match err {
        ConfigError::Handler(inner) => {
            assert_eq!(inner.kind, HandlerConfigErrorKind::ZeroInterval);
        }
        other => panic!("expected handler error, got {other:?}"),
    }
}

#[test]
fn level_tokens_round_trip_through_serde_config() {
    let json = r#""WARN""#;
    let level: Level = serde_json::from_str(json).unwrap();
    assert_eq!(level, Level::Warn);
    assert_eq!(serde_json::to_string(&level).unwrap(), json);
}
