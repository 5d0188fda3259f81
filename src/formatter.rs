//! Template-driven record formatting.
//!
//! A formatter is compiled once from a [`FormatterSpec`] and is a pure
//! function `Record -> String` from then on. Placeholders use `{field}`
//! syntax; `{{` and `}}` are literal braces. The built-in fields are
//! `asctime`, `name`, `levelname`, `message`, `threadName`, `filename`,
//! `lineno`, `exception`, and `stack`; any other identifier resolves
//! against the record's key-values and renders as the empty string when
//! absent. The opaque exception payload renders as its JSON text and the
//! stack payload as its captured string, only when a template asks for
//! them. Malformed templates and unparsable date-formats are rejected at
//! build time; rendering never fails.

use chrono::format::{Item, StrftimeItems};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::record::Record;

/// Default render, matching the library's preview contract:
/// `<name> [<LEVEL>] <message>`.
pub const DEFAULT_TEMPLATE: &str = "{name} [{levelname}] {message}";

/// ISO-8601-like UTC timestamp with millisecond precision.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Field names a formatter template or an HTTP field projection may
/// reference without falling back to key-value lookup.
pub const BUILTIN_FIELDS: &[&str] = &[
    "asctime",
    "name",
    "levelname",
    "message",
    "threadName",
    "filename",
    "lineno",
    "exception",
    "stack",
];

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Serialisable description of a formatter, referenced from the topology
/// by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatterSpec {
    pub template: String,
    #[serde(default)]
    pub date_format: Option<String>,
}

impl FormatterSpec {
    pub fn new(template: impl Into<String>) -> Self {
        FormatterSpec {
            template: template.into(),
            date_format: None,
        }
    }

    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = Some(date_format.into());
        self
    }

    pub fn build(&self) -> Result<Formatter, ConfigError> {
        Formatter::compile(&self.template, self.date_format.as_deref())
    }
}

impl Default for FormatterSpec {
    fn default() -> Self {
        FormatterSpec::new(DEFAULT_TEMPLATE)
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A compiled, immutable formatter.
#[derive(Debug, Clone)]
pub struct Formatter {
    segments: Vec<Segment>,
    date_format: String,
}

impl Formatter {
    fn compile(template: &str, date_format: Option<&str>) -> Result<Formatter, ConfigError> {
        let date_format = date_format.unwrap_or(DEFAULT_DATE_FORMAT).to_string();
        validate_date_format(&date_format)?;
        Ok(Formatter {
            segments: parse_template(template)?,
            date_format,
        })
    }

    /// Render a record. Missing optional fields render as the empty
    /// string; this never fails.
    pub fn format(&self, record: &Record) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => self.render_field(record, name, &mut out),
            }
        }
        out
    }

    fn render_field(&self, record: &Record, name: &str, out: &mut String) {
        match name {
            "asctime" => {
                out.push_str(&record.timestamp().format(&self.date_format).to_string());
            }
            "name" => out.push_str(record.name()),
            "levelname" => out.push_str(record.level().as_str()),
            "message" => out.push_str(record.message()),
            "threadName" => {
                out.push_str(record.thread_name().unwrap_or_else(|| record.thread_id()));
            }
            "filename" => out.push_str(record.filename().unwrap_or("")),
            "lineno" => {
                if let Some(line) = record.lineno() {
                    out.push_str(&line.to_string());
                }
            }
            "exception" => {
                if let Some(payload) = record.exception() {
                    out.push_str(&payload.to_string());
                }
            }
            "stack" => out.push_str(record.stack().unwrap_or("")),
            other => out.push_str(record.key_value(other).unwrap_or("")),
        }
    }
}

impl Default for Formatter {
    fn default() -> Self {
        // The default spec compiles from literals; failure is unreachable.
        Formatter::compile(DEFAULT_TEMPLATE, None)
            .unwrap_or_else(|_| Formatter {
                segments: vec![Segment::Field("message".to_string())],
                date_format: DEFAULT_DATE_FORMAT.to_string(),
            })
    }
}

fn parse_template(template: &str) -> Result<Vec<Segment>, ConfigError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    literal.push('{');
                    continue;
                }
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                if !closed {
                    return Err(ConfigError::InvalidFormatSpec(format!(
                        "unclosed placeholder in template {template:?}"
                    )));
                }
                if !IDENT_RE.is_match(&name) {
                    return Err(ConfigError::InvalidFormatSpec(format!(
                        "invalid field name {name:?} in template {template:?}"
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(name));
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    literal.push('}');
                } else {
                    return Err(ConfigError::InvalidFormatSpec(format!(
                        "unmatched '}}' in template {template:?}"
                    )));
                }
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn validate_date_format(format: &str) -> Result<(), ConfigError> {
    let has_error = StrftimeItems::new(format).any(|item| matches!(item, Item::Error));
    if has_error {
        return Err(ConfigError::InvalidFormatSpec(format!(
            "unparsable date format {format:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::record::{Record, RecordFields};
    use std::sync::Arc;

    fn record() -> Record {
        Record::with_fields(
            Arc::from("core.web"),
            Level::Info,
            "listening",
            RecordFields::default()
                .with_location("server.rs", 7)
                .with_key_value("port", "8080"),
        )
    }

    #[test]
    fn default_template_matches_preview_contract() {
        let f = Formatter::default();
        assert_eq!(f.format(&record()), "core.web [INFO] listening");
    }

    #[test]
    fn builtin_fields_render() {
        let f = FormatterSpec::new("{filename}:{lineno} {levelname} {message}")
            .build()
            .unwrap();
        assert_eq!(f.format(&record()), "server.rs:7 INFO listening");
    }

    #[test]
    fn key_values_resolve_and_missing_fields_render_empty() {
        let f = FormatterSpec::new("{message} port={port} user={user}")
            .build()
            .unwrap();
        assert_eq!(f.format(&record()), "listening port=8080 user=");
    }

    #[test]
    fn asctime_uses_configured_date_format() {
        let f = FormatterSpec::new("{asctime}")
            .with_date_format("%Y")
            .build()
            .unwrap();
        let rendered = f.format(&record());
        assert_eq!(rendered.len(), 4);
        assert!(rendered.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn exception_and_stack_payloads_render_on_request() {
        let f = FormatterSpec::new("{message} exc={exception} stack={stack}")
            .build()
            .unwrap();

        // Without payloads both fields render empty.
        assert_eq!(f.format(&record()), "listening exc= stack=");

        let with_payloads = Record::with_fields(
            Arc::from("core.web"),
            Level::Error,
            "boom",
            RecordFields::default()
                .with_exception(serde_json::json!({"kind": "ValueError"}))
                .with_stack("frame a\nframe b"),
        );
        assert_eq!(
            f.format(&with_payloads),
            "boom exc={\"kind\":\"ValueError\"} stack=frame a\nframe b"
        );
    }

    #[test]
    fn escaped_braces_are_literal() {
        let f = FormatterSpec::new("{{{levelname}}}").build().unwrap();
        assert_eq!(f.format(&record()), "{INFO}");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(matches!(
            FormatterSpec::new("{unclosed").build(),
            Err(ConfigError::InvalidFormatSpec(_))
        ));
        assert!(FormatterSpec::new("{bad name}").build().is_err());
        assert!(FormatterSpec::new("{}").build().is_err());
        assert!(FormatterSpec::new("dangling } brace").build().is_err());
    }

    #[test]
    fn bad_date_format_is_rejected_at_build() {
        let spec = FormatterSpec::new("{asctime}").with_date_format("%Q%Q%");
        assert!(matches!(
            spec.build(),
            Err(ConfigError::InvalidFormatSpec(_))
        ));
    }

    #[test]
    fn thread_name_falls_back_to_opaque_id() {
        let f = FormatterSpec::new("{threadName}").build().unwrap();
        let rendered = f.format(&record());
        assert!(!rendered.is_empty());
    }
}
