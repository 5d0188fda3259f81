//! HTTP sink: one-shot POST/PUT of each record with optional auth and
//! record-field projection.
//!
//! A non-2xx response or transport error is a retryable failure: the
//! failing record is dropped (and counted by the worker) and the next
//! attempt honours the shared backoff schedule from
//! [`super::backoff`].

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, HandlerConfigError, HandlerConfigErrorKind};
use crate::formatter::{BUILTIN_FIELDS, DEFAULT_DATE_FORMAT, Formatter};
use crate::record::Record;

use super::backoff::{Backoff, BackoffConfig};
use super::worker::Sink;
use super::{Handler, HandlerOptions};

/// Supported request methods. GET is not a member: shipping records by
/// query string is unsupported by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Post,
    Put,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Post
    }
}

/// Resolved authentication scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    Basic { user: String, pass: String },
    Bearer { token: String },
}

/// Request body shape: the formatter's text output, or a JSON object
/// over a projection of the record's semantic fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpBody {
    Text,
    Fields(Vec<String>),
}

impl Default for HttpBody {
    fn default() -> Self {
        HttpBody::Text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub basic_auth: Option<(String, String)>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub body: HttpBody,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub backoff: BackoffConfig,
}

impl HttpConfig {
    pub fn new(url: impl Into<String>) -> HttpConfig {
        HttpConfig {
            url: url.into(),
            method: HttpMethod::default(),
            basic_auth: None,
            bearer_token: None,
            body: HttpBody::default(),
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), pass.into()));
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Ship a JSON object over the named record fields instead of the
    /// formatter's text output.
    pub fn with_record_fields(mut self, fields: Vec<String>) -> Self {
        self.body = HttpBody::Fields(fields);
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_write_timeout_ms(mut self, ms: u64) -> Self {
        self.write_timeout_ms = ms;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), HandlerConfigError> {
        if self.basic_auth.is_some() && self.bearer_token.is_some() {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::AuthConflict,
                "basic and bearer authentication are mutually exclusive",
            ));
        }
        if self.connect_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(HandlerConfigError::new(
                HandlerConfigErrorKind::ZeroTimeout,
                "http connect and write timeouts must be positive",
            ));
        }
        if let HttpBody::Fields(fields) = &self.body {
            for field in fields {
                if !BUILTIN_FIELDS.contains(&field.as_str()) {
                    return Err(HandlerConfigError::new(
                        HandlerConfigErrorKind::UnknownField,
                        format!("unknown record field {field:?} in projection"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn auth(&self) -> HttpAuth {
        match (&self.basic_auth, &self.bearer_token) {
            (Some((user, pass)), None) => HttpAuth::Basic {
                user: user.clone(),
                pass: pass.clone(),
            },
            (None, Some(token)) => HttpAuth::Bearer {
                token: token.clone(),
            },
            _ => HttpAuth::None,
        }
    }
}

fn auth_header(auth: &HttpAuth) -> Option<String> {
    match auth {
        HttpAuth::None => None,
        HttpAuth::Basic { user, pass } => {
            let encoded = BASE64.encode(format!("{user}:{pass}"));
            Some(format!("Basic {encoded}"))
        }
        HttpAuth::Bearer { token } => Some(format!("Bearer {token}")),
    }
}

pub(crate) fn project_fields(record: &Record, fields: &[String]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for field in fields {
        let value = match field.as_str() {
            "name" => serde_json::Value::from(record.name()),
            "levelname" => serde_json::Value::from(record.level().as_str()),
            "message" => serde_json::Value::from(record.message()),
            "asctime" => serde_json::Value::from(
                record
                    .timestamp()
                    .format(DEFAULT_DATE_FORMAT)
                    .to_string(),
            ),
            "threadName" => match record.thread_name() {
                Some(name) => serde_json::Value::from(name),
                None => serde_json::Value::from(record.thread_id()),
            },
            "filename" => record
                .filename()
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            "lineno" => record
                .lineno()
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            "exception" => record
                .exception()
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            "stack" => record
                .stack()
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            _ => serde_json::Value::Null,
        };
        map.insert(field.clone(), value);
    }
    serde_json::Value::Object(map)
}

pub(crate) struct HttpSink {
    agent: ureq::Agent,
    config: HttpConfig,
    auth_header: Option<String>,
    backoff: Backoff,
}

impl HttpSink {
    pub(crate) fn new(config: HttpConfig) -> Result<HttpSink, HandlerConfigError> {
        config.validate()?;
        let agent_config = ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_millis(config.connect_timeout_ms)))
            .timeout_global(Some(Duration::from_millis(
                config.connect_timeout_ms + config.write_timeout_ms,
            )))
            .http_status_as_error(true)
            .build();
        let auth_header = auth_header(&config.auth());
        let backoff = Backoff::new(config.backoff);
        Ok(HttpSink {
            agent: ureq::Agent::new_with_config(agent_config),
            config,
            auth_header,
            backoff,
        })
    }

    fn await_attempt_slot(&mut self) -> io::Result<()> {
        let now = Instant::now();
        let wait = self.backoff.until_next_attempt(now);
        if wait.is_zero() {
            return Ok(());
        }
        if self.backoff.deadline_exceeded(now) {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "retry deadline exceeded",
            ));
        }
        thread::sleep(wait);
        Ok(())
    }

    fn send(&self, record: &Record, formatter: &Formatter) -> Result<(), ureq::Error> {
        let mut request = match self.config.method {
            HttpMethod::Post => self.agent.post(&self.config.url),
            HttpMethod::Put => self.agent.put(&self.config.url),
        };
        if let Some(header) = &self.auth_header {
            request = request.header("Authorization", header);
        }
        match &self.config.body {
            HttpBody::Text => {
                request
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .send(formatter.format(record).as_bytes())?;
            }
            HttpBody::Fields(fields) => {
                request.send_json(project_fields(record, fields))?;
            }
        }
        Ok(())
    }
}

impl Sink for HttpSink {
    fn emit(&mut self, record: &Record, formatter: &Formatter) -> io::Result<()> {
        self.await_attempt_slot()?;
        match self.send(record, formatter) {
            Ok(()) => {
                self.backoff.note_success(Instant::now());
                Ok(())
            }
            Err(err) => {
                self.backoff.note_failure(Instant::now());
                Err(io::Error::other(err))
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        // Requests are one-shot; nothing is buffered in the sink.
        Ok(())
    }
}

impl Handler {
    /// HTTP handler posting each record to `config.url`.
    pub fn http(
        config: HttpConfig,
        formatter: Formatter,
        opts: HandlerOptions,
    ) -> Result<Handler, ConfigError> {
        let sink = HttpSink::new(config)?;
        Ok(Handler::spawn("http", Box::new(sink), formatter, opts)?)
    }
}
