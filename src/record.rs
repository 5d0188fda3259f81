//! The immutable log record value.
//!
//! A record is materialised by the emitting thread once the level check
//! passes, then shared into every target handler's queue behind an `Arc`.
//! The consumer thread renders and writes it; the allocation is released
//! when the last queue entry is processed.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};

use crate::level::Level;

/// Optional payloads attached to a record at emit time.
///
/// Exception and stack payloads are opaque values built by an external
/// capture subsystem; the core never introspects them. Key-values keep
/// their emit order.
#[derive(Debug, Clone, Default)]
pub struct RecordFields {
    pub exception: Option<serde_json::Value>,
    pub stack: Option<String>,
    pub key_values: Vec<(String, String)>,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
}

impl RecordFields {
    pub fn with_location(mut self, filename: &str, lineno: u32) -> Self {
        self.filename = Some(filename.to_string());
        self.lineno = Some(lineno);
        self
    }

    pub fn with_key_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_values.push((key.into(), value.into()));
        self
    }

    pub fn with_exception(mut self, payload: serde_json::Value) -> Self {
        self.exception = Some(payload);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// An immutable logged event.
#[derive(Debug)]
pub struct Record {
    name: Arc<str>,
    level: Level,
    message: String,
    timestamp: DateTime<Utc>,
    thread_id: String,
    thread_name: Option<String>,
    fields: RecordFields,
}

impl Record {
    /// Build a record on the emitting thread, stamping the wall clock and
    /// the thread identity.
    pub fn new(name: Arc<str>, level: Level, message: impl Into<String>) -> Record {
        Record::with_fields(name, level, message, RecordFields::default())
    }

    pub fn with_fields(
        name: Arc<str>,
        level: Level,
        message: impl Into<String>,
        fields: RecordFields,
    ) -> Record {
        let current = thread::current();
        Record {
            name,
            level,
            message: message.into(),
            timestamp: Utc::now(),
            thread_id: format!("{:?}", current.id()),
            thread_name: current.name().map(str::to_string),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Opaque identity token of the emitting thread.
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.fields.filename.as_deref()
    }

    pub fn lineno(&self) -> Option<u32> {
        self.fields.lineno
    }

    pub fn exception(&self) -> Option<&serde_json::Value> {
        self.fields.exception.as_ref()
    }

    pub fn stack(&self) -> Option<&str> {
        self.fields.stack.as_deref()
    }

    pub fn key_values(&self) -> &[(String, String)] {
        &self.fields.key_values
    }

    /// Look a key-value up by key, first match wins.
    pub fn key_value(&self, key: &str) -> Option<&str> {
        self.fields
            .key_values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
