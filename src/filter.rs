//! Record filters.
//!
//! Filters are pure predicates attached to loggers by id. A record passes
//! a logger's filter list iff every filter in list order accepts it; a
//! logger with no filters passes everything.

use serde::{Deserialize, Serialize};

use crate::level::Level;
use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    /// Accepts records at or below the given level.
    LevelCeiling { max: Level },
    /// Accepts records whose logger name equals the prefix or is a
    /// descendant of it (`a.b` matches `a.b` and `a.b.c`, not `a.bc`).
    NamePrefix { prefix: String },
}

impl Filter {
    pub fn level_ceiling(max: Level) -> Filter {
        Filter::LevelCeiling { max }
    }

    pub fn name_prefix(prefix: impl Into<String>) -> Filter {
        Filter::NamePrefix {
            prefix: prefix.into(),
        }
    }

    pub fn accepts(&self, record: &Record) -> bool {
        match self {
            Filter::LevelCeiling { max } => record.level() <= *max,
            Filter::NamePrefix { prefix } => {
                let name = record.name();
                name == prefix
                    || (name.len() > prefix.len()
                        && name.starts_with(prefix.as_str())
                        && name.as_bytes()[prefix.len()] == b'.')
            }
        }
    }
}

/// Evaluate a filter list in order; all must accept.
pub(crate) fn passes_all(filters: &[Filter], record: &Record) -> bool {
    filters.iter().all(|f| f.accepts(record))
}
