//! Queryable SQLite index over every message the bus has accepted.
//!
//! The Maildir tree is the source of truth; the index is the queryable
//! mirror backing list/count/metrics and can be rebuilt from disk. Access
//! rules and per-sender budget counters persist here too.

mod error;
mod sqlite;

pub use error::IndexError;
pub use sqlite::{IndexMetrics, MessageRow, SqliteIndex};
