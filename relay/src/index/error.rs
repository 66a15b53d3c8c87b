// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Failures surfaced by the message index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row did not parse back into its typed form.
    #[error("corrupt index row: {detail}")]
    CorruptRow {
        /// What failed to parse.
        detail: String,
    },

    /// The on-disk schema is newer than this build understands.
    #[error("index schema version {found} is newer than supported {supported}")]
    SchemaTooNew {
        /// Version found in `user_version`.
        found: i64,
        /// Highest version this build can open.
        supported: i64,
    },
}
