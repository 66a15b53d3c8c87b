// Layer 1: Standard library imports
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::message::MessageId;

/// Failures surfaced by the Maildir store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The mailbox directory for this endpoint does not exist.
    #[error("mailbox not found for endpoint {hash}")]
    MailboxNotFound {
        /// Endpoint hash.
        hash: String,
    },

    /// The message file is not where the requested transition expects it.
    #[error("message {id} not found in mailbox {hash}")]
    MessageNotFound {
        /// Endpoint hash.
        hash: String,
        /// Message id.
        id: MessageId,
    },

    /// The envelope had no id; only accepted envelopes reach the store.
    #[error("envelope has no message id")]
    MissingMessageId,

    /// Filesystem failure with the operation and path that hit it.
    #[error("{op} failed for {path}: {source}")]
    Io {
        /// Short operation name (`write`, `rename`, `read_dir`, ...).
        op: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An envelope or sidecar file did not parse.
    #[error("corrupt file {path}: {source}")]
    Corrupt {
        /// Path of the unparseable file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
