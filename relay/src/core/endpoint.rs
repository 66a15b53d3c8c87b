// Layer 1: Standard library imports
use std::fmt::Write as _;
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// Layer 3: Internal module imports
use crate::subject::Subject;

/// A registered subject owning a mailbox.
///
/// The in-memory record is rebuilt from the registry on boot; the
/// mailbox directory persists across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// The routing key this endpoint owns.
    pub subject: Subject,

    /// Stable short identifier of the subject; the mailbox directory
    /// name.
    pub hash: String,

    /// Absolute mailbox directory containing `new/`, `cur/`, `failed/`.
    pub maildir_path: PathBuf,
}

/// Stable short hash of a subject, used as the mailbox directory name.
///
/// First eight bytes of SHA-256 over the subject string, lower-hex - 16
/// filesystem-safe characters, identical across processes and restarts.
pub fn endpoint_hash(subject: &Subject) -> String {
    let digest = Sha256::digest(subject.as_str().as_bytes());
    let mut hash = String::with_capacity(16);
    for byte in &digest[..8] {
        // Writing to a String cannot fail.
        let _ = write!(hash, "{byte:02x}");
    }
    hash
}
