// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

// Layer 3: Internal module imports
use super::error::StoreError;
use super::maildir::MaildirStore;
use crate::index::{MessageRow, SqliteIndex};
use crate::message::{Envelope, MessageId, MessageStatus};

/// Sidecar written next to every envelope in `failed/`.
///
/// The sidecar is the source of truth for `failed_at`; the index row is
/// advisory and may be rebuilt from these files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Why the envelope was rejected, tagged with the reject kind.
    pub reason: String,
    /// When the rejection happened.
    pub failed_at: DateTime<Utc>,
    /// Mailbox the envelope died in.
    pub endpoint_hash: String,
    /// The rejected envelope itself.
    pub envelope: Envelope,
}

/// Dead-letter queue over the Maildir store and message index.
///
/// Rejections land in `failed/` with a reason sidecar and a `failed`
/// index row. Index write failures are logged and tolerated - the
/// sidecars carry the durable record.
pub struct DeadLetterQueue {
    store: Arc<MaildirStore>,
    index: Arc<SqliteIndex>,
}

impl DeadLetterQueue {
    /// Wire the queue to its store and index.
    pub fn new(store: Arc<MaildirStore>, index: Arc<SqliteIndex>) -> Self {
        Self { store, index }
    }

    /// Irrecoverably reject an envelope into `failed/`.
    ///
    /// Envelopes without an id are stamped here so the rejection is
    /// still traceable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the sidecar cannot be written; the
    /// index insert is best-effort.
    pub async fn reject(
        &self,
        endpoint_hash: &str,
        envelope: &Envelope,
        reason: &str,
    ) -> Result<MessageId, StoreError> {
        let mut envelope = envelope.clone();
        if envelope.id.is_none() {
            envelope.id = Some(MessageId::new());
        }
        let id = self
            .store
            .write_dead_letter(endpoint_hash, &envelope, reason)
            .await?;

        let row = MessageRow {
            id,
            subject: envelope.subject.to_string(),
            endpoint_hash: endpoint_hash.to_string(),
            status: MessageStatus::Failed,
            created_at: envelope.created_at.unwrap_or_else(Utc::now),
            expires_at: envelope.expires_at(),
        };
        if let Err(e) = self.index.insert_message(&row) {
            warn!(%id, error = %e, "dead letter not indexed");
        }
        Ok(id)
    }

    /// All dead letters, optionally restricted to one endpoint.
    ///
    /// Reads the sidecars directly; unreadable files are skipped with a
    /// warning rather than failing the listing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on filesystem failure walking mailboxes.
    pub async fn list_dead(
        &self,
        endpoint_hash: Option<&str>,
    ) -> Result<Vec<DeadLetter>, StoreError> {
        let hashes = match endpoint_hash {
            Some(hash) => vec![hash.to_string()],
            None => self.store.list_mailboxes().await?,
        };
        let mut dead = Vec::new();
        for hash in hashes {
            let ids = match self.store.list_failed(&hash).await {
                Ok(ids) => ids,
                Err(StoreError::MailboxNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            for id in ids {
                match self.store.read_dead_letter(&hash, id).await {
                    Ok(letter) => dead.push(letter),
                    Err(e) => warn!(%id, %hash, error = %e, "unreadable dead letter sidecar"),
                }
            }
        }
        Ok(dead)
    }

    /// Remove dead letters older than `max_age`, optionally restricted
    /// to one endpoint. Returns how many were purged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on filesystem failure.
    pub async fn purge(
        &self,
        max_age: Duration,
        endpoint_hash: Option<&str>,
    ) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let mut purged = 0;
        for letter in self.list_dead(endpoint_hash).await? {
            if letter.failed_at >= cutoff {
                continue;
            }
            let Some(id) = letter.envelope.id else { continue };
            self.store
                .remove_dead_letter(&letter.endpoint_hash, id)
                .await?;
            if let Err(e) = self.index.delete_by_id(&id) {
                warn!(%id, error = %e, "purged dead letter still indexed");
            }
            purged += 1;
        }
        Ok(purged)
    }
}
