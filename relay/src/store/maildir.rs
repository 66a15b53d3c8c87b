// Layer 1: Standard library imports
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::dead_letter::DeadLetter;
use super::error::StoreError;
use crate::message::{Envelope, MessageId};

const NEW: &str = "new";
const CUR: &str = "cur";
const FAILED: &str = "failed";

/// Per-endpoint Maildir message store.
///
/// One mailbox directory per endpoint hash, each with `new/`, `cur/`,
/// and `failed/`. Envelope files are `<ULID>.json`; dead-letter sidecars
/// are `<ULID>.reason.json`. Writes within a mailbox are serialised by a
/// sharded per-endpoint async lock; different mailboxes proceed in
/// parallel. Atomicity rests on same-directory rename semantics.
///
/// Crash recovery rule: a file left in `cur/` with no live claim is
/// reclaimable - [`MaildirStore::recover`] moves it back to `new/` on
/// the next boot.
pub struct MaildirStore {
    mailbox_root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MaildirStore {
    /// Create a store rooted at `<root>/mailboxes`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            mailbox_root: root.into().join("mailboxes"),
            locks: DashMap::new(),
        }
    }

    /// The directory holding all mailboxes.
    pub fn mailbox_root(&self) -> &Path {
        &self.mailbox_root
    }

    /// Absolute mailbox directory for an endpoint hash.
    pub fn mailbox_path(&self, hash: &str) -> PathBuf {
        self.mailbox_root.join(hash)
    }

    fn folder(&self, hash: &str, name: &str) -> PathBuf {
        self.mailbox_path(hash).join(name)
    }

    fn lock_for(&self, hash: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Idempotently create the mailbox tree for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on filesystem failure.
    pub async fn ensure_maildir(&self, hash: &str) -> Result<PathBuf, StoreError> {
        let mailbox = self.mailbox_path(hash);
        for name in [NEW, CUR, FAILED] {
            let dir = mailbox.join(name);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::io("create_dir", &dir, e))?;
        }
        Ok(mailbox)
    }

    /// Write an accepted envelope into `new/`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingMessageId`] for unstamped envelopes,
    /// [`StoreError::MailboxNotFound`] when the endpoint has no mailbox,
    /// and [`StoreError::Io`] on filesystem failure.
    pub async fn deliver(&self, hash: &str, envelope: &Envelope) -> Result<MessageId, StoreError> {
        let id = envelope.id.ok_or(StoreError::MissingMessageId)?;
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        let new_dir = self.folder(hash, NEW);
        if !dir_exists(&new_dir).await {
            return Err(StoreError::MailboxNotFound {
                hash: hash.to_string(),
            });
        }
        let bytes = serde_json::to_vec_pretty(envelope).map_err(|source| StoreError::Corrupt {
            path: new_dir.join(format!("{id}.json")),
            source,
        })?;
        write_atomic(&new_dir, &format!("{id}.json"), &bytes).await?;
        debug!(%id, hash, "delivered to maildir");
        Ok(id)
    }

    /// Claim a message for handling: rename `new/ -> cur/` and read it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MessageNotFound`] if the message is not in
    /// `new/`, [`StoreError::Io`] on filesystem failure.
    pub async fn claim(&self, hash: &str, id: MessageId) -> Result<Envelope, StoreError> {
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        let from = self.folder(hash, NEW).join(format!("{id}.json"));
        let to = self.folder(hash, CUR).join(format!("{id}.json"));
        rename_or_not_found(hash, id, &from, &to).await?;
        read_json(&to).await
    }

    /// Complete a claimed message: remove it from `cur/`.
    ///
    /// Completing a message that was already moved is a no-op; the
    /// transition happened, which is all the caller needs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on filesystem failure.
    pub async fn complete(&self, hash: &str, id: MessageId) -> Result<(), StoreError> {
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        let path = self.folder(hash, CUR).join(format!("{id}.json"));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove", &path, e)),
        }
    }

    /// Fail a claimed message: rename `cur/ -> failed/` and write the
    /// reason sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MessageNotFound`] if the message is neither
    /// in `cur/` nor already in `failed/`, [`StoreError::Io`] on
    /// filesystem failure.
    pub async fn fail(&self, hash: &str, id: MessageId, reason: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        let from = self.folder(hash, CUR).join(format!("{id}.json"));
        let to = self.folder(hash, FAILED).join(format!("{id}.json"));
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Already moved by an earlier failure; keep the first sidecar.
                if file_exists(&to).await {
                    return Ok(());
                }
                return Err(StoreError::MessageNotFound {
                    hash: hash.to_string(),
                    id,
                });
            }
            Err(e) => return Err(StoreError::io("rename", &from, e)),
        }

        let envelope: Envelope = read_json(&to).await?;
        self.write_sidecar(hash, id, envelope, reason).await
    }

    /// Write a rejected envelope straight into `failed/` with its
    /// sidecar, bypassing `new/`. Used for budget rejects and delivery
    /// failures where the message never reached the mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] as for [`MaildirStore::deliver`].
    pub async fn write_dead_letter(
        &self,
        hash: &str,
        envelope: &Envelope,
        reason: &str,
    ) -> Result<MessageId, StoreError> {
        let id = envelope.id.ok_or(StoreError::MissingMessageId)?;
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        let failed_dir = self.folder(hash, FAILED);
        if !dir_exists(&failed_dir).await {
            return Err(StoreError::MailboxNotFound {
                hash: hash.to_string(),
            });
        }
        let bytes = serde_json::to_vec_pretty(envelope).map_err(|source| StoreError::Corrupt {
            path: failed_dir.join(format!("{id}.json")),
            source,
        })?;
        write_atomic(&failed_dir, &format!("{id}.json"), &bytes).await?;
        self.write_sidecar(hash, id, envelope.clone(), reason).await?;
        Ok(id)
    }

    async fn write_sidecar(
        &self,
        hash: &str,
        id: MessageId,
        envelope: Envelope,
        reason: &str,
    ) -> Result<(), StoreError> {
        let failed_dir = self.folder(hash, FAILED);
        let sidecar = DeadLetter {
            reason: reason.to_string(),
            failed_at: Utc::now(),
            endpoint_hash: hash.to_string(),
            envelope,
        };
        let bytes = serde_json::to_vec_pretty(&sidecar).map_err(|source| StoreError::Corrupt {
            path: failed_dir.join(format!("{id}.reason.json")),
            source,
        })?;
        write_atomic(&failed_dir, &format!("{id}.reason.json"), &bytes).await
    }

    /// Ids of all messages in `failed/`, in id (delivery) order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MailboxNotFound`] when the endpoint has no
    /// mailbox, [`StoreError::Io`] on filesystem failure.
    pub async fn list_failed(&self, hash: &str) -> Result<Vec<MessageId>, StoreError> {
        let failed_dir = self.folder(hash, FAILED);
        if !dir_exists(&failed_dir).await {
            return Err(StoreError::MailboxNotFound {
                hash: hash.to_string(),
            });
        }
        let mut ids = list_envelope_ids(&failed_dir).await?;
        ids.sort();
        Ok(ids)
    }

    /// Read an envelope wherever it currently sits (`new/`, `cur/`, or
    /// `failed/`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MessageNotFound`] when the id is in none of
    /// the three folders.
    pub async fn read_envelope(&self, hash: &str, id: MessageId) -> Result<Envelope, StoreError> {
        for name in [NEW, CUR, FAILED] {
            let path = self.folder(hash, name).join(format!("{id}.json"));
            if file_exists(&path).await {
                return read_json(&path).await;
            }
        }
        Err(StoreError::MessageNotFound {
            hash: hash.to_string(),
            id,
        })
    }

    /// Read the dead-letter sidecar for a failed message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MessageNotFound`] when no sidecar exists.
    pub async fn read_dead_letter(
        &self,
        hash: &str,
        id: MessageId,
    ) -> Result<DeadLetter, StoreError> {
        let path = self.folder(hash, FAILED).join(format!("{id}.reason.json"));
        if !file_exists(&path).await {
            return Err(StoreError::MessageNotFound {
                hash: hash.to_string(),
                id,
            });
        }
        read_json(&path).await
    }

    /// Remove a dead letter and its sidecar. Missing files are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on filesystem failure.
    pub async fn remove_dead_letter(&self, hash: &str, id: MessageId) -> Result<(), StoreError> {
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        let failed_dir = self.folder(hash, FAILED);
        for filename in [format!("{id}.json"), format!("{id}.reason.json")] {
            let path = failed_dir.join(filename);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io("remove", &path, e)),
            }
        }
        Ok(())
    }

    /// Reclaim orphaned claims after a crash: every file in `cur/` moves
    /// back to `new/`, and leftover temp files are swept. Returns the
    /// number of reclaimed messages.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on filesystem failure.
    pub async fn recover(&self, hash: &str) -> Result<u32, StoreError> {
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        for name in [NEW, CUR, FAILED] {
            sweep_temp_files(&self.folder(hash, name)).await;
        }

        let cur_dir = self.folder(hash, CUR);
        if !dir_exists(&cur_dir).await {
            return Ok(0);
        }
        let mut reclaimed = 0;
        for id in list_envelope_ids(&cur_dir).await? {
            let from = cur_dir.join(format!("{id}.json"));
            let to = self.folder(hash, NEW).join(format!("{id}.json"));
            tokio::fs::rename(&from, &to)
                .await
                .map_err(|e| StoreError::io("rename", &from, e))?;
            reclaimed += 1;
        }
        if reclaimed > 0 {
            debug!(hash, reclaimed, "reclaimed orphaned claims");
        }
        Ok(reclaimed)
    }

    /// Endpoint hashes that have a mailbox on disk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on filesystem failure.
    pub async fn list_mailboxes(&self) -> Result<Vec<String>, StoreError> {
        if !dir_exists(&self.mailbox_root).await {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&self.mailbox_root)
            .await
            .map_err(|e| StoreError::io("read_dir", &self.mailbox_root, e))?;
        let mut hashes = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("read_dir", &self.mailbox_root, e))?
        {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    hashes.push(name.to_string());
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }
}

async fn write_atomic(dir: &Path, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = dir.join(format!("{filename}.tmp"));
    let target = dir.join(filename);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io("write", &tmp, e))?;
    tokio::fs::rename(&tmp, &target)
        .await
        .map_err(|e| StoreError::io("rename", &tmp, e))?;
    Ok(())
}

async fn rename_or_not_found(
    hash: &str,
    id: MessageId,
    from: &Path,
    to: &Path,
) -> Result<(), StoreError> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::MessageNotFound {
            hash: hash.to_string(),
            id,
        }),
        Err(e) => Err(StoreError::io("rename", from, e)),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::io("read", path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

async fn dir_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Envelope ids in a folder: `<ULID>.json` files, sidecars excluded.
async fn list_envelope_ids(dir: &Path) -> Result<Vec<MessageId>, StoreError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io("read_dir", dir, e))?;
    let mut ids = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io("read_dir", dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".json") else {
            continue;
        };
        // `<id>.reason.json` and `<id>.json.tmp` are not envelopes.
        if stem.contains('.') {
            continue;
        }
        match MessageId::from_str(stem) {
            Ok(id) => ids.push(id),
            Err(_) => warn!(file = name, "skipping non-ULID file in mailbox"),
        }
    }
    Ok(ids)
}

async fn sweep_temp_files(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| n.ends_with(".tmp")) {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!(path = %entry.path().display(), error = %e, "failed to sweep temp file");
            }
        }
    }
}
