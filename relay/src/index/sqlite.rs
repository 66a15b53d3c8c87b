// Layer 1: Standard library imports
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

// Layer 3: Internal module imports
use super::error::IndexError;
use crate::access::{AccessRule, RuleAction};
use crate::message::{MessageId, MessageStatus};
use crate::subject::SubjectPattern;

/// Forward-only migrations, applied in order at open.
///
/// `user_version` records how many entries have been applied; downgrades
/// are not supported.
const MIGRATIONS: &[&str] = &[
    // v1: messages, access rules, per-sender budget counters.
    "CREATE TABLE messages (
        id            TEXT PRIMARY KEY,
        subject       TEXT NOT NULL,
        endpoint_hash TEXT NOT NULL,
        status        TEXT NOT NULL,
        created_at    INTEGER NOT NULL,
        expires_at    INTEGER
    );
    CREATE INDEX messages_endpoint_status_idx ON messages(endpoint_hash, status);
    CREATE INDEX messages_subject_idx ON messages(subject, id);
    CREATE TABLE access_rules (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        from_pattern TEXT NOT NULL,
        to_pattern   TEXT NOT NULL,
        action       TEXT NOT NULL,
        priority     INTEGER NOT NULL
    );
    CREATE TABLE budget_counters (
        sender     TEXT PRIMARY KEY,
        events     INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    );",
];

/// One indexed message, mirroring a Maildir file.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    /// ULID; matches the Maildir filename.
    pub id: MessageId,
    /// Endpoint subject the message was delivered to.
    pub subject: String,
    /// Owning endpoint hash.
    pub endpoint_hash: String,
    /// Mirror of the Maildir location.
    pub status: MessageStatus,
    /// Envelope creation time.
    pub created_at: DateTime<Utc>,
    /// Budget TTL as an instant, when derivable.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Aggregate message counts for the metrics surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexMetrics {
    /// All indexed messages.
    pub total: u64,
    /// Messages waiting in `new/`.
    pub pending: u64,
    /// Messages handled and completed.
    pub delivered: u64,
    /// Messages in `failed/`.
    pub failed: u64,
}

/// Single-writer embedded index.
///
/// WAL journal, `synchronous=NORMAL`, 5 s busy timeout. All access runs
/// through one connection behind a mutex, which satisfies the
/// one-writer-at-a-time discipline; statements are prepared and cached.
/// The index is advisory relative to the Maildir tree and may be
/// rebuilt from it.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (creating if missing) the index at `path` and migrate it.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O or if the on-disk schema is newer
    /// than this build.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory index for tests and ephemeral runs.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if SQLite refuses the connection.
    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, IndexError> {
        // journal_mode returns a row, so it cannot go through pragma_update.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a freshly delivered message.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on constraint or I/O failure.
    pub fn insert_message(&self, row: &MessageRow) -> Result<(), IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO messages (id, subject, endpoint_hash, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status",
        )?;
        stmt.execute(params![
            row.id.to_string(),
            row.subject,
            row.endpoint_hash,
            row.status.as_str(),
            row.created_at.timestamp_millis(),
            row.expires_at.map(|at| at.timestamp_millis()),
        ])?;
        Ok(())
    }

    /// Move a message to a new status.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure; updating an unknown id is
    /// a no-op (the Maildir tree is authoritative).
    pub fn update_status(&self, id: &MessageId, status: MessageStatus) -> Result<(), IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("UPDATE messages SET status = ?2 WHERE id = ?1")?;
        stmt.execute(params![id.to_string(), status.as_str()])?;
        Ok(())
    }

    /// Count messages still waiting in `new/` for one endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure.
    pub fn count_new_by_endpoint(&self, endpoint_hash: &str) -> Result<u64, IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM messages WHERE endpoint_hash = ?1 AND status = 'pending'",
        )?;
        let count: i64 = stmt.query_row(params![endpoint_hash], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Page through messages for a subject in id (delivery) order.
    ///
    /// `cursor` is the last id of the previous page; pass `None` to start
    /// from the beginning.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure or a corrupt row.
    pub fn list_by_subject(
        &self,
        subject: &str,
        cursor: Option<&MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageRow>, IndexError> {
        let conn = self.conn.lock();
        let after = cursor.map(|id| id.to_string()).unwrap_or_default();
        let mut stmt = conn.prepare_cached(
            "SELECT id, subject, endpoint_hash, status, created_at, expires_at
             FROM messages WHERE subject = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![subject, after, limit], row_to_message)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Fetch one message by id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure or a corrupt row.
    pub fn get_message(&self, id: &MessageId) -> Result<Option<MessageRow>, IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, subject, endpoint_hash, status, created_at, expires_at
             FROM messages WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id.to_string()], row_to_message)
            .optional()?;
        row.transpose()
    }

    /// Remove one message row; returns whether anything was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure.
    pub fn delete_by_id(&self, id: &MessageId) -> Result<bool, IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("DELETE FROM messages WHERE id = ?1")?;
        Ok(stmt.execute(params![id.to_string()])? > 0)
    }

    /// Aggregate counts by status.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure.
    pub fn get_metrics(&self) -> Result<IndexMetrics, IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT status, COUNT(*) FROM messages GROUP BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut metrics = IndexMetrics::default();
        for row in rows {
            let (status, count) = row?;
            let count = u64::try_from(count).unwrap_or_default();
            metrics.total += count;
            match status.as_str() {
                "pending" => metrics.pending = count,
                "delivered" => metrics.delivered = count,
                "failed" => metrics.failed = count,
                other => {
                    return Err(IndexError::CorruptRow {
                        detail: format!("unknown status {other:?}"),
                    })
                }
            }
        }
        Ok(metrics)
    }

    /// Replace the whole access-rule table.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure; the swap is transactional.
    pub fn replace_access_rules(&self, rules: &[AccessRule]) -> Result<(), IndexError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM access_rules", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO access_rules (from_pattern, to_pattern, action, priority)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for rule in rules {
                stmt.execute(params![
                    rule.from.as_str(),
                    rule.to.as_str(),
                    rule.action.as_str(),
                    rule.priority,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Append one access rule.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure.
    pub fn insert_access_rule(&self, rule: &AccessRule) -> Result<(), IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO access_rules (from_pattern, to_pattern, action, priority)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        stmt.execute(params![
            rule.from.as_str(),
            rule.to.as_str(),
            rule.action.as_str(),
            rule.priority,
        ])?;
        Ok(())
    }

    /// Delete rules with exactly this from/to pattern pair.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure.
    pub fn delete_access_rules(
        &self,
        from: &SubjectPattern,
        to: &SubjectPattern,
    ) -> Result<usize, IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "DELETE FROM access_rules WHERE from_pattern = ?1 AND to_pattern = ?2",
        )?;
        Ok(stmt.execute(params![from.as_str(), to.as_str()])?)
    }

    /// Load all persisted access rules, skipping rows that no longer
    /// parse (they are logged and dropped rather than wedging startup).
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure.
    pub fn list_access_rules(&self) -> Result<Vec<AccessRule>, IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT from_pattern, to_pattern, action, priority FROM access_rules ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
            ))
        })?;
        let mut rules = Vec::new();
        for row in rows {
            let (from, to, action, priority) = row?;
            let parsed = SubjectPattern::new(from.clone())
                .and_then(|f| SubjectPattern::new(to.clone()).map(|t| (f, t)));
            let Ok((from, to)) = parsed else {
                warn!(%from, %to, "dropping unparseable access rule");
                continue;
            };
            let Ok(action) = RuleAction::from_str(&action) else {
                warn!(%action, "dropping access rule with unknown action");
                continue;
            };
            rules.push(AccessRule {
                from,
                to,
                action,
                priority,
            });
        }
        Ok(rules)
    }

    /// Bump the aggregate event counter for a sender.
    ///
    /// The sliding rate-limit window lives in memory; this table keeps a
    /// durable total for the metrics surface.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure.
    pub fn record_sender_usage(&self, sender: &str, at: DateTime<Utc>) -> Result<(), IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO budget_counters (sender, events, updated_at) VALUES (?1, 1, ?2)
             ON CONFLICT(sender) DO UPDATE SET
                 events = events + 1,
                 updated_at = excluded.updated_at",
        )?;
        stmt.execute(params![sender, at.timestamp_millis()])?;
        Ok(())
    }

    /// Total recorded events for a sender.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on I/O failure.
    pub fn sender_usage(&self, sender: &str) -> Result<u64, IndexError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT events FROM budget_counters WHERE sender = ?1")?;
        let events: Option<i64> = stmt
            .query_row(params![sender], |row| row.get(0))
            .optional()?;
        Ok(events.and_then(|e| u64::try_from(e).ok()).unwrap_or(0))
    }
}

fn migrate(conn: &Connection) -> Result<(), IndexError> {
    let supported = i64::try_from(MIGRATIONS.len()).unwrap_or(i64::MAX);
    let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if found > supported {
        return Err(IndexError::SchemaTooNew { found, supported });
    }
    let applied = usize::try_from(found).unwrap_or(0);
    for (index, migration) in MIGRATIONS.iter().enumerate().skip(applied) {
        conn.execute_batch(migration)?;
        conn.pragma_update(None, "user_version", index as i64 + 1)?;
    }
    Ok(())
}

type SqlRow<'a, 'b> = &'a rusqlite::Row<'b>;

fn row_to_message(row: SqlRow<'_, '_>) -> rusqlite::Result<Result<MessageRow, IndexError>> {
    let id: String = row.get(0)?;
    let subject: String = row.get(1)?;
    let endpoint_hash: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: i64 = row.get(4)?;
    let expires_at: Option<i64> = row.get(5)?;

    Ok(build_message_row(
        id,
        subject,
        endpoint_hash,
        status,
        created_at,
        expires_at,
    ))
}

fn build_message_row(
    id: String,
    subject: String,
    endpoint_hash: String,
    status: String,
    created_at: i64,
    expires_at: Option<i64>,
) -> Result<MessageRow, IndexError> {
    let id = MessageId::from_str(&id).map_err(|_| IndexError::CorruptRow {
        detail: format!("bad message id {id:?}"),
    })?;
    let status = MessageStatus::from_str(&status).map_err(|_| IndexError::CorruptRow {
        detail: format!("bad status {status:?}"),
    })?;
    let created_at =
        DateTime::<Utc>::from_timestamp_millis(created_at).ok_or(IndexError::CorruptRow {
            detail: format!("bad created_at {created_at}"),
        })?;
    let expires_at = expires_at.and_then(DateTime::<Utc>::from_timestamp_millis);
    Ok(MessageRow {
        id,
        subject,
        endpoint_hash,
        status,
        created_at,
        expires_at,
    })
}
