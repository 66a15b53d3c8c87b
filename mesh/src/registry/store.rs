// Layer 1: Standard library imports
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

// Layer 3: Internal module imports
use super::types::{
    AgentFilter, AgentRegistryEntry, AgentStats, HealthStatus, HealthThresholds, Reachability,
};
use crate::manifest::{AgentId, AgentManifest};

const MIGRATIONS: &[&str] = &[
    // v1: agents keyed by id, unique per project path.
    "CREATE TABLE agents (
        id                TEXT PRIMARY KEY,
        namespace         TEXT NOT NULL,
        project_path      TEXT NOT NULL UNIQUE,
        scan_root         TEXT NOT NULL,
        manifest          TEXT NOT NULL,
        last_seen_at      INTEGER,
        last_seen_event   TEXT,
        reachability      TEXT NOT NULL DEFAULT 'active',
        unreachable_since INTEGER
    );
    CREATE INDEX agents_namespace_idx ON agents(namespace);",
];

/// Failures surfaced by the agent registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row did not parse back into its typed form.
    #[error("corrupt registry row: {detail}")]
    CorruptRow {
        /// What failed to parse.
        detail: String,
    },

    /// The on-disk schema is newer than this build understands.
    #[error("registry schema version {found} is newer than supported {supported}")]
    SchemaTooNew {
        /// Version found in `user_version`.
        found: i64,
        /// Highest version this build can open.
        supported: i64,
    },

    /// No agent with this id.
    #[error("agent {id} not found")]
    NotFound {
        /// The unknown id.
        id: AgentId,
    },
}

/// Persistent agent table, keyed by id with unique project paths.
///
/// Health is never stored: `last_seen_at` is, and status derives from it
/// at read time. Same single-writer discipline as the message index.
pub struct AgentRegistry {
    conn: Mutex<Connection>,
}

impl AgentRegistry {
    /// Open (creating if missing) the registry at `path` and migrate it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O or schema mismatch.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory registry for tests and ephemeral runs.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if SQLite refuses the connection.
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, RegistryError> {
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let supported = i64::try_from(MIGRATIONS.len()).unwrap_or(i64::MAX);
        let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if found > supported {
            return Err(RegistryError::SchemaTooNew { found, supported });
        }
        let applied = usize::try_from(found).unwrap_or(0);
        for (index, migration) in MIGRATIONS.iter().enumerate().skip(applied) {
            conn.execute_batch(migration)?;
            conn.pragma_update(None, "user_version", index as i64 + 1)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or update an agent.
    ///
    /// A conflicting id replaces the mutable fields and resets
    /// reachability to active; a different id already sitting at the
    /// same project path is removed first (the path changed owners).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure.
    pub fn upsert(&self, entry: &AgentRegistryEntry) -> Result<(), RegistryError> {
        let manifest_json =
            serde_json::to_string(&entry.manifest).map_err(|e| RegistryError::CorruptRow {
                detail: format!("manifest serialization: {e}"),
            })?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM agents WHERE project_path = ?1 AND id <> ?2",
            params![
                entry.project_path.to_string_lossy(),
                entry.manifest.id.to_string()
            ],
        )?;
        tx.execute(
            "INSERT INTO agents
                 (id, namespace, project_path, scan_root, manifest,
                  last_seen_at, last_seen_event, reachability, unreachable_since)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', NULL)
             ON CONFLICT(id) DO UPDATE SET
                 namespace = excluded.namespace,
                 project_path = excluded.project_path,
                 scan_root = excluded.scan_root,
                 manifest = excluded.manifest,
                 reachability = 'active',
                 unreachable_since = NULL",
            params![
                entry.manifest.id.to_string(),
                entry.namespace,
                entry.project_path.to_string_lossy(),
                entry.scan_root.to_string_lossy(),
                manifest_json,
                entry.last_seen_at.map(|at| at.timestamp_millis()),
                entry.last_seen_event,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Fetch one agent by id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure or a corrupt row.
    pub fn get(&self, id: AgentId) -> Result<Option<AgentRegistryEntry>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!("{SELECT_ENTRY} WHERE id = ?1"))?;
        let row = stmt
            .query_row(params![id.to_string()], row_to_entry)
            .optional()?;
        row.transpose()
    }

    /// Fetch one agent by project path.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure or a corrupt row.
    pub fn get_by_path(&self, path: &Path) -> Result<Option<AgentRegistryEntry>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!("{SELECT_ENTRY} WHERE project_path = ?1"))?;
        let row = stmt
            .query_row(params![path.to_string_lossy()], row_to_entry)
            .optional()?;
        row.transpose()
    }

    /// All agents, ordered by namespace then id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure or a corrupt row.
    pub fn list(&self) -> Result<Vec<AgentRegistryEntry>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached(&format!("{SELECT_ENTRY} ORDER BY namespace, id"))?;
        let result = collect_entries(stmt.query_map([], row_to_entry)?);
        result
    }

    /// Agents matching every given filter.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure or a corrupt row.
    pub fn list_filtered(&self, filter: &AgentFilter) -> Result<Vec<AgentRegistryEntry>, RegistryError> {
        let mut entries = self.list()?;
        entries.retain(|entry| {
            filter
                .namespace
                .as_deref()
                .is_none_or(|ns| entry.namespace == ns)
                && filter
                    .runtime
                    .as_deref()
                    .is_none_or(|rt| entry.manifest.runtime == rt)
                && filter
                    .capability
                    .as_deref()
                    .is_none_or(|cap| entry.manifest.capabilities.iter().any(|c| c == cap))
        });
        Ok(entries)
    }

    /// Agents in one namespace.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure or a corrupt row.
    pub fn list_by_namespace(
        &self,
        namespace: &str,
    ) -> Result<Vec<AgentRegistryEntry>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached(&format!("{SELECT_ENTRY} WHERE namespace = ?1 ORDER BY id"))?;
        let result = collect_entries(stmt.query_map(params![namespace], row_to_entry)?);
        result
    }

    /// Distinct namespaces with at least one agent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure.
    pub fn list_namespaces(&self) -> Result<Vec<String>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT DISTINCT namespace FROM agents ORDER BY namespace")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut namespaces = Vec::new();
        for row in rows {
            namespaces.push(row?);
        }
        Ok(namespaces)
    }

    /// Unreachable agents marked before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure or a corrupt row.
    pub fn list_unreachable_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AgentRegistryEntry>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_ENTRY} WHERE reachability = 'unreachable'
               AND unreachable_since IS NOT NULL AND unreachable_since < ?1
             ORDER BY id"
        ))?;
        let result = collect_entries(stmt.query_map(params![cutoff.timestamp_millis()], row_to_entry)?);
        result
    }

    /// Remove one agent; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure.
    pub fn remove(&self, id: AgentId) -> Result<bool, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("DELETE FROM agents WHERE id = ?1")?;
        Ok(stmt.execute(params![id.to_string()])? > 0)
    }

    /// Record observed activity. Status stays derived - only the
    /// timestamp and event are stored.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn update_health(
        &self,
        id: AgentId,
        last_seen_at: DateTime<Utc>,
        event: &str,
    ) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "UPDATE agents SET last_seen_at = ?2, last_seen_event = ?3 WHERE id = ?1",
        )?;
        let updated = stmt.execute(params![
            id.to_string(),
            last_seen_at.timestamp_millis(),
            event
        ])?;
        if updated == 0 {
            return Err(RegistryError::NotFound { id });
        }
        Ok(())
    }

    /// Durably flag an agent whose project directory disappeared.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn mark_unreachable(&self, id: AgentId) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "UPDATE agents SET reachability = 'unreachable',
                 unreachable_since = COALESCE(unreachable_since, ?2)
             WHERE id = ?1",
        )?;
        let updated = stmt.execute(params![id.to_string(), Utc::now().timestamp_millis()])?;
        if updated == 0 {
            return Err(RegistryError::NotFound { id });
        }
        Ok(())
    }

    /// Fetch an agent with its derived health status.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure or a corrupt row.
    pub fn get_with_health(
        &self,
        id: AgentId,
        thresholds: &HealthThresholds,
    ) -> Result<Option<(AgentRegistryEntry, HealthStatus)>, RegistryError> {
        let entry = self.get(id)?;
        Ok(entry.map(|entry| {
            let health = thresholds.derive(entry.last_seen_at, Utc::now());
            (entry, health)
        }))
    }

    /// Fan-out counts for the status dashboard.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on I/O failure or a corrupt row.
    pub fn aggregate_stats(
        &self,
        thresholds: &HealthThresholds,
    ) -> Result<AgentStats, RegistryError> {
        let entries = self.list()?;
        let now = Utc::now();
        let mut stats = AgentStats::default();
        let mut per_namespace: Vec<(String, u64)> = Vec::new();
        for entry in &entries {
            stats.total += 1;
            if entry.reachability == Reachability::Unreachable {
                stats.unreachable += 1;
            }
            match thresholds.derive(entry.last_seen_at, now) {
                HealthStatus::Active => stats.active += 1,
                HealthStatus::Inactive => stats.inactive += 1,
                HealthStatus::Stale => stats.stale += 1,
            }
            match per_namespace
                .iter_mut()
                .find(|(ns, _)| ns == &entry.namespace)
            {
                Some((_, count)) => *count += 1,
                None => per_namespace.push((entry.namespace.clone(), 1)),
            }
        }
        stats.namespaces = per_namespace;
        Ok(stats)
    }
}

const SELECT_ENTRY: &str = "SELECT manifest, namespace, project_path, scan_root,
       last_seen_at, last_seen_event, reachability, unreachable_since
  FROM agents";

type SqlRow<'a, 'b> = &'a rusqlite::Row<'b>;

fn row_to_entry(row: SqlRow<'_, '_>) -> rusqlite::Result<Result<AgentRegistryEntry, RegistryError>> {
    let manifest: String = row.get(0)?;
    let namespace: String = row.get(1)?;
    let project_path: String = row.get(2)?;
    let scan_root: String = row.get(3)?;
    let last_seen_at: Option<i64> = row.get(4)?;
    let last_seen_event: Option<String> = row.get(5)?;
    let reachability: String = row.get(6)?;
    let unreachable_since: Option<i64> = row.get(7)?;

    Ok(build_entry(
        manifest,
        namespace,
        project_path,
        scan_root,
        last_seen_at,
        last_seen_event,
        reachability,
        unreachable_since,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_entry(
    manifest: String,
    namespace: String,
    project_path: String,
    scan_root: String,
    last_seen_at: Option<i64>,
    last_seen_event: Option<String>,
    reachability: String,
    unreachable_since: Option<i64>,
) -> Result<AgentRegistryEntry, RegistryError> {
    let manifest: AgentManifest =
        serde_json::from_str(&manifest).map_err(|e| RegistryError::CorruptRow {
            detail: format!("manifest: {e}"),
        })?;
    let reachability =
        Reachability::from_str(&reachability).map_err(|detail| RegistryError::CorruptRow {
            detail,
        })?;
    Ok(AgentRegistryEntry {
        manifest,
        project_path: PathBuf::from(project_path),
        scan_root: PathBuf::from(scan_root),
        namespace,
        last_seen_at: last_seen_at.and_then(DateTime::<Utc>::from_timestamp_millis),
        last_seen_event,
        reachability,
        unreachable_since: unreachable_since.and_then(DateTime::<Utc>::from_timestamp_millis),
    })
}

fn collect_entries<I>(rows: I) -> Result<Vec<AgentRegistryEntry>, RegistryError>
where
    I: Iterator<Item = rusqlite::Result<Result<AgentRegistryEntry, RegistryError>>>,
{
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row??);
    }
    Ok(entries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(namespace: &str, path: &str) -> AgentRegistryEntry {
        AgentRegistryEntry {
            manifest: AgentManifest::new("agent", "claude-code"),
            project_path: PathBuf::from(path),
            scan_root: PathBuf::from("/scan"),
            namespace: namespace.to_string(),
            last_seen_at: None,
            last_seen_event: None,
            reachability: Reachability::Active,
            unreachable_since: None,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        let entry = entry("team", "/scan/team/project");
        registry.upsert(&entry).unwrap();

        let fetched = registry.get(entry.manifest.id).unwrap().unwrap();
        assert_eq!(fetched.manifest, entry.manifest);
        assert_eq!(fetched.namespace, "team");

        let by_path = registry
            .get_by_path(&PathBuf::from("/scan/team/project"))
            .unwrap()
            .unwrap();
        assert_eq!(by_path.manifest.id, entry.manifest.id);
    }

    #[test]
    fn test_same_path_different_id_replaces_old_row() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        let first = entry("team", "/scan/team/project");
        registry.upsert(&first).unwrap();

        let second = entry("team", "/scan/team/project");
        registry.upsert(&second).unwrap();

        assert!(registry.get(first.manifest.id).unwrap().is_none());
        assert!(registry.get(second.manifest.id).unwrap().is_some());
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_resets_reachability() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        let entry = entry("team", "/scan/team/project");
        registry.upsert(&entry).unwrap();
        registry.mark_unreachable(entry.manifest.id).unwrap();
        assert_eq!(
            registry.get(entry.manifest.id).unwrap().unwrap().reachability,
            Reachability::Unreachable
        );

        registry.upsert(&entry).unwrap();
        let fetched = registry.get(entry.manifest.id).unwrap().unwrap();
        assert_eq!(fetched.reachability, Reachability::Active);
        assert!(fetched.unreachable_since.is_none());
    }

    #[test]
    fn test_list_by_namespace() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        registry.upsert(&entry("alpha", "/scan/alpha/one")).unwrap();
        registry.upsert(&entry("alpha", "/scan/alpha/two")).unwrap();
        registry.upsert(&entry("beta", "/scan/beta/one")).unwrap();

        assert_eq!(registry.list_by_namespace("alpha").unwrap().len(), 2);
        assert_eq!(registry.list_by_namespace("beta").unwrap().len(), 1);
        assert_eq!(
            registry.list_namespaces().unwrap(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }

    #[test]
    fn test_list_filtered() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        let mut cursor_agent = entry("alpha", "/scan/alpha/cursor");
        cursor_agent.manifest.runtime = "cursor".to_string();
        cursor_agent.manifest.capabilities = vec!["review".to_string()];
        registry.upsert(&cursor_agent).unwrap();
        registry.upsert(&entry("alpha", "/scan/alpha/claude")).unwrap();
        registry.upsert(&entry("beta", "/scan/beta/claude")).unwrap();

        let by_runtime = registry
            .list_filtered(&AgentFilter {
                runtime: Some("cursor".to_string()),
                ..AgentFilter::default()
            })
            .unwrap();
        assert_eq!(by_runtime.len(), 1);

        let combined = registry
            .list_filtered(&AgentFilter {
                namespace: Some("alpha".to_string()),
                capability: Some("review".to_string()),
                ..AgentFilter::default()
            })
            .unwrap();
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].manifest.id, cursor_agent.manifest.id);

        let none = registry.list_filtered(&AgentFilter::default()).unwrap();
        assert_eq!(none.len(), 3);
    }

    #[test]
    fn test_health_update_and_derivation() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        let entry = entry("team", "/scan/team/project");
        registry.upsert(&entry).unwrap();
        let thresholds = HealthThresholds::default();

        let (_, health) = registry
            .get_with_health(entry.manifest.id, &thresholds)
            .unwrap()
            .unwrap();
        assert_eq!(health, HealthStatus::Stale);

        registry
            .update_health(entry.manifest.id, Utc::now(), "message_received")
            .unwrap();
        let (fetched, health) = registry
            .get_with_health(entry.manifest.id, &thresholds)
            .unwrap()
            .unwrap();
        assert_eq!(health, HealthStatus::Active);
        assert_eq!(fetched.last_seen_event.as_deref(), Some("message_received"));
    }

    #[test]
    fn test_update_health_unknown_id() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        let result = registry.update_health(AgentId::new(), Utc::now(), "x");
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }

    #[test]
    fn test_unreachable_listing_with_cutoff() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        let entry = entry("team", "/scan/team/project");
        registry.upsert(&entry).unwrap();
        registry.mark_unreachable(entry.manifest.id).unwrap();

        let future = Utc::now() + chrono::Duration::minutes(1);
        assert_eq!(registry.list_unreachable_before(future).unwrap().len(), 1);
        let past = Utc::now() - chrono::Duration::minutes(1);
        assert!(registry.list_unreachable_before(past).unwrap().is_empty());
    }

    #[test]
    fn test_aggregate_stats() {
        let registry = AgentRegistry::open_in_memory().unwrap();
        let thresholds = HealthThresholds::default();
        let a = entry("alpha", "/scan/alpha/one");
        let b = entry("alpha", "/scan/alpha/two");
        let c = entry("beta", "/scan/beta/one");
        for e in [&a, &b, &c] {
            registry.upsert(e).unwrap();
        }
        registry.update_health(a.manifest.id, Utc::now(), "ping").unwrap();
        registry.mark_unreachable(c.manifest.id).unwrap();

        let stats = registry.aggregate_stats(&thresholds).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.stale, 2);
        assert_eq!(stats.unreachable, 1);
        assert_eq!(
            stats.namespaces,
            vec![("alpha".to_string(), 2), ("beta".to_string(), 1)]
        );
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.db");
        let id;
        {
            let registry = AgentRegistry::open(&path).unwrap();
            let entry = entry("team", "/scan/team/project");
            id = entry.manifest.id;
            registry.upsert(&entry).unwrap();
        }
        let registry = AgentRegistry::open(&path).unwrap();
        assert!(registry.get(id).unwrap().is_some());
    }
}
