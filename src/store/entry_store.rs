use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info, instrument, warn};

use super::database::{DbPool, open_file_pool, open_memory_pool};
use super::error::{StoreError, StoreResult};
use super::model::{
    ChangeEvent, ChangeOp, EntryId, EntrySnapshot, EntryUpdate, NewEntry, NewTm, TmEntry, TmId,
    TmStatus, TranslationMemory,
};
use super::notify::ChangeNotifier;

const TM_COLUMNS: &str = "id, name, source_lang, target_lang, status, entry_count, \
     index_version, last_error, revision, indexed_revision, created_at, indexed_at";

/// `?1` is the stale-before timestamp.
const STUCK_BUILD_FILTER: &str = "status = 'indexing'
     AND NOT EXISTS (
         SELECT 1 FROM build_locks l
          WHERE l.tm_id = translation_memories.id AND l.acquired_at >= ?1)";

const RECOVER_BUILD_UPDATE: &str = "UPDATE translation_memories
    SET status = CASE WHEN index_version = 0 THEN 'pending' ELSE 'error' END,
        last_error = CASE WHEN index_version = 0 THEN NULL
                          ELSE 'build interrupted before completion' END,
        indexed_revision = NULL";

const ENTRY_COLUMNS: &str =
    "id, tm_id, source, target, string_id, confirmed, created_at, updated_at";

/// Durable store of translation memories and their entries.
///
/// Mutations commit before returning and never wait on indexing. After each commit
/// the store reports a [`ChangeEvent`] to the configured [`ChangeNotifier`]; a lost
/// notification is logged and left to the reconciliation sweep, it never fails the
/// mutation.
pub struct EntryStore {
    pool: DbPool,
    notifier: RwLock<Option<Arc<dyn ChangeNotifier>>>,
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("pool_size", &self.pool.max_size())
            .field("has_notifier", &self.notifier.read().is_some())
            .finish()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn row_to_tm(row: &Row<'_>) -> rusqlite::Result<TranslationMemory> {
    Ok(TranslationMemory {
        id: row.get(0)?,
        name: row.get(1)?,
        source_lang: row.get(2)?,
        target_lang: row.get(3)?,
        status: row.get(4)?,
        entry_count: row.get::<_, i64>(5)? as u64,
        index_version: row.get::<_, i64>(6)? as u64,
        last_error: row.get(7)?,
        revision: row.get::<_, i64>(8)? as u64,
        indexed_revision: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        created_at: row.get(10)?,
        indexed_at: row.get(11)?,
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<TmEntry> {
    Ok(TmEntry {
        id: row.get(0)?,
        tm_id: row.get(1)?,
        source: row.get(2)?,
        target: row.get(3)?,
        string_id: row.get(4)?,
        confirmed: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn load_tm(conn: &Connection, tm_id: TmId) -> StoreResult<TranslationMemory> {
    let sql = format!("SELECT {TM_COLUMNS} FROM translation_memories WHERE id = ?1");
    conn.query_row(&sql, params![tm_id], row_to_tm)
        .optional()?
        .ok_or(StoreError::TmNotFound { tm_id })
}

fn load_entry(conn: &Connection, entry_id: EntryId) -> StoreResult<TmEntry> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM tm_entries WHERE id = ?1");
    conn.query_row(&sql, params![entry_id], row_to_entry)
        .optional()?
        .ok_or(StoreError::EntryNotFound { entry_id })
}

fn load_entries(conn: &Connection, tm_id: TmId) -> StoreResult<Vec<TmEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM tm_entries WHERE tm_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare_cached(&sql)?;
    let entries = stmt
        .query_map(params![tm_id], row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Bumps the TM revision (and entry count by `delta`); fails if the TM is missing.
fn bump_revision(conn: &Connection, tm_id: TmId, delta: i64) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE translation_memories
            SET revision = revision + 1, entry_count = entry_count + ?2
          WHERE id = ?1",
        params![tm_id, delta],
    )?;
    if changed == 0 {
        return Err(StoreError::TmNotFound { tm_id });
    }
    Ok(())
}

fn validate_new_entry(entry: &NewEntry) -> StoreResult<()> {
    if entry.source.trim().is_empty() {
        return Err(StoreError::invalid("entry source text must not be empty"));
    }
    Ok(())
}

impl EntryStore {
    /// Opens (or creates) a file-backed store.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self::from_pool(open_file_pool(path)?))
    }

    /// Opens a private in-memory store (tests, ephemeral runs).
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::from_pool(open_memory_pool()?))
    }

    /// Wraps an existing pool whose schema is already applied.
    pub fn from_pool(pool: DbPool) -> Self {
        Self {
            pool,
            notifier: RwLock::new(None),
        }
    }

    /// Returns the underlying pool (shared with the SQLite lock store).
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Installs the receiver of change notifications.
    pub fn set_notifier(&self, notifier: Arc<dyn ChangeNotifier>) {
        *self.notifier.write() = Some(notifier);
    }

    /// Removes the change notifier (mutations still succeed).
    pub fn clear_notifier(&self) {
        *self.notifier.write() = None;
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn notify(&self, event: ChangeEvent) {
        let notifier = self.notifier.read().clone();
        match notifier {
            Some(notifier) => {
                if !notifier.notify(event) {
                    warn!(
                        tm_id = event.tm_id,
                        op = ?event.op,
                        "Change notification dropped; reconciliation sweep will catch up"
                    );
                }
            }
            None => debug!(tm_id = event.tm_id, op = ?event.op, "No change notifier installed"),
        }
    }

    /// Creates an empty TM in `pending` status.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn create_tm(&self, new: &NewTm) -> StoreResult<TranslationMemory> {
        if new.name.trim().is_empty() {
            return Err(StoreError::invalid("tm name must not be empty"));
        }
        if new.source_lang.trim().is_empty() || new.target_lang.trim().is_empty() {
            return Err(StoreError::invalid("source and target language are required"));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO translation_memories (name, source_lang, target_lang, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.name.trim(),
                new.source_lang.trim(),
                new.target_lang.trim(),
                TmStatus::Pending,
                now_ms()
            ],
        )?;
        let tm = load_tm(&conn, conn.last_insert_rowid())?;
        info!(tm_id = tm.id, "Translation memory created");
        Ok(tm)
    }

    pub fn get_tm(&self, tm_id: TmId) -> StoreResult<TranslationMemory> {
        load_tm(&*self.conn()?, tm_id)
    }

    pub fn list_tms(&self) -> StoreResult<Vec<TranslationMemory>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {TM_COLUMNS} FROM translation_memories ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let tms = stmt
            .query_map([], row_to_tm)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tms)
    }

    /// The `ready` TM indexed most recently, if any.
    pub fn latest_ready_tm(&self) -> StoreResult<Option<TranslationMemory>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TM_COLUMNS} FROM translation_memories
              WHERE status = ?1
              ORDER BY indexed_at DESC, id DESC
              LIMIT 1"
        );
        Ok(conn
            .query_row(&sql, params![TmStatus::Ready], row_to_tm)
            .optional()?)
    }

    /// Deletes a TM; entries and its build lock row cascade.
    #[instrument(skip(self))]
    pub fn delete_tm(&self, tm_id: TmId) -> StoreResult<()> {
        let changed = self.conn()?.execute(
            "DELETE FROM translation_memories WHERE id = ?1",
            params![tm_id],
        )?;
        if changed == 0 {
            return Err(StoreError::TmNotFound { tm_id });
        }
        info!(tm_id, "Translation memory deleted");
        Ok(())
    }

    /// Inserts one entry and returns its id.
    pub fn insert(&self, tm_id: TmId, entry: &NewEntry) -> StoreResult<EntryId> {
        validate_new_entry(entry)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        bump_revision(&tx, tm_id, 1)?;
        let now = now_ms();
        tx.execute(
            "INSERT INTO tm_entries (tm_id, source, target, string_id, confirmed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                tm_id,
                entry.source,
                entry.target,
                entry.string_id,
                entry.confirmed,
                now
            ],
        )?;
        let entry_id = tx.last_insert_rowid();
        tx.commit()?;

        self.notify(ChangeEvent::new(tm_id, ChangeOp::Insert, 1));
        Ok(entry_id)
    }

    /// Inserts many entries in one transaction and reports a single change event.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub fn insert_many(&self, tm_id: TmId, entries: &[NewEntry]) -> StoreResult<Vec<EntryId>> {
        for entry in entries {
            validate_new_entry(entry)?;
        }

        let mut conn = self.conn()?;
        if entries.is_empty() {
            load_tm(&conn, tm_id)?;
            return Ok(Vec::new());
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        bump_revision(&tx, tm_id, entries.len() as i64)?;
        let now = now_ms();
        let mut ids = Vec::with_capacity(entries.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO tm_entries (tm_id, source, target, string_id, confirmed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    tm_id,
                    entry.source,
                    entry.target,
                    entry.string_id,
                    entry.confirmed,
                    now
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;

        info!(tm_id, imported = ids.len(), "Bulk import committed");
        self.notify(ChangeEvent::new(
            tm_id,
            ChangeOp::Insert,
            u32::try_from(ids.len()).unwrap_or(u32::MAX),
        ));
        Ok(ids)
    }

    /// Applies a partial update and returns the updated entry.
    pub fn update(&self, entry_id: EntryId, fields: &EntryUpdate) -> StoreResult<TmEntry> {
        if fields.is_empty() {
            return Err(StoreError::invalid("no fields to update"));
        }
        if fields
            .source
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(StoreError::invalid("entry source text must not be empty"));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tm_id = load_entry(&tx, entry_id)?.tm_id;
        tx.execute(
            "UPDATE tm_entries
                SET source = COALESCE(?2, source),
                    target = COALESCE(?3, target),
                    string_id = COALESCE(?4, string_id),
                    confirmed = COALESCE(?5, confirmed),
                    updated_at = ?6
              WHERE id = ?1",
            params![
                entry_id,
                fields.source,
                fields.target,
                fields.string_id,
                fields.confirmed,
                now_ms()
            ],
        )?;
        bump_revision(&tx, tm_id, 0)?;
        let updated = load_entry(&tx, entry_id)?;
        tx.commit()?;

        self.notify(ChangeEvent::new(tm_id, ChangeOp::Update, 1));
        Ok(updated)
    }

    /// Deletes one entry.
    pub fn delete(&self, entry_id: EntryId) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tm_id = load_entry(&tx, entry_id)?.tm_id;
        tx.execute("DELETE FROM tm_entries WHERE id = ?1", params![entry_id])?;
        bump_revision(&tx, tm_id, -1)?;
        tx.commit()?;

        self.notify(ChangeEvent::new(tm_id, ChangeOp::Delete, 1));
        Ok(())
    }

    pub fn get_entry(&self, entry_id: EntryId) -> StoreResult<TmEntry> {
        load_entry(&*self.conn()?, entry_id)
    }

    /// Lists the entries of a TM ordered by id.
    pub fn list(&self, tm_id: TmId) -> StoreResult<Vec<TmEntry>> {
        let conn = self.conn()?;
        load_tm(&conn, tm_id)?;
        load_entries(&conn, tm_id)
    }

    /// Reads the TM revision and all its entries inside one read transaction.
    pub fn read_snapshot(&self, tm_id: TmId) -> StoreResult<EntrySnapshot> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let tm = load_tm(&tx, tm_id)?;
        let entries = load_entries(&tx, tm_id)?;
        tx.commit()?;

        Ok(EntrySnapshot {
            tm_id,
            revision: tm.revision,
            entries,
        })
    }

    /// `pending | ready | error → indexing`.
    pub fn begin_build(&self, tm_id: TmId) -> StoreResult<TranslationMemory> {
        self.transition(tm_id, TmStatus::Indexing, |tx, tm| {
            tx.execute(
                "UPDATE translation_memories SET status = ?2 WHERE id = ?1",
                params![tm.id, TmStatus::Indexing],
            )?;
            Ok(())
        })
    }

    /// `indexing → ready`, recording the new index version and the revision it covers.
    pub fn complete_build(
        &self,
        tm_id: TmId,
        index_version: u64,
        indexed_revision: u64,
    ) -> StoreResult<TranslationMemory> {
        self.transition(tm_id, TmStatus::Ready, |tx, tm| {
            tx.execute(
                "UPDATE translation_memories
                    SET status = ?2, index_version = ?3, indexed_revision = ?4,
                        last_error = NULL, indexed_at = ?5
                  WHERE id = ?1",
                params![
                    tm.id,
                    TmStatus::Ready,
                    index_version as i64,
                    indexed_revision as i64,
                    now_ms()
                ],
            )?;
            Ok(())
        })
    }

    /// `indexing → error`, retaining `message` as `last_error`.
    pub fn fail_build(&self, tm_id: TmId, message: &str) -> StoreResult<TranslationMemory> {
        self.transition(tm_id, TmStatus::Error, |tx, tm| {
            tx.execute(
                "UPDATE translation_memories SET status = ?2, last_error = ?3 WHERE id = ?1",
                params![tm.id, TmStatus::Error, message],
            )?;
            Ok(())
        })
    }

    fn transition<F>(&self, tm_id: TmId, to: TmStatus, apply: F) -> StoreResult<TranslationMemory>
    where
        F: FnOnce(&Connection, &TranslationMemory) -> StoreResult<()>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tm = load_tm(&tx, tm_id)?;
        if !tm.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                tm_id,
                from: tm.status,
                to,
            });
        }
        apply(&*tx, &tm)?;
        let updated = load_tm(&tx, tm_id)?;
        tx.commit()?;

        debug!(tm_id, from = %tm.status, to = %to, "TM status changed");
        Ok(updated)
    }

    /// TMs that need a build: committed revisions not covered by the index, or a
    /// failed last build.
    pub fn dirty_tms(&self) -> StoreResult<Vec<TmId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM translation_memories
              WHERE indexed_revision IS NULL OR indexed_revision != revision
                 OR status = 'error'
              ORDER BY id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<TmId>>>()?;
        Ok(ids)
    }

    /// TMs in `indexing` whose build lock is absent or acquired before
    /// `stale_before_ms`: their builder is gone.
    pub fn stuck_builds(&self, stale_before_ms: i64) -> StoreResult<Vec<TmId>> {
        let conn = self.conn()?;
        let sql = format!("SELECT id FROM translation_memories WHERE {STUCK_BUILD_FILTER} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![stale_before_ms], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<TmId>>>()?;
        Ok(ids)
    }

    /// Resets one stuck build (see [`stuck_builds`](Self::stuck_builds)) so the TM is
    /// rebuilt: back to `pending` if it was never indexed, otherwise `error`.
    /// Returns `false` if the TM is no longer stuck.
    pub fn recover_interrupted_build(&self, tm_id: TmId, stale_before_ms: i64) -> StoreResult<bool> {
        let sql = format!("{RECOVER_BUILD_UPDATE} WHERE id = ?2 AND {STUCK_BUILD_FILTER}");
        let changed = self
            .conn()?
            .execute(&sql, params![stale_before_ms, tm_id])?;
        if changed == 1 {
            warn!(tm_id, "Recovered TM left in indexing state");
        }
        Ok(changed == 1)
    }

    /// Startup variant of [`recover_interrupted_build`](Self::recover_interrupted_build)
    /// for every stuck TM.
    pub fn recover_interrupted_builds(&self, stale_before_ms: i64) -> StoreResult<Vec<TmId>> {
        let conn = self.conn()?;
        let sql = format!("{RECOVER_BUILD_UPDATE} WHERE {STUCK_BUILD_FILTER} RETURNING id");
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![stale_before_ms], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<TmId>>>()?;
        if !ids.is_empty() {
            warn!(count = ids.len(), "Recovered TMs left in indexing state");
        }
        Ok(ids)
    }

    /// Marks a TM's index as unusable (e.g. its snapshot is gone) so it gets rebuilt.
    pub fn invalidate_index(&self, tm_id: TmId, reason: &str) -> StoreResult<()> {
        let changed = self.conn()?.execute(
            "UPDATE translation_memories
                SET status = CASE WHEN status = 'ready' THEN 'error' ELSE status END,
                    last_error = ?2,
                    indexed_revision = NULL
              WHERE id = ?1",
            params![tm_id, reason],
        )?;
        if changed == 0 {
            return Err(StoreError::TmNotFound { tm_id });
        }
        Ok(())
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> StoreResult<()> {
        self.conn()?.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
