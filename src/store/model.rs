//! Entry store model types.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Translation memory identifier (SQLite rowid).
pub type TmId = i64;

/// Entry identifier (SQLite rowid).
pub type EntryId = i64;

/// Index status of a translation memory.
///
/// `pending → indexing → {ready, error}` and `ready | error → indexing` on rebuild.
/// `indexing → indexing` is accepted when a build reclaims an abandoned lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TmStatus {
    Pending,
    Indexing,
    Ready,
    Error,
}

impl TmStatus {
    /// Wire/database name; these four strings are the only valid status values.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TmStatus::Pending => "pending",
            TmStatus::Indexing => "indexing",
            TmStatus::Ready => "ready",
            TmStatus::Error => "error",
        }
    }

    /// Returns `true` if the state machine permits `self → next`.
    pub fn can_transition_to(&self, next: TmStatus) -> bool {
        use TmStatus::*;
        matches!(
            (self, next),
            (Pending | Ready | Error | Indexing, Indexing) | (Indexing, Ready | Error)
        )
    }
}

impl std::fmt::Display for TmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown tm status '{0}'")]
pub struct StatusParseError(pub String);

impl std::str::FromStr for TmStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TmStatus::Pending),
            "indexing" => Ok(TmStatus::Indexing),
            "ready" => Ok(TmStatus::Ready),
            "error" => Ok(TmStatus::Error),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

impl ToSql for TmStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TmStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: StatusParseError| FromSqlError::Other(Box::new(e)))
    }
}

/// A translation memory row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationMemory {
    pub id: TmId,
    pub name: String,
    pub source_lang: String,
    pub target_lang: String,
    pub status: TmStatus,
    pub entry_count: u64,
    /// Incremented by every successful build.
    pub index_version: u64,
    pub last_error: Option<String>,
    /// Incremented by every committed entry mutation.
    pub revision: u64,
    /// Revision the current index was built from; `None` if never indexed.
    pub indexed_revision: Option<u64>,
    pub created_at: i64,
    pub indexed_at: Option<i64>,
}

impl TranslationMemory {
    /// Returns `true` if committed mutations are not yet covered by a build.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.indexed_revision != Some(self.revision)
    }
}

/// A source/target pair with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TmEntry {
    pub id: EntryId,
    pub tm_id: TmId,
    pub source: String,
    pub target: String,
    pub string_id: Option<String>,
    pub confirmed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields for creating a translation memory.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTm {
    pub name: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl NewTm {
    pub fn new(
        name: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
        }
    }
}

/// Fields for inserting an entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEntry {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub string_id: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
}

impl NewEntry {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            string_id: None,
            confirmed: false,
        }
    }

    pub fn with_string_id(mut self, string_id: impl Into<String>) -> Self {
        self.string_id = Some(string_id.into());
        self
    }

    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }
}

/// Partial update of an entry; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryUpdate {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub string_id: Option<String>,
    #[serde(default)]
    pub confirmed: Option<bool>,
}

impl EntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.target.is_none()
            && self.string_id.is_none()
            && self.confirmed.is_none()
    }
}

/// Entries of one TM as of a single read transaction.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub tm_id: TmId,
    /// TM revision visible to the read.
    pub revision: u64,
    /// Entries ordered by id.
    pub entries: Vec<TmEntry>,
}

/// Kind of mutation reported to the change notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    /// Raised by the reconciliation sweep for a TM found dirty.
    Reconcile,
}

/// A committed mutation, reported after the write succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub tm_id: TmId,
    pub op: ChangeOp,
    /// Rows affected (bulk imports report one event for many rows).
    pub count: u32,
}

impl ChangeEvent {
    pub fn new(tm_id: TmId, op: ChangeOp, count: u32) -> Self {
        Self { tm_id, op, count }
    }
}
