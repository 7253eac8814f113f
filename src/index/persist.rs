//! On-disk snapshots (`{dir}/{tm_id}.snap`, rkyv).
//!
//! Writes go to a temp file that is synced and renamed into place, so a crash never
//! leaves a truncated snapshot under the final name.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{IndexError, IndexResult};
use super::similarity::{f16_from_le_bytes, f16_to_le_bytes};
use super::snapshot::{IndexSnapshot, IndexedEntry};
use crate::store::TmId;

const SNAPSHOT_EXTENSION: &str = "snap";
const TEMP_EXTENSION: &str = "snap.tmp";
const FORMAT_VERSION: u32 = 1;

#[derive(Archive, Deserialize, Serialize, Debug, PartialEq)]
struct PersistedEntry {
    entry_id: i64,
    source: String,
    target: String,
    string_id: Option<String>,
    confirmed: bool,
    /// Little-endian f16.
    embedding: Vec<u8>,
}

#[derive(Archive, Deserialize, Serialize, Debug, PartialEq)]
struct PersistedSnapshot {
    format: u32,
    tm_id: i64,
    version: u64,
    revision: u64,
    dimension: u32,
    provider: String,
    built_at: i64,
    entries: Vec<PersistedEntry>,
}

impl From<&IndexSnapshot> for PersistedSnapshot {
    fn from(snapshot: &IndexSnapshot) -> Self {
        Self {
            format: FORMAT_VERSION,
            tm_id: snapshot.tm_id,
            version: snapshot.version,
            revision: snapshot.revision,
            dimension: snapshot.dimension as u32,
            provider: snapshot.provider.clone(),
            built_at: snapshot.built_at,
            entries: snapshot
                .entries
                .iter()
                .map(|e| PersistedEntry {
                    entry_id: e.entry_id,
                    source: e.source.clone(),
                    target: e.target.clone(),
                    string_id: e.string_id.clone(),
                    confirmed: e.confirmed,
                    embedding: f16_to_le_bytes(&e.vector),
                })
                .collect(),
        }
    }
}

/// A fully written snapshot file not yet renamed into place.
///
/// Dropping it without committing deletes the temp file.
#[derive(Debug)]
pub struct StagedSnapshot {
    tm_id: TmId,
    version: u64,
    bytes: usize,
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
}

impl StagedSnapshot {
    /// Atomically replaces `{tm_id}.snap`.
    pub fn commit(mut self) -> IndexResult<PathBuf> {
        let Some(temp_path) = self.temp_path.take() else {
            return Ok(self.final_path.clone());
        };
        if let Err(e) = fs::rename(&temp_path, &self.final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        debug!(
            tm_id = self.tm_id,
            index_version = self.version,
            bytes = self.bytes,
            "Snapshot persisted"
        );
        Ok(self.final_path.clone())
    }
}

impl Drop for StagedSnapshot {
    fn drop(&mut self) {
        if let Some(temp_path) = self.temp_path.take()
            && let Err(e) = fs::remove_file(&temp_path)
        {
            warn!(path = %temp_path.display(), error = %e, "Failed to discard staged snapshot");
        }
    }
}

/// Directory of persisted snapshots, one file per TM.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, tm_id: TmId) -> PathBuf {
        self.dir.join(format!("{tm_id}.{SNAPSHOT_EXTENSION}"))
    }

    /// Unique per write, so concurrent writers for one TM never share a temp file.
    fn temp_path(&self, tm_id: TmId, version: u64) -> PathBuf {
        let nonce = uuid::Uuid::new_v4().simple();
        self.dir
            .join(format!("{tm_id}.v{version}.{nonce}.{TEMP_EXTENSION}"))
    }

    pub fn save(&self, snapshot: &IndexSnapshot) -> IndexResult<PathBuf> {
        self.stage(snapshot)?.commit()
    }

    /// Writes and syncs the snapshot under a temp name. Nothing is visible under
    /// the final name until [`StagedSnapshot::commit`].
    pub fn stage(&self, snapshot: &IndexSnapshot) -> IndexResult<StagedSnapshot> {
        fs::create_dir_all(&self.dir)?;

        let bytes = rkyv::to_bytes::<RkyvError>(&PersistedSnapshot::from(snapshot))
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        let temp_path = self.temp_path(snapshot.tm_id(), snapshot.version());
        let written = File::create(&temp_path).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        Ok(StagedSnapshot {
            tm_id: snapshot.tm_id(),
            version: snapshot.version(),
            bytes: bytes.len(),
            temp_path: Some(temp_path),
            final_path: self.path(snapshot.tm_id()),
        })
    }

    /// Loads the snapshot for `tm_id`; `Ok(None)` if none was saved.
    pub fn load(&self, tm_id: TmId) -> IndexResult<Option<IndexSnapshot>> {
        let path = self.path(tm_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut aligned = AlignedVec::<16>::with_capacity(raw.len());
        aligned.extend_from_slice(&raw);
        let persisted = rkyv::from_bytes::<PersistedSnapshot, RkyvError>(&aligned).map_err(
            |e| IndexError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            },
        )?;

        let corrupt = |reason: String| IndexError::Corrupt {
            path: path.clone(),
            reason,
        };
        if persisted.format != FORMAT_VERSION {
            return Err(corrupt(format!("unknown format {}", persisted.format)));
        }
        if persisted.tm_id != tm_id {
            return Err(corrupt(format!("holds tm {}", persisted.tm_id)));
        }

        let dimension = persisted.dimension as usize;
        let mut entries = Vec::with_capacity(persisted.entries.len());
        for entry in persisted.entries {
            let vector = f16_from_le_bytes(&entry.embedding)
                .filter(|v| v.len() == dimension)
                .ok_or_else(|| corrupt(format!("entry {} has a bad vector", entry.entry_id)))?;
            entries.push(IndexedEntry {
                entry_id: entry.entry_id,
                source: entry.source,
                target: entry.target,
                string_id: entry.string_id,
                confirmed: entry.confirmed,
                vector,
            });
        }

        Ok(Some(IndexSnapshot {
            tm_id,
            version: persisted.version,
            revision: persisted.revision,
            dimension,
            provider: persisted.provider,
            built_at: persisted.built_at,
            entries,
        }))
    }

    /// Deletes the snapshot file; `false` if there was none.
    pub fn remove(&self, tm_id: TmId) -> IndexResult<bool> {
        match fs::remove_file(self.path(tm_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// TM ids with a persisted snapshot. Stray temp files are removed.
    pub fn list(&self) -> IndexResult<Vec<TmId>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(TEMP_EXTENSION) {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale temp snapshot");
                }
                continue;
            }

            if let Some(stem) = name.strip_suffix(&format!(".{SNAPSHOT_EXTENSION}"))
                && let Ok(id) = stem.parse::<TmId>()
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}
