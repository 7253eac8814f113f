use half::f16;
use serde::Serialize;

use super::error::{IndexError, IndexResult};
use super::similarity::{cosine_similarity_f16_f32, to_f16_normalized};
use crate::store::{EntryId, TmEntry, TmId};

/// One entry as captured by a build.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntry {
    pub entry_id: EntryId,
    pub source: String,
    pub target: String,
    pub string_id: Option<String>,
    pub confirmed: bool,
    pub(crate) vector: Vec<f16>,
}

impl IndexedEntry {
    pub fn vector(&self) -> &[f16] {
        &self.vector
    }
}

/// A ranked suggestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub entry_id: EntryId,
    pub source: String,
    pub target: String,
    pub string_id: Option<String>,
    pub confirmed: bool,
    pub score: f32,
}

/// Immutable, versioned similarity index for one TM.
///
/// Never mutated after construction; readers share it through an `Arc` and a new
/// build replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub(crate) tm_id: TmId,
    pub(crate) version: u64,
    pub(crate) revision: u64,
    pub(crate) dimension: usize,
    pub(crate) provider: String,
    pub(crate) built_at: i64,
    pub(crate) entries: Vec<IndexedEntry>,
}

impl IndexSnapshot {
    pub fn tm_id(&self) -> TmId {
        self.tm_id
    }

    /// The TM `index_version` this snapshot was installed as.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Entry-store revision the build read.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Name of the embedding provider that produced the vectors.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn built_at(&self) -> i64 {
        self.built_at
    }

    pub fn entries(&self) -> &[IndexedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scores every entry against `query` and returns at most `max_results` matches
    /// with `score >= threshold`, by descending score then ascending entry id.
    pub fn search(
        &self,
        query: &[f32],
        threshold: f32,
        max_results: usize,
    ) -> IndexResult<Vec<ScoredMatch>> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexedEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity_f16_f32(&entry.vector, query), entry))
            .filter(|(score, _)| *score >= threshold)
            .collect();

        scored.sort_by(|(sa, ea), (sb, eb)| {
            sb.total_cmp(sa)
                .then_with(|| ea.entry_id.cmp(&eb.entry_id))
        });
        scored.truncate(max_results);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| ScoredMatch {
                entry_id: entry.entry_id,
                source: entry.source.clone(),
                target: entry.target.clone(),
                string_id: entry.string_id.clone(),
                confirmed: entry.confirmed,
                score,
            })
            .collect())
    }
}

/// Accumulates embedded batches; nothing is visible until [`finish`](Self::finish).
#[derive(Debug)]
pub struct SnapshotBuilder {
    tm_id: TmId,
    dimension: usize,
    provider: String,
    entries: Vec<IndexedEntry>,
}

impl SnapshotBuilder {
    pub fn new(tm_id: TmId, dimension: usize, provider: impl Into<String>) -> Self {
        Self {
            tm_id,
            dimension,
            provider: provider.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.entries.reserve_exact(capacity);
        self
    }

    /// Adds `entries` with their `vectors` (same order, same length).
    pub fn push_batch(&mut self, entries: &[TmEntry], vectors: Vec<Vec<f32>>) -> IndexResult<()> {
        if entries.len() != vectors.len() {
            return Err(IndexError::CountMismatch {
                expected: entries.len(),
                actual: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.entries
            .extend(entries.iter().zip(vectors).map(|(entry, vector)| IndexedEntry {
                entry_id: entry.id,
                source: entry.source.clone(),
                target: entry.target.clone(),
                string_id: entry.string_id.clone(),
                confirmed: entry.confirmed,
                vector: to_f16_normalized(&vector),
            }));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seals the snapshot; entries are ordered by id.
    pub fn finish(mut self, version: u64, revision: u64, built_at: i64) -> IndexSnapshot {
        self.entries.sort_unstable_by_key(|e| e.entry_id);
        IndexSnapshot {
            tm_id: self.tm_id,
            version,
            revision,
            dimension: self.dimension,
            provider: self.provider,
            built_at,
            entries: self.entries,
        }
    }
}
