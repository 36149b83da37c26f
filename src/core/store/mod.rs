//! Vector Store
//!
//! SQLite-backed persistence for indexed videos: one row per converted
//! file keyed by output path, with the embedding stored as a packed
//! f32 BLOB. The store also owns the IVF list index used to narrow
//! search: centroids live in a metadata row and each video row carries
//! the list it was assigned at build time. Rows written after a build
//! keep a NULL list and are always scanned, so search never misses a
//! row just because the index predates it.

pub mod ann;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::core::config::{DistanceMetric, IndexParameters};
use crate::core::{PipelineError, PipelineResult};

// =============================================================================
// Records
// =============================================================================

/// One indexed video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
    /// Converted file path, the row key
    pub path: String,
    /// Semantic summary
    pub summary: String,
    /// Embedding of the summary
    pub embedding: Vec<f32>,
}

/// A search match with its distance to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: VideoRecord,
    pub distance: f32,
}

/// What `ensure_index` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDecision {
    /// No index existed; one was built
    Built,
    /// Existing index matches the requested parameters
    Reused,
    /// Parameters changed and rebuild was requested
    Rebuilt,
}

/// Stored index metadata.
#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub metric: DistanceMetric,
    pub lists: u32,
    pub dimension: usize,
    pub centroids: Vec<Vec<f32>>,
    pub built_at: DateTime<Utc>,
}

impl IndexMeta {
    /// Comparable parameter shape, mirroring `IndexParameters::describe`.
    pub fn describe(&self) -> String {
        format!("{}/{}/{}", self.metric, self.lists, self.dimension)
    }

    fn matches(&self, params: &IndexParameters) -> bool {
        self.metric == params.metric
            && self.lists == params.lists
            && self.dimension == params.dimension
    }
}

/// Row counts for status reporting.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub rows: usize,
    /// Rows not yet assigned to an index list
    pub unassigned_rows: usize,
    pub index: Option<IndexMeta>,
}

// =============================================================================
// Vector Store
// =============================================================================

/// SQLite store for video summaries and embeddings.
pub struct VectorStore {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl VectorStore {
    /// Opens (or creates) the store at the given path.
    pub fn open(path: &Path, dimension: usize) -> PipelineResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| PipelineError::Store(format!("failed to open database: {}", e)))?;
        let store = Self {
            conn: Mutex::new(conn),
            dimension,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory(dimension: usize) -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PipelineError::Store(format!("failed to open database: {}", e)))?;
        let store = Self {
            conn: Mutex::new(conn),
            dimension,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Idempotent schema setup.
    pub fn ensure_schema(&self) -> PipelineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS videos (
                path       TEXT PRIMARY KEY,
                summary    TEXT NOT NULL,
                embedding  BLOB NOT NULL,
                list_id    INTEGER,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_videos_list ON videos(list_id);
            CREATE TABLE IF NOT EXISTS index_meta (
                id         INTEGER PRIMARY KEY CHECK (id = 1),
                metric     TEXT NOT NULL,
                lists      INTEGER NOT NULL,
                dimension  INTEGER NOT NULL,
                centroids  TEXT NOT NULL,
                built_at   TEXT NOT NULL
            );",
        )
        .map_err(store_err)?;
        Ok(())
    }

    // =========================================================================
    // Row Operations
    // =========================================================================

    /// Inserts or replaces the row for `record.path`. An upsert clears
    /// the row's list assignment; the row is scanned unconditionally
    /// until the next index build re-assigns it.
    pub fn put(&self, record: &VideoRecord) -> PipelineResult<()> {
        if record.embedding.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: record.embedding.len(),
            });
        }

        let blob = ann::encode_vector(&record.embedding);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO videos (path, summary, embedding, list_id, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 summary = excluded.summary,
                 embedding = excluded.embedding,
                 list_id = NULL,
                 updated_at = excluded.updated_at",
            params![record.path, record.summary, blob, Utc::now().to_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Looks up a row by converted-file path.
    pub fn get(&self, path: &str) -> PipelineResult<Option<VideoRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT path, summary, embedding FROM videos WHERE path = ?1",
            params![path],
            row_to_record,
        )
        .optional()
        .map_err(store_err)
    }

    /// True when a row exists for the path. The pipeline's idempotence
    /// check for the indexing stage.
    pub fn contains(&self, path: &str) -> PipelineResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM videos WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count > 0)
    }

    pub fn row_count(&self) -> PipelineResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> PipelineResult<StoreStats> {
        let rows = self.row_count()?;
        let conn = self.conn.lock().unwrap();
        let unassigned: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM videos WHERE list_id IS NULL",
                [],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        drop(conn);
        Ok(StoreStats {
            rows,
            unassigned_rows: unassigned as usize,
            index: self.index_meta()?,
        })
    }

    // =========================================================================
    // Index Lifecycle
    // =========================================================================

    /// Loads the stored index metadata, if an index has been built.
    pub fn index_meta(&self) -> PipelineResult<Option<IndexMeta>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT metric, lists, dimension, centroids, built_at FROM index_meta WHERE id = 1",
            [],
            |row| {
                let metric: String = row.get(0)?;
                let lists: i64 = row.get(1)?;
                let dimension: i64 = row.get(2)?;
                let centroids: String = row.get(3)?;
                let built_at: String = row.get(4)?;
                Ok((metric, lists, dimension, centroids, built_at))
            },
        )
        .optional()
        .map_err(store_err)?
        .map(|(metric, lists, dimension, centroids, built_at)| {
            let metric = metric
                .parse::<DistanceMetric>()
                .map_err(PipelineError::Store)?;
            let centroids: Vec<Vec<f32>> = serde_json::from_str(&centroids)?;
            let built_at = DateTime::parse_from_rfc3339(&built_at)
                .map_err(|e| PipelineError::Store(format!("bad built_at timestamp: {}", e)))?
                .with_timezone(&Utc);
            Ok(IndexMeta {
                metric,
                lists: lists as u32,
                dimension: dimension as usize,
                centroids,
                built_at,
            })
        })
        .transpose()
    }

    /// Builds, reuses, or rebuilds the index so it matches `params`.
    ///
    /// An existing index with different parameters is an error unless
    /// `params.rebuild` is set; a matching index is never rebuilt,
    /// rebuild flag or not, so repeated runs stay cheap.
    pub fn ensure_index(&self, params: &IndexParameters) -> PipelineResult<IndexDecision> {
        match self.index_meta()? {
            None => {
                self.build_index(params)?;
                info!(parameters = %params.describe(), "Index built");
                Ok(IndexDecision::Built)
            }
            Some(meta) if meta.matches(params) => {
                // An index created over an empty table has no centroids
                // yet; train it as soon as there are rows to train on.
                if meta.centroids.is_empty() && self.row_count()? > 0 {
                    self.build_index(params)?;
                    info!(parameters = %params.describe(), "Index trained");
                    return Ok(IndexDecision::Built);
                }
                debug!(parameters = %params.describe(), "Index reused");
                Ok(IndexDecision::Reused)
            }
            Some(meta) => {
                if !params.rebuild {
                    return Err(PipelineError::IndexStale {
                        stored: meta.describe(),
                        configured: params.describe(),
                    });
                }
                self.build_index(params)?;
                info!(
                    old = %meta.describe(),
                    new = %params.describe(),
                    "Index rebuilt"
                );
                Ok(IndexDecision::Rebuilt)
            }
        }
    }

    /// Trains centroids over the current rows and assigns each row to
    /// its nearest list.
    ///
    /// With `concurrent_build` the assignment runs in per-chunk
    /// transactions so writers are only briefly blocked; rows upserted
    /// between chunks land with a NULL list and are still found by
    /// search, which always scans unassigned rows.
    fn build_index(&self, params: &IndexParameters) -> PipelineResult<()> {
        let (paths, vectors) = self.all_embeddings()?;

        let effective_lists = (params.lists as usize).min(paths.len().max(1));
        let centroids = ann::pick_centroids(&vectors, effective_lists);

        let assignments: Vec<(String, Option<usize>)> = paths
            .into_iter()
            .zip(vectors.iter())
            .map(|(path, vector)| (path, ann::assign_list(params.metric, &centroids, vector)))
            .collect();

        let centroids_json = serde_json::to_string(&centroids)?;
        let built_at = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().unwrap();
        let chunk_size = if params.concurrent_build {
            64
        } else {
            assignments.len().max(1)
        };

        for chunk in assignments.chunks(chunk_size) {
            let tx = conn.transaction().map_err(store_err)?;
            for (path, list_id) in chunk {
                tx.execute(
                    "UPDATE videos SET list_id = ?1 WHERE path = ?2",
                    params![list_id.map(|l| l as i64), path],
                )
                .map_err(store_err)?;
            }
            tx.commit().map_err(store_err)?;
        }

        conn.execute(
            "INSERT INTO index_meta (id, metric, lists, dimension, centroids, built_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 metric = excluded.metric,
                 lists = excluded.lists,
                 dimension = excluded.dimension,
                 centroids = excluded.centroids,
                 built_at = excluded.built_at",
            params![
                params.metric.to_string(),
                params.lists as i64,
                params.dimension as i64,
                centroids_json,
                built_at
            ],
        )
        .map_err(store_err)?;

        Ok(())
    }

    fn all_embeddings(&self) -> PipelineResult<(Vec<String>, Vec<Vec<f32>>)> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT path, embedding FROM videos ORDER BY path")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                let path: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((path, blob))
            })
            .map_err(store_err)?;

        let mut paths = Vec::new();
        let mut vectors = Vec::new();
        for row in rows {
            let (path, blob) = row.map_err(store_err)?;
            let vector = ann::decode_vector(&blob)
                .ok_or_else(|| PipelineError::Store(format!("corrupt embedding for {}", path)))?;
            paths.push(path);
            vectors.push(vector);
        }
        Ok((paths, vectors))
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// k nearest rows to `query` under the stored index.
    ///
    /// Candidates come from the `nprobe` lists nearest the query plus
    /// every unassigned row; when that yields fewer than k candidates
    /// the probe widens to every list, so the result always holds
    /// min(k, rows) entries. Exact distances over the candidate set are
    /// sorted ascending with path as the tie-break, so equal-distance
    /// results are deterministic.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &IndexParameters,
    ) -> PipelineResult<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if self.row_count()? == 0 {
            return Ok(Vec::new());
        }

        let meta = match self.index_meta()? {
            Some(meta) if meta.matches(params) => meta,
            Some(meta) => {
                return Err(PipelineError::IndexStale {
                    stored: meta.describe(),
                    configured: params.describe(),
                })
            }
            None => {
                return Err(PipelineError::IndexStale {
                    stored: "none".to_string(),
                    configured: params.describe(),
                })
            }
        };

        let nprobe = (meta.centroids.len() / 4).max(1);
        let probed = ann::probe_lists(params.metric, &meta.centroids, query, nprobe);

        let mut hits = self.candidates(&probed)?;
        if hits.len() < k && probed.len() < meta.centroids.len() {
            let all: Vec<usize> = (0..meta.centroids.len()).collect();
            hits = self.candidates(&all)?;
        }
        for hit in hits.iter_mut() {
            hit.distance = ann::distance(params.metric, &hit.record.embedding, query);
        }
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.path.cmp(&b.record.path))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn candidates(&self, probed: &[usize]) -> PipelineResult<Vec<SearchHit>> {
        let placeholders = std::iter::repeat("?")
            .take(probed.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = if probed.is_empty() {
            "SELECT path, summary, embedding FROM videos WHERE list_id IS NULL".to_string()
        } else {
            format!(
                "SELECT path, summary, embedding FROM videos
                 WHERE list_id IN ({}) OR list_id IS NULL",
                placeholders
            )
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let list_params: Vec<i64> = probed.iter().map(|l| *l as i64).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(list_params), row_to_record)
            .map_err(store_err)?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(SearchHit {
                record: row.map_err(store_err)?,
                distance: 0.0,
            });
        }
        Ok(hits)
    }
}

fn store_err(e: rusqlite::Error) -> PipelineError {
    PipelineError::Store(e.to_string())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<VideoRecord> {
    let path: String = row.get(0)?;
    let summary: String = row.get(1)?;
    let blob: Vec<u8> = row.get(2)?;
    let embedding = ann::decode_vector(&blob).unwrap_or_default();
    Ok(VideoRecord {
        path,
        summary,
        embedding,
    })
}

// =============================================================================
// Tests
// =============================================================================
