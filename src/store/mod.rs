//! Embedded per-generation chapter store.
//!
//! A [`ChapterStore`] maps chapter ids to [`ChapterRecord`]s inside one SQLite
//! file and mirrors every `(id, source_id, need_refetch)` triple in memory, so
//! "do we have it" and "does it need refetch" never touch the database.
//!
//! # Overview
//!
//! - Rows are keyed by `(id, source_id)`; single-source stores always use
//!   `source_id = 0`.
//! - Reads return the *best* copy of a chapter: lowest `priority`, ties broken
//!   by ascending `source_id`.
//! - Writes are idempotent upserts in one transaction. The in-memory index is
//!   updated only after the transaction commits, under the same write gate.
//!
//! # Example
//!
//! ```no_run
//! use bookfetch_core::{Chapter, ChapterRecord, ChapterStore};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ChapterStore::open(Path::new("chapter.raw.sqlite")).await?;
//! store
//!     .upsert_one(&ChapterRecord::clean(Chapter::new("1", "One", "...")))
//!     .await?;
//! assert!(store.exists("1"));
//! assert!(!store.need_refetch("1"));
//! store.close().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod layout;

pub use error::{StorageError, StorageErrorKind};
pub use layout::{BookLayout, Generation, MANIFEST_FILE, RAW_GENERATION};
pub(crate) use layout::{read_json, write_json_atomic};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::book::{Chapter, ChapterRecord, ExtraMap};
use crate::db::{Database, DbOptions};

/// Maximum ids bound into a single `IN (...)` query.
const LOOKUP_CHUNK_SIZE: usize = 500;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS chapters (
    id           TEXT    NOT NULL,
    source_id    INTEGER NOT NULL DEFAULT 0,
    priority     INTEGER NOT NULL DEFAULT 0,
    title        TEXT    NOT NULL,
    content      TEXT    NOT NULL,
    extra        TEXT    NOT NULL DEFAULT '{}',
    need_refetch INTEGER NOT NULL DEFAULT 0 CHECK (need_refetch IN (0, 1)),
    updated_at   TEXT    NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (id, source_id)
);
CREATE INDEX IF NOT EXISTS idx_chapters_id_priority ON chapters (id, priority);
";

/// Per-id view of the stored copies: `source_id -> need_refetch`.
type SourceFlags = BTreeMap<i64, bool>;

/// Durable chapter-id to record mapping with an in-memory freshness index.
///
/// `ChapterStore` is `Send + Sync`; the acquisition pipeline shares one
/// instance between its producer (reads) and its single sink (writes).
#[derive(Debug)]
pub struct ChapterStore {
    db: Database,
    path: PathBuf,
    index: RwLock<HashMap<String, SourceFlags>>,
    write_gate: Mutex<()>,
}

impl ChapterStore {
    /// Opens the store at `path` with default connection options.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file is corrupt or unwritable.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with(path, &DbOptions::default()).await
    }

    /// Opens the store, creating the file and schema if absent, then loads
    /// every `(id, source_id, need_refetch)` triple into memory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file is corrupt or unwritable.
    #[instrument(skip(options), fields(path = %path.display()))]
    pub async fn open_with(path: &Path, options: &DbOptions) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, &e))?;
        }

        let db = Database::open(path, options)
            .await
            .map_err(|e| StorageError::database(path, &e))?;
        Self::from_database(db, path.to_path_buf()).await
    }

    /// Opens a throwaway in-memory store (used by tests).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let path = PathBuf::from(":memory:");
        let db = Database::open_in_memory()
            .await
            .map_err(|e| StorageError::database(&path, &e))?;
        Self::from_database(db, path).await
    }

    async fn from_database(db: Database, path: PathBuf) -> Result<Self, StorageError> {
        if let Err(error) = sqlx::raw_sql(SCHEMA).execute(db.pool()).await {
            db.close().await;
            return Err(StorageError::database(&path, &error));
        }

        let rows = match sqlx::query("SELECT id, source_id, need_refetch FROM chapters")
            .fetch_all(db.pool())
            .await
        {
            Ok(rows) => rows,
            Err(error) => {
                db.close().await;
                return Err(StorageError::database(&path, &error));
            }
        };

        let mut index: HashMap<String, SourceFlags> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let decoded: Result<(String, i64, bool), sqlx::Error> = (|| {
                Ok((
                    row.try_get("id")?,
                    row.try_get("source_id")?,
                    row.try_get("need_refetch")?,
                ))
            })();
            let (id, source_id, need_refetch) =
                decoded.map_err(|e| StorageError::database(&path, &e))?;
            index.entry(id).or_default().insert(source_id, need_refetch);
        }

        debug!(chapters = index.len(), "chapter store opened");

        Ok(Self {
            db,
            path,
            index: RwLock::new(index),
            write_gate: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_index(&self) -> RwLockReadGuard<'_, HashMap<String, SourceFlags>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, HashMap<String, SourceFlags>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if any copy of `id` is stored.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.read_index().contains_key(id)
    }

    /// Returns true unless at least one stored copy of `id` is complete.
    ///
    /// Unknown ids need refetch.
    #[must_use]
    pub fn need_refetch(&self, id: &str) -> bool {
        self.read_index()
            .get(id)
            .is_none_or(|sources| sources.values().all(|dirty| *dirty))
    }

    /// Number of distinct chapter ids stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_index().is_empty()
    }

    /// Snapshot of every stored chapter id.
    #[must_use]
    pub fn existing_ids(&self) -> HashSet<String> {
        self.read_index().keys().cloned().collect()
    }

    /// Snapshot of ids with at least one complete copy.
    #[must_use]
    pub fn clean_ids(&self) -> HashSet<String> {
        self.read_index()
            .iter()
            .filter(|(_, sources)| sources.values().any(|dirty| !*dirty))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Snapshot of ids whose every copy needs refetch.
    #[must_use]
    pub fn dirty_ids(&self) -> HashSet<String> {
        self.read_index()
            .iter()
            .filter(|(_, sources)| sources.values().all(|dirty| *dirty))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Inserts or replaces one record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    pub async fn upsert_one(&self, record: &ChapterRecord) -> Result<(), StorageError> {
        self.upsert_many(std::slice::from_ref(record)).await
    }

    /// Inserts or replaces a batch of records in a single transaction.
    ///
    /// Semantics are identical to calling [`Self::upsert_one`] for each record
    /// in order. A failed batch is logged and discarded, never retried here.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if encoding or the transaction fails; the
    /// in-memory index is left untouched in that case.
    #[instrument(skip(self, records), fields(path = %self.path.display(), batch_size = records.len()))]
    pub async fn upsert_many(&self, records: &[ChapterRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let _gate = self.write_gate.lock().await;

        let result = self.write_batch(records).await;
        if let Err(error) = &result {
            warn!(batch_size = records.len(), error = %error, "chapter batch write failed; batch discarded");
            return result;
        }

        let mut index = self.write_index();
        for record in records {
            index
                .entry(record.chapter.id.clone())
                .or_default()
                .insert(record.source_id, record.need_refetch);
        }
        debug!(batch_size = records.len(), "chapter batch committed");
        Ok(())
    }

    async fn write_batch(&self, records: &[ChapterRecord]) -> Result<(), StorageError> {
        let encoded = records
            .iter()
            .map(|record| {
                serde_json::to_string(&record.chapter.extra)
                    .map(|extra| (record, extra))
                    .map_err(|error| StorageError::Encode {
                        id: record.chapter.id.clone(),
                        message: error.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let db_err = |error: sqlx::Error| StorageError::database(&self.path, &error);

        let mut tx = self.db.pool().begin().await.map_err(db_err)?;
        for (record, extra) in &encoded {
            sqlx::query(
                r"INSERT OR REPLACE INTO chapters
                    (id, source_id, priority, title, content, extra, need_refetch, updated_at)
                  VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
            )
            .bind(&record.chapter.id)
            .bind(record.source_id)
            .bind(record.priority)
            .bind(&record.chapter.title)
            .bind(&record.chapter.content)
            .bind(extra)
            .bind(record.need_refetch)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Returns the best copy of `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails or the row is corrupt.
    pub async fn get(&self, id: &str) -> Result<Option<Chapter>, StorageError> {
        Ok(self.get_record(id).await?.map(|record| record.chapter))
    }

    /// Returns the best stored record of `id`, including its source metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the query fails or the row is corrupt.
    pub async fn get_record(&self, id: &str) -> Result<Option<ChapterRecord>, StorageError> {
        if !self.exists(id) {
            return Ok(None);
        }

        let row = sqlx::query(
            r"SELECT id, source_id, priority, title, content, extra, need_refetch
              FROM chapters
              WHERE id = ?
              ORDER BY priority ASC, source_id ASC
              LIMIT 1",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| StorageError::database(&self.path, &e))?;

        row.map(|row| self.decode_row(&row)).transpose()
    }

    /// Returns the best copy of every requested id that is stored.
    ///
    /// Ids with no stored copy are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a query fails or a row is corrupt.
    pub async fn get_many<S: AsRef<str>>(
        &self,
        ids: &[S],
    ) -> Result<HashMap<String, Chapter>, StorageError> {
        Ok(self
            .get_many_records(ids)
            .await?
            .into_iter()
            .map(|(id, record)| (id, record.chapter))
            .collect())
    }

    /// Like [`Self::get_many`], but keeps the source metadata and the
    /// `need_refetch` flag of the copy that was read.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a query fails or a row is corrupt.
    pub async fn get_many_records<S: AsRef<str>>(
        &self,
        ids: &[S],
    ) -> Result<HashMap<String, ChapterRecord>, StorageError> {
        let wanted: Vec<&str> = {
            let index = self.read_index();
            let mut seen = HashSet::new();
            ids.iter()
                .map(AsRef::as_ref)
                .filter(|id| index.contains_key(*id) && seen.insert(*id))
                .collect()
        };

        let mut chapters = HashMap::with_capacity(wanted.len());
        for chunk in wanted.chunks(LOOKUP_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                r"SELECT id, source_id, priority, title, content, extra, need_refetch
                  FROM (
                      SELECT id, source_id, priority, title, content, extra, need_refetch,
                             ROW_NUMBER() OVER (
                                 PARTITION BY id ORDER BY priority ASC, source_id ASC
                             ) AS best
                      FROM chapters
                      WHERE id IN ({placeholders})
                  )
                  WHERE best = 1"
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            let rows = query
                .fetch_all(self.db.pool())
                .await
                .map_err(|e| StorageError::database(&self.path, &e))?;
            for row in &rows {
                let record = self.decode_row(row)?;
                chapters.insert(record.chapter.id.clone(), record);
            }
        }
        Ok(chapters)
    }

    /// Deletes every stored copy of every chapter.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the delete fails; the index is left
    /// untouched in that case.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        sqlx::query("DELETE FROM chapters")
            .execute(self.db.pool())
            .await
            .map_err(|e| StorageError::database(&self.path, &e))?;
        let removed = {
            let mut index = self.write_index();
            let removed = index.len();
            index.clear();
            removed
        };
        debug!(removed, "chapter store cleared");
        Ok(())
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<ChapterRecord, StorageError> {
        let db_err = |error: sqlx::Error| StorageError::database(&self.path, &error);
        let id: String = row.try_get("id").map_err(db_err)?;
        let extra_text: String = row.try_get("extra").map_err(db_err)?;
        let extra: ExtraMap =
            serde_json::from_str(&extra_text).map_err(|error| StorageError::CorruptRow {
                id: id.clone(),
                path: self.path.clone(),
                message: error.to_string(),
            })?;

        Ok(ChapterRecord {
            chapter: Chapter {
                title: row.try_get("title").map_err(db_err)?,
                content: row.try_get("content").map_err(db_err)?,
                extra,
                id,
            },
            source_id: row.try_get("source_id").map_err(db_err)?,
            priority: row.try_get("priority").map_err(db_err)?,
            need_refetch: row.try_get("need_refetch").map_err(db_err)?,
        })
    }

    /// Flushes and releases the database handle. Safe to call more than once.
    pub async fn close(&self) {
        let _gate = self.write_gate.lock().await;
        self.db.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn chapter(id: &str, content: &str) -> Chapter {
        Chapter::new(id, format!("Title {id}"), content)
    }

    #[tokio::test]
    async fn test_open_creates_file_and_empty_index() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("book").join("chapter.raw.sqlite");
        let store = ChapterStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert!(store.is_empty());
        assert_eq!(store.path(), path);
    }

    #[tokio::test]
    async fn test_unknown_ids_need_refetch() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        assert!(!store.exists("nope"));
        assert!(store.need_refetch("nope"));
    }

    #[tokio::test]
    async fn test_upsert_updates_index_and_get_returns_chapter() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        let stored = chapter("1", "hello").with_extra("images", serde_json::json!([1, 2]));
        store
            .upsert_one(&ChapterRecord::clean(stored.clone()))
            .await
            .unwrap();

        assert!(store.exists("1"));
        assert!(!store.need_refetch("1"));
        assert_eq!(store.get("1").await.unwrap(), Some(stored));
        assert_eq!(store.get("2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_replaces() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        store
            .upsert_one(&ChapterRecord::dirty(chapter("1", "partial")))
            .await
            .unwrap();
        assert!(store.need_refetch("1"));

        store
            .upsert_one(&ChapterRecord::clean(chapter("1", "full")))
            .await
            .unwrap();
        store
            .upsert_one(&ChapterRecord::clean(chapter("1", "full")))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(!store.need_refetch("1"));
        assert_eq!(store.get("1").await.unwrap().unwrap().content, "full");
    }

    #[tokio::test]
    async fn test_best_version_prefers_lowest_priority_regardless_of_order() {
        for reverse in [false, true] {
            let store = ChapterStore::open_in_memory().await.unwrap();
            let preferred =
                ChapterRecord::clean(chapter("1", "preferred")).with_source(2, 0);
            let fallback = ChapterRecord::dirty(chapter("1", "fallback")).with_source(1, 5);
            let batch = if reverse {
                vec![fallback, preferred]
            } else {
                vec![preferred, fallback]
            };
            store.upsert_many(&batch).await.unwrap();

            let best = store.get_record("1").await.unwrap().unwrap();
            assert_eq!(best.chapter.content, "preferred");
            assert_eq!(best.source_id, 2);
            assert!(!store.need_refetch("1"));
        }
    }

    #[tokio::test]
    async fn test_priority_tie_breaks_by_source_id() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        store
            .upsert_many(&[
                ChapterRecord::clean(chapter("1", "from three")).with_source(3, 1),
                ChapterRecord::clean(chapter("1", "from one")).with_source(1, 1),
            ])
            .await
            .unwrap();
        assert_eq!(store.get("1").await.unwrap().unwrap().content, "from one");
        let many = store.get_many(&["1"]).await.unwrap();
        assert_eq!(many["1"].content, "from one");
    }

    #[tokio::test]
    async fn test_get_many_returns_best_copies_and_skips_absent() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        store
            .upsert_many(&[
                ChapterRecord::clean(chapter("a", "a-low")).with_source(0, 0),
                ChapterRecord::clean(chapter("a", "a-high")).with_source(1, 9),
                ChapterRecord::clean(chapter("b", "b")),
            ])
            .await
            .unwrap();

        let found = store.get_many(&["a", "b", "missing", "a"]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"].content, "a-low");
        assert_eq!(found["b"].content, "b");
        assert!(!found.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_clean_and_dirty_id_snapshots() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        store
            .upsert_many(&[
                ChapterRecord::clean(chapter("clean", "")),
                ChapterRecord::dirty(chapter("dirty", "")),
                ChapterRecord::dirty(chapter("mixed", "")).with_source(1, 5),
                ChapterRecord::clean(chapter("mixed", "")).with_source(2, 0),
            ])
            .await
            .unwrap();

        assert_eq!(store.existing_ids().len(), 3);
        assert_eq!(
            store.clean_ids(),
            HashSet::from(["clean".to_string(), "mixed".to_string()])
        );
        assert_eq!(store.dirty_ids(), HashSet::from(["dirty".to_string()]));
    }

    #[tokio::test]
    async fn test_reopen_loads_index_from_disk() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("chapter.raw.sqlite");
        {
            let store = ChapterStore::open(&path).await.unwrap();
            store
                .upsert_many(&[
                    ChapterRecord::clean(chapter("1", "one")),
                    ChapterRecord::dirty(chapter("2", "two")),
                ])
                .await
                .unwrap();
            store.close().await;
        }

        let store = ChapterStore::open(&path).await.unwrap();
        assert!(store.exists("1"));
        assert!(!store.need_refetch("1"));
        assert!(store.exists("2"));
        assert!(store.need_refetch("2"));
    }

    #[tokio::test]
    async fn test_close_twice_and_write_after_close_fails() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        store.close().await;
        store.close().await;

        let result = store
            .upsert_one(&ChapterRecord::clean(chapter("1", "late")))
            .await;
        assert!(result.is_err());
        assert!(!store.exists("1"), "failed write must not reach the index");
    }

    #[tokio::test]
    async fn test_open_corrupt_file_fails() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("chapter.raw.sqlite");
        std::fs::write(&path, vec![0x42_u8; 4096]).unwrap();
        assert!(ChapterStore::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_empties_rows_and_index() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("chapter.cleaner.sqlite");
        let store = ChapterStore::open(&path).await.unwrap();
        store
            .upsert_many(&[
                ChapterRecord::clean(chapter("1", "one")),
                ChapterRecord::dirty(chapter("2", "two")).with_source(1, 3),
            ])
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get("1").await.unwrap(), None);
        store.close().await;

        let reopened = ChapterStore::open(&path).await.unwrap();
        assert!(reopened.is_empty());
    }

    #[tokio::test]
    async fn test_get_many_records_keeps_flag_of_best_copy() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        store
            .upsert_many(&[
                ChapterRecord::dirty(chapter("1", "preview")).with_source(1, 0),
                ChapterRecord::clean(chapter("1", "full")).with_source(2, 5),
            ])
            .await
            .unwrap();

        let records = store.get_many_records(&["1"]).await.unwrap();
        assert_eq!(records["1"].chapter.content, "preview");
        assert!(records["1"].need_refetch);
        assert!(!store.need_refetch("1"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = ChapterStore::open_in_memory().await.unwrap();
        store.upsert_many(&[]).await.unwrap();
        assert!(store.is_empty());
    }
}
