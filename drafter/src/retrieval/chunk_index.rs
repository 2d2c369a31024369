//! ChunkIndex: per-corpus store of embedded code chunks.
//!
//! | Table          | Unit                                           |
//! |----------------|------------------------------------------------|
//! | `corpus_index` | Index status and chunk count for one corpus    |
//! | `code_chunks`  | One embedded chunk (file, symbol, kind, lines) |
//!
//! Dedup: chunks are keyed by `(corpus_id, chunk_hash)` where the hash is the
//! SHA-256 hex of path + content. Re-indexing an unchanged chunk is a no-op.
//!
//! Similarity is computed in process over every chunk of the corpus.

use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};

use super::chunker::ChunkKind;
use super::embedding::{cosine_similarity, decode_embedding, encode_embedding};
use super::RetrievalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Missing,
    Indexing,
    Completed,
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Indexing => "indexing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "indexing" => Self::Indexing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Missing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub file_path: String,
    pub symbol_name: Option<String>,
    pub kind: ChunkKind,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub chunk_id: String,
    pub file_path: String,
    pub symbol_name: Option<String>,
    pub kind: ChunkKind,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    /// Cosine similarity in [0, 1]
    pub similarity: f32,
}

/// Thin wrapper around a rusqlite Connection.
///
/// All methods are synchronous; async callers go through `spawn_blocking`.
pub struct ChunkStore {
    conn: rusqlite::Connection,
}

impl ChunkStore {
    /// Open (or create) the store at the given SQLite path.
    /// Use `":memory:"` for in-process stores.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = if path == ":memory:" {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS corpus_index (
                corpus_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS code_chunks (
                rowid INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id TEXT NOT NULL UNIQUE,
                corpus_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                symbol_name TEXT,
                chunk_kind TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content TEXT NOT NULL,
                chunk_hash TEXT NOT NULL,
                embedding BLOB NOT NULL,
                UNIQUE(corpus_id, chunk_hash)
            );
            CREATE INDEX IF NOT EXISTS idx_code_chunks_corpus ON code_chunks(corpus_id);
            "#,
        )?;

        Ok(ChunkStore { conn })
    }

    pub fn status(&self, corpus_id: &str) -> Result<IndexStatus, rusqlite::Error> {
        match self.conn.query_row(
            "SELECT status FROM corpus_index WHERE corpus_id = ?",
            rusqlite::params![corpus_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(status) => Ok(IndexStatus::parse(&status)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(IndexStatus::Missing),
            Err(e) => Err(e),
        }
    }

    pub fn set_status(&self, corpus_id: &str, status: IndexStatus) -> Result<(), rusqlite::Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM code_chunks WHERE corpus_id = ?",
            rusqlite::params![corpus_id],
            |row| row.get(0),
        )?;
        self.conn.execute(
            r#"
            INSERT INTO corpus_index(corpus_id, status, chunk_count, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(corpus_id) DO UPDATE SET
                status = excluded.status,
                chunk_count = excluded.chunk_count,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![
                corpus_id,
                status.as_str(),
                count,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Insert a chunk; returns `false` when an identical chunk already exists.
    pub fn insert(&self, corpus_id: &str, chunk: &NewChunk) -> Result<bool, rusqlite::Error> {
        let hash = chunk_hash(&chunk.file_path, &chunk.content);
        let changed = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO code_chunks(
                chunk_id, corpus_id, file_path, symbol_name, chunk_kind,
                start_line, end_line, content, chunk_hash, embedding
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                ulid::Ulid::new().to_string(),
                corpus_id,
                chunk.file_path,
                chunk.symbol_name,
                chunk.kind.as_str(),
                chunk.start_line as i64,
                chunk.end_line as i64,
                chunk.content,
                hash,
                encode_embedding(&chunk.embedding),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Drop every chunk of a corpus and forget its status.
    pub fn clear(&self, corpus_id: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM code_chunks WHERE corpus_id = ?",
            rusqlite::params![corpus_id],
        )?;
        self.conn.execute(
            "DELETE FROM corpus_index WHERE corpus_id = ?",
            rusqlite::params![corpus_id],
        )?;
        Ok(())
    }

    /// Score every chunk of `corpus_id` against `query`.
    ///
    /// Keeps matches with similarity ≥ `threshold`, sorted descending
    /// (ties broken by insertion order), truncated to `max_results`.
    pub fn search(
        &self,
        corpus_id: &str,
        query: &[f32],
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<SimilarityMatch>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT rowid, chunk_id, file_path, symbol_name, chunk_kind,
                   start_line, end_line, content, embedding
            FROM code_chunks
            WHERE corpus_id = ?
            "#,
        )?;
        let rows = stmt.query_map(rusqlite::params![corpus_id], |row| {
            let embedding: Vec<u8> = row.get(8)?;
            let kind: String = row.get(4)?;
            Ok((
                row.get::<_, i64>(0)?,
                SimilarityMatch {
                    chunk_id: row.get(1)?,
                    file_path: row.get(2)?,
                    symbol_name: row.get(3)?,
                    kind: ChunkKind::parse(&kind),
                    start_line: row.get::<_, i64>(5)? as usize,
                    end_line: row.get::<_, i64>(6)? as usize,
                    content: row.get(7)?,
                    similarity: cosine_similarity(query, &decode_embedding(&embedding)),
                },
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (rowid, hit) = row?;
            if hit.similarity >= threshold {
                hits.push((rowid, hit));
            }
        }
        hits.sort_by(|a, b| {
            b.1.similarity
                .partial_cmp(&a.1.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(max_results);
        Ok(hits.into_iter().map(|(_, hit)| hit).collect())
    }
}

/// Compute a hex SHA-256 hash for dedup keying.
pub fn chunk_hash(path: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Shareable async handle over a [`ChunkStore`].
#[derive(Clone)]
pub struct ChunkIndex {
    store: Arc<Mutex<ChunkStore>>,
}

impl ChunkIndex {
    pub fn open(path: &str) -> Result<Self, RetrievalError> {
        let store = ChunkStore::open(path).map_err(|e| RetrievalError::Index(e.to_string()))?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
        })
    }

    pub fn in_memory() -> Result<Self, RetrievalError> {
        Self::open(":memory:")
    }

    async fn with_store<T, F>(&self, op: F) -> Result<T, RetrievalError>
    where
        T: Send + 'static,
        F: FnOnce(&ChunkStore) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let guard = store.lock().unwrap_or_else(PoisonError::into_inner);
            op(&guard)
        })
        .await
        .map_err(|e| RetrievalError::Index(format!("spawn_blocking panicked: {e}")))?
        .map_err(|e| RetrievalError::Index(e.to_string()))
    }

    pub async fn status(&self, corpus_id: &str) -> Result<IndexStatus, RetrievalError> {
        let corpus_id = corpus_id.to_string();
        self.with_store(move |store| store.status(&corpus_id)).await
    }

    pub async fn set_status(
        &self,
        corpus_id: &str,
        status: IndexStatus,
    ) -> Result<(), RetrievalError> {
        let corpus_id = corpus_id.to_string();
        self.with_store(move |store| store.set_status(&corpus_id, status))
            .await
    }

    /// Replace the corpus's chunks with `chunks`; returns how many were stored.
    pub async fn replace_chunks(
        &self,
        corpus_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<usize, RetrievalError> {
        let corpus_id = corpus_id.to_string();
        self.with_store(move |store| {
            store.clear(&corpus_id)?;
            store.set_status(&corpus_id, IndexStatus::Indexing)?;
            let mut inserted = 0usize;
            for chunk in &chunks {
                if store.insert(&corpus_id, chunk)? {
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
        .await
    }

    pub async fn search(
        &self,
        corpus_id: &str,
        query: Vec<f32>,
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<SimilarityMatch>, RetrievalError> {
        let corpus_id = corpus_id.to_string();
        self.with_store(move |store| store.search(&corpus_id, &query, threshold, max_results))
            .await
    }
}
