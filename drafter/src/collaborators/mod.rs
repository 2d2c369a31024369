//! Interfaces to the systems around a generation session.
//!
//! Persisted requests, corpus links and corpus file access live outside this
//! service. Sessions reach them only through these traits; the in-memory
//! implementations back tests and single-process deployments.

mod local_corpus;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use local_corpus::LocalCorpusStore;

pub type CorpusId = String;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A request record owned by the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRequest {
    pub id: String,
    pub title: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

/// Identity of an indexed or indexable code corpus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorpusInfo {
    pub id: CorpusId,
    /// Fully qualified name, e.g. `acme/storefront`
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn exists(&self, request_id: &str) -> Result<bool, CollaboratorError>;

    async fn list_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<PersistedRequest>, CollaboratorError>;
}

#[async_trait]
pub trait CorpusLinks: Send + Sync {
    async fn linked_corpus(&self, request_id: &str) -> Result<Option<CorpusId>, CollaboratorError>;
}

#[async_trait]
pub trait CorpusCatalog: Send + Sync {
    async fn describe(&self, corpus_id: &str) -> Result<Option<CorpusInfo>, CollaboratorError>;
}

#[async_trait]
pub trait CorpusFiles: Send + Sync {
    /// Corpus-relative paths with `/` separators, in a stable listing order.
    async fn list_files(&self, corpus_id: &str) -> Result<Vec<String>, CollaboratorError>;

    async fn fetch_content(&self, corpus_id: &str, path: &str)
        -> Result<String, CollaboratorError>;
}

// ─── In-memory implementations ──────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<String, PersistedRequest>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: PersistedRequest) {
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.id.clone(), request);
    }

    /// Register a new pending request and return it.
    pub fn create(&self, title: impl Into<String>) -> PersistedRequest {
        let request = PersistedRequest {
            id: ulid::Ulid::new().to_string(),
            title: title.into(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        };
        self.insert(request.clone());
        request
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn exists(&self, request_id: &str) -> Result<bool, CollaboratorError> {
        Ok(self
            .requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(request_id))
    }

    async fn list_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<PersistedRequest>, CollaboratorError> {
        let mut matches: Vec<PersistedRequest> = self
            .requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCorpusLinks {
    links: RwLock<HashMap<String, CorpusId>>,
}

impl InMemoryCorpusLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, request_id: impl Into<String>, corpus_id: impl Into<CorpusId>) {
        self.links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.into(), corpus_id.into());
    }
}

#[async_trait]
impl CorpusLinks for InMemoryCorpusLinks {
    async fn linked_corpus(&self, request_id: &str) -> Result<Option<CorpusId>, CollaboratorError> {
        Ok(self
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request_id)
            .cloned())
    }
}

#[derive(Debug, Default)]
struct InMemoryCorpusEntry {
    info: Option<CorpusInfo>,
    files: Vec<(String, String)>,
}

/// Catalog and file access over corpora held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    corpora: RwLock<HashMap<CorpusId, InMemoryCorpusEntry>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_corpus(&self, info: CorpusInfo) {
        let id = info.id.clone();
        let mut guard = self.corpora.write().unwrap_or_else(PoisonError::into_inner);
        guard.entry(id).or_default().info = Some(info);
    }

    /// Append a file; listing order is insertion order.
    pub fn add_file(&self, corpus_id: &str, path: impl Into<String>, content: impl Into<String>) {
        let mut guard = self.corpora.write().unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(corpus_id.to_string())
            .or_default()
            .files
            .push((path.into(), content.into()));
    }
}

#[async_trait]
impl CorpusCatalog for InMemoryCorpus {
    async fn describe(&self, corpus_id: &str) -> Result<Option<CorpusInfo>, CollaboratorError> {
        Ok(self
            .corpora
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(corpus_id)
            .and_then(|entry| entry.info.clone()))
    }
}

#[async_trait]
impl CorpusFiles for InMemoryCorpus {
    async fn list_files(&self, corpus_id: &str) -> Result<Vec<String>, CollaboratorError> {
        self.corpora
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(corpus_id)
            .map(|entry| entry.files.iter().map(|(path, _)| path.clone()).collect())
            .ok_or_else(|| CollaboratorError::NotFound(format!("corpus {corpus_id}")))
    }

    async fn fetch_content(
        &self,
        corpus_id: &str,
        path: &str,
    ) -> Result<String, CollaboratorError> {
        self.corpora
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(corpus_id)
            .and_then(|entry| {
                entry
                    .files
                    .iter()
                    .find(|(p, _)| p == path)
                    .map(|(_, content)| content.clone())
            })
            .ok_or_else(|| CollaboratorError::NotFound(format!("{corpus_id}:{path}")))
    }
}
