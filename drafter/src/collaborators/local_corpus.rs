//! Filesystem-backed corpora: every subdirectory of the root is one corpus.
//!
//! An optional `corpus.toml` at the corpus root supplies `full_name` and
//! `description`; without it the directory name is used as the full name.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use walkdir::WalkDir;

use super::{CollaboratorError, CorpusCatalog, CorpusFiles, CorpusInfo};

const CORPUS_MANIFEST: &str = "corpus.toml";
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".build", "dist", "build"];

#[derive(Debug, Default, Deserialize)]
struct CorpusManifest {
    full_name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocalCorpusStore {
    root: PathBuf,
}

impl LocalCorpusStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn corpus_dir(&self, corpus_id: &str) -> Result<PathBuf, CollaboratorError> {
        let relative = safe_relative(corpus_id)?;
        if relative.components().count() != 1 {
            return Err(CollaboratorError::InvalidPath(corpus_id.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Reject absolute paths and parent traversal.
fn safe_relative(path: &str) -> Result<&Path, CollaboratorError> {
    let candidate = Path::new(path);
    let ok = !path.trim().is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(candidate)
    } else {
        Err(CollaboratorError::InvalidPath(path.to_string()))
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

#[async_trait]
impl CorpusCatalog for LocalCorpusStore {
    async fn describe(&self, corpus_id: &str) -> Result<Option<CorpusInfo>, CollaboratorError> {
        let dir = self.corpus_dir(corpus_id)?;
        if !tokio::fs::try_exists(&dir)
            .await
            .map_err(|e| CollaboratorError::Io(e.to_string()))?
        {
            return Ok(None);
        }

        let manifest = match tokio::fs::read_to_string(dir.join(CORPUS_MANIFEST)).await {
            Ok(raw) => toml::from_str::<CorpusManifest>(&raw).unwrap_or_else(|e| {
                tracing::warn!(corpus_id, error = %e, "Ignoring unparsable corpus manifest");
                CorpusManifest::default()
            }),
            Err(_) => CorpusManifest::default(),
        };

        Ok(Some(CorpusInfo {
            id: corpus_id.to_string(),
            full_name: manifest.full_name.unwrap_or_else(|| corpus_id.to_string()),
            description: manifest.description.filter(|d| !d.trim().is_empty()),
        }))
    }
}

#[async_trait]
impl CorpusFiles for LocalCorpusStore {
    async fn list_files(&self, corpus_id: &str) -> Result<Vec<String>, CollaboratorError> {
        let dir = self.corpus_dir(corpus_id)?;
        let corpus_id = corpus_id.to_string();

        tokio::task::spawn_blocking(move || {
            if !dir.is_dir() {
                return Err(CollaboratorError::NotFound(format!("corpus {corpus_id}")));
            }
            let mut files = Vec::new();
            let walker = WalkDir::new(&dir)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_skipped_dir(e));
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(corpus_id = %corpus_id, error = %e, "Skipping unreadable corpus entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&dir) else {
                    continue;
                };
                let path = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if path != CORPUS_MANIFEST {
                    files.push(path);
                }
            }
            Ok(files)
        })
        .await
        .map_err(|e| CollaboratorError::Io(format!("spawn_blocking panicked: {e}")))?
    }

    async fn fetch_content(
        &self,
        corpus_id: &str,
        path: &str,
    ) -> Result<String, CollaboratorError> {
        let dir = self.corpus_dir(corpus_id)?;
        let relative = safe_relative(path)?;
        match tokio::fs::read(dir.join(relative)).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CollaboratorError::NotFound(format!("{corpus_id}:{path}")))
            }
            Err(e) => Err(CollaboratorError::Io(e.to_string())),
        }
    }
}
