//! Context retrieval for generation requests.
//!
//! Two paths produce the same [`EnrichmentContext`]:
//! 1) Semantic: the corpus has a completed chunk index, so the query is
//!    embedded and scored against every chunk.
//! 2) Fallback: no usable index, so manifests and source files are picked by
//!    a fixed heuristic and excerpted.

pub mod chunk_index;
pub mod chunker;
pub mod embedding;
pub mod fallback;

use std::sync::Arc;

use serde::Serialize;
use shared_types::{CodeReference, EnrichmentContext, RetrievalMode};

use crate::collaborators::{CollaboratorError, CorpusCatalog, CorpusFiles, CorpusInfo};
use chunk_index::{ChunkIndex, IndexStatus, NewChunk, SimilarityMatch};
use embedding::Embedder;

pub const DEFAULT_MAX_RESULTS: usize = 10;
const MAX_INDEXED_FILE_BYTES: usize = 256 * 1024;

#[derive(Debug, thiserror::Error, Clone)]
pub enum RetrievalError {
    #[error("index error: {0}")]
    Index(String),
    #[error("corpus error: {0}")]
    Corpus(#[from] CollaboratorError),
}

/// Result of a similarity search, before it is shaped into references.
#[derive(Debug, Clone, Default)]
pub struct SimilaritySearch {
    pub matches: Vec<SimilarityMatch>,
    /// Mean similarity of `matches`; `None` when nothing passed the threshold
    pub average_similarity: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub corpus_id: String,
    pub files_indexed: usize,
    pub chunks_stored: usize,
}

pub struct ContextRetriever {
    catalog: Arc<dyn CorpusCatalog>,
    files: Arc<dyn CorpusFiles>,
    index: ChunkIndex,
    embedder: Arc<dyn Embedder>,
}

impl ContextRetriever {
    pub fn new(
        catalog: Arc<dyn CorpusCatalog>,
        files: Arc<dyn CorpusFiles>,
        index: ChunkIndex,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            catalog,
            files,
            index,
            embedder,
        }
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    /// Build enrichment for one request. Never cached: every call reads the
    /// index status and corpus afresh.
    pub async fn retrieve(
        &self,
        corpus_id: &str,
        query_text: &str,
        title_text: &str,
        max_results: usize,
        similarity_threshold: f32,
    ) -> Result<EnrichmentContext, RetrievalError> {
        let info = self
            .catalog
            .describe(corpus_id)
            .await?
            .unwrap_or_else(|| CorpusInfo {
                id: corpus_id.to_string(),
                full_name: corpus_id.to_string(),
                description: None,
            });
        let summary = summarize(&info);

        let status = self.index.status(corpus_id).await?;
        let (code_references, retrieval_mode, average_similarity, listing) =
            if status == IndexStatus::Completed {
                let search = self
                    .search_similar(
                        corpus_id,
                        query_text,
                        title_text,
                        max_results,
                        similarity_threshold,
                    )
                    .await?;
                let listing = match self.files.list_files(corpus_id).await {
                    Ok(listing) => listing,
                    Err(e) => {
                        tracing::warn!(corpus_id, error = %e, "Corpus listing unavailable; tech stack left empty");
                        Vec::new()
                    }
                };
                tracing::info!(
                    corpus_id,
                    matches = search.matches.len(),
                    average_similarity = ?search.average_similarity,
                    "Semantic retrieval complete"
                );
                (
                    search.matches.iter().map(reference_from_match).collect(),
                    RetrievalMode::Semantic,
                    search.average_similarity,
                    listing,
                )
            } else {
                tracing::info!(
                    corpus_id,
                    index_status = status.as_str(),
                    "No completed index; using fallback file selection"
                );
                let listing = self.files.list_files(corpus_id).await?;
                let references = self.fallback_references(corpus_id, &listing).await;
                (references, RetrievalMode::Fallback, None, listing)
            };

        Ok(EnrichmentContext {
            repository_id: info.id,
            repository_name: info.full_name,
            summary,
            code_references,
            tech_stack: fallback::detect_tech_stack(&listing),
            retrieval_mode,
            average_similarity,
        })
    }

    /// Embed `query_text` and `title_text` as one query and score the corpus.
    pub async fn search_similar(
        &self,
        corpus_id: &str,
        query_text: &str,
        title_text: &str,
        max_results: usize,
        similarity_threshold: f32,
    ) -> Result<SimilaritySearch, RetrievalError> {
        let query = format!("{} {}", query_text.trim(), title_text.trim());
        let embedding = self.embedder.embed(query.trim());
        let matches = self
            .index
            .search(corpus_id, embedding, similarity_threshold, max_results)
            .await?;
        let average_similarity = if matches.is_empty() {
            None
        } else {
            Some(matches.iter().map(|m| m.similarity).sum::<f32>() / matches.len() as f32)
        };
        Ok(SimilaritySearch {
            matches,
            average_similarity,
        })
    }

    async fn fallback_references(&self, corpus_id: &str, listing: &[String]) -> Vec<CodeReference> {
        let mut references = Vec::new();
        for path in fallback::select_files(listing) {
            match self.files.fetch_content(corpus_id, &path).await {
                Ok(content) => references.push(CodeReference {
                    path,
                    language: None,
                    excerpt: fallback::excerpt(&content),
                    relevance_note: None,
                    purpose: None,
                }),
                Err(e) => {
                    tracing::warn!(corpus_id, path = %path, error = %e, "Skipping unreadable fallback file");
                }
            }
        }
        references
    }

    /// Chunk, embed and store every source file of a corpus, replacing any
    /// previous index. The corpus is marked `completed` only on success.
    pub async fn index_corpus(&self, corpus_id: &str) -> Result<IndexReport, RetrievalError> {
        let result = self.build_index(corpus_id).await;
        let final_status = if result.is_ok() {
            IndexStatus::Completed
        } else {
            IndexStatus::Failed
        };
        if let Err(e) = self.index.set_status(corpus_id, final_status).await {
            tracing::error!(corpus_id, error = %e, "Failed to record index status");
            return Err(e);
        }
        match &result {
            Ok(report) => tracing::info!(
                corpus_id,
                files = report.files_indexed,
                chunks = report.chunks_stored,
                "Corpus indexed"
            ),
            Err(e) => tracing::warn!(corpus_id, error = %e, "Corpus indexing failed"),
        }
        result
    }

    async fn build_index(&self, corpus_id: &str) -> Result<IndexReport, RetrievalError> {
        self.index.set_status(corpus_id, IndexStatus::Indexing).await?;
        let listing = self.files.list_files(corpus_id).await?;

        let mut sources = Vec::new();
        for path in listing
            .into_iter()
            .filter(|p| fallback::is_source_file(p) || is_markdown(p))
        {
            match self.files.fetch_content(corpus_id, &path).await {
                Ok(content) if content.len() <= MAX_INDEXED_FILE_BYTES => {
                    sources.push((path, content))
                }
                Ok(_) => tracing::debug!(corpus_id, path = %path, "Skipping oversized file"),
                Err(e) => {
                    tracing::warn!(corpus_id, path = %path, error = %e, "Skipping unreadable file")
                }
            }
        }
        let files_indexed = sources.len();

        let embedder = Arc::clone(&self.embedder);
        let chunks = tokio::task::spawn_blocking(move || {
            let mut chunks = Vec::new();
            for (path, content) in sources {
                for chunk in chunker::chunk_source(&content) {
                    let embedding = embedder.embed(&format!("{path}\n{}", chunk.content));
                    chunks.push(NewChunk {
                        file_path: path.clone(),
                        symbol_name: chunk.symbol_name,
                        kind: chunk.kind,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        content: chunk.content,
                        embedding,
                    });
                }
            }
            chunks
        })
        .await
        .map_err(|e| RetrievalError::Index(format!("spawn_blocking panicked: {e}")))?;

        let chunks_stored = self.index.replace_chunks(corpus_id, chunks).await?;
        Ok(IndexReport {
            corpus_id: corpus_id.to_string(),
            files_indexed,
            chunks_stored,
        })
    }
}

fn is_markdown(path: &str) -> bool {
    matches!(fallback::extension(path).as_deref(), Some("md" | "markdown"))
}

fn summarize(info: &CorpusInfo) -> String {
    match info.description.as_deref() {
        Some(description) => format!("Repository: {}. {}", info.full_name, description),
        None => format!("Code repository {}", info.full_name),
    }
}

fn reference_from_match(hit: &SimilarityMatch) -> CodeReference {
    let note = match hit.symbol_name.as_deref() {
        Some(symbol) => format!("{} {} (similarity: {:.2})", hit.kind, symbol, hit.similarity),
        None => format!("{} (similarity: {:.2})", hit.kind, hit.similarity),
    };
    CodeReference {
        path: hit.file_path.clone(),
        language: fallback::extension(&hit.file_path)
            .as_deref()
            .and_then(fallback::language_for_extension)
            .map(str::to_string),
        excerpt: fallback::excerpt(&hit.content),
        relevance_note: Some(note),
        purpose: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryCorpus;
    use embedding::HashingEmbedder;

    fn retriever_over(corpus: Arc<InMemoryCorpus>) -> ContextRetriever {
        ContextRetriever::new(
            corpus.clone(),
            corpus,
            ChunkIndex::in_memory().unwrap(),
            Arc::new(HashingEmbedder::default()),
        )
    }

    fn shop_corpus() -> Arc<InMemoryCorpus> {
        let corpus = Arc::new(InMemoryCorpus::new());
        corpus.add_corpus(CorpusInfo {
            id: "shop".to_string(),
            full_name: "acme/shop".to_string(),
            description: Some("Storefront and checkout".to_string()),
        });
        corpus.add_file("shop", "README.md", "# Shop\nA storefront.");
        corpus.add_file(
            "shop",
            "src/checkout.rs",
            "pub fn process_checkout_payment(cart: Cart) -> Receipt {\n    charge(cart)\n}\n",
        );
        corpus.add_file(
            "shop",
            "src/avatar.rs",
            "pub fn render_avatar_thumbnail(image: Image) {\n    resize(image)\n}\n",
        );
        corpus.add_file("shop", "Cargo.toml", "[package]\nname = \"shop\"\n");
        corpus
    }

    #[tokio::test]
    async fn test_fallback_when_not_indexed() {
        let retriever = retriever_over(shop_corpus());
        let context = retriever
            .retrieve("shop", "Checkout payment", "Checkout flow", 10, 0.3)
            .await
            .unwrap();

        assert_eq!(context.retrieval_mode, RetrievalMode::Fallback);
        assert_eq!(context.repository_name, "acme/shop");
        assert_eq!(context.summary, "Repository: acme/shop. Storefront and checkout");
        let paths: Vec<&str> = context.code_references.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "Cargo.toml", "src/checkout.rs", "src/avatar.rs"]);
        assert!(context.code_references.iter().all(|r| r.language.is_none()));
        assert!(context.average_similarity.is_none());
        assert!(context.tech_stack.contains(&"Rust".to_string()));
    }

    #[tokio::test]
    async fn test_semantic_after_indexing() {
        let retriever = retriever_over(shop_corpus());
        let report = retriever.index_corpus("shop").await.unwrap();
        assert_eq!(report.files_indexed, 3);
        assert_eq!(
            retriever.index().status("shop").await.unwrap(),
            IndexStatus::Completed
        );

        let context = retriever
            .retrieve("shop", "process checkout payment", "Checkout", 10, 0.2)
            .await
            .unwrap();
        assert_eq!(context.retrieval_mode, RetrievalMode::Semantic);
        let top = &context.code_references[0];
        assert_eq!(top.path, "src/checkout.rs");
        assert_eq!(top.language.as_deref(), Some("Rust"));
        let note = top.relevance_note.as_deref().unwrap();
        assert!(note.starts_with("function process_checkout_payment (similarity: 0."), "{note}");
        assert!(context.average_similarity.is_some());
    }

    #[tokio::test]
    async fn test_semantic_matches_respect_threshold_and_limit() {
        let retriever = retriever_over(shop_corpus());
        retriever.index_corpus("shop").await.unwrap();

        for (threshold, limit) in [(0.0, 1usize), (0.0, 10), (0.1, 2), (0.9, 10)] {
            let search = retriever
                .search_similar("shop", "checkout payment cart", "", limit, threshold)
                .await
                .unwrap();
            assert!(search.matches.len() <= limit);
            assert!(search.matches.iter().all(|m| m.similarity >= threshold));
            assert!(search
                .matches
                .windows(2)
                .all(|w| w[0].similarity >= w[1].similarity));
            match search.average_similarity {
                Some(avg) => assert!(avg >= threshold),
                None => assert!(search.matches.is_empty()),
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_corpus_uses_id_as_name() {
        let corpus = Arc::new(InMemoryCorpus::new());
        corpus.add_file("loose", "main.go", "package main");
        let retriever = retriever_over(corpus);
        let context = retriever.retrieve("loose", "q", "t", 10, 0.5).await.unwrap();
        assert_eq!(context.summary, "Code repository loose");
        assert_eq!(context.code_references.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_corpus_is_an_error() {
        let retriever = retriever_over(Arc::new(InMemoryCorpus::new()));
        let err = retriever.retrieve("nope", "q", "t", 10, 0.5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Corpus(CollaboratorError::NotFound(_))));
    }
}
