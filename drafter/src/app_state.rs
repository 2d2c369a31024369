use std::sync::Arc;

use anyhow::Context;
use ractor::{Actor, ActorRef};

use crate::actors::{BackendCoordinatorActor, BackendCoordinatorArguments, CoordinatorMsg};
use crate::backends::{build_backends, BackendCatalog, GenerationBackend};
use crate::collaborators::{
    CorpusCatalog, CorpusFiles, InMemoryCorpusLinks, InMemoryRequestStore, LocalCorpusStore,
};
use crate::config::Config;
use crate::generation::{GenerationSettings, Orchestrator};
use crate::retrieval::chunk_index::ChunkIndex;
use crate::retrieval::embedding::{Embedder, HashingEmbedder};
use crate::retrieval::ContextRetriever;

/// Everything the server needs, injectable for tests.
pub struct AppStateParts {
    pub config: Config,
    pub backends: Vec<Arc<dyn GenerationBackend>>,
    pub default_backend: Option<String>,
    pub requests: Arc<InMemoryRequestStore>,
    pub corpus_links: Arc<InMemoryCorpusLinks>,
    pub corpus_catalog: Arc<dyn CorpusCatalog>,
    pub corpus_files: Arc<dyn CorpusFiles>,
    pub index: ChunkIndex,
    pub embedder: Arc<dyn Embedder>,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    coordinator: ActorRef<CoordinatorMsg>,
    orchestrator: Orchestrator,
    retriever: Arc<ContextRetriever>,
    requests: Arc<InMemoryRequestStore>,
    corpus_links: Arc<InMemoryCorpusLinks>,
}

impl AppState {
    /// Build production state: backend catalog, on-disk corpora and the
    /// configured chunk index.
    pub async fn bootstrap(config: Config) -> anyhow::Result<Self> {
        let catalog = BackendCatalog::load(config.backend_catalog_path.as_deref())
            .context("loading backend catalog")?;
        let backends = build_backends(&catalog).context("building backends")?;
        let corpora = Arc::new(LocalCorpusStore::new(config.corpus_root.clone()));
        let index = ChunkIndex::open(&config.index_db_path)
            .with_context(|| format!("opening chunk index at {}", config.index_db_path))?;

        tracing::info!(
            backends = backends.len(),
            corpus_root = %config.corpus_root.display(),
            index_db = %config.index_db_path,
            "Bootstrapping application state"
        );

        Self::from_parts(AppStateParts {
            config,
            backends,
            default_backend: catalog.default_backend,
            requests: Arc::new(InMemoryRequestStore::new()),
            corpus_links: Arc::new(InMemoryCorpusLinks::new()),
            corpus_catalog: corpora.clone(),
            corpus_files: corpora,
            index,
            embedder: Arc::new(HashingEmbedder::default()),
        })
        .await
    }

    pub async fn from_parts(parts: AppStateParts) -> anyhow::Result<Self> {
        let (coordinator, _handle) = Actor::spawn(
            Some(format!("backend_coordinator:{}", ulid::Ulid::new())),
            BackendCoordinatorActor,
            BackendCoordinatorArguments::new(parts.backends).with_default(parts.default_backend),
        )
        .await
        .map_err(|e| anyhow::anyhow!("spawning backend coordinator: {e}"))?;

        let retriever = Arc::new(ContextRetriever::new(
            parts.corpus_catalog,
            parts.corpus_files,
            parts.index,
            parts.embedder,
        ));
        let orchestrator = Orchestrator::new(
            coordinator.clone(),
            retriever.clone(),
            parts.corpus_links.clone(),
            GenerationSettings::from(&parts.config),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config: parts.config,
                coordinator,
                orchestrator,
                retriever,
                requests: parts.requests,
                corpus_links: parts.corpus_links,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn coordinator(&self) -> ActorRef<CoordinatorMsg> {
        self.inner.coordinator.clone()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.inner.orchestrator.clone()
    }

    pub fn retriever(&self) -> Arc<ContextRetriever> {
        self.inner.retriever.clone()
    }

    pub fn requests(&self) -> Arc<InMemoryRequestStore> {
        self.inner.requests.clone()
    }

    pub fn corpus_links(&self) -> Arc<InMemoryCorpusLinks> {
        self.inner.corpus_links.clone()
    }
}
