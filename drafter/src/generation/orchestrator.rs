//! Drives one generation attempt from request to finished document.

use std::sync::Arc;

use async_trait::async_trait;
use ractor::ActorRef;
use shared_types::{Document, DocumentSection, GenerationRequest};

use super::{InteractionHandler, SessionError};
use crate::actors::backend_coordinator::{resolve_backend, BackendHandle};
use crate::actors::{CoordinatorError, CoordinatorMsg};
use crate::backends::{BackendError, GenerationSink};
use crate::collaborators::CorpusLinks;
use crate::config::Config;
use crate::retrieval::ContextRetriever;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub max_results: usize,
    pub similarity_threshold: f32,
}

impl From<&Config> for GenerationSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_results: config.max_results,
            similarity_threshold: config.similarity_threshold,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    coordinator: ActorRef<CoordinatorMsg>,
    retriever: Arc<ContextRetriever>,
    corpus_links: Arc<dyn CorpusLinks>,
    settings: GenerationSettings,
}

impl Orchestrator {
    pub fn new(
        coordinator: ActorRef<CoordinatorMsg>,
        retriever: Arc<ContextRetriever>,
        corpus_links: Arc<dyn CorpusLinks>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            coordinator,
            retriever,
            corpus_links,
            settings,
        }
    }

    /// Enrich, pick a backend, generate, and reconcile the result with what
    /// was streamed. `prd_request_id` keys the corpus-link lookup.
    pub async fn run(
        &self,
        request: GenerationRequest,
        prd_request_id: Option<&str>,
        handler: Arc<dyn InteractionHandler>,
    ) -> Result<Document, SessionError> {
        if request.title.trim().is_empty() || request.description.trim().is_empty() {
            return Err(SessionError::Validation(
                "title and description are required".to_string(),
            ));
        }

        let request = self.enrich(request, prd_request_id, handler.as_ref()).await;
        let backend = self.resolve(request.preferred_backend.clone()).await?;
        tracing::info!(
            backend = %backend.name(),
            title = %request.title,
            enriched = request.enrichment.is_some(),
            "Starting generation"
        );
        handler
            .on_progress(format!("Generating with {}", backend.name()))
            .await;

        let sink = SessionSink::new(handler.clone());
        let document = backend
            .backend()
            .generate(&request, &sink)
            .await
            .map_err(|e| {
                tracing::warn!(backend = %backend.name(), error = %e, "Generation failed");
                SessionError::from(e)
            })?;

        reconcile(document, sink.into_sections(), handler.as_ref()).await
    }

    async fn enrich(
        &self,
        request: GenerationRequest,
        prd_request_id: Option<&str>,
        handler: &dyn InteractionHandler,
    ) -> GenerationRequest {
        if request.enrichment.is_some() {
            return request;
        }
        let Some(request_id) = prd_request_id else {
            return request;
        };

        let corpus_id = match self.corpus_links.linked_corpus(request_id).await {
            Ok(Some(corpus_id)) => corpus_id,
            Ok(None) => {
                tracing::debug!(request_id, "No corpus linked; generating without context");
                return request;
            }
            Err(e) => {
                tracing::warn!(request_id, error = %e, "Corpus link lookup failed");
                return request;
            }
        };

        handler
            .on_progress("Retrieving repository context".to_string())
            .await;
        match self
            .retriever
            .retrieve(
                &corpus_id,
                &request.description,
                &request.title,
                self.settings.max_results,
                self.settings.similarity_threshold,
            )
            .await
        {
            Ok(context) => {
                handler
                    .on_progress(format!(
                        "Attached {} code references from {}",
                        context.code_references.len(),
                        context.repository_name
                    ))
                    .await;
                request.with_enrichment(context)
            }
            Err(e) => {
                tracing::warn!(corpus_id = %corpus_id, error = %e, "Retrieval failed; generating without context");
                request
            }
        }
    }

    async fn resolve(&self, preferred: Option<String>) -> Result<BackendHandle, SessionError> {
        let resolved = resolve_backend(&self.coordinator, preferred)
            .await
            .map_err(|e| SessionError::ProcessingFailed(format!("backend coordinator: {e:?}")))?;
        resolved.map_err(|e| match e {
            CoordinatorError::UnknownBackend(_) | CoordinatorError::Unavailable(_) => {
                SessionError::Validation(e.to_string())
            }
            CoordinatorError::NoneAvailable => SessionError::ProcessingFailed(e.to_string()),
        })
    }
}

/// Make the returned document agree with the sections the client saw.
async fn reconcile(
    mut document: Document,
    streamed: Vec<DocumentSection>,
    handler: &dyn InteractionHandler,
) -> Result<Document, SessionError> {
    if streamed.is_empty() {
        let mut sections = Vec::with_capacity(document.sections.len());
        for (idx, section) in std::mem::take(&mut document.sections).into_iter().enumerate() {
            let section = DocumentSection::new(section.title, section.content, idx as u32 + 1);
            handler.on_section(section.clone()).await?;
            sections.push(section);
        }
        document.sections = sections;
        return Ok(document);
    }

    let agrees = document.sections.len() == streamed.len()
        && document
            .sections
            .iter()
            .zip(&streamed)
            .all(|(returned, seen)| returned.title == seen.title && returned.order == seen.order);
    if !agrees {
        tracing::warn!(
            returned = document.sections.len(),
            streamed = streamed.len(),
            "Returned document differs from streamed sections; rebuilding"
        );
    }
    document.sections = streamed;
    Ok(document)
}

/// Sink handed to the backend: enforces ordering and answer arity before
/// anything reaches the handler.
struct SessionSink {
    handler: Arc<dyn InteractionHandler>,
    /// Held across the order check, the relay and the push so concurrent
    /// `section` calls cannot interleave.
    streamed: tokio::sync::Mutex<Vec<DocumentSection>>,
}

impl SessionSink {
    fn new(handler: Arc<dyn InteractionHandler>) -> Self {
        Self {
            handler,
            streamed: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    fn into_sections(self) -> Vec<DocumentSection> {
        self.streamed.into_inner()
    }
}

#[async_trait]
impl GenerationSink for SessionSink {
    async fn progress(&self, message: String) {
        self.handler.on_progress(message).await;
    }

    async fn section(&self, title: String, content: String, order: u32) -> Result<(), BackendError> {
        let mut streamed = self.streamed.lock().await;
        if let Some(last) = streamed.last().map(|s| s.order) {
            if order <= last {
                tracing::warn!(order, last, "Backend emitted a section out of order");
                return Err(BackendError::InvalidResponse);
            }
        }
        let section = DocumentSection::new(title, content, order);
        self.handler.on_section(section.clone()).await?;
        streamed.push(section);
        Ok(())
    }

    async fn clarify(&self, questions: Vec<String>) -> Result<Vec<String>, BackendError> {
        if questions.is_empty() {
            return Ok(Vec::new());
        }
        let expected = questions.len();
        let mut answers = self.handler.on_clarify(questions).await?;
        if answers.len() != expected {
            tracing::warn!(
                expected,
                received = answers.len(),
                "Clarification answer count mismatch; padding or truncating"
            );
            answers.resize(expected, String::new());
        }
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{BackendCoordinatorActor, BackendCoordinatorArguments};
    use crate::backends::GenerationBackend;
    use crate::collaborators::{CorpusInfo, InMemoryCorpus, InMemoryCorpusLinks};
    use crate::generation::SilentHandler;
    use crate::retrieval::chunk_index::ChunkIndex;
    use crate::retrieval::embedding::HashingEmbedder;
    use ractor::Actor;
    use shared_types::{Priority, RetrievalMode};
    use std::sync::Mutex;

    /// Streams `streamed`, optionally asks `questions`, then returns a
    /// document holding `returned`.
    struct ScriptedBackend {
        name: &'static str,
        questions: Vec<String>,
        streamed: Vec<(&'static str, u32)>,
        returned: Vec<&'static str>,
        seen: Mutex<Vec<GenerationRequest>>,
        answers: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(streamed: Vec<(&'static str, u32)>, returned: Vec<&'static str>) -> Self {
            Self {
                name: "scripted",
                questions: Vec::new(),
                streamed,
                returned,
                seen: Mutex::new(Vec::new()),
                answers: Mutex::new(Vec::new()),
            }
        }

        fn asking(mut self, questions: &[&str]) -> Self {
            self.questions = questions.iter().map(|q| q.to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            10
        }

        fn probe(&self) -> bool {
            true
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
            sink: &dyn GenerationSink,
        ) -> Result<Document, BackendError> {
            self.seen.lock().unwrap().push(request.clone());
            if !self.questions.is_empty() {
                let answers = sink.clarify(self.questions.clone()).await?;
                self.answers.lock().unwrap().extend(answers);
            }
            for (title, order) in &self.streamed {
                sink.section(title.to_string(), format!("{title} body"), *order)
                    .await?;
            }
            let sections = self
                .returned
                .iter()
                .enumerate()
                .map(|(idx, title)| DocumentSection::new(*title, format!("{title} body"), idx as u32 + 1))
                .collect();
            Ok(Document::new(request.title.clone(), sections, self.name))
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        links: Arc<InMemoryCorpusLinks>,
        corpus: Arc<InMemoryCorpus>,
    }

    async fn fixture(backend: Arc<dyn GenerationBackend>) -> Fixture {
        let (coordinator, _handle) = Actor::spawn(
            None,
            BackendCoordinatorActor,
            BackendCoordinatorArguments::new(vec![backend]),
        )
        .await
        .unwrap();
        let corpus = Arc::new(InMemoryCorpus::new());
        let links = Arc::new(InMemoryCorpusLinks::new());
        let retriever = Arc::new(ContextRetriever::new(
            corpus.clone(),
            corpus.clone(),
            ChunkIndex::in_memory().unwrap(),
            Arc::new(HashingEmbedder::default()),
        ));
        Fixture {
            orchestrator: Orchestrator::new(
                coordinator,
                retriever,
                links.clone(),
                GenerationSettings {
                    max_results: 10,
                    similarity_threshold: 0.5,
                },
            ),
            links,
            corpus,
        }
    }

    fn checkout() -> GenerationRequest {
        GenerationRequest::new("Checkout flow", "Let users pay for their cart", Priority::High)
    }

    #[tokio::test]
    async fn test_streamed_sections_match_result() {
        let backend = Arc::new(ScriptedBackend::new(
            vec![("Overview", 1), ("Goals", 2), ("Scope", 3)],
            vec!["Overview", "Goals", "Scope"],
        ));
        let fx = fixture(backend).await;
        let handler = Arc::new(SilentHandler::new());

        let document = fx
            .orchestrator
            .run(checkout(), None, handler.clone())
            .await
            .unwrap();
        let streamed: Vec<String> = handler.sections().iter().map(|s| s.title.clone()).collect();
        assert_eq!(streamed, vec!["Overview", "Goals", "Scope"]);
        assert_eq!(document.section_titles(), vec!["Overview", "Goals", "Scope"]);
        assert_eq!(document.backend, "scripted");
    }

    #[tokio::test]
    async fn test_unstreamed_document_is_streamed_before_completion() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new(), vec!["Overview", "Risks"]));
        let fx = fixture(backend).await;
        let handler = Arc::new(SilentHandler::new());

        let document = fx.orchestrator.run(checkout(), None, handler.clone()).await.unwrap();
        let orders: Vec<u32> = handler.sections().iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(document.sections, handler.sections());
    }

    #[tokio::test]
    async fn test_divergent_document_rebuilt_from_stream() {
        let backend = Arc::new(ScriptedBackend::new(
            vec![("Overview", 1), ("Goals", 3)],
            vec!["Something else"],
        ));
        let fx = fixture(backend).await;
        let handler = Arc::new(SilentHandler::new());

        let document = fx.orchestrator.run(checkout(), None, handler.clone()).await.unwrap();
        assert_eq!(document.section_titles(), vec!["Overview", "Goals"]);
        assert_eq!(document.sections[1].order, 3);
    }

    #[tokio::test]
    async fn test_out_of_order_section_fails_attempt() {
        let backend = Arc::new(ScriptedBackend::new(
            vec![("Overview", 2), ("Goals", 2)],
            vec![],
        ));
        let fx = fixture(backend).await;
        let handler = Arc::new(SilentHandler::new());

        let err = fx.orchestrator.run(checkout(), None, handler.clone()).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::ProcessingFailed("invalid response from backend".to_string())
        );
        assert_eq!(handler.sections().len(), 1);
    }

    struct ShortAnswers;

    #[async_trait]
    impl InteractionHandler for ShortAnswers {
        async fn on_progress(&self, _message: String) {}

        async fn on_section(&self, _section: DocumentSection) -> Result<(), BackendError> {
            Ok(())
        }

        async fn on_clarify(&self, _questions: Vec<String>) -> Result<Vec<String>, BackendError> {
            Ok(vec!["iOS".to_string()])
        }
    }

    #[tokio::test]
    async fn test_short_answers_are_padded() {
        let backend = Arc::new(
            ScriptedBackend::new(vec![("Overview", 1)], vec!["Overview"])
                .asking(&["What is the target platform?", "Who uses it?"]),
        );
        let fx = fixture(backend.clone()).await;

        fx.orchestrator
            .run(checkout(), None, Arc::new(ShortAnswers))
            .await
            .unwrap();
        assert_eq!(
            *backend.answers.lock().unwrap(),
            vec!["iOS".to_string(), String::new()]
        );
    }

    /// Yields before recording so concurrent relays get a chance to overlap.
    #[derive(Default)]
    struct YieldingHandler {
        inner: SilentHandler,
    }

    #[async_trait]
    impl InteractionHandler for YieldingHandler {
        async fn on_progress(&self, message: String) {
            self.inner.on_progress(message).await;
        }

        async fn on_section(&self, section: DocumentSection) -> Result<(), BackendError> {
            tokio::task::yield_now().await;
            self.inner.on_section(section).await
        }

        async fn on_clarify(&self, questions: Vec<String>) -> Result<Vec<String>, BackendError> {
            self.inner.on_clarify(questions).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_sections_with_same_order_relay_once() {
        let handler = Arc::new(YieldingHandler::default());
        let sink = SessionSink::new(handler.clone());

        let (first, second) = tokio::join!(
            sink.section("Overview".to_string(), "a".to_string(), 1),
            sink.section("Summary".to_string(), "b".to_string(), 1),
        );
        assert!(first.is_ok() != second.is_ok());
        assert_eq!(handler.inner.sections().len(), 1);
        assert_eq!(sink.into_sections().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_override_is_validation_error() {
        let backend = Arc::new(ScriptedBackend::new(vec![("Overview", 1)], vec!["Overview"]));
        let fx = fixture(backend).await;
        let request = checkout().with_preferred_backend(Some("missing".to_string()));

        let err = fx
            .orchestrator
            .run(request, None, Arc::new(SilentHandler::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[tokio::test]
    async fn test_blank_request_rejected() {
        let backend = Arc::new(ScriptedBackend::new(vec![], vec!["Overview"]));
        let fx = fixture(backend).await;
        let request = GenerationRequest::new("  ", "desc", Priority::Low);
        let err = fx
            .orchestrator
            .run(request, None, Arc::new(SilentHandler::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[tokio::test]
    async fn test_linked_corpus_enriches_request() {
        let backend = Arc::new(ScriptedBackend::new(vec![("Overview", 1)], vec!["Overview"]));
        let fx = fixture(backend.clone()).await;
        fx.corpus.add_corpus(CorpusInfo {
            id: "shop".to_string(),
            full_name: "acme/shop".to_string(),
            description: None,
        });
        fx.corpus.add_file("shop", "Cargo.toml", "[package]\nname = \"shop\"");
        fx.corpus.add_file("shop", "src/checkout.rs", "pub fn pay() {}");
        fx.links.link("req-1", "shop");

        fx.orchestrator
            .run(checkout(), Some("req-1"), Arc::new(SilentHandler::new()))
            .await
            .unwrap();

        let seen = backend.seen.lock().unwrap();
        let enrichment = seen[0].enrichment.as_ref().unwrap();
        assert_eq!(enrichment.retrieval_mode, RetrievalMode::Fallback);
        assert_eq!(enrichment.summary, "Code repository acme/shop");
        let paths: Vec<&str> = enrichment.code_references.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["Cargo.toml", "src/checkout.rs"]);
    }

    #[tokio::test]
    async fn test_retrieval_failure_does_not_block_generation() {
        let backend = Arc::new(ScriptedBackend::new(vec![("Overview", 1)], vec!["Overview"]));
        let fx = fixture(backend.clone()).await;
        // Linked to a corpus that does not exist: listing fails.
        fx.links.link("req-1", "ghost");

        let document = fx
            .orchestrator
            .run(checkout(), Some("req-1"), Arc::new(SilentHandler::new()))
            .await
            .unwrap();
        assert_eq!(document.section_titles(), vec!["Overview"]);
        assert!(backend.seen.lock().unwrap()[0].enrichment.is_none());
    }
}
