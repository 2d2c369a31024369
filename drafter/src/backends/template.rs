//! Offline outline generator.
//!
//! Produces a fixed-shape document from the request alone, so a session can
//! always complete even when no hosted backend is configured.

use async_trait::async_trait;
use shared_types::{Document, DocumentSection, GenerationRequest};

use super::{BackendError, GenerationBackend, GenerationSink};

const CLARIFYING_QUESTIONS: &[&str] = &[
    "Who is the primary user of this feature?",
    "What is the target platform?",
];

pub struct TemplateBackend {
    name: String,
    priority: i32,
    capabilities: Vec<String>,
    ask_clarification: bool,
}

impl TemplateBackend {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            capabilities: Vec::new(),
            ask_clarification: false,
        }
    }

    pub fn with_clarification(mut self, enabled: bool) -> Self {
        self.ask_clarification = enabled;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn outline(&self, request: &GenerationRequest, answered: &[(String, String)]) -> Vec<(String, String)> {
        let mut sections = Vec::with_capacity(5);

        sections.push((
            "Overview".to_string(),
            format!(
                "{}\n\nPriority: {}",
                request.description.trim(),
                request.priority.as_str()
            ),
        ));

        let goals: Vec<String> = request
            .description
            .split(['.', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("- {s}"))
            .collect();
        sections.push((
            "Goals".to_string(),
            if goals.is_empty() {
                format!("- Deliver {}", request.title)
            } else {
                goals.join("\n")
            },
        ));

        let mut stories = vec![format!(
            "- As a user, I want {} so that the described outcome is met.",
            request.title.to_lowercase()
        )];
        for (question, answer) in answered {
            if !answer.trim().is_empty() {
                stories.push(format!("- {question} {answer}"));
            }
        }
        sections.push(("User Stories".to_string(), stories.join("\n")));

        let technical = match &request.enrichment {
            Some(enrichment) => {
                let mut lines = vec![enrichment.summary.clone()];
                if !enrichment.tech_stack.is_empty() {
                    lines.push(format!("Tech stack: {}", enrichment.tech_stack.join(", ")));
                }
                for reference in &enrichment.code_references {
                    match &reference.relevance_note {
                        Some(note) => lines.push(format!("- `{}` ({note})", reference.path)),
                        None => lines.push(format!("- `{}`", reference.path)),
                    }
                }
                lines.join("\n")
            }
            None => "No repository context was attached.".to_string(),
        };
        sections.push(("Technical Considerations".to_string(), technical));

        let mut open = Vec::new();
        if let Some(prior) = &request.clarification_answers {
            open.extend(prior.iter().filter(|a| !a.trim().is_empty()).map(|a| format!("- Answered: {a}")));
        }
        for (question, answer) in answered {
            if answer.trim().is_empty() {
                open.push(format!("- {question}"));
            }
        }
        sections.push((
            "Open Questions".to_string(),
            if open.is_empty() {
                "None recorded.".to_string()
            } else {
                open.join("\n")
            },
        ));

        sections
    }
}

#[async_trait]
impl GenerationBackend for TemplateBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn probe(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &dyn GenerationSink,
    ) -> Result<Document, BackendError> {
        sink.progress(format!("Outlining \"{}\"", request.title)).await;

        let mut answered = Vec::new();
        if self.ask_clarification && request.clarification_answers.is_none() {
            let questions: Vec<String> = CLARIFYING_QUESTIONS.iter().map(|q| q.to_string()).collect();
            let answers = sink.clarify(questions.clone()).await?;
            answered.extend(questions.into_iter().zip(answers));
        }

        let mut sections = Vec::new();
        for (idx, (title, content)) in self.outline(request, &answered).into_iter().enumerate() {
            let order = idx as u32 + 1;
            sink.section(title.clone(), content.clone(), order).await?;
            sections.push(DocumentSection::new(title, content, order));
        }

        Ok(Document::new(request.title.clone(), sections, self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Priority;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        sections: Mutex<Vec<(String, String, u32)>>,
        asked: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl GenerationSink for Collect {
        async fn progress(&self, _message: String) {}

        async fn section(&self, title: String, content: String, order: u32) -> Result<(), BackendError> {
            self.sections.lock().unwrap().push((title, content, order));
            Ok(())
        }

        async fn clarify(&self, questions: Vec<String>) -> Result<Vec<String>, BackendError> {
            self.asked.lock().unwrap().push(questions);
            Ok(vec!["Shoppers".to_string(), "iOS".to_string()])
        }
    }

    #[tokio::test]
    async fn test_outline_streams_five_sections_in_order() {
        let backend = TemplateBackend::new("template", 0);
        let sink = Collect::default();
        let request = GenerationRequest::new(
            "Checkout flow",
            "Let users pay with saved cards. Support refunds.",
            Priority::High,
        );

        let document = backend.generate(&request, &sink).await.unwrap();
        assert_eq!(
            document.section_titles(),
            vec!["Overview", "Goals", "User Stories", "Technical Considerations", "Open Questions"]
        );
        let streamed = sink.sections.lock().unwrap();
        let orders: Vec<u32> = streamed.iter().map(|s| s.2).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5]);
        assert_eq!(streamed[1].1, "- Let users pay with saved cards\n- Support refunds");
        assert!(sink.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clarifying_template_asks_once() {
        let backend = TemplateBackend::new("template", 0).with_clarification(true);
        let sink = Collect::default();
        let request = GenerationRequest::new("Checkout flow", "Pay", Priority::Medium);

        let document = backend.generate(&request, &sink).await.unwrap();
        assert_eq!(sink.asked.lock().unwrap().len(), 1);
        let stories = &document.sections[2].content;
        assert!(stories.contains("What is the target platform? iOS"));
    }

    #[tokio::test]
    async fn test_prior_answers_skip_the_round() {
        let backend = TemplateBackend::new("template", 0).with_clarification(true);
        let sink = Collect::default();
        let request = GenerationRequest::new("Checkout flow", "Pay", Priority::Medium)
            .with_clarification_answers(vec!["iOS".to_string()]);

        let document = backend.generate(&request, &sink).await.unwrap();
        assert!(sink.asked.lock().unwrap().is_empty());
        assert_eq!(document.sections[4].content, "- Answered: iOS");
    }
}
