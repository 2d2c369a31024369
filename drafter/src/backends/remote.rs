//! HTTP-backed generation through hosted model APIs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use shared_types::{Document, DocumentSection, GenerationRequest};

use super::prompt::{self, ParsedReply};
use super::{map_http_status, map_reqwest_error, BackendError, GenerationBackend, GenerationSink};

/// One system+user prompt in, raw model text out.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    fn credential_configured(&self) -> bool;

    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError>;
}

fn api_key(env_var: &str) -> Option<String> {
    std::env::var(env_var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Configuration(format!("http client: {e}")))
}

async fn read_json(response: reqwest::Response) -> Result<Value, BackendError> {
    let status = response.status();
    let body = response.text().await.map_err(map_reqwest_error)?;
    if !status.is_success() {
        return Err(map_http_status(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|_| BackendError::InvalidResponse)
}

pub struct AnthropicTransport {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key_env: String,
    max_tokens: u32,
}

impl AnthropicTransport {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_env: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: api_key_env.into(),
            max_tokens,
        })
    }
}

#[async_trait]
impl CompletionTransport for AnthropicTransport {
    fn credential_configured(&self) -> bool {
        api_key(&self.api_key_env).is_some()
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
        let key = api_key(&self.api_key_env).ok_or(BackendError::NotConfigured)?;
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "system": system,
                "messages": [{"role": "user", "content": user}],
            }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let body = read_json(response).await?;
        let text = body["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(BackendError::InvalidResponse);
        }
        Ok(text)
    }
}

pub struct OpenAiTransport {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key_env: String,
}

impl OpenAiTransport {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_env: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: api_key_env.into(),
        })
    }
}

#[async_trait]
impl CompletionTransport for OpenAiTransport {
    fn credential_configured(&self) -> bool {
        api_key(&self.api_key_env).is_some()
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
        let key = api_key(&self.api_key_env).ok_or(BackendError::NotConfigured)?;
        let response = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "response_format": {"type": "json_object"},
            }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let body = read_json(response).await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .ok_or(BackendError::InvalidResponse)
    }
}

/// A backend that asks a hosted model for a structured draft, relaying any
/// clarifying questions through the sink before drafting.
pub struct RemoteBackend {
    name: String,
    priority: i32,
    capabilities: Vec<String>,
    max_clarification_rounds: usize,
    transport: Box<dyn CompletionTransport>,
}

impl RemoteBackend {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        capabilities: Vec<String>,
        transport: Box<dyn CompletionTransport>,
    ) -> Self {
        let max_clarification_rounds = if capabilities.iter().any(|c| c == "clarification") {
            2
        } else {
            0
        };
        Self {
            name: name.into(),
            priority,
            capabilities,
            max_clarification_rounds,
            transport,
        }
    }
}

#[async_trait]
impl GenerationBackend for RemoteBackend {
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
        self.transport.credential_configured()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &dyn GenerationSink,
    ) -> Result<Document, BackendError> {
        sink.progress(format!("Drafting with {}", self.name)).await;

        let mut answered: Vec<(String, String)> = Vec::new();
        let mut rounds = 0usize;
        loop {
            let questions_allowed = rounds < self.max_clarification_rounds;
            let user = prompt::build_user_prompt(request, &answered, questions_allowed);
            let raw = self.transport.complete(prompt::SYSTEM_PROMPT, &user).await?;

            match prompt::parse_reply(&raw)? {
                ParsedReply::Clarify(questions) if questions_allowed => {
                    rounds += 1;
                    tracing::info!(
                        backend = %self.name,
                        round = rounds,
                        questions = questions.len(),
                        "Backend requested clarification"
                    );
                    let answers = sink.clarify(questions.clone()).await?;
                    answered.extend(questions.into_iter().zip(answers));
                    sink.progress("Resuming draft with clarifications".to_string())
                        .await;
                }
                ParsedReply::Clarify(_) => {
                    tracing::warn!(backend = %self.name, "Backend kept asking after questions were disallowed");
                    return Err(BackendError::InvalidResponse);
                }
                ParsedReply::Draft { title, sections } => {
                    let mut document_sections = Vec::with_capacity(sections.len());
                    for (idx, (section_title, content)) in sections.into_iter().enumerate() {
                        let order = idx as u32 + 1;
                        sink.section(section_title.clone(), content.clone(), order)
                            .await?;
                        document_sections.push(DocumentSection::new(section_title, content, order));
                    }
                    return Ok(Document::new(
                        title.unwrap_or_else(|| request.title.clone()),
                        document_sections,
                        self.name.clone(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Priority;
    use std::sync::Mutex;

    struct ScriptedTransport {
        replies: Mutex<Vec<Result<String, BackendError>>>,
        prompts: std::sync::Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        fn credential_configured(&self) -> bool {
            true
        }

        async fn complete(&self, _system: &str, user: &str) -> Result<String, BackendError> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.replies.lock().unwrap().remove(0)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sections: Mutex<Vec<(String, u32)>>,
        questions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationSink for RecordingSink {
        async fn progress(&self, _message: String) {}

        async fn section(&self, title: String, _content: String, order: u32) -> Result<(), BackendError> {
            self.sections.lock().unwrap().push((title, order));
            Ok(())
        }

        async fn clarify(&self, questions: Vec<String>) -> Result<Vec<String>, BackendError> {
            self.questions.lock().unwrap().extend(questions.iter().cloned());
            Ok(questions.iter().map(|_| "iOS".to_string()).collect())
        }
    }

    fn backend(
        replies: Vec<Result<String, BackendError>>,
        capabilities: &[&str],
    ) -> (RemoteBackend, std::sync::Arc<Mutex<Vec<String>>>) {
        let prompts = std::sync::Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            replies: Mutex::new(replies),
            prompts: prompts.clone(),
        };
        (
            RemoteBackend::new(
                "scripted",
                10,
                capabilities.iter().map(|c| c.to_string()).collect(),
                Box::new(transport),
            ),
            prompts,
        )
    }

    #[tokio::test]
    async fn test_clarification_then_draft() {
        let (backend, prompts) = backend(
            vec![
                Ok(r#"{"clarifications": ["What is the target platform?"]}"#.to_string()),
                Ok(r#"{"title": "Checkout", "sections": [{"title": "Overview", "content": "a"}, {"title": "Scope", "content": "b"}]}"#.to_string()),
            ],
            &["clarification"],
        );
        let sink = RecordingSink::default();
        let request = GenerationRequest::new("Checkout flow", "Pay", Priority::Medium);

        let document = backend.generate(&request, &sink).await.unwrap();
        assert_eq!(document.section_titles(), vec!["Overview", "Scope"]);
        assert_eq!(document.backend, "scripted");
        assert_eq!(
            *sink.sections.lock().unwrap(),
            vec![("Overview".to_string(), 1), ("Scope".to_string(), 2)]
        );
        assert_eq!(
            *sink.questions.lock().unwrap(),
            vec!["What is the target platform?".to_string()]
        );
        assert!(prompts.lock().unwrap()[1].contains("A: iOS"));
    }

    #[tokio::test]
    async fn test_questions_without_capability_are_invalid() {
        let (backend, _) = backend(
            vec![Ok(r#"{"clarifications": ["Why?"]}"#.to_string())],
            &[],
        );
        let sink = RecordingSink::default();
        let request = GenerationRequest::new("T", "D", Priority::Low);
        assert_eq!(
            backend.generate(&request, &sink).await.unwrap_err(),
            BackendError::InvalidResponse
        );
        assert!(sink.questions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let (backend, _) = backend(vec![Err(BackendError::RateLimitExceeded)], &[]);
        let sink = RecordingSink::default();
        let request = GenerationRequest::new("T", "D", Priority::Low);
        assert_eq!(
            backend.generate(&request, &sink).await.unwrap_err(),
            BackendError::RateLimitExceeded
        );
    }

    #[test]
    fn test_probe_reflects_credential() {
        let transport = OpenAiTransport::new(
            "https://api.openai.com",
            "gpt-4o-mini",
            "DRAFTER_TEST_UNSET_OPENAI_KEY",
            Duration::from_secs(5),
        )
        .unwrap();
        let backend = RemoteBackend::new("openai", 50, Vec::new(), Box::new(transport));
        assert!(!backend.probe());
    }
}
