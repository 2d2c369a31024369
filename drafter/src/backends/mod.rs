//! Generation backends.
//!
//! A backend turns a [`GenerationRequest`] into a [`Document`], reporting
//! progress and sections through a [`GenerationSink`] as it goes and asking
//! clarifying questions through the same sink when it needs them.

pub mod catalog;
mod prompt;
mod remote;
mod template;

use std::time::Duration;

use async_trait::async_trait;
use shared_types::{Document, GenerationRequest};

pub use catalog::{build_backends, BackendCatalog, BackendCatalogEntry, BackendCatalogError};
pub use remote::{AnthropicTransport, CompletionTransport, OpenAiTransport, RemoteBackend};
pub use template::TemplateBackend;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend is not configured")]
    NotConfigured,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("invalid response from backend")]
    InvalidResponse,
    #[error("server error ({code}): {detail}")]
    Server { code: u16, detail: String },
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("request timed out")]
    Timeout,
    #[error("generation cancelled")]
    Cancelled,
}

/// Callbacks a backend drives while generating.
///
/// `section` orders must be strictly increasing within one generation;
/// `clarify` returns exactly one answer per question.
#[async_trait]
pub trait GenerationSink: Send + Sync {
    async fn progress(&self, message: String);

    async fn section(&self, title: String, content: String, order: u32) -> Result<(), BackendError>;

    async fn clarify(&self, questions: Vec<String>) -> Result<Vec<String>, BackendError>;
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Higher is preferred.
    fn priority(&self) -> i32;

    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Cheap liveness check, e.g. "is a credential configured". Never a
    /// network round trip.
    fn probe(&self) -> bool;

    async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &dyn GenerationSink,
    ) -> Result<Document, BackendError>;
}

pub(crate) fn map_http_status(status: u16, body: &str) -> BackendError {
    let detail: String = body.chars().take(300).collect();
    match status {
        401 | 403 => BackendError::InvalidCredential,
        408 => BackendError::Timeout,
        429 => BackendError::RateLimitExceeded,
        _ => BackendError::Server {
            code: status,
            detail,
        },
    }
}

pub(crate) fn map_reqwest_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout
    } else if error.is_decode() {
        BackendError::InvalidResponse
    } else {
        BackendError::Network(error.to_string())
    }
}

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(map_http_status(401, ""), BackendError::InvalidCredential);
        assert_eq!(map_http_status(429, "slow down"), BackendError::RateLimitExceeded);
        assert_eq!(
            map_http_status(503, "overloaded"),
            BackendError::Server {
                code: 503,
                detail: "overloaded".to_string()
            }
        );
    }

    #[test]
    fn test_error_messages_carry_detail() {
        assert_eq!(
            BackendError::Network("connection reset".to_string()).to_string(),
            "network error: connection reset"
        );
        assert_eq!(
            BackendError::UnsupportedFeature("streaming".to_string()).to_string(),
            "unsupported feature: streaming"
        );
    }
}
