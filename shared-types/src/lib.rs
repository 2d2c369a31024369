//! Shared types between the generation server and its clients
//!
//! These types are used by both:
//! - The `drafter` server (session gateway, orchestrator, retriever)
//! - WebSocket clients (native Rust tests, generated TypeScript bindings)
//!
//! Serializable with serde for JSON over WebSocket/HTTP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Generation Requests
// ============================================================================

/// Priority attached to a generation request
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "drafter.ts")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A request to generate one document.
///
/// Immutable once built: enrichment and clarification answers produce a new
/// request instead of mutating this one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "drafter.ts")]
pub struct GenerationRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_answers: Option<Vec<String>>,
}

impl GenerationRequest {
    pub fn new(title: impl Into<String>, description: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority,
            preferred_backend: None,
            enrichment: None,
            clarification_answers: None,
        }
    }

    pub fn with_preferred_backend(self, backend: Option<String>) -> Self {
        Self {
            preferred_backend: backend,
            ..self
        }
    }

    /// Attach a complete enrichment context, replacing any previous one.
    pub fn with_enrichment(self, enrichment: EnrichmentContext) -> Self {
        Self {
            enrichment: Some(enrichment),
            ..self
        }
    }

    pub fn with_clarification_answers(self, answers: Vec<String>) -> Self {
        Self {
            clarification_answers: Some(answers),
            ..self
        }
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// How the enrichment context was assembled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "drafter.ts")]
pub enum RetrievalMode {
    /// Embedding similarity over a completed index
    Semantic,
    /// Deterministic manifest/source file selection
    Fallback,
}

/// One piece of code attached to a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "drafter.ts")]
pub struct CodeReference {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Retrieved supporting material for a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "drafter.ts")]
pub struct EnrichmentContext {
    pub repository_id: String,
    pub repository_name: String,
    pub summary: String,
    pub code_references: Vec<CodeReference>,
    pub tech_stack: Vec<String>,
    pub retrieval_mode: RetrievalMode,
    /// Mean similarity of the kept matches (semantic mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_similarity: Option<f32>,
}

// ============================================================================
// Documents
// ============================================================================

/// Derive a URL-safe identifier from a section title.
///
/// Lowercases ASCII alphanumerics and collapses every other run of
/// characters into a single `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

/// One ordered section of a generated document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "drafter.ts")]
pub struct DocumentSection {
    /// Slug derived from the title
    pub id: String,
    pub title: String,
    pub content: String,
    pub order: u32,
}

impl DocumentSection {
    pub fn new(title: impl Into<String>, content: impl Into<String>, order: u32) -> Self {
        let title = title.into();
        Self {
            id: slugify(&title),
            title,
            content: content.into(),
            order,
        }
    }
}

/// A completed document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "drafter.ts")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub sections: Vec<DocumentSection>,
    /// Name of the backend that produced the document
    pub backend: String,
    pub generated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        title: impl Into<String>,
        sections: Vec<DocumentSection>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            sections,
            backend: backend.into(),
            generated_at: Utc::now(),
        }
    }

    pub fn section_titles(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.title.as_str()).collect()
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Public view of one generation backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "drafter.ts")]
pub struct BackendDescriptor {
    pub name: String,
    /// Higher is preferred
    pub priority: i32,
    /// Result of a fresh availability probe
    pub available: bool,
    pub capabilities: Vec<String>,
    pub is_current: bool,
}

// ============================================================================
// WebSocket Protocol
// ============================================================================

/// Client → Server envelope
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "drafter.ts")]
pub enum ClientMessage {
    /// Start a generation attempt, either from a full request or the
    /// `title`/`description` shorthand
    StartGeneration {
        #[serde(rename = "prdRequestId", default)]
        prd_request_id: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(rename = "preferredBackend", default)]
        preferred_backend: Option<String>,
        #[serde(rename = "generateCommand", default)]
        generate_command: Option<GenerationRequest>,
    },

    /// Answers to the outstanding clarification round
    ClarificationAnswers { answers: Vec<String> },

    Ping,
}

/// Server → Client envelope
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "drafter.ts")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    Progress { message: String },

    Section { section: DocumentSection },

    ClarificationNeeded { questions: Vec<String> },

    GenerationComplete { result: Document },

    Error { message: String },

    Pong,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Progress { .. } => "progress",
            Self::Section { .. } => "section",
            Self::ClarificationNeeded { .. } => "clarification_needed",
            Self::GenerationComplete { .. } => "generation_complete",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn progress(message: impl Into<String>) -> Self {
        Self::Progress {
            message: message.into(),
        }
    }
}
