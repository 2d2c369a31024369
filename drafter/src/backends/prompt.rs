//! Prompt assembly and reply parsing shared by the remote backends.

use serde::Deserialize;
use shared_types::GenerationRequest;

use super::BackendError;

pub(crate) const SYSTEM_PROMPT: &str = r#"You write product requirements documents.
Reply with a single JSON object and nothing else.
If the request is too ambiguous to draft well and questions are allowed, reply:
{"clarifications": ["question", ...]}
Otherwise reply:
{"title": "document title", "sections": [{"title": "Section title", "content": "markdown body"}, ...]}
Sections appear in reading order. Use the repository context when it is present."#;

pub(crate) fn build_user_prompt(
    request: &GenerationRequest,
    answered: &[(String, String)],
    questions_allowed: bool,
) -> String {
    let mut prompt = format!(
        "Title: {}\nPriority: {}\n\nDescription:\n{}\n",
        request.title,
        request.priority.as_str(),
        request.description
    );

    if let Some(enrichment) = &request.enrichment {
        prompt.push_str(&format!(
            "\nRepository context ({}):\n{}\n",
            enrichment.repository_name, enrichment.summary
        ));
        if !enrichment.tech_stack.is_empty() {
            prompt.push_str(&format!("Tech stack: {}\n", enrichment.tech_stack.join(", ")));
        }
        for reference in &enrichment.code_references {
            prompt.push_str(&format!("\n--- {}", reference.path));
            if let Some(note) = &reference.relevance_note {
                prompt.push_str(&format!(" [{note}]"));
            }
            prompt.push_str(&format!("\n{}\n", reference.excerpt));
        }
    }

    if let Some(prior) = &request.clarification_answers {
        if !prior.is_empty() {
            prompt.push_str("\nPreviously supplied answers:\n");
            for answer in prior {
                prompt.push_str(&format!("- {answer}\n"));
            }
        }
    }

    if !answered.is_empty() {
        prompt.push_str("\nClarifications:\n");
        for (question, answer) in answered {
            prompt.push_str(&format!("Q: {question}\nA: {answer}\n"));
        }
    }

    if !questions_allowed {
        prompt.push_str("\nDo not ask further questions. Draft the document now.\n");
    }
    prompt
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    clarifications: Vec<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParsedReply {
    Clarify(Vec<String>),
    Draft {
        title: Option<String>,
        sections: Vec<(String, String)>,
    },
}

/// Parse a model reply, tolerating code fences and prose around the JSON.
pub(crate) fn parse_reply(raw: &str) -> Result<ParsedReply, BackendError> {
    let start = raw.find('{').ok_or(BackendError::InvalidResponse)?;
    let end = raw.rfind('}').ok_or(BackendError::InvalidResponse)?;
    if end < start {
        return Err(BackendError::InvalidResponse);
    }
    let reply: RawReply = serde_json::from_str(&raw[start..=end]).map_err(|e| {
        tracing::warn!(error = %e, "Backend reply was not the expected JSON shape");
        BackendError::InvalidResponse
    })?;

    let questions: Vec<String> = reply
        .clarifications
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if !questions.is_empty() && reply.sections.is_empty() {
        return Ok(ParsedReply::Clarify(questions));
    }

    let sections: Vec<(String, String)> = reply
        .sections
        .into_iter()
        .filter(|s| !s.title.trim().is_empty())
        .map(|s| (s.title.trim().to_string(), s.content))
        .collect();
    if sections.is_empty() {
        return Err(BackendError::InvalidResponse);
    }
    Ok(ParsedReply::Draft {
        title: reply.title.filter(|t| !t.trim().is_empty()),
        sections,
    })
}
