//! Best-effort recovery of a request id the client got wrong.
//!
//! Clients sometimes start a generation with an id minted before the request
//! was persisted. When that id is unknown, a recently created pending or
//! processing request with a matching title is taken instead.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::collaborators::{PersistedRequest, RequestStatus, RequestStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestIdentity {
    /// No id supplied
    Anonymous,
    /// The supplied id exists
    Known(String),
    /// The supplied id was unknown; a recent request matched by title
    Correlated { requested: String, resolved: String },
    /// The supplied id was unknown and nothing matched
    Unresolved(String),
}

impl RequestIdentity {
    /// Id to key corpus links and logs with, if any.
    pub fn effective_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Known(id) | Self::Unresolved(id) => Some(id),
            Self::Correlated { resolved, .. } => Some(resolved),
        }
    }
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Pick the best title match among `candidates` created within `window` of
/// `now`. Exact beats normalized beats substring; newest wins within a tier.
pub fn correlate_by_title<'a>(
    title: &str,
    candidates: &'a [PersistedRequest],
    now: DateTime<Utc>,
    window: Duration,
) -> Option<&'a PersistedRequest> {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    let cutoff = now - window;
    let mut recent: Vec<&PersistedRequest> = candidates
        .iter()
        .filter(|r| matches!(r.status, RequestStatus::Pending | RequestStatus::Processing))
        .filter(|r| r.created_at >= cutoff)
        .collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let wanted = normalize_title(title);
    if wanted.is_empty() {
        return None;
    }

    recent
        .iter()
        .find(|r| r.title == title)
        .or_else(|| recent.iter().find(|r| normalize_title(&r.title) == wanted))
        .or_else(|| {
            recent.iter().find(|r| {
                let candidate = normalize_title(&r.title);
                !candidate.is_empty() && (candidate.contains(&wanted) || wanted.contains(&candidate))
            })
        })
        .copied()
}

/// Resolve the id a client supplied. Never fails: store errors degrade to
/// treating the id as-is.
pub async fn resolve_request_identity(
    store: &dyn RequestStore,
    prd_request_id: Option<&str>,
    title: &str,
    window: Duration,
) -> RequestIdentity {
    let Some(requested) = prd_request_id.filter(|id| !id.trim().is_empty()) else {
        return RequestIdentity::Anonymous;
    };

    match store.exists(requested).await {
        Ok(true) => return RequestIdentity::Known(requested.to_string()),
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(request_id = %requested, error = %e, "Request lookup failed");
            return RequestIdentity::Unresolved(requested.to_string());
        }
    }

    let mut candidates = Vec::new();
    for status in [RequestStatus::Pending, RequestStatus::Processing] {
        match store.list_by_status(status).await {
            Ok(found) => candidates.extend(found),
            Err(e) => tracing::warn!(error = %e, "Listing recent requests failed"),
        }
    }

    match correlate_by_title(title, &candidates, Utc::now(), window) {
        Some(found) => {
            tracing::info!(
                requested = %requested,
                resolved = %found.id,
                "Correlated unknown request id by title"
            );
            RequestIdentity::Correlated {
                requested: requested.to_string(),
                resolved: found.id.clone(),
            }
        }
        None => {
            tracing::info!(request_id = %requested, "Unknown request id and no recent title match");
            RequestIdentity::Unresolved(requested.to_string())
        }
    }
}
