use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    AnthropicTransport, BackendError, GenerationBackend, OpenAiTransport, RemoteBackend,
    TemplateBackend, DEFAULT_REQUEST_TIMEOUT,
};

pub const BUILTIN_BACKEND_CATALOG_TOML: &str = include_str!("../../config/backends.toml");

const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MAX_TOKENS: u32 = 8192;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BackendCatalogError {
    #[error("failed to read backend catalog {path}: {detail}")]
    Io { path: String, detail: String },
    #[error("failed to parse backend catalog: {0}")]
    Parse(String),
    #[error("backend catalog is empty")]
    Empty,
    #[error("duplicate backend name: {0}")]
    DuplicateName(String),
    #[error("backend {name}: unknown kind {kind}")]
    UnknownKind { name: String, kind: String },
    #[error("backend {name}: missing field {field}")]
    MissingField { name: String, field: &'static str },
    #[error("default backend {0} is not in the catalog")]
    UnknownDefault(String),
    #[error("backend {name}: {source}")]
    Backend {
        name: String,
        #[source]
        source: BackendError,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendCatalog {
    pub default_backend: Option<String>,
    #[serde(default)]
    pub backends: Vec<BackendCatalogEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendCatalogEntry {
    pub name: String,
    /// `anthropic`, `openai` or `template`
    pub kind: String,
    #[serde(default)]
    pub priority: i32,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    /// Template backend only: ask a clarification round before outlining.
    pub clarify: Option<bool>,
}

impl BackendCatalog {
    pub fn builtin() -> Result<Self, BackendCatalogError> {
        Self::from_toml_str(BUILTIN_BACKEND_CATALOG_TOML)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, BackendCatalogError> {
        let catalog: Self =
            toml::from_str(raw).map_err(|e| BackendCatalogError::Parse(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load from `path`, or the built-in catalog when no path is configured.
    pub fn load(path: Option<&Path>) -> Result<Self, BackendCatalogError> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let raw = std::fs::read_to_string(path).map_err(|e| BackendCatalogError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let catalog = Self::from_toml_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            backends = catalog.backends.len(),
            "Loaded backend catalog"
        );
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), BackendCatalogError> {
        if self.backends.is_empty() {
            return Err(BackendCatalogError::Empty);
        }
        let mut seen = HashSet::new();
        for entry in &self.backends {
            if !seen.insert(entry.name.as_str()) {
                return Err(BackendCatalogError::DuplicateName(entry.name.clone()));
            }
        }
        if let Some(default) = &self.default_backend {
            if !seen.contains(default.as_str()) {
                return Err(BackendCatalogError::UnknownDefault(default.clone()));
            }
        }
        Ok(())
    }
}

fn required<'a>(
    entry: &'a BackendCatalogEntry,
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, BackendCatalogError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BackendCatalogError::MissingField {
            name: entry.name.clone(),
            field,
        })
}

fn build_backend(
    entry: &BackendCatalogEntry,
) -> Result<Arc<dyn GenerationBackend>, BackendCatalogError> {
    let capabilities = entry.capabilities.clone().unwrap_or_default();
    let timeout = entry
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
    let wrap = |source: BackendError| BackendCatalogError::Backend {
        name: entry.name.clone(),
        source,
    };

    let backend: Arc<dyn GenerationBackend> = match entry.kind.as_str() {
        "anthropic" => {
            let transport = AnthropicTransport::new(
                entry
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
                required(entry, &entry.model, "model")?,
                required(entry, &entry.api_key_env, "api_key_env")?,
                entry.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                timeout,
            )
            .map_err(wrap)?;
            Arc::new(RemoteBackend::new(
                entry.name.clone(),
                entry.priority,
                capabilities,
                Box::new(transport),
            ))
        }
        "openai" => {
            let transport = OpenAiTransport::new(
                entry
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                required(entry, &entry.model, "model")?,
                required(entry, &entry.api_key_env, "api_key_env")?,
                timeout,
            )
            .map_err(wrap)?;
            Arc::new(RemoteBackend::new(
                entry.name.clone(),
                entry.priority,
                capabilities,
                Box::new(transport),
            ))
        }
        "template" => Arc::new(
            TemplateBackend::new(entry.name.clone(), entry.priority)
                .with_clarification(entry.clarify.unwrap_or(false))
                .with_capabilities(capabilities),
        ),
        other => {
            return Err(BackendCatalogError::UnknownKind {
                name: entry.name.clone(),
                kind: other.to_string(),
            })
        }
    };
    Ok(backend)
}

/// Instantiate every catalog entry, in catalog order.
pub fn build_backends(
    catalog: &BackendCatalog,
) -> Result<Vec<Arc<dyn GenerationBackend>>, BackendCatalogError> {
    catalog.backends.iter().map(build_backend).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_parses() {
        let catalog = BackendCatalog::builtin().unwrap();
        assert_eq!(catalog.default_backend.as_deref(), Some("anthropic"));
        let names: Vec<&str> = catalog.backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["anthropic", "openai", "template"]);

        let backends = build_backends(&catalog).unwrap();
        assert_eq!(backends.len(), 3);
        assert_eq!(backends[2].name(), "template");
        assert!(backends[2].probe());
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let catalog = BackendCatalog::from_toml_str(
            r#"
            [[backends]]
            name = "local"
            kind = "llama"
            "#,
        )
        .unwrap();
        assert!(matches!(
            build_backends(&catalog),
            Err(BackendCatalogError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_remote_backend_requires_model() {
        let catalog = BackendCatalog::from_toml_str(
            r#"
            [[backends]]
            name = "anthropic"
            kind = "anthropic"
            api_key_env = "ANTHROPIC_API_KEY"
            "#,
        )
        .unwrap();
        assert!(matches!(
            build_backends(&catalog),
            Err(BackendCatalogError::MissingField { field: "model", .. })
        ));
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            BackendCatalog::from_toml_str("backends = []"),
            Err(BackendCatalogError::Empty)
        );
        let duplicate = r#"
            [[backends]]
            name = "a"
            kind = "template"
            [[backends]]
            name = "a"
            kind = "template"
        "#;
        assert_eq!(
            BackendCatalog::from_toml_str(duplicate),
            Err(BackendCatalogError::DuplicateName("a".to_string()))
        );
        let bad_default = r#"
            default_backend = "missing"
            [[backends]]
            name = "a"
            kind = "template"
        "#;
        assert_eq!(
            BackendCatalog::from_toml_str(bad_default),
            Err(BackendCatalogError::UnknownDefault("missing".to_string()))
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backends.toml");
        std::fs::write(
            &path,
            "[[backends]]\nname = \"outline\"\nkind = \"template\"\npriority = 3\nclarify = true\n",
        )
        .unwrap();
        let catalog = BackendCatalog::load(Some(&path)).unwrap();
        assert_eq!(catalog.backends[0].priority, 3);
        assert_eq!(catalog.backends[0].clarify, Some(true));

        let missing = BackendCatalog::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(missing, Err(BackendCatalogError::Io { .. })));
    }
}
