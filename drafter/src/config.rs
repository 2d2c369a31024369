use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to
    pub bind_addr: String,
    /// Port the server listens on
    pub port: u16,
    /// Directory whose subdirectories are served as corpora
    pub corpus_root: PathBuf,
    /// SQLite path for the chunk index (`:memory:` keeps it in-process)
    pub index_db_path: String,
    /// Optional TOML backend catalog; the built-in catalog is used when unset
    pub backend_catalog_path: Option<PathBuf>,
    /// Maximum code references attached by semantic retrieval
    pub max_results: usize,
    /// Minimum cosine similarity for a chunk to be kept
    pub similarity_threshold: f32,
    /// Capacity of each session's outbound event queue
    pub outbound_capacity: usize,
    /// How long a clarification round may stay unanswered
    pub clarification_timeout: Duration,
    /// Recency window used when correlating a request by title
    pub correlation_window: Duration,
    /// Origins allowed by the CORS layer
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            corpus_root: PathBuf::from("./corpora"),
            index_db_path: ":memory:".to_string(),
            backend_catalog_path: None,
            max_results: 10,
            similarity_threshold: 0.5,
            outbound_capacity: 256,
            clarification_timeout: Duration::from_secs(600),
            correlation_window: Duration::from_secs(60),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let similarity_threshold: f32 =
            env_parse("DRAFTER_SIMILARITY_THRESHOLD", defaults.similarity_threshold)?;
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(anyhow::anyhow!(
                "DRAFTER_SIMILARITY_THRESHOLD must be within [0, 1], got {similarity_threshold}"
            ));
        }

        Ok(Self {
            bind_addr: env_str("DRAFTER_BIND", &defaults.bind_addr),
            port: env_parse("DRAFTER_PORT", defaults.port)?,
            corpus_root: std::env::var("DRAFTER_CORPUS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.corpus_root),
            index_db_path: env_str("DRAFTER_INDEX_DB", &defaults.index_db_path),
            backend_catalog_path: std::env::var("DRAFTER_BACKEND_CATALOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            max_results: env_parse("DRAFTER_MAX_RESULTS", defaults.max_results)?.max(1),
            similarity_threshold,
            outbound_capacity: env_parse("DRAFTER_OUTBOUND_CAPACITY", defaults.outbound_capacity)?
                .max(1),
            clarification_timeout: Duration::from_secs(env_parse(
                "DRAFTER_CLARIFICATION_TIMEOUT_SECS",
                defaults.clarification_timeout.as_secs(),
            )?),
            correlation_window: Duration::from_secs(env_parse(
                "DRAFTER_CORRELATION_WINDOW_SECS",
                defaults.correlation_window.as_secs(),
            )?),
            allowed_origins: env_csv(
                "DRAFTER_ALLOWED_ORIGINS",
                &["http://localhost:3000", "http://127.0.0.1:3000"],
            ),
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}
