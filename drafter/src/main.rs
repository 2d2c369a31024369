use axum::http::{header, HeaderValue, Method};
use drafter::api;
use drafter::app_state::AppState;
use drafter::config::Config;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

/// `.env` from the working directory or the nearest ancestor holding one.
fn load_env_file() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::info!(path = %path.display(), "Loaded DRAFTER_* settings from .env"),
        Err(e) if e.not_found() => {
            tracing::debug!("No .env found; DRAFTER_* settings come from the process environment")
        }
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Before config so backend keys and DRAFTER_* values from .env apply.
    load_env_file();
    let config = Config::from_env()?;

    tracing::info!("Starting Drafter generation service");

    let allowed_origins = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let app_state = AppState::bootstrap(config).await?;
    let app = api::router()
        .with_state(api::ApiState::new(app_state))
        .layer(cors);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening for HTTP and WebSocket connections");
    axum::serve(listener, app).await?;
    Ok(())
}
