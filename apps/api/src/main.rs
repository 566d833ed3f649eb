mod config;
mod errors;
mod interview;
mod llm_client;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::interview::store::{run_idle_sweeper, SessionStore};
use crate::llm_client::{LlmConnector, Provider};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Interview API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM connector
    let llm = LlmConnector::new(
        config.llm_timeout,
        &config.openai_base_url,
        &config.anthropic_base_url,
    )?;
    info!(
        "LLM connector initialized (default provider: {}, model: {})",
        config.default_provider,
        config.default_provider.model()
    );
    for provider in [Provider::OpenAi, Provider::Anthropic] {
        if config.fallback_credential(provider).is_some() {
            info!("Server-side {provider} key available for new sessions");
        }
    }

    let sessions = Arc::new(SessionStore::default());
    tokio::spawn(run_idle_sweeper(sessions.clone(), config.session_ttl));
    info!("Idle sessions expire after {}s", config.session_ttl.as_secs());

    let state = AppState {
        sessions,
        llm: Arc::new(llm),
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the UI host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
