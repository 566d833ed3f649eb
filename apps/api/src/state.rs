use std::sync::Arc;

use crate::config::Config;
use crate::interview::store::SessionStore;
use crate::llm_client::ProviderFactory;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    /// Pluggable provider factory. Default: LlmConnector over the real HTTP APIs.
    pub llm: Arc<dyn ProviderFactory>,
    pub config: Config,
}
