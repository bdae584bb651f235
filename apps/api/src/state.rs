use std::sync::Arc;

use crate::ai_client::AiClient;
use crate::config::Config;
use crate::generation::orchestrator::Orchestrator;
use crate::generation::rate_limit::RateLimiter;
use crate::registry::TemplateCatalog;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Read-only after startup.
    pub catalog: Arc<dyn TemplateCatalog>,
    /// Shared with the orchestrator; the AI relay counts against the same windows.
    pub rate_limiter: Arc<RateLimiter>,
    pub orchestrator: Arc<Orchestrator>,
    /// `None` when `AI_SERVICE_URL` is unset.
    pub ai: Option<AiClient>,
}
