mod ai_client;
mod config;
mod document;
mod errors;
mod generation;
mod models;
mod registry;
mod routes;
mod state;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ai_client::AiClient;
use crate::config::Config;
use crate::document::converter::FormatConverter;
use crate::document::filler::DocumentFiller;
use crate::document::validator::Validator;
use crate::generation::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::generation::rate_limit::RateLimiter;
use crate::registry::{TemplateCatalog, TemplateRegistry};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting docgen v{}", env!("CARGO_PKG_VERSION"));

    // Template registry (read-only from here on)
    let registry = TemplateRegistry::load(&config.template_manifest).with_context(|| {
        format!(
            "failed to load template manifest {}",
            config.template_manifest.display()
        )
    })?;
    let catalog: Arc<dyn TemplateCatalog> = Arc::new(registry);

    // Rate limiter and its background sweep
    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit_window,
        config.rate_limit_max_requests,
    ));
    let _sweeper = rate_limiter.spawn_sweeper(config.rate_limit_sweep_interval);

    // Pipeline stages
    let converter = FormatConverter::with_office_engine(config.soffice_path.clone());
    info!(strategies = ?converter.methods(), "Format converter initialized");

    let orchestrator = Orchestrator::new(
        catalog.clone(),
        rate_limiter.clone(),
        Validator::new(&config.templates_dir, config.max_template_bytes),
        DocumentFiller::new(config.max_template_bytes),
        converter,
        OrchestratorSettings {
            templates_dir: config.templates_dir.clone(),
            conversion_timeout: config.conversion_timeout,
            filename_max_len: config.filename_max_len,
        },
    );

    let ai = match &config.ai_service_url {
        Some(url) => {
            info!(url = %url, "AI relay enabled");
            Some(AiClient::new(url.clone())?)
        }
        None => {
            warn!("AI_SERVICE_URL not set; /ai routes will answer 503");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        catalog,
        rate_limiter,
        orchestrator: Arc::new(orchestrator),
        ai,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
