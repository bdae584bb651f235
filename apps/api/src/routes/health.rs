use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns a simple status object with service version, template count and
/// the number of clients currently holding a rate-limit window.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
        "templates": state.catalog.list().len(),
        "trackedClients": state.rate_limiter.tracked_clients(),
        "aiRelay": state.ai.is_some(),
    }))
}
