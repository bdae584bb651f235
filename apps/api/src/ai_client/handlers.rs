use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    Json,
};
use serde_json::Value;

use crate::ai_client::{AiError, AiService};
use crate::errors::AppError;
use crate::generation::handlers::{client_id, read_body};
use crate::state::AppState;

/// POST /ai/:service
///
/// Opaque relay for `score`, `chat` and `match`. Counts against the same
/// rate-limit window as `/generate`.
pub async fn handle_ai_relay(
    State(state): State<AppState>,
    Path(service): Path<String>,
    request: Request,
) -> Result<Json<Value>, AppError> {
    let client = client_id(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );
    state.orchestrator.admit(&client)?;

    let service: AiService = service.parse().map_err(AppError::NotFound)?;
    let ai = state
        .ai
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("AI service is not configured".to_string()))?;

    let body = read_body(request, state.config.max_request_bytes).await?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::validation_with_details("Invalid request body", e.to_string()))?;

    let response = ai.relay(service, &payload).await.map_err(|e| match e {
        AiError::Api { status, message } if (400..500).contains(&status) && status != 429 => {
            AppError::validation_with_details(format!("AI service rejected the request ({status})"), message)
        }
        other => AppError::Upstream(other.to_string()),
    })?;
    Ok(Json(response))
}
