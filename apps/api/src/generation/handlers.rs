//! Axum route handlers for the Generation API.

use std::net::SocketAddr;

use axum::{
    extract::{
        rejection::{BytesRejection, FailedToBufferBody},
        ConnectInfo, FromRequest, Request, State,
    },
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use serde::Serialize;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::generation::{
    ArtifactFile, GeneratedArtifact, GenerationMetadata, GenerationRequest, OutputFormat,
};
use crate::state::AppState;

pub const TEMPLATE_ID_HEADER: HeaderName = HeaderName::from_static("x-template-id");
pub const CONVERSION_METHOD_HEADER: HeaderName = HeaderName::from_static("x-conversion-method");
pub const WARNINGS_HEADER: HeaderName = HeaderName::from_static("x-generation-warnings");

// ────────────────────────────────────────────────────────────────────────────
// Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub size: usize,
    /// Base64 (standard alphabet, padded).
    pub content: String,
}

impl From<ArtifactFile> for EncodedFile {
    fn from(file: ArtifactFile) -> Self {
        Self {
            size: file.size(),
            content: BASE64.encode(&file.bytes),
            filename: file.filename,
            mime_type: file.mime_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EncodedFiles {
    pub primary: EncodedFile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<EncodedFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiFormatResponse {
    pub success: bool,
    pub data: EncodedFiles,
    pub metadata: GenerationMetadata,
    pub processing_time_ms: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /generate
///
/// Rate check happens before the body is read; the body is then read under
/// `MAX_REQUEST_BYTES` and parsed. Single-format requests get the file as a
/// download, `both` gets a JSON envelope with base64 content.
pub async fn handle_generate(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let client = client_id(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );
    state.orchestrator.admit(&client)?;

    let body = read_body(request, state.config.max_request_bytes).await?;
    let generation_request = parse_generation_request(&body)?;

    let span = info_span!(
        "generate",
        request_id = %Uuid::new_v4(),
        client = %client,
        template = generation_request.options.template_id.as_deref().unwrap_or_default()
    );
    let artifact = state
        .orchestrator
        .generate(generation_request)
        .instrument(span)
        .await?;

    package(artifact)
}

/// Reads the whole body under the router's `DefaultBodyLimit` (`limit`).
/// Only the length limit maps to 413; a body that breaks off is a 400.
pub async fn read_body(request: Request, limit: usize) -> Result<Bytes, AppError> {
    match Bytes::from_request(request, &()).await {
        Ok(bytes) => Ok(bytes),
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => Err(
            AppError::PayloadTooLarge(format!("Request body exceeds the {limit} byte limit")),
        ),
        Err(rejection) => Err(AppError::validation_with_details(
            "Request body could not be read",
            rejection.body_text(),
        )),
    }
}

pub fn parse_generation_request(body: &[u8]) -> Result<GenerationRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::validation_with_details(
            "Request body is required",
            "Expected a JSON object with cvData and options",
        ));
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::validation_with_details("Invalid request body", e.to_string()))
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
pub fn client_id(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    header_value("x-forwarded-for")
        .or_else(|| header_value("x-real-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Response shaping
// ────────────────────────────────────────────────────────────────────────────

fn package(artifact: GeneratedArtifact) -> Result<Response, AppError> {
    let GeneratedArtifact {
        format,
        primary,
        secondary,
        metadata,
    } = artifact;

    let missing = |which: &str| AppError::Internal(anyhow::anyhow!("{which} artifact missing after generation"));
    match format {
        OutputFormat::Both => {
            let primary = primary.ok_or_else(|| missing("primary"))?;
            Ok(Json(MultiFormatResponse {
                success: true,
                data: EncodedFiles {
                    primary: primary.into(),
                    secondary: secondary.map(EncodedFile::from),
                },
                processing_time_ms: metadata.processing_time_ms,
                metadata,
            })
            .into_response())
        }
        OutputFormat::Primary => download(primary.ok_or_else(|| missing("primary"))?, &metadata),
        OutputFormat::Secondary => download(secondary.ok_or_else(|| missing("secondary"))?, &metadata),
    }
}

fn download(file: ArtifactFile, metadata: &GenerationMetadata) -> Result<Response, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(file.mime_type));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.filename))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid filename header: {e}")))?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size()));
    if let Ok(value) = HeaderValue::from_str(&metadata.template_id) {
        headers.insert(TEMPLATE_ID_HEADER, value);
    }
    if let Some(method) = &metadata.conversion_method {
        if let Ok(value) = HeaderValue::from_str(method) {
            headers.insert(CONVERSION_METHOD_HEADER, value);
        }
    }
    headers.insert(WARNINGS_HEADER, HeaderValue::from(metadata.warnings.len()));

    Ok((headers, file.bytes).into_response())
}
