use crate::mesh::glb::MIME_TYPE;
use crate::services::metrics;
use crate::startup::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use tokio_util::io::ReaderStream;

/// Prompt clients send to test connectivity without generating anything.
pub const CONNECTION_CHECK_PROMPT: &str = "Checking Connection";
pub const CONNECTION_CHECK_REPLY: &str = "Connected To Server!";
pub const MISSING_PROMPT_REPLY: &str = "No prompt provided!";

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

pub async fn generate_model(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", rejection.body_text()))
    })?;

    let prompt = match request.prompt {
        Some(prompt) if !prompt.is_empty() => prompt,
        _ => {
            tracing::warn!("Generation request without prompt");
            return Ok((StatusCode::BAD_REQUEST, MISSING_PROMPT_REPLY).into_response());
        }
    };

    if prompt == CONNECTION_CHECK_PROMPT {
        metrics::record_connection_check();
        tracing::info!("Connection check received");
        return Ok((StatusCode::OK, CONNECTION_CHECK_REPLY).into_response());
    }

    tracing::info!(prompt = %prompt, "Starting model generation for prompt");

    // Run detached so a client disconnect does not abort a generation that
    // already holds the device.
    let generator = state.generator.clone();
    let task_prompt = prompt.clone();
    let model = tokio::spawn(async move { generator.generate(&task_prompt).await })
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Generation task failed: {}", e)))?
        .map_err(|e| {
            tracing::error!(prompt = %prompt, error = %e, "Model generation failed");
            e
        })?;

    tracing::info!(
        file = %model.file_name,
        size = model.size,
        "Sending generated model"
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, MIME_TYPE.to_string()),
            (header::CONTENT_LENGTH, model.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", model.file_name),
            ),
        ],
        Body::from_stream(ReaderStream::new(model.file)),
    )
        .into_response())
}
