//! Chunked streaming endpoint

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use llmserve_core::stream_generation;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::{validate_prompt, TEXT_PLAIN};
use crate::error::ApiError;
use crate::state::AppState;

/// Relay generated output to the client one engine write at a time.
///
/// Busy, validation and engine errors raised before the first chunk are
/// reported with a status code; once output has started, failures abort the
/// chunked body.
pub async fn stream(
    State(state): State<AppState>,
    prompt: String,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    async move {
        let prompt = validate_prompt(prompt)?;
        info!("Received prompt: {} bytes", prompt.len());
        debug!("Prompt: {}", prompt);

        let guard = state.session.acquire().await?;
        let chunks = stream_generation(guard, prompt, state.stream_options()).await?;

        let body = Body::from_stream(chunks);
        Ok::<_, ApiError>(([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response())
    }
    .instrument(info_span!("stream", %request_id))
    .await
}
