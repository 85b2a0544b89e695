//! Single-shot generation endpoint

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use llmserve_core::{render, run_buffered};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::{validate_prompt, TEXT_PLAIN};
use crate::error::ApiError;
use crate::state::AppState;

/// Generate the full response, then append the stats report.
pub async fn generate(
    State(state): State<AppState>,
    prompt: String,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    async move {
        let prompt = validate_prompt(prompt)?;
        info!("Received prompt: {} bytes", prompt.len());
        debug!("Prompt: {}", prompt);

        let guard = state.session.acquire().await?;
        let output = run_buffered(guard, prompt).await?;

        let mut body = output.text;
        body.push_str(&render(&output.stats));
        debug!("Final output:\n{}", body);

        Ok::<_, ApiError>(([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response())
    }
    .instrument(info_span!("generate", %request_id))
    .await
}
