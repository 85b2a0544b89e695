//! HTTP routes

mod generate;
mod health;
mod stream;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Build the router for `/health`, `/generate` and `/stream`.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_prompt_bytes;

    Router::new()
        .route("/health", get(health::health))
        .route("/generate", post(generate::generate))
        .route("/stream", post(stream::stream))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn validate_prompt(prompt: String) -> Result<String, ApiError> {
    if prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt is empty"));
    }
    Ok(prompt)
}
