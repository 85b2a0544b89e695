//! llmserve server - HTTP surface over a single pre-loaded LLM session

pub mod api;
pub mod cli;
pub mod error;
pub mod settings;
pub mod state;

pub use api::create_router;
pub use error::ApiError;
pub use state::AppState;
