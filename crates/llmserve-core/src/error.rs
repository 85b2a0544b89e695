//! Error types for the llmserve core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Model loading failed: {0}")]
    ModelLoadError(String),

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("Tokenization error: {0}")]
    TokenizationError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Client disconnected: {0}")]
    ClientDisconnected(String),

    #[error("Session busy")]
    SessionBusy,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// True for failures raised by the engine while serving a request.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Error::ModelNotLoaded
                | Error::TokenizationError(_)
                | Error::InferenceError(_)
                | Error::IoError(_)
        )
    }

    /// True when the client went away mid-response.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::ClientDisconnected(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
