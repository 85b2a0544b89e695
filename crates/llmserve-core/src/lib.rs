//! llmserve core - single-session LLM serving lifecycle
//!
//! This crate drives one pre-loaded inference engine on behalf of HTTP
//! requests:
//! - a [`Session`] owns the engine and is shared behind an exclusive guard
//! - the controller resets the engine, runs prefill, then steps decode until
//!   the engine reports it stopped
//! - the streaming bridge turns the engine's synchronous writes into a chunked
//!   body stream
//! - run counters are turned into a fixed-format statistics report
//!
//! # Example
//!
//! ```ignore
//! use llmserve_core::{load_engine, run_buffered, BusyPolicy, ModelConfig, Session,
//!     SessionConfig, SharedSession};
//!
//! let engine = load_engine(&ModelConfig::from_file("config.json")?)?;
//! let session = SharedSession::new(Session::new(engine, &SessionConfig::default()),
//!     BusyPolicy::Wait);
//!
//! let guard = session.acquire().await?;
//! let output = run_buffered(guard, "hello".to_string()).await?;
//! println!("{}{}", output.text, output.stats);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod stats;
pub mod streaming;
pub mod tokenizer;

pub use config::{
    Backend, BusyPolicy, EngineKind, ModelConfig, ServerConfig, SessionConfig, StreamConfig,
};
pub use engine::{create_engine, load_engine, EchoEngine, GenerationContext, InferenceEngine};
#[cfg(any(test, feature = "test-util"))]
pub use engine::{MockEngine, MockProbe};
pub use error::{Error, Result};
pub use session::{run_buffered, BufferedOutput, Session, SessionGuard, SharedSession};
pub use stats::{render, RunStatistics};
pub use streaming::{stream_generation, ChunkWriter, StreamOptions};
pub use tokenizer::{TokenSpan, Tokenizer};
