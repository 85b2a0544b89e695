//! Inference engine interface consumed by the session controller.
//!
//! The engine owns tokenization, weights and the forward pass. The server only
//! drives it through [`InferenceEngine`]: reset, a prefill-plus-first-burst
//! `response`, single-step `generate` calls until `stopped`, and a read-only
//! view of the run counters.
//!
//! Output is written synchronously into the `io::Write` passed to each call.
//! Every `write` is treated downstream as one chunk, so engines should write
//! each decoded piece with a single `write_all`.

mod echo;
#[cfg(any(test, feature = "test-util"))]
mod mock;

use std::io::Write;
use std::time::Instant;
use tracing::info;

use crate::config::{EngineKind, ModelConfig};
use crate::error::Result;

pub use echo::EchoEngine;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockEngine, MockProbe};

/// Counters for the current run, valid between one reset and the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationContext {
    /// Prompt length in tokens
    pub prompt_len: usize,
    /// Generated tokens so far
    pub gen_seq_len: usize,
    /// Time spent in prefill (microseconds)
    pub prefill_us: u64,
    /// Time spent in decode steps (microseconds)
    pub decode_us: u64,
    /// Time spent sampling (microseconds)
    pub sample_us: u64,
}

impl GenerationContext {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A loaded model that generates text one step at a time.
pub trait InferenceEngine: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Load weights and prepare for inference. May be slow.
    fn load(&mut self) -> Result<()>;

    /// Clear the prompt, progress flag and counters of the previous run.
    fn reset(&mut self);

    /// Prefill `prompt` and write the first burst of output into `out`.
    fn response(&mut self, prompt: &str, out: &mut dyn Write) -> Result<()>;

    /// Decode `steps` more tokens, writing each into `out`.
    fn generate(&mut self, steps: usize, out: &mut dyn Write) -> Result<()>;

    /// True once the stop condition (stop token, length limit) was reached.
    fn stopped(&self) -> bool;

    fn context(&self) -> &GenerationContext;
}

/// Build the engine named in `config` without loading it.
pub fn create_engine(config: &ModelConfig) -> Result<Box<dyn InferenceEngine>> {
    match config.engine {
        EngineKind::Echo => Ok(Box::new(EchoEngine::new(config.clone()))),
    }
}

/// Build and load the configured engine, logging how long loading took.
pub fn load_engine(config: &ModelConfig) -> Result<Box<dyn InferenceEngine>> {
    let mut engine = create_engine(config)?;
    let started = Instant::now();
    engine.load()?;
    info!(
        "Engine {} loaded in {:.3}s",
        engine.name(),
        started.elapsed().as_secs_f64()
    );
    Ok(engine)
}

pub(crate) fn elapsed_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}
