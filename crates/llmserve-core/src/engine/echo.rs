//! Deterministic engine that decodes the prompt back to the caller.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Instant;
use tracing::{debug, info};

use super::{elapsed_us, GenerationContext, InferenceEngine};
use crate::config::{Backend, ModelConfig};
use crate::error::{Error, Result};
use crate::tokenizer::{TokenSpan, Tokenizer};

/// Echoes the prompt one token per decode step.
///
/// Runs the whole serving path (tokenization, prefill, stepwise decode,
/// counters) without model weights.
pub struct EchoEngine {
    config: ModelConfig,
    tokenizer: Option<Tokenizer>,
    pending: VecDeque<TokenSpan>,
    context: GenerationContext,
    stopped: bool,
}

impl EchoEngine {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            tokenizer: None,
            pending: VecDeque::new(),
            context: GenerationContext::default(),
            stopped: true,
        }
    }

    fn tokenizer(&self) -> Result<&Tokenizer> {
        self.tokenizer.as_ref().ok_or(Error::ModelNotLoaded)
    }

    fn step(&mut self, out: &mut dyn Write) -> Result<()> {
        let started = Instant::now();

        let sample_started = Instant::now();
        let next = self.pending.pop_front();
        self.context.sample_us += elapsed_us(sample_started);

        if let Some(token) = next {
            self.context.gen_seq_len += 1;
            if !token.text.is_empty() {
                out.write_all(token.text.as_bytes())?;
            }
        }

        if self.pending.is_empty() || self.context.gen_seq_len >= self.config.max_new_tokens {
            self.stopped = true;
        }

        self.context.decode_us += elapsed_us(started);
        Ok(())
    }
}

impl InferenceEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn load(&mut self) -> Result<()> {
        if self.config.backend != Backend::Cpu {
            return Err(Error::ModelLoadError(format!(
                "echo engine only runs on the cpu backend, got {:?}",
                self.config.backend
            )));
        }

        std::fs::create_dir_all(&self.config.tmp_path).map_err(|e| {
            Error::ModelLoadError(format!(
                "cannot create tmp_path {:?}: {}",
                self.config.tmp_path, e
            ))
        })?;

        let tokenizer = match &self.config.tokenizer {
            Some(path) => Tokenizer::from_path(path)
                .map_err(|e| Error::ModelLoadError(e.to_string()))?,
            None => Tokenizer::Chars,
        };
        info!("Echo engine ready, vocab size {}", tokenizer.vocab_size());
        self.tokenizer = Some(tokenizer);
        Ok(())
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.context.clear();
        self.stopped = true;
    }

    fn response(&mut self, prompt: &str, out: &mut dyn Write) -> Result<()> {
        let started = Instant::now();
        let spans = self.tokenizer()?.encode_spans(prompt)?;
        self.context.prompt_len = spans.len();
        self.pending = spans.into();
        self.context.prefill_us += elapsed_us(started);
        debug!("Prefilled {} prompt tokens", self.context.prompt_len);

        self.stopped = self.pending.is_empty();
        if self.stopped {
            return Ok(());
        }
        self.step(out)
    }

    fn generate(&mut self, steps: usize, out: &mut dyn Write) -> Result<()> {
        if self.tokenizer.is_none() {
            return Err(Error::ModelNotLoaded);
        }
        for _ in 0..steps {
            if self.stopped {
                break;
            }
            self.step(out)?;
        }
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stopped
    }

    fn context(&self) -> &GenerationContext {
        &self.context
    }
}
