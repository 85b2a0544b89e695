//! Scripted engine for tests.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{GenerationContext, InferenceEngine};
use crate::error::{Error, Result};

/// Shared counters that stay readable after the engine moved into a session.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    resets: Arc<AtomicUsize>,
    responses: Arc<AtomicUsize>,
    steps: Arc<AtomicUsize>,
}

impl MockProbe {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> usize {
        self.responses.load(Ordering::SeqCst)
    }

    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }
}

/// Emits a fixed list of tokens, then stops.
///
/// `response` emits the first token, every `generate(1)` one more. Timings
/// are fixed per run so rendered stats are predictable.
pub struct MockEngine {
    tokens: Vec<String>,
    prefill_us: u64,
    decode_us_per_token: u64,
    sample_us_per_token: u64,
    fail_on_response: bool,
    fail_on_step: Option<usize>,
    never_stops: bool,
    step_delay: Option<Duration>,
    loaded: bool,
    probe: MockProbe,

    cursor: usize,
    steps_this_run: usize,
    context: GenerationContext,
    stopped: bool,
}

impl MockEngine {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            prefill_us: 0,
            decode_us_per_token: 0,
            sample_us_per_token: 0,
            fail_on_response: false,
            fail_on_step: None,
            never_stops: false,
            step_delay: None,
            loaded: true,
            probe: MockProbe::default(),
            cursor: 0,
            steps_this_run: 0,
            context: GenerationContext::default(),
            stopped: true,
        }
    }

    /// Fixed prefill time plus per-token decode and sample times.
    pub fn with_timings(mut self, prefill_us: u64, decode_us: u64, sample_us: u64) -> Self {
        self.prefill_us = prefill_us;
        self.decode_us_per_token = decode_us;
        self.sample_us_per_token = sample_us;
        self
    }

    pub fn failing_response(mut self) -> Self {
        self.fail_on_response = true;
        self
    }

    /// Fail the `step`-th generate call of a run (1-based).
    pub fn failing_on_step(mut self, step: usize) -> Self {
        self.fail_on_step = Some(step);
        self
    }

    /// Keep repeating the token list forever.
    pub fn never_stopping(mut self) -> Self {
        self.never_stops = true;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn unloaded(mut self) -> Self {
        self.loaded = false;
        self
    }

    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    fn emit(&mut self, out: &mut dyn Write) -> Result<()> {
        if let Some(delay) = self.step_delay {
            std::thread::sleep(delay);
        }
        if self.tokens.is_empty() {
            self.stopped = true;
            return Ok(());
        }

        let token = &self.tokens[self.cursor % self.tokens.len()];
        out.write_all(token.as_bytes())?;
        self.cursor += 1;
        self.context.gen_seq_len += 1;
        self.context.decode_us += self.decode_us_per_token;
        self.context.sample_us += self.sample_us_per_token;

        if !self.never_stops && self.cursor >= self.tokens.len() {
            self.stopped = true;
        }
        Ok(())
    }
}

impl InferenceEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn load(&mut self) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
        self.cursor = 0;
        self.steps_this_run = 0;
        self.context.clear();
        self.stopped = true;
    }

    fn response(&mut self, prompt: &str, out: &mut dyn Write) -> Result<()> {
        self.probe.responses.fetch_add(1, Ordering::SeqCst);
        if !self.loaded {
            return Err(Error::ModelNotLoaded);
        }
        if self.fail_on_response {
            return Err(Error::InferenceError("scripted prefill failure".to_string()));
        }

        self.context.prompt_len = prompt.chars().count();
        self.context.prefill_us = self.prefill_us;
        self.stopped = false;
        self.emit(out)
    }

    fn generate(&mut self, steps: usize, out: &mut dyn Write) -> Result<()> {
        if !self.loaded {
            return Err(Error::ModelNotLoaded);
        }
        for _ in 0..steps {
            self.probe.steps.fetch_add(1, Ordering::SeqCst);
            self.steps_this_run += 1;
            if self.fail_on_step == Some(self.steps_this_run) {
                return Err(Error::InferenceError(format!(
                    "scripted failure on step {}",
                    self.steps_this_run
                )));
            }
            if self.stopped {
                break;
            }
            self.emit(out)?;
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
