//! Per-request generation lifecycle: reset, prefill, step until stopped.

use std::io::{self, Write};
use tracing::{debug, error, info, warn};

use super::Session;
use crate::error::{Error, Result};
use crate::stats::RunStatistics;

impl Session {
    /// Serve one prompt, writing generated output into `sink`.
    ///
    /// The engine is reset before prefill. On any failure it is reset again
    /// before returning, so a half-finished run never leaks into the next
    /// request.
    pub fn handle<W: Write>(&mut self, prompt: &str, sink: W) -> Result<RunStatistics> {
        let mut out = TrackedSink::new(sink);
        match self.drive(prompt, &mut out) {
            Ok(stats) => {
                self.requests_served += 1;
                info!(
                    prompt_tokens = stats.prompt_tokens,
                    decode_tokens = stats.decode_tokens,
                    decode_speed = stats.decode_speed,
                    bytes = out.bytes_written,
                    "Generation complete"
                );
                Ok(stats)
            }
            Err(e) => {
                self.requests_failed += 1;
                self.engine.reset();
                if e.is_disconnect() {
                    warn!("Generation aborted after {} bytes: {}", out.bytes_written, e);
                } else if e.is_engine_failure() {
                    warn!("Engine failed during generation: {}", e);
                } else {
                    error!("Generation failed: {}", e);
                }
                Err(e)
            }
        }
    }

    fn drive<W: Write>(&mut self, prompt: &str, out: &mut TrackedSink<W>) -> Result<RunStatistics> {
        self.engine.reset();

        let result = self.engine.response(prompt, out);
        out.check(result)?;

        let mut steps = 0;
        while !self.engine.stopped() {
            if steps >= self.max_decode_steps {
                return Err(Error::InferenceError(format!(
                    "engine did not stop within {} decode steps",
                    self.max_decode_steps
                )));
            }
            let result = self.engine.generate(1, out);
            out.check(result)?;
            steps += 1;
        }
        debug!("Engine {} stopped after {} decode steps", self.engine.name(), steps);

        let result = out.flush().map_err(Error::from);
        out.check(result)?;

        Ok(RunStatistics::from_context(self.engine.context()))
    }
}

/// Remembers the first failed write so transport failures are reported as
/// such even when the engine swallows or rewraps the io error.
struct TrackedSink<W> {
    inner: W,
    failure: Option<(io::ErrorKind, String)>,
    bytes_written: usize,
}

impl<W: Write> TrackedSink<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            failure: None,
            bytes_written: 0,
        }
    }

    fn check(&self, result: Result<()>) -> Result<()> {
        if let Some((kind, message)) = &self.failure {
            return Err(Error::ClientDisconnected(format!("{:?}: {}", kind, message)));
        }
        result
    }

    fn record<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &result {
            if self.failure.is_none() {
                self.failure = Some((e.kind(), e.to_string()));
            }
        }
        result
    }
}

impl<W: Write> Write for TrackedSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some((kind, message)) = &self.failure {
            return Err(io::Error::new(*kind, message.clone()));
        }
        let result = self.inner.write(buf);
        if let Ok(n) = &result {
            self.bytes_written += n;
        }
        self.record(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.inner.flush();
        self.record(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::engine::{MockEngine, MockProbe};

    fn session(engine: MockEngine) -> (Session, MockProbe) {
        let probe = engine.probe();
        (
            Session::new(Box::new(engine), &SessionConfig::default()),
            probe,
        )
    }

    /// Records each write as its own chunk and fails after `fail_after` chunks.
    struct ChunkRecorder {
        chunks: Vec<String>,
        fail_after: Option<usize>,
    }

    impl ChunkRecorder {
        fn new() -> Self {
            Self {
                chunks: Vec::new(),
                fail_after: None,
            }
        }
    }

    impl Write for &mut ChunkRecorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_after == Some(self.chunks.len()) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"));
            }
            self.chunks.push(String::from_utf8_lossy(buf).into_owned());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_drives_engine_until_stopped() {
        let (mut session, probe) = session(MockEngine::new(["h", "i"]).with_timings(10, 5, 1));
        let mut recorder = ChunkRecorder::new();

        let stats = session.handle("hello", &mut recorder).unwrap();

        assert_eq!(recorder.chunks, vec!["h", "i"]);
        assert_eq!(stats.prompt_tokens, 5);
        assert_eq!(stats.decode_tokens, 2);
        assert_eq!(probe.resets(), 1);
        assert_eq!(probe.responses(), 1);
        assert_eq!(probe.steps(), 1);
        assert_eq!(session.requests_served(), 1);
    }

    #[test]
    fn test_sequential_requests_have_independent_stats() {
        let engine = MockEngine::new(["a", "b", "c"]).with_timings(100, 10, 1);
        let (mut session, probe) = session(engine);

        let first = session.handle("first prompt", Vec::new()).unwrap();
        let second = session.handle("first prompt", Vec::new()).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.decode_tokens, 3);
        assert_eq!(second.prefill_s, 0.0001);
        assert_eq!(probe.resets(), 2);
    }

    #[test]
    fn test_engine_failure_stops_output() {
        let (mut session, probe) = session(MockEngine::new(["a", "b", "c"]).failing_on_step(1));
        let mut recorder = ChunkRecorder::new();

        let result = session.handle("go", &mut recorder);

        assert!(matches!(result, Err(Error::InferenceError(_))));
        assert_eq!(recorder.chunks, vec!["a"]);
        assert_eq!(probe.resets(), 2);
        assert_eq!(session.requests_failed(), 1);
    }

    #[test]
    fn test_prefill_failure() {
        let (mut session, _) = session(MockEngine::new(["a"]).failing_response());
        let mut recorder = ChunkRecorder::new();

        let result = session.handle("go", &mut recorder);

        assert!(result.unwrap_err().is_engine_failure());
        assert!(recorder.chunks.is_empty());
    }

    #[test]
    fn test_unloaded_engine() {
        let (mut session, _) = session(MockEngine::new(["a"]).unloaded());
        let result = session.handle("go", Vec::new());
        assert!(matches!(result, Err(Error::ModelNotLoaded)));
    }

    #[test]
    fn test_write_failure_is_a_disconnect() {
        let (mut session, probe) = session(MockEngine::new(["a", "b", "c", "d"]));
        let mut recorder = ChunkRecorder::new();
        recorder.fail_after = Some(2);

        let result = session.handle("go", &mut recorder);

        assert!(result.unwrap_err().is_disconnect());
        assert_eq!(recorder.chunks, vec!["a", "b"]);
        assert_eq!(probe.steps(), 2);
    }

    #[test]
    fn test_session_reusable_after_disconnect() {
        let (mut session, _) = session(MockEngine::new(["x", "y"]));
        let mut broken = ChunkRecorder::new();
        broken.fail_after = Some(0);
        assert!(session.handle("go", &mut broken).is_err());

        let mut recorder = ChunkRecorder::new();
        let stats = session.handle("go", &mut recorder).unwrap();
        assert_eq!(recorder.chunks, vec!["x", "y"]);
        assert_eq!(stats.decode_tokens, 2);
    }

    #[test]
    fn test_step_ceiling() {
        let engine = MockEngine::new(["z"]).never_stopping();
        let probe = engine.probe();
        let config = SessionConfig {
            max_decode_steps: 4,
            ..SessionConfig::default()
        };
        let mut session = Session::new(Box::new(engine), &config);

        let result = session.handle("go", Vec::new());

        assert!(matches!(result, Err(Error::InferenceError(_))));
        assert_eq!(probe.steps(), 4);
    }
}
